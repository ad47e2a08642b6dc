//! Retention sweeps for tempbox.
//!
//! Two independent passes run against the active store:
//!
//! - **TTL**: unstarred messages older than the retention window, and
//!   addresses past their expiry.
//! - **Deferred spam**: messages whose scheduled deletion is due, starred
//!   or not.
//!
//! Both are predicate-based bulk deletes, so a sweep can be repeated or run
//! concurrently with another without harm. Afterwards, tombstones that no
//! longer hide a historical row are pruned.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::RetentionConfig;
use crate::datetime::{self, retention_cutoff};
use crate::db::Stores;
use crate::mailbox::{Address, AddressRepository, Message, MessageRepository};
use crate::spam::SpamRule;

/// Default sweep interval in seconds (1 hour).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Counts of rows removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Messages removed by either pass.
    pub deleted_messages: u64,
    /// Addresses removed by the TTL pass.
    pub deleted_addresses: u64,
}

impl SweepReport {
    /// Check whether the sweep removed anything.
    pub fn is_empty(&self) -> bool {
        self.deleted_messages == 0 && self.deleted_addresses == 0
    }
}

/// Periodic retention sweeper.
pub struct RetentionSweeper {
    stores: Arc<Stores>,
    retention_days: i64,
    sweep_interval: Duration,
}

impl RetentionSweeper {
    /// Create a new sweeper with the given retention window.
    pub fn new(stores: Arc<Stores>, retention_days: i64) -> Self {
        Self {
            stores,
            retention_days,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }

    /// Create a sweeper from the retention configuration.
    pub fn from_config(stores: Arc<Stores>, config: &RetentionConfig) -> Self {
        Self::new(stores, config.retention_days).with_interval(config.sweep_interval_secs)
    }

    /// Set the sweep interval.
    pub fn with_interval(mut self, interval_secs: u64) -> Self {
        self.sweep_interval = Duration::from_secs(interval_secs.max(1));
        self
    }

    /// Run both passes now.
    pub async fn run_once(&self) -> SweepReport {
        self.run_once_at(datetime::now()).await
    }

    /// Run both passes as of `now`.
    ///
    /// A failing pass is logged and contributes nothing to the report; it
    /// never stops the other pass.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> SweepReport {
        let active = self.stores.active();
        let messages = MessageRepository::new(active);
        let addresses = AddressRepository::new(active);
        let mut report = SweepReport::default();

        // Pass A: TTL
        let cutoff = retention_cutoff(&now, self.retention_days);
        match messages.delete_unstarred_before(&cutoff).await {
            Ok(n) => {
                debug!("TTL pass removed {} message(s)", n);
                report.deleted_messages += n;
            }
            Err(e) => error!("TTL pass failed on messages: {}", e),
        }
        match addresses.delete_expired(&now).await {
            Ok(n) => {
                debug!("TTL pass removed {} address(es)", n);
                report.deleted_addresses += n;
            }
            Err(e) => error!("TTL pass failed on addresses: {}", e),
        }

        // Pass B: deferred spam
        match messages.delete_deferred_due(&now).await {
            Ok(n) => {
                debug!("Deferred spam pass removed {} message(s)", n);
                report.deleted_messages += n;
            }
            Err(e) => error!("Deferred spam pass failed: {}", e),
        }

        self.prune_tombstones().await;

        if report.is_empty() {
            debug!("Retention sweep removed nothing");
        } else {
            info!(
                "Retention sweep removed {} message(s) and {} address(es)",
                report.deleted_messages, report.deleted_addresses
            );
        }
        report
    }

    async fn prune_tombstones(&self) {
        let merger = self.stores.merger();
        let results = [
            merger.prune_tombstones::<Address>().await,
            merger.prune_tombstones::<Message>().await,
            merger.prune_tombstones::<SpamRule>().await,
        ];
        for result in results {
            if let Err(e) = result {
                error!("Tombstone pruning failed: {}", e);
            }
        }
    }

    /// Run the sweep loop indefinitely.
    pub async fn run(&self) {
        info!(
            "Retention sweeper started (interval: {} seconds, retention: {} days)",
            self.sweep_interval.as_secs(),
            self.retention_days
        );

        let mut timer = interval(self.sweep_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;
            self.run_once().await;
        }
    }
}

/// Start the retention sweeper as a background task.
pub fn start_sweeper(stores: Arc<Stores>, config: &RetentionConfig) -> JoinHandle<()> {
    let sweeper = RetentionSweeper::from_config(stores, config);
    tokio::spawn(async move {
        sweeper.run().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DualStoreMerger};
    use crate::mailbox::{Address, Message};
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn message(id: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: id.to_string(),
            address: "box@tempbox.local".to_string(),
            from: "a@b.test".to_string(),
            subject: String::new(),
            body: String::new(),
            html: None,
            timestamp: at,
            read: false,
            starred: false,
            spam_flag: false,
            deferred_delete_at: None,
        }
    }

    async fn stores() -> Arc<Stores> {
        let active = Database::open_in_memory().await.unwrap();
        let address = Address::new_orphan("box@tempbox.local", ChronoDuration::days(30), t0());
        DualStoreMerger::new(&active, None).write(&address).await.unwrap();
        Arc::new(Stores::new(active, None))
    }

    async fn write(stores: &Stores, message: &Message) {
        stores.merger().write(message).await.unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_from_config() {
        let config = RetentionConfig {
            retention_days: 3,
            sweep_interval_secs: 60,
            address_ttl_hours: 1,
        };
        let sweeper = RetentionSweeper::from_config(stores().await, &config);
        assert_eq!(sweeper.sweep_interval, Duration::from_secs(60));
        assert_eq!(sweeper.retention_days, 3);

        let sweeper = RetentionSweeper::new(stores().await, 7);
        assert_eq!(
            sweeper.sweep_interval,
            Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS)
        );
    }

    #[tokio::test]
    async fn test_ttl_pass_spares_starred() {
        let stores = stores().await;
        write(&stores, &message("old", t0() - ChronoDuration::days(8))).await;
        let mut starred = message("old-starred", t0() - ChronoDuration::days(8));
        starred.starred = true;
        write(&stores, &starred).await;
        write(&stores, &message("fresh", t0() - ChronoDuration::days(1))).await;

        let sweeper = RetentionSweeper::new(stores.clone(), 7);
        let report = sweeper.run_once_at(t0()).await;
        assert_eq!(
            report,
            SweepReport {
                deleted_messages: 1,
                deleted_addresses: 0
            }
        );

        let left: Vec<Message> = stores
            .merger()
            .get_all_where("address", "box@tempbox.local".to_string())
            .await
            .unwrap();
        let ids: Vec<&str> = left.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["fresh", "old-starred"]);
    }

    #[tokio::test]
    async fn test_deferred_pass_ignores_star() {
        let stores = stores().await;
        let mut spam = message("spam", t0());
        spam.spam_flag = true;
        spam.starred = true;
        spam.deferred_delete_at = Some(t0() + ChronoDuration::minutes(10));
        write(&stores, &spam).await;

        let sweeper = RetentionSweeper::new(stores.clone(), 7);
        assert!(sweeper
            .run_once_at(t0() + ChronoDuration::minutes(5))
            .await
            .is_empty());
        assert_eq!(
            sweeper
                .run_once_at(t0() + ChronoDuration::minutes(11))
                .await
                .deleted_messages,
            1
        );
    }

    #[tokio::test]
    async fn test_expired_addresses_removed() {
        let stores = stores().await;
        let sweeper = RetentionSweeper::new(stores.clone(), 7);

        assert!(sweeper.run_once_at(t0() + ChronoDuration::days(30)).await.is_empty());
        let report = sweeper
            .run_once_at(t0() + ChronoDuration::days(31))
            .await;
        assert_eq!(report.deleted_addresses, 1);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let stores = stores().await;
        write(&stores, &message("old", t0() - ChronoDuration::days(8))).await;
        let sweeper = RetentionSweeper::new(stores, 7);

        assert_eq!(sweeper.run_once_at(t0()).await.deleted_messages, 1);
        assert_eq!(sweeper.run_once_at(t0()).await, SweepReport::default());
    }

    #[tokio::test]
    async fn test_failing_ttl_pass_does_not_stop_deferred_pass() {
        let stores = stores().await;
        let mut spam = message("spam", t0());
        spam.deferred_delete_at = Some(t0());
        write(&stores, &spam).await;
        // Without foreign keys the drop leaves the messages in place
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(stores.active().pool())
            .await
            .unwrap();
        sqlx::query("DROP TABLE addresses")
            .execute(stores.active().pool())
            .await
            .unwrap();

        let sweeper = RetentionSweeper::new(stores, 7);
        let report = sweeper.run_once_at(t0()).await;
        assert_eq!(report.deleted_messages, 1);
        assert_eq!(report.deleted_addresses, 0);
    }

    #[test]
    fn test_report_serializes() {
        let report = SweepReport {
            deleted_messages: 2,
            deleted_addresses: 1,
        };
        assert_eq!(
            serde_json::to_string(&report).unwrap(),
            r#"{"deleted_messages":2,"deleted_addresses":1}"#
        );
    }
}

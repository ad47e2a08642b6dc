//! Shared helpers for tempbox integration tests.
//!
//! Every test gets its own temporary directory holding file-backed active
//! and historical stores.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use tempbox::db::{Database, DualStoreMerger, Record, StoreOptions};
use tempbox::{Address, Config, MailboxService, Message, Stores};

/// Fixed reference instant used across tests.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Temporary environment with paths for both stores.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: Config,
}

impl TestEnv {
    /// Create an environment. The historical path is configured but the
    /// file only exists once something is seeded into it.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.active_path = path_string(dir.path().join("active.db"));
        config.database.historical_path = Some(path_string(dir.path().join("historical.db")));
        Self { dir, config }
    }

    pub fn historical_path(&self) -> PathBuf {
        self.dir.path().join("historical.db")
    }

    /// Write records into the historical store file, creating it if needed.
    pub async fn seed_historical<R: Record>(&self, records: &[R]) {
        let options = StoreOptions {
            max_connections: 1,
            ..StoreOptions::default()
        };
        let db = Database::open(self.historical_path(), &options).await.unwrap();
        let merger = DualStoreMerger::new(&db, None);
        for record in records {
            merger.write(record).await.unwrap();
        }
        // Frozen archives are plain rollback-journal files
        sqlx::query("PRAGMA journal_mode = DELETE")
            .execute(db.pool())
            .await
            .unwrap();
        db.close().await;
    }

    /// Read a record straight from the historical file.
    pub async fn read_historical<R: Record>(&self, key: &R::Key) -> Option<R> {
        let db = Database::open_read_only(self.historical_path(), &StoreOptions::default())
            .await
            .unwrap()
            .unwrap();
        let record = DualStoreMerger::new(&db, None).get(key).await.unwrap();
        db.close().await;
        record
    }

    /// Open both stores as the process would.
    pub async fn stores(&self) -> Arc<Stores> {
        Arc::new(Stores::open(&self.config).await.unwrap())
    }

    /// A mailbox service over freshly opened stores.
    pub async fn service(&self) -> MailboxService {
        MailboxService::new(self.stores().await, &self.config)
    }
}

fn path_string(path: impl AsRef<Path>) -> String {
    path.as_ref().to_string_lossy().into_owned()
}

/// An address created at [`t0`] with a 30-day lifetime.
pub fn address(name: &str, owner: Option<i64>) -> Address {
    let address = Address::new_orphan(name, chrono::Duration::days(30), t0());
    match owner {
        Some(owner) => address.with_owner(owner),
        None => address,
    }
}

/// A plain message received at `at`.
pub fn message(id: &str, address: &str, subject: &str, at: DateTime<Utc>) -> Message {
    Message {
        id: id.to_string(),
        address: address.to_string(),
        from: "sender@example.com".to_string(),
        subject: subject.to_string(),
        body: format!("body of {id}"),
        html: None,
        timestamp: at,
        read: false,
        starred: false,
        spam_flag: false,
        deferred_delete_at: None,
    }
}

//! Spam rule repository for tempbox.
//!
//! Rules may live in either store. Reads are merged; writes go to the active
//! store, promoting a historical rule first when it is mutated.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::types::{NewSpamRule, SpamRule};
use crate::datetime::to_millis;
use crate::db::DualStoreMerger;
use crate::{Result, TempboxError};

/// Repository for spam rule CRUD operations.
pub struct SpamRuleRepository<'a> {
    merger: DualStoreMerger<'a>,
}

impl<'a> SpamRuleRepository<'a> {
    /// Create a new SpamRuleRepository over the merged stores.
    pub fn new(merger: DualStoreMerger<'a>) -> Self {
        Self { merger }
    }

    /// Create a validated rule stamped with the current time.
    pub async fn create(&self, new_rule: &NewSpamRule) -> Result<SpamRule> {
        self.create_at(new_rule, crate::datetime::now()).await
    }

    /// Create a validated rule stamped with `now`.
    ///
    /// New IDs are allocated above every ID in both stores so a new rule
    /// never shadows a historical one.
    pub async fn create_at(&self, new_rule: &NewSpamRule, now: DateTime<Utc>) -> Result<SpamRule> {
        new_rule.validate()?;

        let floor = self.historical_max_id().await;
        let created_at = to_millis(&now);
        let active = self.merger.active();
        let pool = active.pool();
        let id: i64 = active
            .with_retry("create spam rule", move || async move {
                sqlx::query_scalar(
                    "INSERT INTO spam_rules
                        (id, name, rule_type, subject_pattern, sender_pattern, action,
                         delay_minutes, enabled, created_at)
                     VALUES ((SELECT MAX(?, COALESCE(MAX(id), 0)) + 1 FROM spam_rules),
                             ?, ?, ?, ?, ?, ?, ?, ?)
                     RETURNING id",
                )
                .bind(floor)
                .bind(new_rule.name.trim())
                .bind(new_rule.rule_type.as_str())
                .bind(new_rule.subject_pattern.as_deref().map(str::trim))
                .bind(new_rule.sender_pattern.as_deref().map(str::trim))
                .bind(new_rule.action.as_str())
                .bind(new_rule.delay_minutes)
                .bind(new_rule.enabled)
                .bind(created_at)
                .fetch_one(pool)
                .await
                .map_err(TempboxError::from)
            })
            .await?;

        info!("Created spam rule {} ({})", id, new_rule.name.trim());
        self.get(id)
            .await?
            .ok_or_else(|| TempboxError::NotFound("spam rule".to_string()))
    }

    /// Get a rule by ID from the merged view.
    pub async fn get(&self, id: i64) -> Result<Option<SpamRule>> {
        self.merger.get(&id).await
    }

    /// All rules in creation order.
    pub async fn list(&self) -> Result<Vec<SpamRule>> {
        self.merger.get_all().await
    }

    /// Enable or disable a rule.
    ///
    /// Returns false if the rule does not exist.
    pub async fn set_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        if self.merger.promote::<SpamRule>(&id).await?.is_none() {
            return Ok(false);
        }

        let active = self.merger.active();
        let pool = active.pool();
        let result = active
            .with_retry("set spam rule enabled", move || async move {
                sqlx::query("UPDATE spam_rules SET enabled = ? WHERE id = ?")
                    .bind(enabled)
                    .bind(id)
                    .execute(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete a rule from the active store.
    ///
    /// A rule that exists only in the historical store cannot be removed and
    /// reports false.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let active = self.merger.active();
        let pool = active.pool();
        let result = active
            .with_retry("delete spam rule", move || async move {
                sqlx::query("DELETE FROM spam_rules WHERE id = ?")
                    .bind(id)
                    .execute(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!("Deleted spam rule {}", id);
        }
        Ok(deleted)
    }

    async fn historical_max_id(&self) -> i64 {
        let Some(historical) = self.merger.historical() else {
            return 0;
        };
        match sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(id) FROM spam_rules")
            .fetch_one(historical.pool())
            .await
        {
            Ok(max) => max.unwrap_or(0),
            Err(e) => {
                warn!("Historical store read on spam_rules failed, treating as empty: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::spam::{RuleAction, RuleType};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SpamRuleRepository::new(DualStoreMerger::new(&db, None));

        let rule = repo
            .create_at(
                &NewSpamRule::both("unsub", "unsubscribe", "@spam.com", RuleAction::Block),
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(rule.id, 1);
        assert_eq!(rule.rule_type, RuleType::Both);
        assert_eq!(rule.sender_pattern.as_deref(), Some("@spam.com"));
        assert!(rule.enabled);
        assert_eq!(rule.created_at, t0());

        let fetched = repo.get(rule.id).await.unwrap().unwrap();
        assert_eq!(fetched, rule);
        assert!(repo.get(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_rule() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SpamRuleRepository::new(DualStoreMerger::new(&db, None));
        let result = repo
            .create(&NewSpamRule::sender("ads", "@ads.com", RuleAction::DeferredDelete))
            .await;
        assert!(matches!(result, Err(TempboxError::Validation(_))));
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_in_creation_order() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SpamRuleRepository::new(DualStoreMerger::new(&db, None));
        repo.create_at(&NewSpamRule::subject("late", "b", RuleAction::Block), t0() + Duration::minutes(1))
            .await
            .unwrap();
        repo.create_at(&NewSpamRule::subject("early", "a", RuleAction::Block), t0())
            .await
            .unwrap();

        let names: Vec<String> = repo.list().await.unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn test_set_enabled_and_delete() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = SpamRuleRepository::new(DualStoreMerger::new(&db, None));
        let rule = repo
            .create(&NewSpamRule::subject("s", "win", RuleAction::Block))
            .await
            .unwrap();

        assert!(repo.set_enabled(rule.id, false).await.unwrap());
        assert!(!repo.get(rule.id).await.unwrap().unwrap().enabled);
        assert!(!repo.set_enabled(42, false).await.unwrap());

        assert!(repo.delete(rule.id).await.unwrap());
        assert!(!repo.delete(rule.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_disabled_rule() {
        let db = Database::open_in_memory().await.unwrap();
        let merger = DualStoreMerger::new(&db, None);
        let repo = SpamRuleRepository::new(merger);
        let rule = repo
            .create(&NewSpamRule::subject("paused", "win", RuleAction::Block).with_enabled(false))
            .await
            .unwrap();
        assert!(!rule.enabled);

        let engine = crate::spam::SpamRuleEngine::load(&merger).await.unwrap();
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_historical_rules_merge_and_promote() {
        let active = Database::open_in_memory().await.unwrap();
        let historical = Database::open_in_memory().await.unwrap();
        let old = SpamRuleRepository::new(DualStoreMerger::new(&historical, None))
            .create_at(&NewSpamRule::subject("old", "lottery", RuleAction::Block), t0())
            .await
            .unwrap();

        let repo = SpamRuleRepository::new(DualStoreMerger::new(&active, Some(&historical)));
        let new = repo
            .create_at(
                &NewSpamRule::subject("new", "prize", RuleAction::Block),
                t0() + Duration::minutes(1),
            )
            .await
            .unwrap();
        assert!(new.id > old.id);
        assert_eq!(repo.list().await.unwrap().len(), 2);

        // Historical rule cannot be deleted, but can be disabled via promotion
        assert!(!repo.delete(old.id).await.unwrap());
        assert!(repo.set_enabled(old.id, false).await.unwrap());
        assert!(!repo.get(old.id).await.unwrap().unwrap().enabled);

        let untouched = SpamRuleRepository::new(DualStoreMerger::new(&historical, None))
            .get(old.id)
            .await
            .unwrap()
            .unwrap();
        assert!(untouched.enabled);
    }
}

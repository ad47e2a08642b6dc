//! Address and message repositories for tempbox.
//!
//! Every method here is a single statement against the **active** store.
//! Merged reads go through [`crate::db::DualStoreMerger`].

use chrono::{DateTime, Utc};

use super::types::{Address, Message, UserId};
use crate::datetime::to_millis;
use crate::db::{Database, Record};
use crate::error::is_unique_violation;
use crate::{Result, TempboxError};

const INSERT_ADDRESS_SQL: &str = "INSERT INTO addresses
    (address, domain, owner_id, is_anonymous, created_at, expires_at)
    VALUES (?, ?, ?, ?, ?, ?)";

const INSERT_MESSAGE_SQL: &str = "INSERT INTO messages
    (id, address, sender, subject, body, html, received_at, is_read, is_starred, spam_flag, deferred_delete_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

/// Result of an insert that may collide with an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was inserted.
    Inserted,
    /// A row with the same key already exists.
    Duplicate,
}

/// Repository for address writes on the active store.
pub struct AddressRepository<'a> {
    db: &'a Database,
}

impl<'a> AddressRepository<'a> {
    /// Create a new AddressRepository for the given (active) database.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a new address. A primary key collision is reported as
    /// [`InsertOutcome::Duplicate`], not as an error.
    pub async fn insert(&self, address: &Address) -> Result<InsertOutcome> {
        let pool = self.db.pool();
        self.db
            .with_retry("insert address", move || async move {
                match address
                    .bind_values(sqlx::query(INSERT_ADDRESS_SQL))
                    .execute(pool)
                    .await
                {
                    Ok(_) => Ok(InsertOutcome::Inserted),
                    Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::Duplicate),
                    Err(e) => Err(TempboxError::from(e)),
                }
            })
            .await
    }

    /// Set the owner of an address if and only if it currently has none.
    ///
    /// Returns true if this call set the owner.
    pub async fn claim_if_unowned(&self, address: &str, user_id: UserId) -> Result<bool> {
        let pool = self.db.pool();
        let result = self
            .db
            .with_retry("claim address", move || async move {
                sqlx::query(
                    "UPDATE addresses SET owner_id = ?, is_anonymous = 0
                     WHERE address = ? AND owner_id IS NULL",
                )
                .bind(user_id)
                .bind(address)
                .execute(pool)
                .await
                .map_err(TempboxError::from)
            })
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Move ownership from `from_user` to `to_user` if `from_user` owns the address.
    pub async fn transfer(&self, address: &str, from_user: UserId, to_user: UserId) -> Result<bool> {
        let pool = self.db.pool();
        let result = self
            .db
            .with_retry("transfer address", move || async move {
                sqlx::query(
                    "UPDATE addresses SET owner_id = ?, is_anonymous = 0
                     WHERE address = ? AND owner_id = ?",
                )
                .bind(to_user)
                .bind(address)
                .bind(from_user)
                .execute(pool)
                .await
                .map_err(TempboxError::from)
            })
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Set the owner unconditionally (administrative assignment).
    pub async fn assign(&self, address: &str, user_id: UserId) -> Result<bool> {
        let pool = self.db.pool();
        let result = self
            .db
            .with_retry("assign address", move || async move {
                sqlx::query("UPDATE addresses SET owner_id = ?, is_anonymous = 0 WHERE address = ?")
                    .bind(user_id)
                    .bind(address)
                    .execute(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete an address. Its messages cascade.
    pub async fn delete(&self, address: &str) -> Result<bool> {
        let pool = self.db.pool();
        let result = self
            .db
            .with_retry("delete address", move || async move {
                sqlx::query("DELETE FROM addresses WHERE address = ?")
                    .bind(address)
                    .execute(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every address owned by a user. Their messages cascade.
    pub async fn delete_for_owner(&self, user_id: UserId) -> Result<u64> {
        let pool = self.db.pool();
        let result = self
            .db
            .with_retry("delete addresses for owner", move || async move {
                sqlx::query("DELETE FROM addresses WHERE owner_id = ?")
                    .bind(user_id)
                    .execute(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete addresses whose expiry lies strictly before `now`.
    pub async fn delete_expired(&self, now: &DateTime<Utc>) -> Result<u64> {
        let now = to_millis(now);
        let pool = self.db.pool();
        let result = self
            .db
            .with_retry("delete expired addresses", move || async move {
                sqlx::query("DELETE FROM addresses WHERE expires_at < ?")
                    .bind(now)
                    .execute(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;
        Ok(result.rows_affected())
    }
}

/// Repository for message writes on the active store.
pub struct MessageRepository<'a> {
    db: &'a Database,
}

impl<'a> MessageRepository<'a> {
    /// Create a new MessageRepository for the given (active) database.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a message. The recipient address must exist in the active store.
    pub async fn insert(&self, message: &Message) -> Result<()> {
        let pool = self.db.pool();
        self.db
            .with_retry("insert message", move || async move {
                message
                    .bind_values(sqlx::query(INSERT_MESSAGE_SQL))
                    .execute(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;
        Ok(())
    }

    /// Mark a message read or unread.
    pub async fn set_read(&self, id: &str, read: bool) -> Result<bool> {
        let pool = self.db.pool();
        let result = self
            .db
            .with_retry("set message read", move || async move {
                sqlx::query("UPDATE messages SET is_read = ? WHERE id = ?")
                    .bind(read)
                    .bind(id)
                    .execute(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Star or unstar a message.
    pub async fn set_starred(&self, id: &str, starred: bool) -> Result<bool> {
        let pool = self.db.pool();
        let result = self
            .db
            .with_retry("set message starred", move || async move {
                sqlx::query("UPDATE messages SET is_starred = ? WHERE id = ?")
                    .bind(starred)
                    .bind(id)
                    .execute(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete a message.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let pool = self.db.pool();
        let result = self
            .db
            .with_retry("delete message", move || async move {
                sqlx::query("DELETE FROM messages WHERE id = ?")
                    .bind(id)
                    .execute(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete unstarred messages received strictly before `cutoff`.
    pub async fn delete_unstarred_before(&self, cutoff: &DateTime<Utc>) -> Result<u64> {
        let cutoff = to_millis(cutoff);
        let pool = self.db.pool();
        let result = self
            .db
            .with_retry("delete expired messages", move || async move {
                sqlx::query("DELETE FROM messages WHERE received_at < ? AND is_starred = 0")
                    .bind(cutoff)
                    .execute(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete messages whose deferred delete is due at `now`, starred or not.
    pub async fn delete_deferred_due(&self, now: &DateTime<Utc>) -> Result<u64> {
        let now = to_millis(now);
        let pool = self.db.pool();
        let result = self
            .db
            .with_retry("delete deferred messages", move || async move {
                sqlx::query(
                    "DELETE FROM messages
                     WHERE deferred_delete_at IS NOT NULL AND deferred_delete_at <= ?",
                )
                .bind(now)
                .execute(pool)
                .await
                .map_err(TempboxError::from)
            })
            .await?;
        Ok(result.rows_affected())
    }
}

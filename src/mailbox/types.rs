//! Mailbox types for tempbox.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{FromRow, Row, Sqlite};

use crate::datetime::{from_millis, to_millis};
use crate::db::Record;

/// User identifier. Authentication lives outside this crate.
pub type UserId = i64;

/// Maximum length for a full address.
pub const MAX_ADDRESS_LENGTH: usize = 254;

/// Maximum length for a local part.
pub const MAX_LOCAL_PART_LENGTH: usize = 64;

/// Maximum length for a stored subject.
pub const MAX_SUBJECT_LENGTH: usize = 998;

/// A disposable address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Address {
    /// Full address, lowercase (primary key).
    pub address: String,
    /// Domain part.
    pub domain: String,
    /// Owner, `None` for an orphan address.
    pub owner_id: Option<UserId>,
    /// Whether the address was generated without an owner.
    pub is_anonymous: bool,
    /// When the address was created.
    pub created_at: DateTime<Utc>,
    /// When the address expires.
    pub expires_at: DateTime<Utc>,
}

impl Address {
    /// A fresh address with no owner.
    pub fn new_orphan(address: &str, ttl: Duration, now: DateTime<Utc>) -> Self {
        let address = address.to_lowercase();
        let domain = domain_of(&address).unwrap_or_default().to_string();
        Self {
            address,
            domain,
            owner_id: None,
            is_anonymous: true,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Set the owner of a record that has not been stored yet.
    pub fn with_owner(mut self, owner_id: UserId) -> Self {
        self.owner_id = Some(owner_id);
        self.is_anonymous = false;
        self
    }

    /// Check whether the address has an owner.
    pub fn is_owned(&self) -> bool {
        self.owner_id.is_some()
    }

    /// Check whether the address is owned by the given user.
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_id == Some(user_id)
    }

    /// Check whether the address has expired at `now`.
    pub fn is_expired_at(&self, now: &DateTime<Utc>) -> bool {
        self.expires_at < *now
    }
}

impl<'r> FromRow<'r, SqliteRow> for Address {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            address: row.try_get("address")?,
            domain: row.try_get("domain")?,
            owner_id: row.try_get("owner_id")?,
            is_anonymous: row.try_get("is_anonymous")?,
            created_at: from_millis(row.try_get("created_at")?),
            expires_at: from_millis(row.try_get("expires_at")?),
        })
    }
}

impl Record for Address {
    type Key = String;

    const TABLE: &'static str = "addresses";
    const KEY_COLUMN: &'static str = "address";
    const COLUMNS: &'static [&'static str] = &[
        "address",
        "domain",
        "owner_id",
        "is_anonymous",
        "created_at",
        "expires_at",
    ];

    fn key(&self) -> String {
        self.address.clone()
    }

    fn bind_values<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(self.address.as_str())
            .bind(self.domain.as_str())
            .bind(self.owner_id)
            .bind(self.is_anonymous)
            .bind(to_millis(&self.created_at))
            .bind(to_millis(&self.expires_at))
    }

    fn listing_order(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.address.cmp(&other.address))
    }
}

/// A received message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Message ID (UUID v4 string).
    pub id: String,
    /// Recipient address.
    pub address: String,
    /// Sender address as delivered.
    pub from: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// HTML body, if the sender provided one.
    pub html: Option<String>,
    /// When the message was received.
    pub timestamp: DateTime<Utc>,
    /// Whether the owner has read the message.
    pub read: bool,
    /// Starred messages survive the TTL pass.
    pub starred: bool,
    /// Whether a spam rule matched at ingestion.
    pub spam_flag: bool,
    /// Scheduled deletion set by a deferred-delete spam rule.
    pub deferred_delete_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Check whether a deferred delete is due at `now`.
    pub fn is_deferred_delete_due(&self, now: &DateTime<Utc>) -> bool {
        self.deferred_delete_at.is_some_and(|at| at <= *now)
    }
}

impl<'r> FromRow<'r, SqliteRow> for Message {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let deferred: Option<i64> = row.try_get("deferred_delete_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            address: row.try_get("address")?,
            from: row.try_get("sender")?,
            subject: row.try_get("subject")?,
            body: row.try_get("body")?,
            html: row.try_get("html")?,
            timestamp: from_millis(row.try_get("received_at")?),
            read: row.try_get("is_read")?,
            starred: row.try_get("is_starred")?,
            spam_flag: row.try_get("spam_flag")?,
            deferred_delete_at: deferred.map(from_millis),
        })
    }
}

impl Record for Message {
    type Key = String;

    const TABLE: &'static str = "messages";
    const KEY_COLUMN: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "address",
        "sender",
        "subject",
        "body",
        "html",
        "received_at",
        "is_read",
        "is_starred",
        "spam_flag",
        "deferred_delete_at",
    ];

    fn key(&self) -> String {
        self.id.clone()
    }

    fn bind_values<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(self.id.as_str())
            .bind(self.address.as_str())
            .bind(self.from.as_str())
            .bind(self.subject.as_str())
            .bind(self.body.as_str())
            .bind(self.html.as_deref())
            .bind(to_millis(&self.timestamp))
            .bind(self.read)
            .bind(self.starred)
            .bind(self.spam_flag)
            .bind(self.deferred_delete_at.as_ref().map(to_millis))
    }

    /// Newest first.
    fn listing_order(&self, other: &Self) -> Ordering {
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// An already-parsed inbound message, as delivered by the ingestion pipeline.
#[derive(Debug, Clone, Default)]
pub struct IncomingMail {
    /// Envelope sender.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub text: String,
    /// HTML body.
    pub html: Option<String>,
}

impl IncomingMail {
    /// Create an incoming mail without an HTML part.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            text: text.into(),
            html: None,
        }
    }

    /// Attach an HTML body.
    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }
}

/// Domain portion of an address (after the last `@`).
pub fn domain_of(address: &str) -> Option<&str> {
    address.rsplit_once('@').map(|(_, domain)| domain)
}

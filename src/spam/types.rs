//! Spam rule model for tempbox.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{FromRow, Row, Sqlite};

use crate::datetime::{from_millis, to_millis};
use crate::db::Record;
use crate::TempboxError;

/// Maximum length for a rule name.
pub const MAX_RULE_NAME_LENGTH: usize = 100;

/// Maximum length for a rule pattern.
pub const MAX_PATTERN_LENGTH: usize = 254;

/// Which fields a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Subject contains the subject pattern.
    Subject,
    /// Sender or sender domain contains the sender pattern.
    Sender,
    /// Both predicates must hold.
    Both,
}

impl RuleType {
    /// Convert rule type to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Subject => "subject",
            RuleType::Sender => "sender",
            RuleType::Both => "both",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "subject" => Ok(RuleType::Subject),
            "sender" => Ok(RuleType::Sender),
            "both" => Ok(RuleType::Both),
            _ => Err(format!("unknown rule type: {s}")),
        }
    }
}

/// What happens to a message that matches a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Drop the message before it is stored.
    Block,
    /// Store the message and schedule its deletion.
    DeferredDelete,
}

impl RuleAction {
    /// Convert action to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Block => "block",
            RuleAction::DeferredDelete => "deferred_delete",
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RuleAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block" => Ok(RuleAction::Block),
            "deferred_delete" => Ok(RuleAction::DeferredDelete),
            _ => Err(format!("unknown rule action: {s}")),
        }
    }
}

/// A stored spam rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpamRule {
    /// Rule ID.
    pub id: i64,
    /// Human-readable name.
    pub name: String,
    /// Which predicates apply.
    pub rule_type: RuleType,
    /// Substring matched against the subject.
    pub subject_pattern: Option<String>,
    /// Substring matched against the sender or its domain.
    pub sender_pattern: Option<String>,
    /// Action on match.
    pub action: RuleAction,
    /// Delay before a deferred delete.
    pub delay_minutes: Option<i64>,
    /// Disabled rules never match.
    pub enabled: bool,
    /// Creation time; rules are evaluated in creation order.
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for SpamRule {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let rule_type: String = row.try_get("rule_type")?;
        let action: String = row.try_get("action")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            rule_type: rule_type.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            subject_pattern: row.try_get("subject_pattern")?,
            sender_pattern: row.try_get("sender_pattern")?,
            action: action.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            delay_minutes: row.try_get("delay_minutes")?,
            enabled: row.try_get("enabled")?,
            created_at: from_millis(row.try_get("created_at")?),
        })
    }
}

impl Record for SpamRule {
    type Key = i64;

    const TABLE: &'static str = "spam_rules";
    const KEY_COLUMN: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "rule_type",
        "subject_pattern",
        "sender_pattern",
        "action",
        "delay_minutes",
        "enabled",
        "created_at",
    ];

    fn key(&self) -> i64 {
        self.id
    }

    fn bind_values<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        query
            .bind(self.id)
            .bind(self.name.as_str())
            .bind(self.rule_type.as_str())
            .bind(self.subject_pattern.as_deref())
            .bind(self.sender_pattern.as_deref())
            .bind(self.action.as_str())
            .bind(self.delay_minutes)
            .bind(self.enabled)
            .bind(to_millis(&self.created_at))
    }

    /// Creation order.
    fn listing_order(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A rule about to be created.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewSpamRule {
    /// Human-readable name.
    pub name: String,
    /// Which predicates apply.
    pub rule_type: RuleType,
    /// Substring matched against the subject.
    #[serde(default)]
    pub subject_pattern: Option<String>,
    /// Substring matched against the sender or its domain.
    #[serde(default)]
    pub sender_pattern: Option<String>,
    /// Action on match.
    pub action: RuleAction,
    /// Delay before a deferred delete.
    #[serde(default)]
    pub delay_minutes: Option<i64>,
    /// Whether the rule starts enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl NewSpamRule {
    /// A subject rule.
    pub fn subject(name: impl Into<String>, pattern: impl Into<String>, action: RuleAction) -> Self {
        Self {
            name: name.into(),
            rule_type: RuleType::Subject,
            subject_pattern: Some(pattern.into()),
            sender_pattern: None,
            action,
            delay_minutes: None,
            enabled: true,
        }
    }

    /// A sender rule.
    pub fn sender(name: impl Into<String>, pattern: impl Into<String>, action: RuleAction) -> Self {
        Self {
            name: name.into(),
            rule_type: RuleType::Sender,
            subject_pattern: None,
            sender_pattern: Some(pattern.into()),
            action,
            delay_minutes: None,
            enabled: true,
        }
    }

    /// A rule that requires both the subject and the sender to match.
    pub fn both(
        name: impl Into<String>,
        subject_pattern: impl Into<String>,
        sender_pattern: impl Into<String>,
        action: RuleAction,
    ) -> Self {
        Self {
            name: name.into(),
            rule_type: RuleType::Both,
            subject_pattern: Some(subject_pattern.into()),
            sender_pattern: Some(sender_pattern.into()),
            action,
            delay_minutes: None,
            enabled: true,
        }
    }

    /// Set the deferred-delete delay.
    pub fn with_delay(mut self, minutes: i64) -> Self {
        self.delay_minutes = Some(minutes);
        self
    }

    /// Set the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check the type/pattern and action/delay pairings.
    pub fn validate(&self) -> Result<(), TempboxError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(TempboxError::Validation("rule name cannot be empty".into()));
        }
        if name.chars().count() > MAX_RULE_NAME_LENGTH {
            return Err(TempboxError::Validation(format!(
                "rule name must be at most {MAX_RULE_NAME_LENGTH} characters"
            )));
        }

        let needs_subject = matches!(self.rule_type, RuleType::Subject | RuleType::Both);
        let needs_sender = matches!(self.rule_type, RuleType::Sender | RuleType::Both);
        check_pattern("subject_pattern", &self.subject_pattern, needs_subject, self.rule_type)?;
        check_pattern("sender_pattern", &self.sender_pattern, needs_sender, self.rule_type)?;

        match (self.action, self.delay_minutes) {
            (RuleAction::DeferredDelete, None) => Err(TempboxError::Validation(
                "deferred_delete requires delay_minutes".into(),
            )),
            (RuleAction::DeferredDelete, Some(minutes)) if minutes <= 0 => Err(
                TempboxError::Validation("delay_minutes must be positive".into()),
            ),
            _ => Ok(()),
        }
    }
}

fn check_pattern(
    field: &str,
    pattern: &Option<String>,
    required: bool,
    rule_type: RuleType,
) -> Result<(), TempboxError> {
    match pattern.as_deref().map(str::trim) {
        None | Some("") if required => Err(TempboxError::Validation(format!(
            "rule type {rule_type} requires {field}"
        ))),
        Some(p) if p.chars().count() > MAX_PATTERN_LENGTH => Err(TempboxError::Validation(
            format!("{field} must be at most {MAX_PATTERN_LENGTH} characters"),
        )),
        _ => Ok(()),
    }
}

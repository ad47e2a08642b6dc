//! Mailbox service for tempbox.
//!
//! Ties the stores, ownership, access and spam layers together into the
//! operations a front end calls: generating addresses, ingesting mail and
//! reading or mutating messages.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::repository::{AddressRepository, InsertOutcome, MessageRepository};
use super::types::{Address, IncomingMail, Message, UserId};
use super::validation::{validate_incoming, validate_served_address};
use crate::access::{AccessGate, Actor};
use crate::config::Config;
use crate::datetime::{self, add_minutes};
use crate::db::{DualStoreMerger, Stores};
use crate::ownership::OwnershipStore;
use crate::spam::{SpamRuleEngine, SpamRuleRepository, SpamVerdict};
use crate::{Result, TempboxError};

/// Characters used for generated local parts.
const LOCAL_PART_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Attempts at finding an unused random address before giving up.
const MAX_GENERATE_ATTEMPTS: usize = 8;

/// Generate a random lowercase alphanumeric local part.
pub fn generate_local_part(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..LOCAL_PART_CHARS.len());
            LOCAL_PART_CHARS[idx] as char
        })
        .collect()
}

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Stored untagged.
    Stored {
        /// The stored message.
        message: Message,
    },
    /// Stored, flagged as spam and scheduled for deletion.
    Deferred {
        /// The stored message.
        message: Message,
    },
    /// Dropped before storage.
    Blocked,
}

impl IngestOutcome {
    /// The stored message, if any.
    pub fn message(&self) -> Option<&Message> {
        match self {
            IngestOutcome::Stored { message } | IngestOutcome::Deferred { message } => {
                Some(message)
            }
            IngestOutcome::Blocked => None,
        }
    }
}

/// Service for mailbox operations.
#[derive(Debug, Clone)]
pub struct MailboxService {
    stores: Arc<Stores>,
    domains: Vec<String>,
    local_part_length: usize,
    address_ttl: Duration,
}

impl MailboxService {
    /// Create a new MailboxService.
    pub fn new(stores: Arc<Stores>, config: &Config) -> Self {
        Self {
            stores,
            domains: config
                .mailbox
                .domains
                .iter()
                .map(|d| d.to_lowercase())
                .collect(),
            local_part_length: config.mailbox.local_part_length.max(1),
            address_ttl: Duration::hours(config.retention.address_ttl_hours),
        }
    }

    /// The underlying stores.
    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    /// Domains this instance generates addresses for and accepts mail on.
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    fn merger(&self) -> DualStoreMerger<'_> {
        self.stores.merger()
    }

    /// Ownership operations over the same stores.
    pub fn ownership(&self) -> OwnershipStore<'_> {
        OwnershipStore::new(self.merger(), self.address_ttl)
    }

    /// Access gate over the same stores.
    pub fn access_gate(&self) -> AccessGate<'_> {
        AccessGate::new(self.ownership())
    }

    /// Spam rule CRUD over the same stores.
    pub fn spam_rules(&self) -> SpamRuleRepository<'_> {
        SpamRuleRepository::new(self.merger())
    }

    /// Build a spam engine from the current rule set.
    pub async fn load_spam_engine(&self) -> Result<SpamRuleEngine> {
        SpamRuleEngine::load(&self.merger()).await
    }

    // ========================================================================
    // Addresses
    // ========================================================================

    /// Generate a new address, owned by `owner` if given.
    pub async fn generate_address(
        &self,
        owner: Option<UserId>,
        domain: Option<&str>,
    ) -> Result<Address> {
        self.generate_address_at(owner, domain, datetime::now()).await
    }

    /// Generate a new address created at `now`.
    ///
    /// `domain` must be one of the configured domains; a random one is
    /// picked when omitted.
    pub async fn generate_address_at(
        &self,
        owner: Option<UserId>,
        domain: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Address> {
        let domain = self.pick_domain(domain)?;
        let merger = self.merger();
        let repo = AddressRepository::new(merger.active());

        for _ in 0..MAX_GENERATE_ATTEMPTS {
            let candidate = format!("{}@{}", generate_local_part(self.local_part_length), domain);
            validate_served_address(&candidate, &self.domains)?;

            // A new active row must not shadow a historical address
            if merger.get_historical::<Address>(&candidate).await?.is_some() {
                continue;
            }

            let mut address = Address::new_orphan(&candidate, self.address_ttl, now);
            if let Some(owner) = owner {
                address = address.with_owner(owner);
            }
            match repo.insert(&address).await? {
                InsertOutcome::Inserted => {
                    info!(
                        "Generated address {} (owner: {:?})",
                        address.address, address.owner_id
                    );
                    return Ok(address);
                }
                InsertOutcome::Duplicate => debug!("Generated address collided, retrying"),
            }
        }

        Err(TempboxError::Conflict(
            "could not allocate an unused address".to_string(),
        ))
    }

    fn pick_domain(&self, requested: Option<&str>) -> Result<String> {
        match requested {
            Some(domain) => {
                let domain = domain.to_lowercase();
                if self.domains.contains(&domain) {
                    Ok(domain)
                } else {
                    Err(TempboxError::Validation(format!(
                        "domain {domain} is not served here"
                    )))
                }
            }
            None => {
                if self.domains.is_empty() {
                    return Err(TempboxError::Config("no mailbox domains configured".into()));
                }
                let idx = rand::rng().random_range(0..self.domains.len());
                Ok(self.domains[idx].clone())
            }
        }
    }

    /// Delete an address from the active store. Its messages cascade.
    pub async fn delete_address(&self, address: &str) -> Result<bool> {
        let deleted = AddressRepository::new(self.stores.active())
            .delete(&address.to_lowercase())
            .await?;
        if deleted {
            info!("Deleted address {}", address);
        }
        Ok(deleted)
    }

    /// Delete every address a user owns, and with them their messages.
    pub async fn delete_account(&self, user_id: UserId) -> Result<u64> {
        self.ownership().release_all_for(user_id).await
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Ingest a message now, against the current rule set.
    pub async fn ingest(&self, mail: IncomingMail) -> Result<IngestOutcome> {
        let engine = self.load_spam_engine().await?;
        self.ingest_at(mail, &engine, datetime::now()).await
    }

    /// Ingest a message received at `now`.
    ///
    /// The spam verdict is reached before anything is written; blocked mail
    /// leaves no trace in either store.
    pub async fn ingest_at(
        &self,
        mail: IncomingMail,
        engine: &SpamRuleEngine,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        validate_incoming(&mail)?;
        let to = mail.to.to_lowercase();
        validate_served_address(&to, &self.domains)?;

        let merger = self.merger();
        if merger.get::<Address>(&to).await?.is_none() {
            return Err(TempboxError::NotFound("address".to_string()));
        }

        let verdict = engine.evaluate(&mail.from, &mail.subject);
        let (spam_flag, deferred_delete_at) = match verdict {
            SpamVerdict::Block => {
                info!("Blocked message from {} to {}", mail.from, to);
                return Ok(IngestOutcome::Blocked);
            }
            SpamVerdict::DeferredDelete(minutes) => (true, Some(add_minutes(&now, minutes))),
            SpamVerdict::Allow => (false, None),
        };

        // The message row references the address row in the active store
        if merger.promote::<Address>(&to).await?.is_none() {
            return Err(TempboxError::NotFound("address".to_string()));
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            address: to,
            from: mail.from,
            subject: mail.subject,
            body: mail.text,
            html: mail.html,
            timestamp: now,
            read: false,
            starred: false,
            spam_flag,
            deferred_delete_at,
        };
        MessageRepository::new(merger.active())
            .insert(&message)
            .await?;

        debug!("Stored message {} for {}", message.id, message.address);
        Ok(if spam_flag {
            IngestOutcome::Deferred { message }
        } else {
            IngestOutcome::Stored { message }
        })
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Messages of an address, newest first, from both stores.
    pub async fn list_messages(&self, address: &str) -> Result<Vec<Message>> {
        self.merger()
            .get_all_where("address", address.to_lowercase())
            .await
    }

    /// A message by ID.
    pub async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        self.merger().get(&id.to_string()).await
    }

    /// Copy a message, and the address it references, into the active store.
    async fn promote_message(&self, id: &str) -> Result<Option<Message>> {
        let merger = self.merger();
        let Some(message) = merger.get::<Message>(&id.to_string()).await? else {
            return Ok(None);
        };
        if merger.promote::<Address>(&message.address).await?.is_none() {
            return Ok(None);
        }
        merger.promote::<Message>(&message.id).await
    }

    /// Mark a message read or unread.
    pub async fn set_read(&self, id: &str, read: bool) -> Result<bool> {
        if self.promote_message(id).await?.is_none() {
            return Ok(false);
        }
        MessageRepository::new(self.stores.active())
            .set_read(id, read)
            .await
    }

    /// Star or unstar a message.
    pub async fn set_starred(&self, id: &str, starred: bool) -> Result<bool> {
        if self.promote_message(id).await?.is_none() {
            return Ok(false);
        }
        MessageRepository::new(self.stores.active())
            .set_starred(id, starred)
            .await
    }

    /// Delete a message from the active store.
    ///
    /// A message that only exists in the historical store reports false.
    pub async fn delete_message(&self, id: &str) -> Result<bool> {
        MessageRepository::new(self.stores.active()).delete(id).await
    }

    // ========================================================================
    // Gated reads
    // ========================================================================

    /// List an address's messages on behalf of an actor, claiming the
    /// address first when the actor is entitled to.
    pub async fn open_mailbox(&self, actor: Actor, address: &str) -> Result<Vec<Message>> {
        self.access_gate().require_read(actor, address).await?;
        self.list_messages(address).await
    }

    /// Read a single message on behalf of an actor and mark it read.
    pub async fn open_message(&self, actor: Actor, id: &str) -> Result<Message> {
        let message = self
            .get_message(id)
            .await?
            .ok_or_else(|| TempboxError::NotFound("message".to_string()))?;
        self.access_gate()
            .require_read(actor, &message.address)
            .await?;

        if !message.read {
            self.set_read(id, true).await?;
        }
        Ok(Message {
            read: true,
            ..message
        })
    }
}

//! tempbox - disposable email core
//!
//! Provisions throwaway addresses, stores the mail they receive and decides
//! who may read or claim them. Data lives in two SQLite stores: a frozen
//! historical store and the active store all writes go to.

pub mod access;
pub mod config;
pub mod datetime;
pub mod db;
pub mod error;
pub mod logging;
pub mod mailbox;
pub mod ownership;
pub mod retention;
pub mod spam;

pub use access::{AccessDecision, AccessGate, Actor};
pub use config::Config;
pub use db::{Database, DualStoreMerger, Record, RetryPolicy, StoreOptions, Stores};
pub use error::{Result, TempboxError};
pub use mailbox::{
    validate_address, Address, AddressError, IncomingMail, IngestOutcome, MailboxService,
    Message, UserId,
};
pub use ownership::{ClaimOutcome, OwnershipStore};
pub use retention::{start_sweeper, RetentionSweeper, SweepReport};
pub use spam::{
    NewSpamRule, RuleAction, RuleType, SpamRule, SpamRuleEngine, SpamRuleRepository, SpamVerdict,
};

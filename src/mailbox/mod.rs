//! Mailboxes for tempbox: addresses, their messages and ingestion.

mod repository;
mod service;
mod types;
mod validation;

pub use repository::{AddressRepository, InsertOutcome, MessageRepository};
pub use service::{generate_local_part, IngestOutcome, MailboxService};
pub use types::{
    domain_of, Address, IncomingMail, Message, UserId, MAX_ADDRESS_LENGTH, MAX_LOCAL_PART_LENGTH,
    MAX_SUBJECT_LENGTH,
};
pub use validation::{validate_address, validate_incoming, validate_served_address, AddressError};

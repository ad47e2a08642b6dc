//! Boundary validation for addresses and inbound mail.
//!
//! Malformed input is rejected here, before it reaches the ownership or
//! spam layers.

use thiserror::Error;

use super::types::{IncomingMail, MAX_ADDRESS_LENGTH, MAX_LOCAL_PART_LENGTH, MAX_SUBJECT_LENGTH};
use crate::TempboxError;

/// Address and inbound mail validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Address is empty.
    #[error("address cannot be empty")]
    Empty,

    /// Address is too long.
    #[error("address must be at most {MAX_ADDRESS_LENGTH} characters")]
    TooLong,

    /// Address has no `@` or more than one.
    #[error("address must contain exactly one @")]
    MissingAt,

    /// Local part is empty or too long.
    #[error("local part must be 1 to {MAX_LOCAL_PART_LENGTH} characters")]
    InvalidLocalPart,

    /// Local part contains characters outside the allowed set.
    #[error("local part contains invalid characters")]
    InvalidChars,

    /// Domain is empty or malformed.
    #[error("invalid domain")]
    InvalidDomain,

    /// Domain is not served by this instance.
    #[error("domain {0} is not served here")]
    UnknownDomain(String),

    /// Sender is empty.
    #[error("sender cannot be empty")]
    EmptySender,

    /// Subject is too long.
    #[error("subject must be at most {MAX_SUBJECT_LENGTH} characters")]
    SubjectTooLong,
}

impl From<AddressError> for TempboxError {
    fn from(e: AddressError) -> Self {
        TempboxError::Validation(e.to_string())
    }
}

fn is_local_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+')
}

fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty()
        && domain.contains('.')
        && domain.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Validate the shape of a mailbox address.
pub fn validate_address(address: &str) -> Result<(), AddressError> {
    if address.is_empty() {
        return Err(AddressError::Empty);
    }
    if address.len() > MAX_ADDRESS_LENGTH {
        return Err(AddressError::TooLong);
    }

    let mut parts = address.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(AddressError::MissingAt);
    };

    if local.is_empty() || local.len() > MAX_LOCAL_PART_LENGTH {
        return Err(AddressError::InvalidLocalPart);
    }
    if !local.chars().all(is_local_char) {
        return Err(AddressError::InvalidChars);
    }
    if !is_valid_domain(domain) {
        return Err(AddressError::InvalidDomain);
    }

    Ok(())
}

/// Validate an address and check that its domain is one of `domains`.
pub fn validate_served_address(address: &str, domains: &[String]) -> Result<(), AddressError> {
    validate_address(address)?;
    let domain = address.rsplit_once('@').map(|(_, d)| d).unwrap_or_default();
    if !domains.iter().any(|d| d.eq_ignore_ascii_case(domain)) {
        return Err(AddressError::UnknownDomain(domain.to_string()));
    }
    Ok(())
}

/// Validate an inbound mail tuple.
///
/// The sender only needs to be non-empty; it is matched against spam rules
/// as delivered.
pub fn validate_incoming(mail: &IncomingMail) -> Result<(), AddressError> {
    if mail.from.trim().is_empty() {
        return Err(AddressError::EmptySender);
    }
    validate_address(&mail.to.to_lowercase())?;
    if mail.subject.chars().count() > MAX_SUBJECT_LENGTH {
        return Err(AddressError::SubjectTooLong);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_addresses() {
        assert!(validate_address("abc123@tempbox.local").is_ok());
        assert!(validate_address("first.last+tag@mail.example.com").is_ok());
        assert!(validate_address("a_b-c@x-y.test").is_ok());
    }

    #[test]
    fn test_empty_address() {
        assert_eq!(validate_address(""), Err(AddressError::Empty));
    }

    #[test]
    fn test_at_sign_count() {
        assert_eq!(validate_address("no-at.test"), Err(AddressError::MissingAt));
        assert_eq!(validate_address("a@b@c.test"), Err(AddressError::MissingAt));
    }

    #[test]
    fn test_local_part() {
        assert_eq!(
            validate_address("@example.test"),
            Err(AddressError::InvalidLocalPart)
        );
        let long = format!("{}@example.test", "a".repeat(MAX_LOCAL_PART_LENGTH + 1));
        assert_eq!(validate_address(&long), Err(AddressError::InvalidLocalPart));
        assert_eq!(
            validate_address("sp ace@example.test"),
            Err(AddressError::InvalidChars)
        );
    }

    #[test]
    fn test_domain() {
        assert_eq!(validate_address("a@"), Err(AddressError::InvalidDomain));
        assert_eq!(validate_address("a@localhost"), Err(AddressError::InvalidDomain));
        assert_eq!(validate_address("a@-bad.test"), Err(AddressError::InvalidDomain));
        assert_eq!(validate_address("a@bad..test"), Err(AddressError::InvalidDomain));
    }

    #[test]
    fn test_too_long() {
        let long = format!("a@{}.test", "b".repeat(MAX_ADDRESS_LENGTH));
        assert_eq!(validate_address(&long), Err(AddressError::TooLong));
    }

    #[test]
    fn test_served_domain() {
        let domains = vec!["tempbox.local".to_string()];
        assert!(validate_served_address("x@tempbox.local", &domains).is_ok());
        assert!(validate_served_address("x@TEMPBOX.local", &domains).is_ok());
        assert_eq!(
            validate_served_address("x@other.test", &domains),
            Err(AddressError::UnknownDomain("other.test".to_string()))
        );
    }

    #[test]
    fn test_incoming() {
        let ok = IncomingMail::new("x@spam.com", "box@tempbox.local", "Hi", "body");
        assert!(validate_incoming(&ok).is_ok());

        let no_sender = IncomingMail::new("  ", "box@tempbox.local", "Hi", "body");
        assert_eq!(validate_incoming(&no_sender), Err(AddressError::EmptySender));

        let bad_to = IncomingMail::new("x@spam.com", "not-an-address", "Hi", "body");
        assert_eq!(validate_incoming(&bad_to), Err(AddressError::MissingAt));

        let long_subject = IncomingMail::new(
            "x@spam.com",
            "box@tempbox.local",
            "s".repeat(MAX_SUBJECT_LENGTH + 1),
            "body",
        );
        assert_eq!(
            validate_incoming(&long_subject),
            Err(AddressError::SubjectTooLong)
        );
    }

    #[test]
    fn test_error_converts_to_validation() {
        let err: TempboxError = AddressError::Empty.into();
        assert!(matches!(err, TempboxError::Validation(_)));
    }
}

//! Error types for tempbox.

use thiserror::Error;

/// Common error type for tempbox.
#[derive(Error, Debug)]
pub enum TempboxError {
    /// Database error.
    ///
    /// Any store failure that is neither transient nor an expected
    /// constraint outcome ends up here.
    #[error("database error: {0}")]
    Database(String),

    /// Database connection error.
    #[error("database connection error: {0}")]
    DatabaseConnection(String),

    /// Store was busy or locked and the retry budget ran out.
    #[error("transient store error: {0}")]
    TransientStore(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Lost a concurrent claim race.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Ownership violation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Validation error for boundary input (rules, addresses, incoming mail).
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl TempboxError {
    /// Whether the operation may succeed if simply retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, TempboxError::TransientStore(_))
    }
}

// Conversion from sqlx errors. Busy/locked conditions become `TransientStore`
// so the retry layer can pick them up.
impl From<sqlx::Error> for TempboxError {
    fn from(e: sqlx::Error) -> Self {
        if is_busy(&e) {
            TempboxError::TransientStore(e.to_string())
        } else {
            TempboxError::Database(e.to_string())
        }
    }
}

/// Check whether a sqlx error is SQLITE_BUSY / SQLITE_LOCKED (any extended
/// variant) or a pool acquire timeout.
pub(crate) fn is_busy(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false),
        _ => false,
    }
}

/// Check whether a sqlx error is a UNIQUE / PRIMARY KEY constraint violation.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

/// Result type alias for tempbox operations.
pub type Result<T> = std::result::Result<T, TempboxError>;

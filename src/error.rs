//! Error taxonomy shared by the store, index and resolver.

use crate::identity_store::EntityKind;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors raised by library operations.
///
/// A resolution that finds nothing above the acceptance threshold is not an
/// error: it is reported as `Ok(None)`.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("{kind} not found: {what}")]
    NotFound { kind: EntityKind, what: String },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] rusqlite::Error),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Row id {0} does not fit an entity id")]
    IdOutOfRange(i64),

    #[error("Index maintainer error: {0}")]
    Maintainer(String),
}

pub type LibraryResult<T> = std::result::Result<T, LibraryError>;

impl LibraryError {
    pub fn not_found(kind: EntityKind, what: impl ToString) -> Self {
        LibraryError::NotFound {
            kind,
            what: what.to_string(),
        }
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, LibraryError::ConstraintViolation(_))
    }
}

impl From<rusqlite::Error> for LibraryError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => {
                LibraryError::ConstraintViolation(err.to_string())
            }
            _ => LibraryError::StoreUnavailable(err),
        }
    }
}

use std::time::Duration;

use thiserror::Error;

use super::ScalarKind;

/// Errors raised by the ledger store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backing file could not be opened or the schema script failed.
    #[error("failed to initialize storage: {0}")]
    Init(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    /// The operation did not finish within the configured command timeout.
    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),

    /// A stored value could not be decoded as the requested type.
    #[error("cannot read {found} as {expected}")]
    TypeCoercion { expected: ScalarKind, found: String },

    #[error("database error: {0}")]
    Sql(sqlx::Error),
}

impl StorageError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StorageError::UniqueViolation(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StorageError::Timeout(_))
    }
}

/// SQLite gave up waiting for a lock (`SQLITE_BUSY` or `SQLITE_LOCKED`,
/// including their extended codes).
pub(crate) fn is_lock_contention(error: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_error) = error else {
        return false;
    };
    db_error
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

impl From<sqlx::Error> for StorageError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Database(ref db_error) if db_error.is_unique_violation() => {
                StorageError::UniqueViolation(db_error.message().to_string())
            }
            sqlx::Error::Database(ref db_error) if db_error.is_foreign_key_violation() => {
                StorageError::ForeignKeyViolation(db_error.message().to_string())
            }
            error => StorageError::Sql(error),
        }
    }
}

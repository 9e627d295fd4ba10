//! Error taxonomy for the data-access layer.
//!
//! Driver errors are classified once, at the `From<sqlx::Error>` boundary, so
//! callers can match on what went wrong instead of inspecting SQLite codes.
use sqlx::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A lookup by id or unique key matched no row.
    #[error("{entity} not found ({key})")]
    NotFound { entity: &'static str, key: String },

    /// A unique constraint rejected the write. `constraint` is `table.column`.
    #[error("unique constraint failed: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("foreign key constraint failed: {0}")]
    ForeignKeyViolation(String),

    /// Input rejected before it reached the database.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database connection failure: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }

    pub fn unique(constraint: impl Into<String>) -> Self {
        StoreError::UniqueViolation {
            constraint: constraint.into(),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.kind() {
                ErrorKind::UniqueViolation => {
                    return StoreError::UniqueViolation {
                        constraint: constraint_name(db_err.message()),
                    }
                }
                ErrorKind::ForeignKeyViolation => {
                    return StoreError::ForeignKeyViolation(db_err.message().to_string())
                }
                ErrorKind::NotNullViolation | ErrorKind::CheckViolation => {
                    return StoreError::Validation(db_err.message().to_string())
                }
                _ => {}
            }
        }
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Connection(err),
            other => StoreError::Database(other),
        }
    }
}

/// SQLite reports `UNIQUE constraint failed: users.email`; keep the part
/// after the colon. Composite keys come through comma separated.
fn constraint_name(message: &str) -> String {
    message
        .split_once("failed:")
        .map(|(_, rest)| rest.trim().to_string())
        .unwrap_or_else(|| message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_constraint_from_sqlite_message() {
        assert_eq!(
            constraint_name("UNIQUE constraint failed: users.email"),
            "users.email"
        );
        assert_eq!(constraint_name("something else"), "something else");
    }

    #[test]
    fn pool_errors_are_connection_failures() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, StoreError::Connection(_)));
    }

    #[test]
    fn row_not_found_is_a_database_error() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::Database(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn display_mentions_entity() {
        let err = StoreError::not_found("User", "abc");
        assert_eq!(err.to_string(), "User not found (abc)");
    }
}

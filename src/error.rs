//! Error types for loom.
//!
//! Every failure the library raises itself carries a stable string code (see
//! [`DbError::code`]). Errors coming from a database driver are wrapped in
//! [`DbError::Driver`] untouched: the library performs no SQL validation, so
//! the native message and SQLSTATE are the only authority on what went wrong.

use thiserror::Error;

/// Error returned by the native client of a backend.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Mssql(#[from] tiberius::error::Error),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection not established: {message}")]
    ConnectionNotEstablished { message: String },

    #[error("Connection failed after {attempts} attempt(s): {message}")]
    ConnectionFailed {
        message: String,
        attempts: u32,
        suggestion: String,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Entity '{entity}' has no primary key")]
    ModelHasNoPrimaryKey { entity: String },

    #[error("Entity '{entity}' has no value for primary key '{primary_key}'")]
    ModelHasNoPrimaryKeyValue { entity: String, primary_key: String },

    #[error("Transaction {transaction_id} is not active (state: {state})")]
    InactiveTransaction {
        transaction_id: String,
        state: String,
    },

    #[error("CTE clause rendered without entries: call new_cte at least once")]
    MustCallBuildCteAtLeastOnce,

    #[error("Empty IN list for column '{column}' is not supported by {dialect}")]
    EmptyWhereInNotSupported { column: String, dialect: String },

    #[error("Entity '{entity}' is not registered")]
    EntityNotRegistered { entity: String },

    #[error("Relation '{relation}' not found on entity '{entity}'")]
    RelationNotFound { entity: String, relation: String },

    #[error("Relation load '{path}' exceeds maximum depth {max_depth}")]
    RelationDepthExceeded { path: String, max_depth: usize },

    #[error("Invalid pagination cursor: {message}")]
    InvalidCursor { message: String },

    #[error("Unsupported operation on {dialect}: {operation}")]
    UnsupportedOperation { operation: String, dialect: String },

    #[error("No row matched: {message}")]
    RowNotFound { message: String },

    #[error("Failed to hydrate entity '{entity}': {message}")]
    HydrationFailed { entity: String, message: String },

    #[error("Advisory lock '{key}' is not held by this data source")]
    AdvisoryLockNotHeld { key: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("{0}")]
    Driver(#[from] DriverError),
}

impl DbError {
    /// Create a connection-not-established error.
    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::ConnectionNotEstablished {
            message: message.into(),
        }
    }

    /// Create a connection failure with a helpful suggestion.
    pub fn connection_failed(
        message: impl Into<String>,
        attempts: u32,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            attempts,
            suggestion: suggestion.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn no_primary_key(entity: impl Into<String>) -> Self {
        Self::ModelHasNoPrimaryKey {
            entity: entity.into(),
        }
    }

    pub fn no_primary_key_value(entity: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self::ModelHasNoPrimaryKeyValue {
            entity: entity.into(),
            primary_key: primary_key.into(),
        }
    }

    /// Create an inactive transaction error.
    pub fn inactive_transaction(
        transaction_id: impl Into<String>,
        state: impl std::fmt::Display,
    ) -> Self {
        Self::InactiveTransaction {
            transaction_id: transaction_id.into(),
            state: state.to_string(),
        }
    }

    pub fn empty_where_in(column: impl Into<String>, dialect: impl std::fmt::Display) -> Self {
        Self::EmptyWhereInNotSupported {
            column: column.into(),
            dialect: dialect.to_string(),
        }
    }

    pub fn entity_not_registered(entity: impl Into<String>) -> Self {
        Self::EntityNotRegistered {
            entity: entity.into(),
        }
    }

    pub fn relation_not_found(entity: impl Into<String>, relation: impl Into<String>) -> Self {
        Self::RelationNotFound {
            entity: entity.into(),
            relation: relation.into(),
        }
    }

    pub fn relation_depth_exceeded(path: impl Into<String>, max_depth: usize) -> Self {
        Self::RelationDepthExceeded {
            path: path.into(),
            max_depth,
        }
    }

    pub fn invalid_cursor(message: impl Into<String>) -> Self {
        Self::InvalidCursor {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error for a dialect.
    pub fn unsupported(operation: impl Into<String>, dialect: impl std::fmt::Display) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
            dialect: dialect.to_string(),
        }
    }

    pub fn row_not_found(message: impl Into<String>) -> Self {
        Self::RowNotFound {
            message: message.into(),
        }
    }

    pub fn hydration(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HydrationFailed {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn lock_not_held(key: impl Into<String>) -> Self {
        Self::AdvisoryLockNotHeld { key: key.into() }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Stable identifier for this error, suitable for matching by callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionNotEstablished { .. } => "CONNECTION_NOT_ESTABLISHED",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
            Self::ModelHasNoPrimaryKey { .. } => "MODEL_HAS_NO_PRIMARY_KEY",
            Self::ModelHasNoPrimaryKeyValue { .. } => "MODEL_HAS_NO_PRIMARY_KEY_VALUE",
            Self::InactiveTransaction { .. } => "INACTIVE_TRANSACTION",
            Self::MustCallBuildCteAtLeastOnce => "MUST_CALL_BUILD_CTE_AT_LEAST_ONCE",
            Self::EmptyWhereInNotSupported { .. } => "EMPTY_WHERE_IN_NOT_SUPPORTED",
            Self::EntityNotRegistered { .. } => "ENTITY_NOT_REGISTERED",
            Self::RelationNotFound { .. } => "RELATION_NOT_FOUND",
            Self::RelationDepthExceeded { .. } => "RELATION_DEPTH_EXCEEDED",
            Self::InvalidCursor { .. } => "INVALID_CURSOR",
            Self::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION",
            Self::RowNotFound { .. } => "ROW_NOT_FOUND",
            Self::HydrationFailed { .. } => "HYDRATION_FAILED",
            Self::AdvisoryLockNotHeld { .. } => "ADVISORY_LOCK_NOT_HELD",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Driver(_) => "DRIVER_ERROR",
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::ConnectionFailed { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// SQLSTATE (or native error number) reported by the driver, if any.
    pub fn sql_state(&self) -> Option<String> {
        match self {
            Self::Driver(DriverError::Sqlx(sqlx::Error::Database(db_err))) => {
                db_err.code().map(|c| c.to_string())
            }
            Self::Driver(DriverError::Mssql(tiberius::error::Error::Server(token))) => {
                Some(token.code().to_string())
            }
            _ => None,
        }
    }

    /// Check if this error is worth retrying when establishing a connection.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Driver(DriverError::Sqlx(err)) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
            ),
            Self::Driver(DriverError::Mssql(err)) => matches!(
                err,
                tiberius::error::Error::Io { .. } | tiberius::error::Error::Tls(_)
            ),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::Driver(DriverError::Sqlx(err))
    }
}

impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        DbError::Driver(DriverError::Mssql(err))
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection_failed("refused", 3, "Check the server");
        assert!(err.to_string().contains("after 3 attempt(s)"));
        assert_eq!(err.suggestion(), Some("Check the server"));
    }

    #[test]
    fn test_stable_codes() {
        assert_eq!(
            DbError::not_connected("closed").code(),
            "CONNECTION_NOT_ESTABLISHED"
        );
        assert_eq!(
            DbError::no_primary_key("user").code(),
            "MODEL_HAS_NO_PRIMARY_KEY"
        );
        assert_eq!(
            DbError::no_primary_key_value("user", "id").code(),
            "MODEL_HAS_NO_PRIMARY_KEY_VALUE"
        );
        assert_eq!(
            DbError::inactive_transaction("tx_1", "committed").code(),
            "INACTIVE_TRANSACTION"
        );
        assert_eq!(
            DbError::MustCallBuildCteAtLeastOnce.code(),
            "MUST_CALL_BUILD_CTE_AT_LEAST_ONCE"
        );
    }

    #[test]
    fn test_driver_errors_pass_through() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), "DRIVER_ERROR");
        assert_eq!(err.to_string(), sqlx::Error::RowNotFound.to_string());
        assert!(err.sql_state().is_none());
    }

    #[test]
    fn test_error_retryable() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_retryable());
        assert!(!DbError::invalid_input("bad").is_retryable());
        assert!(!DbError::MustCallBuildCteAtLeastOnce.is_retryable());
    }
}

//! # Database Error Types
//!
//! Error types for database operations and the engine built on them.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)        CoreError (chain, stock, input)     │
//! │       │                                  │                              │
//! │       ▼                                  ▼                              │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ApiError { code, message } ← Serialized for the calling layer         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  REST adapter / UI shows the message, branches on the code             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any error returned from inside an engine operation drops the open sqlx
//! transaction, which rolls it back. There are no partial commits.

use serde::Serialize;
use thiserror::Error;

use cylinder_core::CoreError;

/// Database operation errors.
///
/// These errors wrap sqlx errors and provide additional context
/// for debugging and user feedback.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - `fetch_one` returns no rows
    /// - ID doesn't exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Inserting a duplicate master-data code
    /// - Duplicate reference number
    /// - Any UNIQUE index violation
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Referencing a non-existent customer, warehouse or variant
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    ///
    /// ## When This Occurs
    /// - Runtime SQL error, CHECK constraint, trigger abort
    /// - `database is locked` after the busy timeout elapsed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A stored value could not be mapped back to a domain type.
    #[error("Corrupt row in {table}: {detail}")]
    CorruptRow { table: String, detail: String },

    /// A business rule rejected the operation.
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn corrupt(table: impl Into<String>, detail: impl Into<String>) -> Self {
        DbError::CorruptRow {
            table: table.into(),
            detail: detail.into(),
        }
    }

    /// True when a concurrent writer won a version check.
    pub fn is_stale(&self) -> bool {
        matches!(self, DbError::Domain(CoreError::StaleVersion { .. }))
    }

    /// Stable category for the calling layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::NotFound { .. } => ErrorKind::NotFound,
            DbError::UniqueViolation { .. } => ErrorKind::Conflict,
            DbError::ForeignKeyViolation { .. } => ErrorKind::Validation,
            DbError::Domain(core) => match core {
                CoreError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
                CoreError::InvalidOperation(_) => ErrorKind::InvalidOperation,
                CoreError::StaleVersion { .. } => ErrorKind::StaleVersion,
                CoreError::NotFound { .. } => ErrorKind::NotFound,
                CoreError::Validation(_) => ErrorKind::Validation,
            },
            DbError::ConnectionFailed(_)
            | DbError::MigrationFailed(_)
            | DbError::QueryFailed(_)
            | DbError::TransactionFailed(_)
            | DbError::PoolExhausted
            | DbError::CorruptRow { .. }
            | DbError::Internal(_) => ErrorKind::Storage,
        }
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // SQLite constraint messages:
                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>"
                // FK constraint: "FOREIGN KEY constraint failed"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<cylinder_core::ValidationError> for DbError {
    fn from(err: cylinder_core::ValidationError) -> Self {
        DbError::Domain(CoreError::Validation(err))
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// API Error
// =============================================================================

/// Machine-readable error codes for the calling layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Unknown entity id (404)
    NotFound,

    /// Field-level input problem (400)
    Validation,

    /// A ledger invariant or payment rule would break (422)
    InvalidOperation,

    /// Not enough filled or empty cylinders (422)
    InsufficientStock,

    /// Lost an optimistic version race; re-read and retry (409)
    StaleVersion,

    /// Duplicate code or reference (409)
    Conflict,

    /// Storage failure; details are logged, not returned (500)
    Storage,
}

/// Error payload handed to the calling layer.
///
/// ```json
/// {
///   "code": "INSUFFICIENT_STOCK",
///   "message": "Insufficient stock for variant v-14kg at warehouse wh-1: ..."
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub code: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorKind, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        let code = err.kind();
        match err {
            DbError::ForeignKeyViolation { message } => {
                tracing::error!("Foreign key violation: {}", message);
                ApiError::new(code, "Invalid reference to another record")
            }
            DbError::ConnectionFailed(_) => ApiError::new(code, "Database connection failed"),
            DbError::MigrationFailed(_) => ApiError::new(code, "Database migration failed"),
            DbError::PoolExhausted => ApiError::new(code, "Database is busy, try again"),
            DbError::QueryFailed(e) | DbError::TransactionFailed(e) | DbError::Internal(e) => {
                // Log the actual error but return a generic message
                tracing::error!("Database operation failed: {}", e);
                ApiError::new(code, "Database operation failed")
            }
            DbError::CorruptRow { table, detail } => {
                tracing::error!(table = %table, "Corrupt row: {}", detail);
                ApiError::new(code, "Database operation failed")
            }
            other => ApiError::new(code, other.to_string()),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_keep_their_kind() {
        let err: DbError = CoreError::stale("LedgerEntry", "7", 2).into();
        assert!(err.is_stale());
        assert_eq!(err.kind(), ErrorKind::StaleVersion);

        let err: DbError = CoreError::invalid("due would become -100.00").into();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
        assert_eq!(err.to_string(), "Invalid operation: due would become -100.00");
    }

    #[test]
    fn test_api_error_hides_storage_details() {
        let api: ApiError = DbError::QueryFailed("no such table: secret_table".into()).into();
        assert_eq!(api.code, ErrorKind::Storage);
        assert!(!api.message.contains("secret_table"));
    }

    #[test]
    fn test_api_error_serializes_code_and_message() {
        let api: ApiError = DbError::not_found("Warehouse", "wh-9").into();
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["message"], "Warehouse not found: wh-9");
    }
}

//! # Error Types
//!
//! Domain-specific error types for cylinder-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  cylinder-core errors (this file)                                      │
//! │  ├── CoreError        - Business rule failures (the engine taxonomy)   │
//! │  └── ValidationError  - Field-level input failures                     │
//! │                                                                         │
//! │  cylinder-db errors (separate crate)                                   │
//! │  ├── DbError          - Storage failures + wrapped CoreError           │
//! │  └── ApiError         - code + message handed to the calling layer     │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → ApiError → Client       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Recoverability
//! | Variant             | Caller action                                  |
//! |---------------------|------------------------------------------------|
//! | `InsufficientStock` | adjust quantities or pick another warehouse    |
//! | `InvalidOperation`  | correct the input or the offending entry      |
//! | `StaleVersion`      | re-read and retry                              |
//! | `NotFound`          | caller error (unknown id)                      |

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// None of these are ever "fixed up" silently: a snapshot that would go
/// negative is rejected, never clamped to zero.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A stock counter would drop below zero.
    ///
    /// ## User Workflow
    /// ```text
    /// Transfer 8 filled WH1 → WH2
    ///      │
    ///      ▼
    /// WH1 stock: filled=5
    ///      │
    ///      ▼
    /// InsufficientStock { available_filled: 5, requested_filled: 8, .. }
    ///      │
    ///      ▼
    /// UI shows: "Only 5 filled cylinders at WH1"
    /// ```
    #[error(
        "Insufficient stock for variant {variant_id} at warehouse {warehouse_id}: \
         available filled {available_filled}, empty {available_empty}; \
         requested filled {requested_filled}, empty {requested_empty}"
    )]
    InsufficientStock {
        warehouse_id: String,
        variant_id: String,
        available_filled: i64,
        available_empty: i64,
        requested_filled: i64,
        requested_empty: i64,
    },

    /// The operation would break a ledger invariant or a payment rule.
    ///
    /// ## When This Occurs
    /// - A balance or due snapshot anywhere in the chain would go negative
    /// - A payment exceeds the outstanding due at that point of the chain
    /// - A non-cash payment has no bank account
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// An optimistic version check failed at write time.
    #[error("{entity} {id} was modified concurrently (expected version {expected_version})")]
    StaleVersion {
        entity: String,
        id: String,
        expected_version: i64,
    },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an InvalidOperation error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        CoreError::InvalidOperation(reason.into())
    }

    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a StaleVersion error.
    pub fn stale(entity: impl Into<String>, id: impl Into<String>, expected_version: i64) -> Self {
        CoreError::StaleVersion {
            entity: entity.into(),
            id: id.into(),
            expected_version,
        }
    }

    /// True for errors the caller may resolve by re-reading and retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::StaleVersion { .. })
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any business logic runs, so no row is ever touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Invalid format (e.g., invalid UUID, malformed reference).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Two fields that must differ are equal.
    #[error("{field} must differ from {other}")]
    MustDiffer { field: String, other: String },

    /// Date lies after the business day.
    #[error("{field} {date} is in the future")]
    FutureDate { field: String, date: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

//! # Reference Sequence Repository
//!
//! Allocates `{PREFIX}-{SCOPE}-{YYYYMM}-{NNNNNN}` numbers.
//!
//! ## One Statement, No Counting
//! ```text
//! INSERT INTO reference_sequences (doc_type, scope_code, period, last_value)
//! VALUES ('WT', 'WH1-WH2', '202601', 1)
//! ON CONFLICT (doc_type, scope_code, period)
//!     DO UPDATE SET last_value = last_value + 1
//! RETURNING last_value
//! ```
//! The row is created or advanced and read back atomically. Run inside the
//! document's own transaction, a rollback also rolls the counter back, so a
//! number is never handed out twice and never skipped by a failed write.

use chrono::NaiveDate;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::pool::begin_write;
use cylinder_core::reference::{period_of, MAX_SEQUENCE};
use cylinder_core::{CoreError, DocumentType, ReferenceNumber};

/// Repository for reference number sequences.
#[derive(Debug, Clone)]
pub struct ReferenceRepository {
    pool: SqlitePool,
}

impl ReferenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReferenceRepository { pool }
    }

    /// Allocates the next reference in its own transaction.
    pub async fn next(&self, document_type: DocumentType, scope: &str, as_of: NaiveDate) -> DbResult<String> {
        let mut tx = begin_write(&self.pool).await?;
        let reference = next_in(&mut tx, document_type, scope, as_of).await?;
        tx.commit().await?;
        Ok(reference.to_string())
    }

    /// Last value issued for (type, scope, month), or 0 if none yet.
    pub async fn current(&self, document_type: DocumentType, scope: &str, as_of: NaiveDate) -> DbResult<i64> {
        let value: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT last_value FROM reference_sequences
            WHERE doc_type = ?1 AND scope_code = ?2 AND period = ?3
            "#,
        )
        .bind(document_type.prefix())
        .bind(scope)
        .bind(period_of(as_of))
        .fetch_optional(&self.pool)
        .await?;

        Ok(value.unwrap_or(0))
    }
}

/// Allocates the next reference inside the caller's transaction.
pub async fn next_in(
    conn: &mut SqliteConnection,
    document_type: DocumentType,
    scope: &str,
    as_of: NaiveDate,
) -> DbResult<ReferenceNumber> {
    let sequence: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO reference_sequences (doc_type, scope_code, period, last_value)
        VALUES (?1, ?2, ?3, 1)
        ON CONFLICT (doc_type, scope_code, period)
            DO UPDATE SET last_value = last_value + 1
        RETURNING last_value
        "#,
    )
    .bind(document_type.prefix())
    .bind(scope)
    .bind(period_of(as_of))
    .fetch_one(&mut *conn)
    .await?;

    if sequence > MAX_SEQUENCE {
        return Err(CoreError::invalid(format!(
            "{} sequence for {} in {} is exhausted",
            document_type,
            scope,
            period_of(as_of)
        ))
        .into());
    }

    let reference = ReferenceNumber::new(document_type, scope, as_of, sequence);
    debug!(reference = %reference, "Allocated reference");
    Ok(reference)
}

// =============================================================================
// Unit Tests
// =============================================================================

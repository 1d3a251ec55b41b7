//! # Database Migrations
//!
//! Embedded SQL migrations for the cylinder ledger schema.
//!
//! ## Schema Ownership
//! ```text
//! migrations/sqlite/001_initial_schema.sql
//! ├── master data        customers, variants, warehouses, suppliers, bank_accounts
//! ├── inventory_stock    UNIQUE (warehouse_id, variant_id), CHECK ≥ 0, version
//! ├── reference_sequences PRIMARY KEY (doc_type, scope_code, period)
//! ├── ledger_entries     chain index (customer_id, variant_id, transaction_date, id)
//! ├── warehouse_transfers
//! └── purchase_receipts
//! ```
//!
//! Migrations run on connect unless `DbConfig::run_migrations(false)`.
//! Never edit an applied migration; add `002_*.sql` instead.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

/// Migrations embedded at compile time from `migrations/sqlite`.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations.
///
/// Idempotent. Each migration runs in its own transaction, in filename order.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!(embedded = MIGRATOR.migrations.len(), "Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns `(embedded, applied)` migration counts.
///
/// A database that has never been migrated reports zero applied.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let has_table: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;

    if has_table == 0 {
        debug!("Migration table not present");
        return Ok((total, 0));
    }

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await?;

    Ok((total, applied as usize))
}

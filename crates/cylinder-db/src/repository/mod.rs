//! # Repository Module
//!
//! Database repository implementations for the cylinder ledger.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Two Ways In                                          │
//! │                                                                         │
//! │  Pool-bound (reads, admin)          Connection-bound (inside a tx)     │
//! │  ─────────────────────────          ──────────────────────────────     │
//! │  db.stock().get(wh, v)              stock::adjust_in(&mut *tx, ..)     │
//! │  db.ledger().history_for(c, v)      ledger::load_chain(&mut *tx, ..)   │
//! │       │                                  │                              │
//! │       ▼                                  ▼                              │
//! │  SqlitePool                         the caller's open Transaction      │
//! │                                                                         │
//! │  LedgerEngine composes connection-bound functions so that stock,       │
//! │  references and ledger rows commit or roll back together.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`MasterDataRepository`](master::MasterDataRepository) - Customers, variants, warehouses, suppliers, banks
//! - [`StockRepository`](stock::StockRepository) - Filled/empty counters per (warehouse, variant)
//! - [`ReferenceRepository`](reference::ReferenceRepository) - Document number sequences
//! - [`LedgerRepository`](ledger::LedgerRepository) - Ledger entries and chain queries
//! - [`TransferRepository`](transfer::TransferRepository) - Warehouse transfers
//! - [`ReceiptRepository`](receipt::ReceiptRepository) - Supplier receipts

pub mod ledger;
pub mod master;
pub mod receipt;
pub mod reference;
pub mod stock;
pub mod transfer;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{DbError, DbResult};
use cylinder_core::{Money, Quantity};

/// Reads a non-negative count column.
pub(crate) fn quantity_col(row: &SqliteRow, table: &str, column: &str) -> DbResult<Quantity> {
    let raw: i64 = row.try_get(column)?;
    Quantity::try_from_i64(raw)
        .ok_or_else(|| DbError::corrupt(table, format!("{} = {} is not a valid count", column, raw)))
}

/// Reads a minor-unit money column.
pub(crate) fn money_col(row: &SqliteRow, column: &str) -> DbResult<Money> {
    let raw: i64 = row.try_get(column)?;
    Ok(Money::from_cents(raw))
}

/// Generates a new UUID primary key.
///
/// ## Usage
/// ```rust,ignore
/// let warehouse = Warehouse { id: generate_id(), code: "WH1".into(), name: "Main".into() };
/// ```
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

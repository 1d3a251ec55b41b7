//! # Warehouse Transfer Repository
//!
//! Transfers are written once, inside the engine's transaction, together
//! with both stock adjustments. They are never updated afterwards.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::quantity_col;
use crate::error::DbResult;
use cylinder_core::WarehouseTransfer;

const SELECT_TRANSFER: &str = r#"
    SELECT id, source_warehouse_id, destination_warehouse_id, variant_id,
           filled, empty, transfer_date, reference, version, created_at
    FROM warehouse_transfers
"#;

/// Repository for warehouse transfer queries.
#[derive(Debug, Clone)]
pub struct TransferRepository {
    pool: SqlitePool,
}

impl TransferRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TransferRepository { pool }
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<WarehouseTransfer>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_TRANSFER))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| transfer_from_row(&r)).transpose()
    }

    pub async fn get_by_reference(&self, reference: &str) -> DbResult<Option<WarehouseTransfer>> {
        let row = sqlx::query(&format!("{} WHERE reference = ?1", SELECT_TRANSFER))
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| transfer_from_row(&r)).transpose()
    }

    /// Transfers in or out of a warehouse, oldest first.
    pub async fn list_for_warehouse(&self, warehouse_id: &str) -> DbResult<Vec<WarehouseTransfer>> {
        let rows = sqlx::query(&format!(
            "{} WHERE source_warehouse_id = ?1 OR destination_warehouse_id = ?1 ORDER BY transfer_date, created_at",
            SELECT_TRANSFER
        ))
        .bind(warehouse_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transfer_from_row).collect()
    }
}

pub async fn insert_in(conn: &mut SqliteConnection, transfer: &WarehouseTransfer) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO warehouse_transfers (
            id, source_warehouse_id, destination_warehouse_id, variant_id,
            filled, empty, transfer_date, reference, version, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&transfer.id)
    .bind(&transfer.source_warehouse_id)
    .bind(&transfer.destination_warehouse_id)
    .bind(&transfer.variant_id)
    .bind(transfer.filled.as_i64())
    .bind(transfer.empty.as_i64())
    .bind(transfer.transfer_date)
    .bind(&transfer.reference)
    .bind(transfer.version)
    .bind(transfer.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn transfer_from_row(r: &SqliteRow) -> DbResult<WarehouseTransfer> {
    Ok(WarehouseTransfer {
        id: r.try_get("id")?,
        source_warehouse_id: r.try_get("source_warehouse_id")?,
        destination_warehouse_id: r.try_get("destination_warehouse_id")?,
        variant_id: r.try_get("variant_id")?,
        filled: quantity_col(r, "warehouse_transfers", "filled")?,
        empty: quantity_col(r, "warehouse_transfers", "empty")?,
        transfer_date: r.try_get("transfer_date")?,
        reference: r.try_get("reference")?,
        version: r.try_get("version")?,
        created_at: r.try_get("created_at")?,
    })
}

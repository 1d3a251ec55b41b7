//! # Purchase Receipt Repository

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::quantity_col;
use crate::error::DbResult;
use cylinder_core::PurchaseReceipt;

const SELECT_RECEIPT: &str = r#"
    SELECT id, supplier_id, warehouse_id, variant_id,
           filled_received, empty_returned, receipt_date, reference, created_at
    FROM purchase_receipts
"#;

/// Repository for supplier receipt queries.
#[derive(Debug, Clone)]
pub struct ReceiptRepository {
    pool: SqlitePool,
}

impl ReceiptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReceiptRepository { pool }
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<PurchaseReceipt>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_RECEIPT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| receipt_from_row(&r)).transpose()
    }

    pub async fn list_for_warehouse(&self, warehouse_id: &str) -> DbResult<Vec<PurchaseReceipt>> {
        let rows = sqlx::query(&format!(
            "{} WHERE warehouse_id = ?1 ORDER BY receipt_date, created_at",
            SELECT_RECEIPT
        ))
        .bind(warehouse_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(receipt_from_row).collect()
    }
}

pub async fn insert_in(conn: &mut SqliteConnection, receipt: &PurchaseReceipt) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO purchase_receipts (
            id, supplier_id, warehouse_id, variant_id,
            filled_received, empty_returned, receipt_date, reference, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&receipt.id)
    .bind(&receipt.supplier_id)
    .bind(&receipt.warehouse_id)
    .bind(&receipt.variant_id)
    .bind(receipt.filled_received.as_i64())
    .bind(receipt.empty_returned.as_i64())
    .bind(receipt.receipt_date)
    .bind(&receipt.reference)
    .bind(receipt.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn receipt_from_row(r: &SqliteRow) -> DbResult<PurchaseReceipt> {
    Ok(PurchaseReceipt {
        id: r.try_get("id")?,
        supplier_id: r.try_get("supplier_id")?,
        warehouse_id: r.try_get("warehouse_id")?,
        variant_id: r.try_get("variant_id")?,
        filled_received: quantity_col(r, "purchase_receipts", "filled_received")?,
        empty_returned: quantity_col(r, "purchase_receipts", "empty_returned")?,
        receipt_date: r.try_get("receipt_date")?,
        reference: r.try_get("reference")?,
        created_at: r.try_get("created_at")?,
    })
}

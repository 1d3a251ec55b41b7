//! # Inventory Stock Repository
//!
//! Filled and empty cylinder counters per (warehouse, variant).
//!
//! ## Compare-and-Swap Updates
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. read      SELECT .. WHERE warehouse_id = ? AND variant_id = ?      │
//! │               → filled 5, empty 2, version 7                           │
//! │                                                                         │
//! │  2. compute   after_delta(-5, +3) → filled 0, empty 5                  │
//! │               negative? → InsufficientStock, nothing written           │
//! │                                                                         │
//! │  3. write     UPDATE .. SET filled = 0, empty = 5, version = 8         │
//! │               WHERE id = ? AND version = 7                             │
//! │               0 rows? → StaleVersion (someone else wrote version 8)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows are created lazily on the first event that touches them and are
//! never deleted.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use super::{generate_id, quantity_col};
use crate::error::{DbError, DbResult};
use crate::pool::begin_write;
use cylinder_core::{CoreError, InventoryStock};

const SELECT_STOCK: &str = r#"
    SELECT id, warehouse_id, variant_id, filled, empty, version, last_updated
    FROM inventory_stock
"#;

/// Repository for inventory stock operations.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    /// Gets the stock row, if one exists.
    pub async fn get(&self, warehouse_id: &str, variant_id: &str) -> DbResult<Option<InventoryStock>> {
        let mut conn = self.pool.acquire().await?;
        find(&mut conn, warehouse_id, variant_id).await
    }

    /// Gets the stock row, creating an all-zero row if absent.
    pub async fn get_or_create(&self, warehouse_id: &str, variant_id: &str) -> DbResult<InventoryStock> {
        let mut tx = begin_write(&self.pool).await?;
        let stock = get_or_create_in(&mut tx, warehouse_id, variant_id).await?;
        tx.commit().await?;
        Ok(stock)
    }

    /// Applies signed deltas to the filled and empty counters.
    ///
    /// ## Returns
    /// * `Ok(stock)` - the row after the update
    /// * `Err(Domain(InsufficientStock))` - a counter would drop below zero
    /// * `Err(Domain(StaleVersion))` - a concurrent writer won
    pub async fn adjust(
        &self,
        warehouse_id: &str,
        variant_id: &str,
        delta_filled: i64,
        delta_empty: i64,
    ) -> DbResult<InventoryStock> {
        let mut tx = begin_write(&self.pool).await?;
        let stock = adjust_in(&mut tx, warehouse_id, variant_id, delta_filled, delta_empty, None).await?;
        tx.commit().await?;
        Ok(stock)
    }

    /// Like [`StockRepository::adjust`], but only if the row is still at
    /// `expected_version`.
    pub async fn adjust_expected(
        &self,
        warehouse_id: &str,
        variant_id: &str,
        delta_filled: i64,
        delta_empty: i64,
        expected_version: i64,
    ) -> DbResult<InventoryStock> {
        let mut tx = begin_write(&self.pool).await?;
        let stock = adjust_in(
            &mut tx,
            warehouse_id,
            variant_id,
            delta_filled,
            delta_empty,
            Some(expected_version),
        )
        .await?;
        tx.commit().await?;
        Ok(stock)
    }

    /// Lists every variant held at a warehouse.
    pub async fn list_for_warehouse(&self, warehouse_id: &str) -> DbResult<Vec<InventoryStock>> {
        let rows = sqlx::query(&format!("{} WHERE warehouse_id = ?1 ORDER BY variant_id", SELECT_STOCK))
            .bind(warehouse_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(stock_from_row).collect()
    }
}

// =============================================================================
// Connection-scoped operations
// =============================================================================

pub async fn find(
    conn: &mut SqliteConnection,
    warehouse_id: &str,
    variant_id: &str,
) -> DbResult<Option<InventoryStock>> {
    let row = sqlx::query(&format!("{} WHERE warehouse_id = ?1 AND variant_id = ?2", SELECT_STOCK))
        .bind(warehouse_id)
        .bind(variant_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| stock_from_row(&r)).transpose()
}

pub async fn get_or_create_in(
    conn: &mut SqliteConnection,
    warehouse_id: &str,
    variant_id: &str,
) -> DbResult<InventoryStock> {
    if let Some(stock) = find(conn, warehouse_id, variant_id).await? {
        return Ok(stock);
    }

    debug!(warehouse_id = %warehouse_id, variant_id = %variant_id, "Creating stock row");

    sqlx::query(
        r#"
        INSERT INTO inventory_stock (id, warehouse_id, variant_id, filled, empty, version, last_updated)
        VALUES (?1, ?2, ?3, 0, 0, 1, ?4)
        ON CONFLICT (warehouse_id, variant_id) DO NOTHING
        "#,
    )
    .bind(generate_id())
    .bind(warehouse_id)
    .bind(variant_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    find(conn, warehouse_id, variant_id)
        .await?
        .ok_or_else(|| DbError::not_found("InventoryStock", format!("{}/{}", warehouse_id, variant_id)))
}

/// Applies deltas inside the caller's transaction.
///
/// `expected_version = None` checks against the version just read.
pub async fn adjust_in(
    conn: &mut SqliteConnection,
    warehouse_id: &str,
    variant_id: &str,
    delta_filled: i64,
    delta_empty: i64,
    expected_version: Option<i64>,
) -> DbResult<InventoryStock> {
    let current = get_or_create_in(conn, warehouse_id, variant_id).await?;
    let expected = expected_version.unwrap_or(current.version);

    if current.version != expected {
        return Err(CoreError::stale("InventoryStock", &current.id, expected).into());
    }

    let (filled, empty) = current.after_delta(delta_filled, delta_empty)?;
    let now = Utc::now();

    debug!(
        warehouse_id = %warehouse_id,
        variant_id = %variant_id,
        delta_filled,
        delta_empty,
        "Adjusting stock"
    );

    let result = sqlx::query(
        r#"
        UPDATE inventory_stock
        SET filled = ?2, empty = ?3, version = version + 1, last_updated = ?4
        WHERE id = ?1 AND version = ?5
        "#,
    )
    .bind(&current.id)
    .bind(filled.as_i64())
    .bind(empty.as_i64())
    .bind(now)
    .bind(expected)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::stale("InventoryStock", &current.id, expected).into());
    }

    Ok(InventoryStock {
        filled,
        empty,
        version: expected + 1,
        last_updated: now,
        ..current
    })
}

fn stock_from_row(r: &SqliteRow) -> DbResult<InventoryStock> {
    Ok(InventoryStock {
        id: r.try_get("id")?,
        warehouse_id: r.try_get("warehouse_id")?,
        variant_id: r.try_get("variant_id")?,
        filled: quantity_col(r, "inventory_stock", "filled")?,
        empty: quantity_col(r, "inventory_stock", "empty")?,
        version: r.try_get("version")?,
        last_updated: r.try_get("last_updated")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use cylinder_core::{Quantity, Variant, Warehouse};

    async fn setup() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.masters()
            .insert_warehouse(&Warehouse {
                id: "wh-1".into(),
                code: "WH1".into(),
                name: "Main".into(),
            })
            .await
            .unwrap();
        db.masters()
            .insert_variant(&Variant {
                id: "v-14kg".into(),
                code: "DOM14".into(),
                name: "Domestic".into(),
                capacity: "14.2kg".into(),
            })
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_row_created_lazily() {
        let db = setup().await;
        assert!(db.stock().get("wh-1", "v-14kg").await.unwrap().is_none());

        let stock = db.stock().get_or_create("wh-1", "v-14kg").await.unwrap();
        assert_eq!((stock.filled, stock.empty, stock.version), (Quantity::zero(), Quantity::zero(), 1));

        // Second call returns the same row.
        let again = db.stock().get_or_create("wh-1", "v-14kg").await.unwrap();
        assert_eq!(again.id, stock.id);
    }

    #[tokio::test]
    async fn test_adjust_bumps_version() {
        let db = setup().await;
        let stock = db.stock().adjust("wh-1", "v-14kg", 10, 2).await.unwrap();
        assert_eq!((stock.filled.value(), stock.empty.value(), stock.version), (10, 2, 2));

        let stock = db.stock().adjust("wh-1", "v-14kg", -4, 3).await.unwrap();
        assert_eq!((stock.filled.value(), stock.empty.value(), stock.version), (6, 5, 3));

        let stored = db.stock().get("wh-1", "v-14kg").await.unwrap().unwrap();
        assert_eq!((stored.id, stored.filled, stored.version), (stock.id, stock.filled, stock.version));
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_row_unchanged() {
        let db = setup().await;
        db.stock().adjust("wh-1", "v-14kg", 5, 0).await.unwrap();

        let err = db.stock().adjust("wh-1", "v-14kg", -8, 0).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock {
                available_filled: 5,
                requested_filled: 8,
                ..
            })
        ));

        let stored = db.stock().get("wh-1", "v-14kg").await.unwrap().unwrap();
        assert_eq!((stored.filled.value(), stored.version), (5, 2));
    }

    #[tokio::test]
    async fn test_adjust_expected_detects_stale_version() {
        let db = setup().await;
        let read = db.stock().adjust("wh-1", "v-14kg", 5, 0).await.unwrap();

        // Another writer moves the row on.
        db.stock().adjust("wh-1", "v-14kg", 1, 0).await.unwrap();

        let err = db
            .stock()
            .adjust_expected("wh-1", "v-14kg", -1, 0, read.version)
            .await
            .unwrap_err();
        assert!(err.is_stale());

        let fresh = db.stock().get("wh-1", "v-14kg").await.unwrap().unwrap();
        let ok = db
            .stock()
            .adjust_expected("wh-1", "v-14kg", -1, 0, fresh.version)
            .await
            .unwrap();
        assert_eq!(ok.filled.value(), 5);
    }

    #[tokio::test]
    async fn test_list_for_warehouse() {
        let db = setup().await;
        db.stock().adjust("wh-1", "v-14kg", 3, 0).await.unwrap();

        let rows = db.stock().list_for_warehouse("wh-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].filled.value(), 3);
        assert!(db.stock().list_for_warehouse("wh-2").await.unwrap().is_empty());
    }
}

//! # Ledger Entry Repository
//!
//! Storage for ledger entries and the read side of customer balances.
//!
//! ## Chains
//! ```text
//! customer_id  variant_id  date        id   issued returned  balance  due
//! ───────────  ──────────  ──────────  ───  ────── ────────  ───────  ──────
//! cust-1       v-14kg      2026-01-03   1     10      0        10     300.00
//! cust-1       v-14kg      2026-01-05   2      0      4         6     200.00
//! cust-1       NULL        2026-01-01   3      0      0         0     150.00  ← variant-less chain
//! ```
//! A chain is selected with `customer_id = ? AND variant_id IS ?`, so a
//! `NULL` variant selects the variant-less chain rather than nothing.
//!
//! Snapshot columns (`balance`, `due_amount_cents`) are written only by the
//! engine after a chain replay. This module never computes them.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use super::{money_col, quantity_col};
use crate::error::{DbError, DbResult};
use cylinder_core::chain::ChainState;
use cylinder_core::{ChainKey, CoreError, LedgerEntry, Money, NewLedgerEntry, Quantity};

const SELECT_ENTRY: &str = r#"
    SELECT
        id, customer_id, warehouse_id, variant_id, transaction_date, kind, sale_id,
        issued, returned, balance,
        total_amount_cents, amount_received_cents, due_amount_cents,
        payment_mode, bank_account_id, reference, update_reason,
        version, created_at, updated_at
    FROM ledger_entries
"#;

const CHAIN_ORDER: &str = "ORDER BY transaction_date, id";

/// Repository for ledger entry queries.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    /// Gets an entry by id.
    pub async fn get(&self, id: i64) -> DbResult<Option<LedgerEntry>> {
        let mut conn = self.pool.acquire().await?;
        find(&mut conn, id).await
    }

    /// One chain, ordered by (transaction_date, id).
    pub async fn history_for(&self, customer_id: &str, variant_id: Option<&str>) -> DbResult<Vec<LedgerEntry>> {
        let mut conn = self.pool.acquire().await?;
        load_chain(&mut conn, &ChainKey::new(customer_id, variant_id.map(str::to_string))).await
    }

    /// Every entry of a customer across all chains.
    pub async fn entries_for_customer(&self, customer_id: &str) -> DbResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "{} WHERE customer_id = ?1 ORDER BY variant_id, transaction_date, id",
            SELECT_ENTRY
        ))
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Balance after the last entry of the chain, or zero for an empty chain.
    pub async fn current_balance(&self, customer_id: &str, variant_id: Option<&str>) -> DbResult<Quantity> {
        let mut conn = self.pool.acquire().await?;
        let key = ChainKey::new(customer_id, variant_id.map(str::to_string));
        Ok(tail_state(&mut conn, &key).await?.balance)
    }

    /// Sum of the last due of every chain the customer has.
    ///
    /// The variant-less chain counts like any other.
    pub async fn outstanding_due(&self, customer_id: &str) -> DbResult<Money> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(e.due_amount_cents), 0)
            FROM ledger_entries e
            WHERE e.customer_id = ?1
              AND e.id = (
                  SELECT x.id FROM ledger_entries x
                  WHERE x.customer_id = e.customer_id
                    AND x.variant_id IS e.variant_id
                  ORDER BY x.transaction_date DESC, x.id DESC
                  LIMIT 1
              )
            "#,
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Money::from_cents(total))
    }

    /// Every chain that has at least one entry.
    pub async fn chain_keys(&self) -> DbResult<Vec<ChainKey>> {
        let rows = sqlx::query(
            "SELECT DISTINCT customer_id, variant_id FROM ledger_entries ORDER BY customer_id, variant_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| Ok(ChainKey::new(r.try_get::<String, _>("customer_id")?, r.try_get("variant_id")?)))
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(DbError::from)
    }

    /// Entries referencing a sale document.
    pub async fn entries_for_sale(&self, sale_id: &str) -> DbResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!("{} WHERE sale_id = ?1 {}", SELECT_ENTRY, CHAIN_ORDER))
            .bind(sale_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }
}

// =============================================================================
// Connection-scoped operations
// =============================================================================

pub async fn find(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<LedgerEntry>> {
    let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_ENTRY))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| entry_from_row(&r)).transpose()
}

pub async fn require(conn: &mut SqliteConnection, id: i64) -> DbResult<LedgerEntry> {
    find(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("LedgerEntry", id.to_string()))
}

/// Loads one whole chain in replay order.
pub async fn load_chain(conn: &mut SqliteConnection, key: &ChainKey) -> DbResult<Vec<LedgerEntry>> {
    let rows = sqlx::query(&format!(
        "{} WHERE customer_id = ?1 AND variant_id IS ?2 {}",
        SELECT_ENTRY, CHAIN_ORDER
    ))
    .bind(&key.customer_id)
    .bind(&key.variant_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(entry_from_row).collect()
}

/// Snapshot of the chain's last entry, or the opening state.
pub async fn tail_state(conn: &mut SqliteConnection, key: &ChainKey) -> DbResult<ChainState> {
    let row = sqlx::query(
        r#"
        SELECT balance, due_amount_cents FROM ledger_entries
        WHERE customer_id = ?1 AND variant_id IS ?2
        ORDER BY transaction_date DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(&key.customer_id)
    .bind(&key.variant_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(r) => Ok(ChainState {
            balance: quantity_col(&r, "ledger_entries", "balance")?,
            due: money_col(&r, "due_amount_cents")?,
        }),
        None => Ok(ChainState::opening()),
    }
}

/// Inserts a new entry with already-computed snapshots.
pub async fn insert(
    conn: &mut SqliteConnection,
    draft: &NewLedgerEntry,
    state: ChainState,
    reference: Option<&str>,
) -> DbResult<LedgerEntry> {
    let now = Utc::now();

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO ledger_entries (
            customer_id, warehouse_id, variant_id, transaction_date, kind, sale_id,
            issued, returned, balance,
            total_amount_cents, amount_received_cents, due_amount_cents,
            payment_mode, bank_account_id, reference, update_reason,
            version, created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9,
            ?10, ?11, ?12,
            ?13, ?14, ?15, NULL,
            1, ?16, ?16
        )
        RETURNING id
        "#,
    )
    .bind(&draft.customer_id)
    .bind(&draft.warehouse_id)
    .bind(&draft.variant_id)
    .bind(draft.transaction_date)
    .bind(draft.kind)
    .bind(&draft.sale_id)
    .bind(draft.issued.as_i64())
    .bind(draft.returned.as_i64())
    .bind(state.balance.as_i64())
    .bind(draft.total_amount.cents())
    .bind(draft.amount_received.cents())
    .bind(state.due.cents())
    .bind(draft.payment_mode)
    .bind(&draft.bank_account_id)
    .bind(reference)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    debug!(id, chain = %draft.chain_key(), kind = %draft.kind, "Inserted ledger entry");

    Ok(LedgerEntry {
        id,
        customer_id: draft.customer_id.clone(),
        warehouse_id: draft.warehouse_id.clone(),
        variant_id: draft.variant_id.clone(),
        transaction_date: draft.transaction_date,
        kind: draft.kind,
        sale_id: draft.sale_id.clone(),
        issued: draft.issued,
        returned: draft.returned,
        balance: state.balance,
        total_amount: draft.total_amount,
        amount_received: draft.amount_received,
        due_amount: state.due,
        payment_mode: draft.payment_mode,
        bank_account_id: draft.bank_account_id.clone(),
        reference: reference.map(str::to_string),
        update_reason: None,
        version: 1,
        created_at: now,
        updated_at: now,
    })
}

/// Writes the mutable fields of `entry` if the row is still at
/// `entry.version`, then bumps the in-memory copy to match.
pub async fn update(conn: &mut SqliteConnection, entry: &mut LedgerEntry, now: DateTime<Utc>) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE ledger_entries SET
            issued = ?2,
            returned = ?3,
            balance = ?4,
            total_amount_cents = ?5,
            amount_received_cents = ?6,
            due_amount_cents = ?7,
            payment_mode = ?8,
            bank_account_id = ?9,
            update_reason = ?10,
            version = version + 1,
            updated_at = ?11
        WHERE id = ?1 AND version = ?12
        "#,
    )
    .bind(entry.id)
    .bind(entry.issued.as_i64())
    .bind(entry.returned.as_i64())
    .bind(entry.balance.as_i64())
    .bind(entry.total_amount.cents())
    .bind(entry.amount_received.cents())
    .bind(entry.due_amount.cents())
    .bind(entry.payment_mode)
    .bind(&entry.bank_account_id)
    .bind(&entry.update_reason)
    .bind(now)
    .bind(entry.version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::stale("LedgerEntry", entry.id.to_string(), entry.version).into());
    }

    debug!(id = entry.id, version = entry.version + 1, "Updated ledger entry");
    entry.version += 1;
    entry.updated_at = now;
    Ok(())
}

/// Deletes an entry if it is still at `expected_version`.
pub async fn delete(conn: &mut SqliteConnection, id: i64, expected_version: i64) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM ledger_entries WHERE id = ?1 AND version = ?2")
        .bind(id)
        .bind(expected_version)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::stale("LedgerEntry", id.to_string(), expected_version).into());
    }

    debug!(id, "Deleted ledger entry");
    Ok(())
}

fn entry_from_row(r: &SqliteRow) -> DbResult<LedgerEntry> {
    const TABLE: &str = "ledger_entries";

    Ok(LedgerEntry {
        id: r.try_get("id")?,
        customer_id: r.try_get("customer_id")?,
        warehouse_id: r.try_get("warehouse_id")?,
        variant_id: r.try_get("variant_id")?,
        transaction_date: r.try_get("transaction_date")?,
        kind: r.try_get("kind")?,
        sale_id: r.try_get("sale_id")?,
        issued: quantity_col(r, TABLE, "issued")?,
        returned: quantity_col(r, TABLE, "returned")?,
        balance: quantity_col(r, TABLE, "balance")?,
        total_amount: money_col(r, "total_amount_cents")?,
        amount_received: money_col(r, "amount_received_cents")?,
        due_amount: money_col(r, "due_amount_cents")?,
        payment_mode: r.try_get("payment_mode")?,
        bank_account_id: r.try_get("bank_account_id")?,
        reference: r.try_get("reference")?,
        update_reason: r.try_get("update_reason")?,
        version: r.try_get("version")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{begin_write, Database, DbConfig};
    use chrono::NaiveDate;
    use cylinder_core::{Customer, TransactionKind, Variant};

    async fn setup() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.masters()
            .insert_customer(&Customer {
                id: "cust-1".into(),
                name: "Asha Traders".into(),
                phone: None,
                is_active: true,
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

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, day).unwrap()
    }

    fn state(balance: u32, due: i64) -> ChainState {
        ChainState {
            balance: Quantity::new(balance),
            due: Money::from_cents(due),
        }
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let db = setup().await;
        let draft = NewLedgerEntry::new(TransactionKind::Sale, "cust-1", Some("v-14kg".into()), jan(3))
            .issued(10)
            .total(Money::from_cents(50_000))
            .received(Money::from_cents(20_000));

        let mut tx = begin_write(db.pool()).await.unwrap();
        let inserted = insert(&mut tx, &draft, state(10, 30_000), Some("SO-WH1-202601-000001"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stored = db.ledger().get(inserted.id).await.unwrap().unwrap();
        assert_eq!(stored.kind, TransactionKind::Sale);
        assert_eq!(stored.balance.value(), 10);
        assert_eq!(stored.due_amount.cents(), 30_000);
        assert_eq!(stored.reference.as_deref(), Some("SO-WH1-202601-000001"));
        assert_eq!(stored.transaction_date, jan(3));
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_variant_less_chain_is_separate() {
        let db = setup().await;
        let mut tx = begin_write(db.pool()).await.unwrap();

        let opening = NewLedgerEntry::new(TransactionKind::InitialStock, "cust-1", None, jan(1))
            .total(Money::from_cents(15_000));
        insert(&mut tx, &opening, state(0, 15_000), None).await.unwrap();

        let sale = NewLedgerEntry::new(TransactionKind::Sale, "cust-1", Some("v-14kg".into()), jan(2))
            .issued(2)
            .total(Money::from_cents(1_000));
        insert(&mut tx, &sale, state(2, 1_000), None).await.unwrap();
        tx.commit().await.unwrap();

        let plain = db.ledger().history_for("cust-1", None).await.unwrap();
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].kind, TransactionKind::InitialStock);

        assert_eq!(db.ledger().current_balance("cust-1", Some("v-14kg")).await.unwrap().value(), 2);
        assert_eq!(db.ledger().current_balance("cust-1", None).await.unwrap().value(), 0);
        assert_eq!(db.ledger().outstanding_due("cust-1").await.unwrap().cents(), 16_000);
        assert_eq!(db.ledger().chain_keys().await.unwrap().len(), 2);
        assert_eq!(db.ledger().entries_for_customer("cust-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_checks_version() {
        let db = setup().await;
        let draft = NewLedgerEntry::new(TransactionKind::Sale, "cust-1", Some("v-14kg".into()), jan(3)).issued(1);

        let mut tx = begin_write(db.pool()).await.unwrap();
        let mut entry = insert(&mut tx, &draft, state(1, 0), None).await.unwrap();
        let mut stale_copy = entry.clone();

        entry.update_reason = Some("checked".into());
        update(&mut tx, &mut entry, Utc::now()).await.unwrap();
        assert_eq!(entry.version, 2);

        let err = update(&mut tx, &mut stale_copy, Utc::now()).await.unwrap_err();
        assert!(err.is_stale());

        let err = delete(&mut tx, entry.id, 1).await.unwrap_err();
        assert!(err.is_stale());
        delete(&mut tx, entry.id, 2).await.unwrap();
        tx.commit().await.unwrap();

        assert!(db.ledger().get(entry.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_chain_defaults() {
        let db = setup().await;
        assert_eq!(db.ledger().current_balance("cust-1", Some("v-14kg")).await.unwrap(), Quantity::zero());
        assert_eq!(db.ledger().outstanding_due("cust-1").await.unwrap(), Money::zero());
        assert!(db.ledger().history_for("cust-1", None).await.unwrap().is_empty());
    }
}

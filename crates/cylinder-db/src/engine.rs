//! # Ledger Engine
//!
//! The transactional surface of the cylinder ledger. Every mutating
//! operation runs in one SQLite write transaction that covers the chain
//! rows, the stock rows and the reference counters it touches.
//!
//! ## Append Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  append_ledger_entry(draft)                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate_new_entry ── field / kind / bank rules (no I/O)              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN (write lock) ── master lookups, load chain (date, id)           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  predecessor state + deltas ── negative? InvalidOperation              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  stock adjust (warehouse SALE / EMPTY_RETURN)                          │
//! │  reference    (SO / ER / DEP)                                          │
//! │  INSERT entry                                                          │
//! │       │                                                                 │
//! │       ├── dated before the chain tail? replay everything after it      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ── or drop the transaction on any error                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let db = Database::new(DbConfig::new("ledger.db")).await?;
//! let engine = db.engine(EngineConfig::default());
//!
//! let entry = engine
//!     .append_ledger_entry(
//!         NewLedgerEntry::new(TransactionKind::Sale, "cust-1", Some("v-14kg".into()), date)
//!             .warehouse("wh-1")
//!             .issued(10)
//!             .total(Money::from_major_minor(500, 0)),
//!     )
//!     .await?;
//! ```

use std::future::Future;

use chrono::{NaiveDate, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{DbError, DbResult};
use crate::pool::{begin_write, Database};
use crate::repository::{generate_id, ledger, master, receipt, reference, stock, transfer};
use cylinder_core::chain::{append_note, insertion_index, recalculate, ChainState};
use cylinder_core::reference::transfer_scope;
use cylinder_core::validation::{
    check_entry_rules, check_payment_against_due, validate_changes, validate_new_entry,
    validate_reason, validate_receipt_request, validate_transfer_request,
};
use cylinder_core::{
    BankAccount, ChainKey, CoreError, DocumentType, EntryChanges, InventoryStock, LedgerEntry, Money,
    NewLedgerEntry, PurchaseReceipt, Quantity, ReceiptRequest, RepairReport, TransactionKind,
    TransferRequest, Warehouse, WarehouseTransfer,
};

/// Transactional operations over ledger chains and warehouse stock.
///
/// Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct LedgerEngine {
    db: Database,
    config: EngineConfig,
}

impl LedgerEngine {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        LedgerEngine { db, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }

    // =========================================================================
    // Ledger entries
    // =========================================================================

    /// Records a new entry at its place in the chain.
    ///
    /// An entry dated before the chain tail is a retroactive insert: every
    /// later entry is replayed and rewritten in the same transaction, and
    /// the whole insert is refused if any of them would go negative.
    pub async fn append_ledger_entry(&self, draft: NewLedgerEntry) -> DbResult<LedgerEntry> {
        let result = self.append_inner(&draft).await;
        rejected("append_ledger_entry", result)
    }

    /// Inserts a back-dated entry. Same path as [`LedgerEngine::append_ledger_entry`],
    /// which already detects and handles entries dated before the tail.
    pub async fn insert_retroactive(&self, draft: NewLedgerEntry) -> DbResult<LedgerEntry> {
        self.append_ledger_entry(draft).await
    }

    async fn append_inner(&self, draft: &NewLedgerEntry) -> DbResult<LedgerEntry> {
        validate_new_entry(draft, self.today(), self.config.allow_future_dates)?;

        let mut tx = begin_write(self.db.pool()).await?;

        let customer = master::require_customer(&mut tx, &draft.customer_id).await?;
        if !customer.is_active {
            return Err(CoreError::invalid(format!("customer {} is inactive", customer.id)).into());
        }
        if let Some(variant_id) = &draft.variant_id {
            master::require_variant(&mut tx, variant_id).await?;
        }
        let warehouse = match &draft.warehouse_id {
            Some(id) => Some(master::require_warehouse(&mut tx, id).await?),
            None => None,
        };
        let bank = match &draft.bank_account_id {
            Some(id) => Some(master::require_bank_account(&mut tx, id).await?),
            None => None,
        };

        let key = draft.chain_key();
        let mut chain = ledger::load_chain(&mut tx, &key).await?;
        let pos = insertion_index(&chain, draft.transaction_date);
        let before = state_before(&chain, pos);

        if draft.is_payment_only() {
            check_payment_against_due(draft.amount_received, before.due)?;
        }

        let state = before.apply(&draft.deltas()).map_err(|violation| {
            CoreError::invalid(format!(
                "{} entry dated {} for chain {}: {}",
                draft.kind, draft.transaction_date, key, violation
            ))
        })?;

        apply_stock_effect(&mut tx, draft.warehouse_id.as_deref(), draft.variant_id.as_deref(), draft.stock_effect())
            .await?;

        let reference = match reference_target(draft, warehouse.as_ref(), bank.as_ref()) {
            Some((doc_type, scope)) => {
                Some(reference::next_in(&mut tx, doc_type, &scope, draft.transaction_date).await?.to_string())
            }
            None => None,
        };

        let entry = ledger::insert(&mut tx, draft, state, reference.as_deref()).await?;

        if pos < chain.len() {
            chain.insert(pos, entry.clone());
            let changed = recalculate(&mut chain, pos + 1)?;
            let note = format!(
                "Recalculated after back-dated {} #{} dated {}",
                entry.kind, entry.id, entry.transaction_date
            );
            write_recalculated(&mut tx, &mut chain, &changed, &note).await?;

            info!(
                id = entry.id,
                chain = %key,
                rewritten = changed.len(),
                "Inserted back-dated ledger entry"
            );
        } else {
            debug!(id = entry.id, chain = %key, "Appended ledger entry");
        }

        tx.commit().await?;
        Ok(entry)
    }

    /// Changes quantities, amounts or payment details of an existing entry
    /// and replays every later entry of its chain.
    ///
    /// The entry keeps its date, customer, variant, warehouse and reference.
    pub async fn amend_ledger_entry(
        &self,
        entry_id: i64,
        changes: EntryChanges,
        reason: &str,
    ) -> DbResult<LedgerEntry> {
        let result = self.amend_inner(entry_id, None, &changes, reason).await;
        rejected("amend_ledger_entry", result)
    }

    /// Like [`LedgerEngine::amend_ledger_entry`], but refuses with
    /// `StaleVersion` unless the entry is still at `expected_version`.
    pub async fn amend_ledger_entry_at_version(
        &self,
        entry_id: i64,
        expected_version: i64,
        changes: EntryChanges,
        reason: &str,
    ) -> DbResult<LedgerEntry> {
        let result = self.amend_inner(entry_id, Some(expected_version), &changes, reason).await;
        rejected("amend_ledger_entry", result)
    }

    async fn amend_inner(
        &self,
        entry_id: i64,
        expected_version: Option<i64>,
        changes: &EntryChanges,
        reason: &str,
    ) -> DbResult<LedgerEntry> {
        validate_changes(changes, reason)?;

        let mut tx = begin_write(self.db.pool()).await?;

        let current = ledger::require(&mut tx, entry_id).await?;
        if let Some(expected) = expected_version {
            if current.version != expected {
                return Err(CoreError::stale("LedgerEntry", entry_id.to_string(), expected).into());
            }
        }

        let mut chain = ledger::load_chain(&mut tx, &current.chain_key()).await?;
        let idx = position_of(&chain, entry_id)?;
        let old_effect = chain[idx].stock_effect();

        changes.apply_to(&mut chain[idx]);
        let target = chain[idx].clone();

        check_entry_rules(
            target.kind,
            &target.deltas(),
            target.payment_mode,
            target.bank_account_id.as_deref(),
        )?;
        if let Some(bank_id) = &target.bank_account_id {
            master::require_bank_account(&mut tx, bank_id).await?;
        }
        if target.is_payment_only() {
            check_payment_against_due(target.amount_received, state_before(&chain, idx).due)?;
        }

        let changed = recalculate(&mut chain, idx)?;

        let new_effect = target.stock_effect();
        apply_stock_effect(
            &mut tx,
            target.warehouse_id.as_deref(),
            target.variant_id.as_deref(),
            (new_effect.0 - old_effect.0, new_effect.1 - old_effect.1),
        )
        .await?;

        let now = Utc::now();
        chain[idx].update_reason = Some(append_note(
            chain[idx].update_reason.as_deref(),
            &format!("Amended: {}", reason),
        ));
        ledger::update(&mut tx, &mut chain[idx], now).await?;

        let downstream: Vec<usize> = changed.into_iter().filter(|&i| i != idx).collect();
        let note = format!("Recalculated after amendment of entry #{}: {}", entry_id, reason);
        write_recalculated(&mut tx, &mut chain, &downstream, &note).await?;

        tx.commit().await?;

        info!(
            id = entry_id,
            chain = %current.chain_key(),
            rewritten = downstream.len(),
            "Amended ledger entry"
        );
        Ok(chain[idx].clone())
    }

    /// Deletes an entry, reverses its stock effect and replays the rest of
    /// its chain. Refused if a later entry would go negative without it.
    pub async fn remove_ledger_entry(&self, entry_id: i64, reason: &str) -> DbResult<()> {
        let result = self.remove_inner(entry_id, reason).await;
        rejected("remove_ledger_entry", result)
    }

    async fn remove_inner(&self, entry_id: i64, reason: &str) -> DbResult<()> {
        validate_reason(reason)?;

        let mut tx = begin_write(self.db.pool()).await?;

        let current = ledger::require(&mut tx, entry_id).await?;
        let key = current.chain_key();
        let mut chain = ledger::load_chain(&mut tx, &key).await?;
        let idx = position_of(&chain, entry_id)?;
        let removed = chain.remove(idx);

        let (filled, empty) = removed.stock_effect();
        apply_stock_effect(
            &mut tx,
            removed.warehouse_id.as_deref(),
            removed.variant_id.as_deref(),
            (-filled, -empty),
        )
        .await?;

        ledger::delete(&mut tx, removed.id, removed.version).await?;

        let changed = recalculate(&mut chain, idx)?;
        let note = format!("Recalculated after removal of entry #{}: {}", entry_id, reason);
        write_recalculated(&mut tx, &mut chain, &changed, &note).await?;

        tx.commit().await?;

        info!(id = entry_id, chain = %key, rewritten = changed.len(), "Removed ledger entry");
        Ok(())
    }

    // =========================================================================
    // Repair
    // =========================================================================

    /// Replays one chain from its first entry and rewrites drifted snapshots.
    pub async fn repair_chain(&self, customer_id: &str, variant_id: Option<&str>) -> DbResult<RepairReport> {
        let key = ChainKey::new(customer_id, variant_id.map(str::to_string));
        let result = self.repair_inner(&key).await;
        rejected("repair_chain", result)
    }

    /// Replays every chain, one transaction per chain.
    ///
    /// Stops at the first chain that cannot be replayed; chains repaired
    /// before it stay committed. Running it twice reports zero corrections
    /// the second time.
    pub async fn repair_all_chains(&self) -> DbResult<RepairReport> {
        let keys = self.db.ledger().chain_keys().await?;
        info!(chains = keys.len(), "Repairing ledger chains");

        let mut report = RepairReport::default();
        for key in &keys {
            let chain_report = rejected("repair_all_chains", self.repair_inner(key).await)?;
            report.merge(chain_report);
        }

        info!(
            chains = report.chains_scanned,
            entries = report.entries_scanned,
            corrected = report.entries_corrected,
            "Ledger repair complete"
        );
        Ok(report)
    }

    async fn repair_inner(&self, key: &ChainKey) -> DbResult<RepairReport> {
        let mut tx = begin_write(self.db.pool()).await?;

        let mut chain = ledger::load_chain(&mut tx, key).await?;
        let changed = recalculate(&mut chain, 0)?;
        write_recalculated(&mut tx, &mut chain, &changed, "Recalculated by ledger repair").await?;

        tx.commit().await?;

        if !changed.is_empty() {
            warn!(chain = %key, corrected = changed.len(), "Corrected drifted snapshots");
        }

        Ok(RepairReport {
            chains_scanned: 1,
            entries_scanned: chain.len(),
            entries_corrected: changed.len(),
        })
    }

    // =========================================================================
    // Warehouse stock
    // =========================================================================

    /// Moves filled and empty cylinders between two warehouses.
    ///
    /// Debit, credit, reference and transfer row commit together or not at all.
    pub async fn transfer_stock(&self, request: TransferRequest) -> DbResult<WarehouseTransfer> {
        let result = self.transfer_inner(&request).await;
        rejected("transfer_stock", result)
    }

    async fn transfer_inner(&self, req: &TransferRequest) -> DbResult<WarehouseTransfer> {
        validate_transfer_request(req, self.today(), self.config.allow_future_dates)?;

        let mut tx = begin_write(self.db.pool()).await?;

        let source = master::require_warehouse(&mut tx, &req.source_warehouse_id).await?;
        let destination = master::require_warehouse(&mut tx, &req.destination_warehouse_id).await?;
        master::require_variant(&mut tx, &req.variant_id).await?;

        let filled = req.filled.as_i64();
        let empty = req.empty.as_i64();
        stock::adjust_in(&mut tx, &source.id, &req.variant_id, -filled, -empty, None).await?;
        stock::adjust_in(&mut tx, &destination.id, &req.variant_id, filled, empty, None).await?;

        let scope = transfer_scope(&source.code, &destination.code);
        let reference = reference::next_in(&mut tx, DocumentType::Transfer, &scope, req.transfer_date).await?;

        let record = WarehouseTransfer {
            id: generate_id(),
            source_warehouse_id: source.id.clone(),
            destination_warehouse_id: destination.id.clone(),
            variant_id: req.variant_id.clone(),
            filled: req.filled,
            empty: req.empty,
            transfer_date: req.transfer_date,
            reference: reference.to_string(),
            version: 1,
            created_at: Utc::now(),
        };
        transfer::insert_in(&mut tx, &record).await?;

        tx.commit().await?;

        info!(
            reference = %record.reference,
            from = %source.code,
            to = %destination.code,
            filled,
            empty,
            "Transferred stock"
        );
        Ok(record)
    }

    /// Books filled cylinders received from a supplier and empties sent back.
    pub async fn receive_stock(&self, request: ReceiptRequest) -> DbResult<PurchaseReceipt> {
        let result = self.receive_inner(&request).await;
        rejected("receive_stock", result)
    }

    async fn receive_inner(&self, req: &ReceiptRequest) -> DbResult<PurchaseReceipt> {
        validate_receipt_request(req, self.today(), self.config.allow_future_dates)?;

        let mut tx = begin_write(self.db.pool()).await?;

        let supplier = master::require_supplier(&mut tx, &req.supplier_id).await?;
        let warehouse = master::require_warehouse(&mut tx, &req.warehouse_id).await?;
        master::require_variant(&mut tx, &req.variant_id).await?;

        stock::adjust_in(
            &mut tx,
            &warehouse.id,
            &req.variant_id,
            req.filled_received.as_i64(),
            -req.empty_returned.as_i64(),
            None,
        )
        .await?;

        let reference = reference::next_in(&mut tx, DocumentType::Purchase, &supplier.code, req.receipt_date).await?;

        let record = PurchaseReceipt {
            id: generate_id(),
            supplier_id: supplier.id.clone(),
            warehouse_id: warehouse.id.clone(),
            variant_id: req.variant_id.clone(),
            filled_received: req.filled_received,
            empty_returned: req.empty_returned,
            receipt_date: req.receipt_date,
            reference: reference.to_string(),
            created_at: Utc::now(),
        };
        receipt::insert_in(&mut tx, &record).await?;

        tx.commit().await?;

        info!(reference = %record.reference, warehouse = %warehouse.code, "Received stock");
        Ok(record)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn current_balance(&self, customer_id: &str, variant_id: Option<&str>) -> DbResult<Quantity> {
        self.require_known(customer_id, variant_id).await?;
        self.db.ledger().current_balance(customer_id, variant_id).await
    }

    pub async fn outstanding_due(&self, customer_id: &str) -> DbResult<Money> {
        self.require_known(customer_id, None).await?;
        self.db.ledger().outstanding_due(customer_id).await
    }

    pub async fn history_for(&self, customer_id: &str, variant_id: Option<&str>) -> DbResult<Vec<LedgerEntry>> {
        self.require_known(customer_id, variant_id).await?;
        self.db.ledger().history_for(customer_id, variant_id).await
    }

    /// Stock at a warehouse. A pair that has never moved reads as all zero
    /// at version 0; no row is written.
    pub async fn stock_level(&self, warehouse_id: &str, variant_id: &str) -> DbResult<InventoryStock> {
        let mut conn = self.db.pool().acquire().await?;
        master::require_warehouse(&mut conn, warehouse_id).await?;
        master::require_variant(&mut conn, variant_id).await?;

        let found = stock::find(&mut conn, warehouse_id, variant_id).await?;
        Ok(found.unwrap_or_else(|| InventoryStock {
            id: String::new(),
            warehouse_id: warehouse_id.to_string(),
            variant_id: variant_id.to_string(),
            filled: Quantity::zero(),
            empty: Quantity::zero(),
            version: 0,
            last_updated: Utc::now(),
        }))
    }

    /// NotFound for an unknown customer or variant. Releases its connection
    /// before returning.
    async fn require_known(&self, customer_id: &str, variant_id: Option<&str>) -> DbResult<()> {
        let mut conn = self.db.pool().acquire().await?;
        master::require_customer(&mut conn, customer_id).await?;
        if let Some(variant_id) = variant_id {
            master::require_variant(&mut conn, variant_id).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Retry
    // =========================================================================

    /// Runs `op` again while it fails with `StaleVersion`, at most
    /// `max_stale_retries` extra times. Any other error is returned at once.
    ///
    /// ```rust,ignore
    /// let stock = engine
    ///     .retry_stale(|| {
    ///         let db = db.clone();
    ///         async move {
    ///             let row = db.stock().get_or_create("wh-1", "v-14kg").await?;
    ///             db.stock().adjust_expected("wh-1", "v-14kg", -1, 0, row.version).await
    ///         }
    ///     })
    ///     .await?;
    /// ```
    pub async fn retry_stale<T, F, Fut>(&self, mut op: F) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Err(err) if err.is_stale() && attempt < self.config.max_stale_retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "Retrying after stale version");
                    tokio::task::yield_now().await;
                }
                other => return other,
            }
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn rejected<T>(operation: &str, result: DbResult<T>) -> DbResult<T> {
    if let Err(err) = &result {
        warn!(operation, kind = ?err.kind(), error = %err, "Operation rejected");
    }
    result
}

fn state_before(chain: &[LedgerEntry], pos: usize) -> ChainState {
    match pos {
        0 => ChainState::opening(),
        n => ChainState::of(&chain[n - 1]),
    }
}

fn position_of(chain: &[LedgerEntry], entry_id: i64) -> DbResult<usize> {
    chain
        .iter()
        .position(|e| e.id == entry_id)
        .ok_or_else(|| DbError::not_found("LedgerEntry", entry_id.to_string()))
}

/// Which sequence, if any, stamps a new entry.
fn reference_target(
    draft: &NewLedgerEntry,
    warehouse: Option<&Warehouse>,
    bank: Option<&BankAccount>,
) -> Option<(DocumentType, String)> {
    match (draft.kind, warehouse) {
        (TransactionKind::Sale, Some(wh)) => return Some((DocumentType::Sale, wh.code.clone())),
        (TransactionKind::EmptyReturn, Some(wh)) => return Some((DocumentType::EmptyReturn, wh.code.clone())),
        _ => {}
    }

    match bank {
        Some(bank) if draft.is_payment_only() && draft.payment_mode.requires_bank_account() => {
            Some((DocumentType::BankDeposit, bank.code.clone()))
        }
        _ => None,
    }
}

async fn apply_stock_effect(
    conn: &mut SqliteConnection,
    warehouse_id: Option<&str>,
    variant_id: Option<&str>,
    (delta_filled, delta_empty): (i64, i64),
) -> DbResult<()> {
    if delta_filled == 0 && delta_empty == 0 {
        return Ok(());
    }
    if let (Some(warehouse_id), Some(variant_id)) = (warehouse_id, variant_id) {
        stock::adjust_in(conn, warehouse_id, variant_id, delta_filled, delta_empty, None).await?;
    }
    Ok(())
}

async fn write_recalculated(
    conn: &mut SqliteConnection,
    chain: &mut [LedgerEntry],
    indices: &[usize],
    note: &str,
) -> DbResult<()> {
    let now = Utc::now();
    for &i in indices {
        let entry = &mut chain[i];
        entry.update_reason = Some(append_note(entry.update_reason.as_deref(), note));
        ledger::update(conn, entry, now).await?;
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, ErrorKind};
    use crate::pool::DbConfig;
    use cylinder_core::{BankAccount, Customer, PaymentMode, Supplier, ValidationError, Variant};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const V: &str = "v-14kg";

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, day).unwrap()
    }

    fn rupees(major: i64) -> Money {
        Money::from_major_minor(major, 0)
    }

    async fn setup() -> (Database, LedgerEngine) {
        setup_with(DbConfig::in_memory()).await
    }

    async fn setup_with(config: DbConfig) -> (Database, LedgerEngine) {
        let db = Database::new(config).await.unwrap();
        let masters = db.masters();

        for (id, name) in [("cust-1", "Asha Traders"), ("cust-2", "Bharat Eatery")] {
            masters
                .insert_customer(&Customer {
                    id: id.into(),
                    name: name.into(),
                    phone: None,
                    is_active: true,
                })
                .await
                .unwrap();
        }
        masters
            .insert_variant(&Variant {
                id: V.into(),
                code: "DOM14".into(),
                name: "Domestic".into(),
                capacity: "14.2kg".into(),
            })
            .await
            .unwrap();
        for (id, code) in [("wh-1", "WH1"), ("wh-2", "WH2")] {
            masters
                .insert_warehouse(&Warehouse {
                    id: id.into(),
                    code: code.into(),
                    name: format!("Godown {}", code),
                })
                .await
                .unwrap();
        }
        masters
            .insert_supplier(&Supplier {
                id: "sup-1".into(),
                code: "IOCL".into(),
                name: "Indian Oil".into(),
            })
            .await
            .unwrap();
        masters
            .insert_bank_account(&BankAccount {
                id: "bank-1".into(),
                code: "HDFC01".into(),
                bank_name: "HDFC".into(),
                account_number: "00112233".into(),
            })
            .await
            .unwrap();

        let engine = db.engine(EngineConfig::default().allow_future_dates(true));
        (db, engine)
    }

    fn sale(day: u32, issued: u32, total: i64, received: i64) -> NewLedgerEntry {
        NewLedgerEntry::new(TransactionKind::Sale, "cust-1", Some(V.into()), jan(day))
            .issued(issued)
            .total(rupees(total))
            .received(rupees(received))
    }

    fn empty_return(day: u32, returned: u32, received: i64) -> NewLedgerEntry {
        NewLedgerEntry::new(TransactionKind::EmptyReturn, "cust-1", Some(V.into()), jan(day))
            .returned(returned)
            .received(rupees(received))
    }

    fn snapshots(entries: &[LedgerEntry]) -> Vec<(u32, i64)> {
        entries
            .iter()
            .map(|e| (e.balance.value(), e.due_amount.major()))
            .collect()
    }

    async fn receive(engine: &LedgerEngine, warehouse_id: &str, filled: u32) -> PurchaseReceipt {
        engine
            .receive_stock(ReceiptRequest {
                supplier_id: "sup-1".into(),
                warehouse_id: warehouse_id.into(),
                variant_id: V.into(),
                filled_received: Quantity::new(filled),
                empty_returned: Quantity::zero(),
                receipt_date: jan(2),
            })
            .await
            .unwrap()
    }

    fn transfer_request(filled: u32, empty: u32) -> TransferRequest {
        TransferRequest {
            source_warehouse_id: "wh-1".into(),
            destination_warehouse_id: "wh-2".into(),
            variant_id: V.into(),
            filled: Quantity::new(filled),
            empty: Quantity::new(empty),
            transfer_date: jan(15),
        }
    }

    // -------------------------------------------------------------------------
    // Chains
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_sale_and_return_snapshots() {
        let (_db, engine) = setup().await;

        let e1 = engine.append_ledger_entry(sale(3, 10, 500, 200)).await.unwrap();
        assert_eq!((e1.balance.value(), e1.due_amount), (10, rupees(300)));

        let e2 = engine.append_ledger_entry(empty_return(5, 4, 100)).await.unwrap();
        assert_eq!((e2.balance.value(), e2.due_amount), (6, rupees(200)));

        assert_eq!(engine.current_balance("cust-1", Some(V)).await.unwrap().value(), 6);
        assert_eq!(engine.outstanding_due("cust-1").await.unwrap(), rupees(200));
    }

    #[tokio::test]
    async fn test_amend_that_overpays_is_rejected_before_downstream() {
        let (_db, engine) = setup().await;
        let e1 = engine.append_ledger_entry(sale(3, 10, 500, 200)).await.unwrap();
        engine.append_ledger_entry(empty_return(5, 4, 100)).await.unwrap();
        let before = engine.history_for("cust-1", Some(V)).await.unwrap();

        let changes = EntryChanges {
            amount_received: Some(rupees(600)),
            ..Default::default()
        };
        let err = engine
            .amend_ledger_entry(e1.id, changes, "customer paid in full")
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::Domain(CoreError::InvalidOperation(_))));
        assert_eq!(ApiError::from(err).code, ErrorKind::InvalidOperation);
        assert_eq!(engine.history_for("cust-1", Some(V)).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_amend_replays_downstream_with_notes() {
        let (_db, engine) = setup().await;
        let e1 = engine.append_ledger_entry(sale(3, 10, 500, 200)).await.unwrap();
        engine.append_ledger_entry(empty_return(5, 4, 100)).await.unwrap();
        engine.append_ledger_entry(sale(7, 2, 100, 100)).await.unwrap();

        let amended = engine
            .amend_ledger_entry(
                e1.id,
                EntryChanges {
                    issued: Some(Quantity::new(8)),
                    total_amount: Some(rupees(400)),
                    ..Default::default()
                },
                "miscounted at delivery",
            )
            .await
            .unwrap();
        assert_eq!((amended.balance.value(), amended.due_amount), (8, rupees(200)));
        assert_eq!(amended.version, 2);
        assert_eq!(amended.update_reason.as_deref(), Some("Amended: miscounted at delivery"));

        let chain = engine.history_for("cust-1", Some(V)).await.unwrap();
        assert_eq!(snapshots(&chain), vec![(8, 200), (4, 100), (6, 100)]);
        for downstream in &chain[1..] {
            assert_eq!(downstream.version, 2);
            assert_eq!(
                downstream.update_reason.as_deref(),
                Some(format!("Recalculated after amendment of entry #{}: miscounted at delivery", e1.id).as_str())
            );
        }
    }

    #[tokio::test]
    async fn test_amend_payment_details_only_rewrites_target() {
        let (_db, engine) = setup().await;
        let e1 = engine.append_ledger_entry(sale(3, 10, 500, 200)).await.unwrap();
        let e2 = engine.append_ledger_entry(empty_return(5, 4, 100)).await.unwrap();

        let amended = engine
            .amend_ledger_entry(
                e1.id,
                EntryChanges {
                    payment_mode: Some(PaymentMode::Upi),
                    bank_account_id: Some(Some("bank-1".into())),
                    ..Default::default()
                },
                "paid by UPI",
            )
            .await
            .unwrap();
        assert_eq!(amended.payment_mode, PaymentMode::Upi);
        assert_eq!(amended.version, 2);

        let chain = engine.history_for("cust-1", Some(V)).await.unwrap();
        assert_eq!(chain[1].id, e2.id);
        assert_eq!(chain[1].version, 1);
        assert!(chain[1].update_reason.is_none());
    }

    #[tokio::test]
    async fn test_back_dated_insert_replays_later_entries() {
        let (_db, engine) = setup().await;
        engine.append_ledger_entry(sale(3, 10, 500, 0)).await.unwrap();
        engine.append_ledger_entry(empty_return(10, 4, 0)).await.unwrap();

        let back = engine.insert_retroactive(empty_return(5, 2, 100)).await.unwrap();
        assert_eq!((back.balance.value(), back.due_amount), (8, rupees(400)));

        let chain = engine.history_for("cust-1", Some(V)).await.unwrap();
        assert_eq!(
            chain.iter().map(|e| e.transaction_date).collect::<Vec<_>>(),
            vec![jan(3), jan(5), jan(10)]
        );
        assert_eq!(snapshots(&chain), vec![(10, 500), (8, 400), (4, 400)]);
        assert!(chain[2]
            .update_reason
            .as_deref()
            .unwrap()
            .starts_with(&format!("Recalculated after back-dated EMPTY_RETURN #{}", back.id)));
        assert!(chain[0].update_reason.is_none());
    }

    #[tokio::test]
    async fn test_rejected_back_dated_insert_leaves_chain_unchanged() {
        let (db, engine) = setup().await;
        engine.append_ledger_entry(sale(3, 10, 500, 0)).await.unwrap();
        engine.append_ledger_entry(empty_return(10, 8, 0)).await.unwrap();
        let before = engine.history_for("cust-1", Some(V)).await.unwrap();

        // Fine on Jan 5, but leaves too few cylinders for the Jan 10 return.
        let err = engine.append_ledger_entry(empty_return(5, 5, 0)).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::InvalidOperation(_))));
        assert!(err.to_string().contains("EMPTY_RETURN entry #2"), "{}", err);

        assert_eq!(engine.history_for("cust-1", Some(V)).await.unwrap(), before);
        assert_eq!(db.ledger().entries_for_customer("cust-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_return_beyond_balance_is_rejected() {
        let (_db, engine) = setup().await;
        engine.append_ledger_entry(sale(3, 2, 100, 0)).await.unwrap();

        let err = engine.append_ledger_entry(empty_return(4, 3, 0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[tokio::test]
    async fn test_remove_replays_and_refuses_orphaning_returns() {
        let (_db, engine) = setup().await;
        let e1 = engine.append_ledger_entry(sale(3, 10, 500, 200)).await.unwrap();
        let e2 = engine.append_ledger_entry(sale(4, 2, 100, 0)).await.unwrap();
        engine.append_ledger_entry(empty_return(5, 4, 100)).await.unwrap();

        // Without the first sale the return would take back cylinders never issued.
        let err = engine.remove_ledger_entry(e1.id, "duplicate").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
        assert_eq!(engine.history_for("cust-1", Some(V)).await.unwrap().len(), 3);

        engine.remove_ledger_entry(e2.id, "entered twice").await.unwrap();
        let chain = engine.history_for("cust-1", Some(V)).await.unwrap();
        assert_eq!(snapshots(&chain), vec![(10, 300), (6, 200)]);
        assert!(chain[1]
            .update_reason
            .as_deref()
            .unwrap()
            .contains(&format!("removal of entry #{}: entered twice", e2.id)));

        let err = engine.remove_ledger_entry(e2.id, "again").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = engine.remove_ledger_entry(e1.id, "  ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_chains_are_independent_per_variant() {
        let (db, engine) = setup().await;
        db.masters()
            .insert_variant(&Variant {
                id: "v-19kg".into(),
                code: "COM19".into(),
                name: "Commercial".into(),
                capacity: "19kg".into(),
            })
            .await
            .unwrap();

        engine.append_ledger_entry(sale(3, 10, 500, 0)).await.unwrap();
        engine
            .append_ledger_entry(
                NewLedgerEntry::new(TransactionKind::Sale, "cust-1", Some("v-19kg".into()), jan(4))
                    .issued(1)
                    .total(rupees(1800)),
            )
            .await
            .unwrap();
        engine
            .append_ledger_entry(
                NewLedgerEntry::new(TransactionKind::InitialStock, "cust-1", None, jan(1)).total(rupees(250)),
            )
            .await
            .unwrap();

        assert_eq!(engine.current_balance("cust-1", Some(V)).await.unwrap().value(), 10);
        assert_eq!(engine.current_balance("cust-1", Some("v-19kg")).await.unwrap().value(), 1);
        assert_eq!(engine.outstanding_due("cust-1").await.unwrap(), rupees(2550));
        assert_eq!(engine.outstanding_due("cust-2").await.unwrap(), Money::zero());
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_payment_rules() {
        let (_db, engine) = setup().await;
        engine.append_ledger_entry(sale(3, 5, 300, 0)).await.unwrap();

        let payment = |amount: i64| {
            NewLedgerEntry::new(TransactionKind::Payment, "cust-1", Some(V.into()), jan(6)).received(rupees(amount))
        };

        let err = engine.append_ledger_entry(payment(400)).await.unwrap_err();
        assert!(err.to_string().contains("exceeds outstanding due"), "{}", err);

        let err = engine
            .append_ledger_entry(payment(100).paid_via(PaymentMode::Upi, None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);

        let err = engine
            .append_ledger_entry(payment(100).paid_via(PaymentMode::Cheque, Some("bank-404".into())))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let cash = engine.append_ledger_entry(payment(50)).await.unwrap();
        assert_eq!(cash.reference, None);

        let upi = engine
            .append_ledger_entry(payment(100).paid_via(PaymentMode::Upi, Some("bank-1".into())))
            .await
            .unwrap();
        assert_eq!(upi.reference.as_deref(), Some("DEP-HDFC01-202601-000001"));
        assert_eq!(upi.due_amount, rupees(150));
        assert_eq!(upi.balance.value(), 5);

        let err = engine.append_ledger_entry(payment(0).issued(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[tokio::test]
    async fn test_back_dated_payment_checked_against_due_at_that_date() {
        let (_db, engine) = setup().await;
        engine.append_ledger_entry(sale(3, 1, 100, 0)).await.unwrap();
        engine.append_ledger_entry(sale(10, 1, 900, 0)).await.unwrap();

        // 1000 is owed by Jan 10, but only 100 on Jan 5.
        let payment = NewLedgerEntry::new(TransactionKind::Payment, "cust-1", Some(V.into()), jan(5))
            .received(rupees(150));
        let err = engine.append_ledger_entry(payment).await.unwrap_err();
        assert!(err.to_string().contains("exceeds outstanding due of 100.00"), "{}", err);
    }

    // -------------------------------------------------------------------------
    // Master data and dates
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_unknown_or_inactive_customer() {
        let (db, engine) = setup().await;

        let mut draft = sale(3, 1, 10, 0);
        draft.customer_id = "cust-404".into();
        let err = engine.append_ledger_entry(draft).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        db.masters().deactivate_customer("cust-1").await.unwrap();
        let err = engine.append_ledger_entry(sale(3, 1, 10, 0)).await.unwrap_err();
        assert!(err.to_string().contains("inactive"), "{}", err);
    }

    #[tokio::test]
    async fn test_reads_reject_unknown_ids() {
        let (db, engine) = setup().await;

        let err = engine.stock_level("wh-404", V).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(ApiError::from(err).code, ErrorKind::NotFound);
        let err = engine.stock_level("wh-1", "v-404").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = engine.current_balance("cust-404", Some(V)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = engine.current_balance("cust-1", Some("v-404")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = engine.outstanding_due("cust-404").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = engine.history_for("cust-404", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // Known ids that never moved read as zero without writing a row.
        let stock = engine.stock_level("wh-2", V).await.unwrap();
        assert_eq!((stock.filled.value(), stock.empty.value(), stock.version), (0, 0, 0));
        assert!(db.stock().get("wh-2", V).await.unwrap().is_none());
        assert_eq!(engine.current_balance("cust-2", Some(V)).await.unwrap().value(), 0);
        assert_eq!(engine.outstanding_due("cust-2").await.unwrap(), Money::zero());
    }

    #[tokio::test]
    async fn test_future_date_rejected_by_default() {
        let (db, _) = setup().await;
        let engine = db.engine(EngineConfig::default());
        let tomorrow = Utc::now().date_naive().succ_opt().unwrap();

        let draft = NewLedgerEntry::new(TransactionKind::Sale, "cust-1", Some(V.into()), tomorrow)
            .issued(1)
            .total(rupees(10));
        let err = engine.append_ledger_entry(draft).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::Validation(ValidationError::FutureDate { .. }))
        ));
    }

    // -------------------------------------------------------------------------
    // Warehouse-bound entries
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_warehouse_entries_move_stock_and_take_references() {
        let (db, engine) = setup().await;
        let receipt = receive(&engine, "wh-1", 20).await;
        assert_eq!(receipt.reference, "PO-IOCL-202601-000001");

        let sold = engine
            .append_ledger_entry(sale(3, 5, 250, 0).warehouse("wh-1"))
            .await
            .unwrap();
        assert_eq!(sold.reference.as_deref(), Some("SO-WH1-202601-000001"));

        let returned = engine
            .append_ledger_entry(empty_return(4, 3, 0).warehouse("wh-1"))
            .await
            .unwrap();
        assert_eq!(returned.reference.as_deref(), Some("ER-WH1-202601-000001"));

        let stock = engine.stock_level("wh-1", V).await.unwrap();
        assert_eq!((stock.filled.value(), stock.empty.value()), (15, 3));

        // Amending the sale moves only the difference.
        let amended = engine
            .amend_ledger_entry(
                sold.id,
                EntryChanges {
                    issued: Some(Quantity::new(7)),
                    ..Default::default()
                },
                "two more loaded",
            )
            .await
            .unwrap();
        assert_eq!(amended.reference, sold.reference);
        let stock = engine.stock_level("wh-1", V).await.unwrap();
        assert_eq!((stock.filled.value(), stock.empty.value()), (13, 3));

        engine.remove_ledger_entry(returned.id, "wrong customer").await.unwrap();
        engine.remove_ledger_entry(sold.id, "cancelled").await.unwrap();
        let stock = engine.stock_level("wh-1", V).await.unwrap();
        assert_eq!((stock.filled.value(), stock.empty.value()), (20, 0));
        assert!(db.ledger().history_for("cust-1", Some(V)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sale_without_stock_writes_nothing() {
        let (db, engine) = setup().await;

        let err = engine
            .append_ledger_entry(sale(3, 5, 250, 0).warehouse("wh-1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientStock {
                available_filled: 0,
                requested_filled: 5,
                ..
            })
        ));

        assert!(engine.history_for("cust-1", Some(V)).await.unwrap().is_empty());
        assert_eq!(db.references().current(DocumentType::Sale, "WH1", jan(3)).await.unwrap(), 0);
    }

    // -------------------------------------------------------------------------
    // Transfers and receipts
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_transfer_moves_stock_between_warehouses() {
        let (db, engine) = setup().await;
        receive(&engine, "wh-1", 5).await;

        let record = engine.transfer_stock(transfer_request(5, 0)).await.unwrap();
        assert_eq!(record.reference, "WT-WH1-WH2-202601-000001");

        let wh1 = engine.stock_level("wh-1", V).await.unwrap();
        let wh2 = engine.stock_level("wh-2", V).await.unwrap();
        assert_eq!(wh1.filled.value(), 0);
        assert_eq!(wh2.filled.value(), 5);

        assert_eq!(db.transfers().list_for_warehouse("wh-1").await.unwrap().len(), 1);
        let incoming = db.transfers().list_for_warehouse("wh-2").await.unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].id, record.id);

        let stored = db.transfers().get_by_reference(&record.reference).await.unwrap().unwrap();
        assert_eq!((stored.source_warehouse_id.as_str(), stored.filled.value()), ("wh-1", 5));
    }

    #[tokio::test]
    async fn test_transfer_preconditions() {
        let (db, engine) = setup().await;
        receive(&engine, "wh-1", 5).await;

        let err = engine.transfer_stock(transfer_request(8, 0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert!(db.stock().get("wh-2", V).await.unwrap().is_none());

        let mut same = transfer_request(1, 0);
        same.destination_warehouse_id = "wh-1".into();
        let err = engine.transfer_stock(same).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine.transfer_stock(transfer_request(0, 0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);

        let wh1 = db.stock().get("wh-1", V).await.unwrap().unwrap();
        assert_eq!(wh1.filled.value(), 5);
    }

    #[tokio::test]
    async fn test_failed_transfer_insert_rolls_back_both_sides() {
        let (db, engine) = setup().await;
        receive(&engine, "wh-1", 5).await;
        let wh1_before = db.stock().get("wh-1", V).await.unwrap().unwrap();

        sqlx::query(
            r#"
            CREATE TRIGGER fail_transfer BEFORE INSERT ON warehouse_transfers
            BEGIN SELECT RAISE(ABORT, 'injected fault'); END
            "#,
        )
        .execute(db.pool())
        .await
        .unwrap();

        let err = engine.transfer_stock(transfer_request(5, 0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);

        assert_eq!(db.stock().get("wh-1", V).await.unwrap().unwrap(), wh1_before);
        assert!(db.stock().get("wh-2", V).await.unwrap().is_none());
        assert_eq!(
            db.references().current(DocumentType::Transfer, "WH1-WH2", jan(15)).await.unwrap(),
            0
        );

        sqlx::query("DROP TRIGGER fail_transfer").execute(db.pool()).await.unwrap();
        let record = engine.transfer_stock(transfer_request(5, 0)).await.unwrap();
        assert_eq!(record.reference, "WT-WH1-WH2-202601-000001");
    }

    #[tokio::test]
    async fn test_failed_credit_rolls_back_debit() {
        let (db, engine) = setup().await;
        receive(&engine, "wh-1", 5).await;

        sqlx::query(
            r#"
            CREATE TRIGGER fail_credit BEFORE INSERT ON inventory_stock
            WHEN NEW.warehouse_id = 'wh-2'
            BEGIN SELECT RAISE(ABORT, 'injected fault'); END
            "#,
        )
        .execute(db.pool())
        .await
        .unwrap();

        assert!(engine.transfer_stock(transfer_request(3, 0)).await.is_err());

        let wh1 = db.stock().get("wh-1", V).await.unwrap().unwrap();
        assert_eq!(wh1.filled.value(), 5);
        assert!(db.transfers().list_for_warehouse("wh-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_transfers_lose_no_update() {
        let (db, engine) = setup().await;
        receive(&engine, "wh-1", 50).await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.transfer_stock(transfer_request(2, 0)).await.unwrap()
            }));
        }

        let mut references = HashSet::new();
        for handle in handles {
            assert!(references.insert(handle.await.unwrap().reference));
        }
        assert!(references.contains("WT-WH1-WH2-202601-000020"));

        let wh1 = db.stock().get("wh-1", V).await.unwrap().unwrap();
        let wh2 = db.stock().get("wh-2", V).await.unwrap().unwrap();
        assert_eq!((wh1.filled.value(), wh2.filled.value()), (10, 40));
        assert_eq!(wh1.filled.value() + wh2.filled.value(), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_writers_contend_on_shared_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig::new(dir.path().join("ledger.db")).max_connections(5);
        let (db, engine) = setup_with(config).await;
        receive(&engine, "wh-1", 100).await;
        let first = engine.append_ledger_entry(sale(3, 1, 100, 0)).await.unwrap();

        let mut transfers = Vec::new();
        for _ in 0..20 {
            let engine = engine.clone();
            transfers.push(tokio::spawn(async move { engine.transfer_stock(transfer_request(2, 0)).await }));
        }
        let mut appends = Vec::new();
        for _ in 0..20 {
            let engine = engine.clone();
            appends.push(tokio::spawn(async move { engine.append_ledger_entry(sale(5, 1, 100, 0)).await }));
        }
        let mut amends = Vec::new();
        for k in 1..=10 {
            let engine = engine.clone();
            let changes = EntryChanges {
                amount_received: Some(rupees(k)),
                ..Default::default()
            };
            amends.push(tokio::spawn(async move {
                engine.amend_ledger_entry(first.id, changes, "partial payment").await
            }));
        }
        let mut allocations = Vec::new();
        for _ in 0..10 {
            let refs = db.references();
            allocations.push(tokio::spawn(async move {
                refs.next(DocumentType::BankAdjustment, "HDFC01", jan(15)).await
            }));
        }

        let mut references = HashSet::new();
        for handle in transfers {
            assert!(references.insert(handle.await.unwrap().unwrap().reference));
        }
        for handle in appends {
            handle.await.unwrap().unwrap();
        }
        for handle in amends {
            handle.await.unwrap().unwrap();
        }
        for handle in allocations {
            assert!(references.insert(handle.await.unwrap().unwrap()));
        }
        assert_eq!(references.len(), 30);

        let wh1 = engine.stock_level("wh-1", V).await.unwrap();
        let wh2 = engine.stock_level("wh-2", V).await.unwrap();
        assert_eq!((wh1.filled.value(), wh2.filled.value()), (60, 40));

        let chain = engine.history_for("cust-1", Some(V)).await.unwrap();
        assert_eq!(chain.len(), 21);
        let mut state = ChainState::opening();
        for (i, entry) in chain.iter().enumerate() {
            state = state.apply(&entry.deltas()).unwrap();
            assert_eq!(ChainState::of(entry), state, "snapshot at {}", i);
            assert_eq!(entry.balance.value(), i as u32 + 1);
        }
        assert_eq!(engine.current_balance("cust-1", Some(V)).await.unwrap().value(), 21);
    }

    #[tokio::test]
    async fn test_receipt_sends_back_empties() {
        let (db, engine) = setup().await;
        // Empties come back from a customer first.
        receive(&engine, "wh-1", 10).await;
        engine.append_ledger_entry(sale(3, 4, 200, 0).warehouse("wh-1")).await.unwrap();
        engine
            .append_ledger_entry(empty_return(4, 4, 0).warehouse("wh-1"))
            .await
            .unwrap();

        let request = ReceiptRequest {
            supplier_id: "sup-1".into(),
            warehouse_id: "wh-1".into(),
            variant_id: V.into(),
            filled_received: Quantity::new(4),
            empty_returned: Quantity::new(4),
            receipt_date: jan(6),
        };
        let receipt = engine.receive_stock(request.clone()).await.unwrap();
        assert_eq!(receipt.reference, "PO-IOCL-202601-000002");

        let stock = engine.stock_level("wh-1", V).await.unwrap();
        assert_eq!((stock.filled.value(), stock.empty.value()), (10, 0));

        let err = engine.receive_stock(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(db.receipts().list_for_warehouse("wh-1").await.unwrap().len(), 2);
    }

    // -------------------------------------------------------------------------
    // Repair and retries
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_repair_corrects_drift_and_is_idempotent() {
        let (db, engine) = setup().await;
        let e1 = engine.append_ledger_entry(sale(3, 10, 500, 200)).await.unwrap();
        engine.append_ledger_entry(empty_return(5, 4, 100)).await.unwrap();
        engine
            .append_ledger_entry(
                NewLedgerEntry::new(TransactionKind::InitialStock, "cust-2", None, jan(1)).total(rupees(75)),
            )
            .await
            .unwrap();

        sqlx::query("UPDATE ledger_entries SET balance = 99, due_amount_cents = 0 WHERE id = ?1")
            .bind(e1.id)
            .execute(db.pool())
            .await
            .unwrap();

        let report = engine.repair_all_chains().await.unwrap();
        assert_eq!(
            report,
            RepairReport {
                chains_scanned: 2,
                entries_scanned: 3,
                entries_corrected: 1,
            }
        );

        let repaired = db.ledger().get(e1.id).await.unwrap().unwrap();
        assert_eq!((repaired.balance.value(), repaired.due_amount), (10, rupees(300)));
        assert_eq!(repaired.update_reason.as_deref(), Some("Recalculated by ledger repair"));

        let again = engine.repair_all_chains().await.unwrap();
        assert_eq!(again.entries_corrected, 0);
        assert_eq!(again.chains_scanned, 2);

        let one = engine.repair_chain("cust-2", None).await.unwrap();
        assert_eq!((one.entries_scanned, one.entries_corrected), (1, 0));
    }

    #[tokio::test]
    async fn test_amend_at_stale_version() {
        let (_db, engine) = setup().await;
        let e1 = engine.append_ledger_entry(sale(3, 10, 500, 0)).await.unwrap();
        let received = |amount: i64| EntryChanges {
            amount_received: Some(rupees(amount)),
            ..Default::default()
        };

        engine
            .amend_ledger_entry_at_version(e1.id, e1.version, received(100), "first")
            .await
            .unwrap();
        let err = engine
            .amend_ledger_entry_at_version(e1.id, e1.version, received(200), "second")
            .await
            .unwrap_err();
        assert!(err.is_stale());
        assert_eq!(ApiError::from(err).code, ErrorKind::StaleVersion);
    }

    #[tokio::test]
    async fn test_retry_stale_rereads_and_succeeds() {
        let (db, engine) = setup().await;
        let first_read = engine.stock_level("wh-1", V).await.unwrap();
        db.stock().adjust("wh-1", V, 10, 0).await.unwrap();

        let attempts = Arc::new(AtomicU32::new(0));
        let stock = engine
            .retry_stale(|| {
                let db = db.clone();
                let attempts = attempts.clone();
                let stale_version = first_read.version;
                async move {
                    let version = match attempts.fetch_add(1, Ordering::SeqCst) {
                        0 => stale_version,
                        _ => db.stock().get_or_create("wh-1", V).await?.version,
                    };
                    db.stock().adjust_expected("wh-1", V, -1, 0, version).await
                }
            })
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(stock.filled.value(), 9);
    }

    #[tokio::test]
    async fn test_retry_stale_gives_up_after_limit() {
        let (db, engine) = setup().await;
        let first_read = engine.stock_level("wh-1", V).await.unwrap();
        db.stock().adjust("wh-1", V, 10, 0).await.unwrap();

        let attempts = Arc::new(AtomicU32::new(0));
        let err = engine
            .retry_stale(|| {
                let db = db.clone();
                let attempts = attempts.clone();
                let version = first_read.version;
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    db.stock().adjust_expected("wh-1", V, -1, 0, version).await
                }
            })
            .await
            .unwrap_err();

        assert!(err.is_stale());
        assert_eq!(attempts.load(Ordering::SeqCst), engine.config().max_stale_retries + 1);

        // Non-stale errors are not retried.
        attempts.store(0, Ordering::SeqCst);
        let err = engine
            .retry_stale(|| {
                let db = db.clone();
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    db.stock().adjust("wh-1", V, -100, 0).await
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}

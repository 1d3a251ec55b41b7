//! # Domain Types
//!
//! Core domain types shared by the engine and its callers.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────┐   ┌───────────────────┐    │
//! │  │  LedgerEntry    │   │ InventoryStock   │   │ WarehouseTransfer │    │
//! │  │  ─────────────  │   │ ──────────────── │   │ ───────────────── │    │
//! │  │  id (i64, seq)  │   │ (warehouse,      │   │ source ≠ dest     │    │
//! │  │  customer_id    │   │  variant) UNIQUE │   │ filled + empty>0  │    │
//! │  │  variant_id?    │   │ filled ≥ 0       │   │ reference WT-..   │    │
//! │  │  balance ≥ 0    │   │ empty  ≥ 0       │   │ immutable         │    │
//! │  │  due ≥ 0        │   │ version (CAS)    │   └───────────────────┘    │
//! │  │  version (CAS)  │   └──────────────────┘                            │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! │  Master data (read-only here): Customer, Variant, Warehouse,           │
//! │  Supplier, BankAccount                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## References, Not Back-Pointers
//! Entities point "up" through foreign-key ids only. There is no
//! `Customer::entries` collection; the database layer answers that with a
//! query (`entries_for_customer`).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::chain::EntryDeltas;
use crate::money::Money;
use crate::quantity::Quantity;

// =============================================================================
// Transaction Kind
// =============================================================================

/// The business event a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum TransactionKind {
    /// Cylinders already with the customer when they were onboarded.
    InitialStock,
    /// Filled cylinders handed to the customer.
    Sale,
    /// Empty cylinders brought back by the customer.
    EmptyReturn,
    /// Cylinders moved between two customer accounts.
    Transfer,
    /// Money received with no cylinder movement.
    Payment,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::InitialStock => "INITIAL_STOCK",
            TransactionKind::Sale => "SALE",
            TransactionKind::EmptyReturn => "EMPTY_RETURN",
            TransactionKind::Transfer => "TRANSFER",
            TransactionKind::Payment => "PAYMENT",
        }
    }

    /// Whether a warehouse-bound entry of this kind moves warehouse stock.
    pub fn moves_warehouse_stock(&self) -> bool {
        matches!(self, TransactionKind::Sale | TransactionKind::EmptyReturn)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INITIAL_STOCK" => Ok(TransactionKind::InitialStock),
            "SALE" => Ok(TransactionKind::Sale),
            "EMPTY_RETURN" => Ok(TransactionKind::EmptyReturn),
            "TRANSFER" => Ok(TransactionKind::Transfer),
            "PAYMENT" => Ok(TransactionKind::Payment),
            other => Err(format!("unknown transaction kind '{}'", other)),
        }
    }
}

// =============================================================================
// Payment Mode
// =============================================================================

/// How money was received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum PaymentMode {
    #[default]
    Cash,
    BankTransfer,
    Cheque,
    Upi,
    Card,
}

impl PaymentMode {
    /// Every mode except cash lands in a bank account.
    pub fn requires_bank_account(&self) -> bool {
        !matches!(self, PaymentMode::Cash)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Cash => "CASH",
            PaymentMode::BankTransfer => "BANK_TRANSFER",
            PaymentMode::Cheque => "CHEQUE",
            PaymentMode::Upi => "UPI",
            PaymentMode::Card => "CARD",
        }
    }
}

impl fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Chain Key
// =============================================================================

/// Identifies one chain: all entries of a customer for one variant.
///
/// Entries without a variant (opening money balances, general payments)
/// form their own chain with `variant_id = None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainKey {
    pub customer_id: String,
    pub variant_id: Option<String>,
}

impl ChainKey {
    pub fn new(customer_id: impl Into<String>, variant_id: Option<String>) -> Self {
        ChainKey {
            customer_id: customer_id.into(),
            variant_id,
        }
    }
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant_id {
            Some(variant) => write!(f, "{}/{}", self.customer_id, variant),
            None => write!(f, "{}/-", self.customer_id),
        }
    }
}

// =============================================================================
// Ledger Entry
// =============================================================================

/// One recorded business event with its point-in-time snapshots.
///
/// `balance` and `due_amount` are derived fields: only the chain replay
/// writes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LedgerEntry {
    /// Monotonic identity; breaks ties between entries on the same date.
    pub id: i64,
    pub customer_id: String,
    pub warehouse_id: Option<String>,
    pub variant_id: Option<String>,
    #[ts(as = "String")]
    pub transaction_date: NaiveDate,
    pub kind: TransactionKind,
    /// Originating sale document, if the entry was created from one.
    pub sale_id: Option<String>,
    pub issued: Quantity,
    pub returned: Quantity,
    /// Cylinders on loan to the customer after this entry.
    pub balance: Quantity,
    pub total_amount: Money,
    pub amount_received: Money,
    /// Money owed by the customer after this entry.
    pub due_amount: Money,
    pub payment_mode: PaymentMode,
    pub bank_account_id: Option<String>,
    pub reference: Option<String>,
    /// Accumulated notes explaining retroactive changes.
    pub update_reason: Option<String>,
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn chain_key(&self) -> ChainKey {
        ChainKey::new(self.customer_id.clone(), self.variant_id.clone())
    }

    pub fn deltas(&self) -> EntryDeltas {
        EntryDeltas {
            issued: self.issued,
            returned: self.returned,
            total_amount: self.total_amount,
            amount_received: self.amount_received,
        }
    }

    /// Money received with no cylinders issued and nothing charged.
    pub fn is_payment_only(&self) -> bool {
        self.deltas().is_payment_only()
    }

    /// Stock effect on the entry's warehouse as `(filled, empty)` deltas.
    pub fn stock_effect(&self) -> (i64, i64) {
        stock_effect(self.kind, self.warehouse_id.as_deref(), self.issued, self.returned)
    }
}

/// Filled cylinders leave the warehouse on a sale; empties come back on a
/// return. Entries without a warehouse, or of other kinds, move nothing.
pub fn stock_effect(
    kind: TransactionKind,
    warehouse_id: Option<&str>,
    issued: Quantity,
    returned: Quantity,
) -> (i64, i64) {
    if warehouse_id.is_none() || !kind.moves_warehouse_stock() {
        return (0, 0);
    }
    (-issued.as_i64(), returned.as_i64())
}

/// Input for a new ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewLedgerEntry {
    pub kind: TransactionKind,
    pub customer_id: String,
    pub variant_id: Option<String>,
    pub warehouse_id: Option<String>,
    #[ts(as = "String")]
    pub transaction_date: NaiveDate,
    pub issued: Quantity,
    pub returned: Quantity,
    pub total_amount: Money,
    pub amount_received: Money,
    pub payment_mode: PaymentMode,
    pub bank_account_id: Option<String>,
    pub sale_id: Option<String>,
}

impl NewLedgerEntry {
    /// Starts a draft with every quantity and amount at zero.
    pub fn new(
        kind: TransactionKind,
        customer_id: impl Into<String>,
        variant_id: Option<String>,
        transaction_date: NaiveDate,
    ) -> Self {
        NewLedgerEntry {
            kind,
            customer_id: customer_id.into(),
            variant_id,
            warehouse_id: None,
            transaction_date,
            issued: Quantity::zero(),
            returned: Quantity::zero(),
            total_amount: Money::zero(),
            amount_received: Money::zero(),
            payment_mode: PaymentMode::Cash,
            bank_account_id: None,
            sale_id: None,
        }
    }

    pub fn warehouse(mut self, warehouse_id: impl Into<String>) -> Self {
        self.warehouse_id = Some(warehouse_id.into());
        self
    }

    pub fn issued(mut self, qty: u32) -> Self {
        self.issued = Quantity::new(qty);
        self
    }

    pub fn returned(mut self, qty: u32) -> Self {
        self.returned = Quantity::new(qty);
        self
    }

    pub fn total(mut self, amount: Money) -> Self {
        self.total_amount = amount;
        self
    }

    pub fn received(mut self, amount: Money) -> Self {
        self.amount_received = amount;
        self
    }

    pub fn paid_via(mut self, mode: PaymentMode, bank_account_id: Option<String>) -> Self {
        self.payment_mode = mode;
        self.bank_account_id = bank_account_id;
        self
    }

    pub fn chain_key(&self) -> ChainKey {
        ChainKey::new(self.customer_id.clone(), self.variant_id.clone())
    }

    pub fn deltas(&self) -> EntryDeltas {
        EntryDeltas {
            issued: self.issued,
            returned: self.returned,
            total_amount: self.total_amount,
            amount_received: self.amount_received,
        }
    }

    pub fn is_payment_only(&self) -> bool {
        self.deltas().is_payment_only()
    }

    pub fn stock_effect(&self) -> (i64, i64) {
        stock_effect(self.kind, self.warehouse_id.as_deref(), self.issued, self.returned)
    }
}

/// Field changes requested by an amendment. `None` leaves a field alone.
///
/// Date, customer, variant and warehouse are fixed for the life of an entry;
/// moving an entry is a correction (remove) followed by a new insert.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct EntryChanges {
    pub issued: Option<Quantity>,
    pub returned: Option<Quantity>,
    pub total_amount: Option<Money>,
    pub amount_received: Option<Money>,
    pub payment_mode: Option<PaymentMode>,
    /// `Some(None)` clears the bank account.
    pub bank_account_id: Option<Option<String>>,
}

impl EntryChanges {
    pub fn is_empty(&self) -> bool {
        self.issued.is_none()
            && self.returned.is_none()
            && self.total_amount.is_none()
            && self.amount_received.is_none()
            && self.payment_mode.is_none()
            && self.bank_account_id.is_none()
    }

    /// Writes the requested fields onto `entry`. Snapshots are untouched.
    pub fn apply_to(&self, entry: &mut LedgerEntry) {
        if let Some(issued) = self.issued {
            entry.issued = issued;
        }
        if let Some(returned) = self.returned {
            entry.returned = returned;
        }
        if let Some(total) = self.total_amount {
            entry.total_amount = total;
        }
        if let Some(received) = self.amount_received {
            entry.amount_received = received;
        }
        if let Some(mode) = self.payment_mode {
            entry.payment_mode = mode;
        }
        if let Some(bank) = &self.bank_account_id {
            entry.bank_account_id = bank.clone();
        }
    }
}

// =============================================================================
// Inventory Stock
// =============================================================================

/// Filled and empty cylinders of one variant held at one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InventoryStock {
    pub id: String,
    pub warehouse_id: String,
    pub variant_id: String,
    pub filled: Quantity,
    pub empty: Quantity,
    pub version: i64,
    #[ts(as = "String")]
    pub last_updated: DateTime<Utc>,
}

impl InventoryStock {
    /// Computes the counters after applying signed deltas.
    ///
    /// ## Returns
    /// * `Ok((filled, empty))` - both counters stay non-negative
    /// * `Err(CoreError::InsufficientStock)` - either would go below zero
    /// * `Err(CoreError::InvalidOperation)` - either would exceed `u32::MAX`
    pub fn after_delta(
        &self,
        delta_filled: i64,
        delta_empty: i64,
    ) -> crate::CoreResult<(Quantity, Quantity)> {
        let max = i64::from(u32::MAX);
        let (filled, empty) = match (
            self.filled.as_i64().checked_add(delta_filled),
            self.empty.as_i64().checked_add(delta_empty),
        ) {
            (Some(filled), Some(empty)) if filled <= max && empty <= max => (filled, empty),
            _ => {
                return Err(crate::CoreError::invalid(format!(
                    "stock delta ({delta_filled}, {delta_empty}) overflows the counters of {}/{}",
                    self.warehouse_id, self.variant_id
                )))
            }
        };

        match (Quantity::try_from_i64(filled), Quantity::try_from_i64(empty)) {
            (Some(filled), Some(empty)) => Ok((filled, empty)),
            _ => Err(crate::CoreError::InsufficientStock {
                warehouse_id: self.warehouse_id.clone(),
                variant_id: self.variant_id.clone(),
                available_filled: self.filled.as_i64(),
                available_empty: self.empty.as_i64(),
                requested_filled: delta_filled.saturating_neg().max(0),
                requested_empty: delta_empty.saturating_neg().max(0),
            }),
        }
    }
}

// =============================================================================
// Warehouse Transfer
// =============================================================================

/// Filled/empty cylinders moved from one warehouse to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WarehouseTransfer {
    pub id: String,
    pub source_warehouse_id: String,
    pub destination_warehouse_id: String,
    pub variant_id: String,
    pub filled: Quantity,
    pub empty: Quantity,
    #[ts(as = "String")]
    pub transfer_date: NaiveDate,
    pub reference: String,
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Input for a warehouse transfer.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransferRequest {
    pub source_warehouse_id: String,
    pub destination_warehouse_id: String,
    pub variant_id: String,
    pub filled: Quantity,
    pub empty: Quantity,
    #[ts(as = "String")]
    pub transfer_date: NaiveDate,
}

// =============================================================================
// Purchase Receipt
// =============================================================================

/// Filled cylinders received from a supplier, with empties sent back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PurchaseReceipt {
    pub id: String,
    pub supplier_id: String,
    pub warehouse_id: String,
    pub variant_id: String,
    pub filled_received: Quantity,
    pub empty_returned: Quantity,
    #[ts(as = "String")]
    pub receipt_date: NaiveDate,
    pub reference: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Input for a supplier receipt.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReceiptRequest {
    pub supplier_id: String,
    pub warehouse_id: String,
    pub variant_id: String,
    pub filled_received: Quantity,
    pub empty_returned: Quantity,
    #[ts(as = "String")]
    pub receipt_date: NaiveDate,
}

// =============================================================================
// Master Data
// =============================================================================
// Owned by the surrounding CRUD system; the engine only looks these up.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub code: String,
    pub name: String,
    /// Capacity label such as "14.2kg".
    pub capacity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: String,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: String,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: String,
    pub code: String,
    pub bank_name: String,
    pub account_number: String,
}

// =============================================================================
// Repair Report
// =============================================================================

/// Outcome of replaying chains during an admin repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub chains_scanned: usize,
    pub entries_scanned: usize,
    pub entries_corrected: usize,
}

impl RepairReport {
    pub fn merge(&mut self, other: RepairReport) {
        self.chains_scanned += other.chains_scanned;
        self.entries_scanned += other.entries_scanned;
        self.entries_corrected += other.entries_corrected;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(filled: u32, empty: u32) -> InventoryStock {
        InventoryStock {
            id: "s-1".to_string(),
            warehouse_id: "wh-1".to_string(),
            variant_id: "v-1".to_string(),
            filled: Quantity::new(filled),
            empty: Quantity::new(empty),
            version: 1,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_transaction_kind_round_trips_through_str() {
        for kind in [
            TransactionKind::InitialStock,
            TransactionKind::Sale,
            TransactionKind::EmptyReturn,
            TransactionKind::Transfer,
            TransactionKind::Payment,
        ] {
            assert_eq!(kind.as_str().parse::<TransactionKind>(), Ok(kind));
        }
        assert!("REFUND".parse::<TransactionKind>().is_err());
    }

    #[test]
    fn test_payment_mode_bank_requirement() {
        assert!(!PaymentMode::Cash.requires_bank_account());
        assert!(PaymentMode::BankTransfer.requires_bank_account());
        assert!(PaymentMode::Upi.requires_bank_account());
    }

    #[test]
    fn test_stock_after_delta_rejects_counter_overflow() {
        let row = stock(5, 2);

        let err = row.after_delta(i64::from(u32::MAX), 0).unwrap_err();
        assert!(matches!(err, crate::CoreError::InvalidOperation(_)));

        let err = row.after_delta(0, i64::MAX).unwrap_err();
        assert!(matches!(err, crate::CoreError::InvalidOperation(_)));

        let err = row.after_delta(i64::MIN, 0).unwrap_err();
        assert!(matches!(
            err,
            crate::CoreError::InsufficientStock { requested_filled: i64::MAX, .. }
        ));
    }

    #[test]
    fn test_stock_after_delta() {
        let row = stock(5, 2);
        assert_eq!(
            row.after_delta(-5, 3).unwrap(),
            (Quantity::new(0), Quantity::new(5))
        );

        let err = row.after_delta(-6, 0).unwrap_err();
        assert!(matches!(
            err,
            crate::CoreError::InsufficientStock {
                available_filled: 5,
                requested_filled: 6,
                ..
            }
        ));
    }

    #[test]
    fn test_stock_effect_only_for_warehouse_sales_and_returns() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let sale = NewLedgerEntry::new(TransactionKind::Sale, "c", Some("v".into()), date)
            .issued(3)
            .returned(1);
        assert_eq!(sale.stock_effect(), (0, 0));

        let sale = sale.warehouse("wh-1");
        assert_eq!(sale.stock_effect(), (-3, 1));

        let mut opening = sale.clone();
        opening.kind = TransactionKind::InitialStock;
        assert_eq!(opening.stock_effect(), (0, 0));
    }

    #[test]
    fn test_entry_changes_apply() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let mut entry = LedgerEntry {
            id: 1,
            customer_id: "c".into(),
            warehouse_id: None,
            variant_id: None,
            transaction_date: date,
            kind: TransactionKind::Sale,
            sale_id: None,
            issued: Quantity::new(10),
            returned: Quantity::zero(),
            balance: Quantity::new(10),
            total_amount: Money::from_cents(500),
            amount_received: Money::from_cents(200),
            due_amount: Money::from_cents(300),
            payment_mode: PaymentMode::Upi,
            bank_account_id: Some("bank".into()),
            reference: None,
            update_reason: None,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let changes = EntryChanges {
            amount_received: Some(Money::from_cents(500)),
            payment_mode: Some(PaymentMode::Cash),
            bank_account_id: Some(None),
            ..Default::default()
        };
        assert!(!changes.is_empty());
        changes.apply_to(&mut entry);

        assert_eq!(entry.amount_received.cents(), 500);
        assert_eq!(entry.payment_mode, PaymentMode::Cash);
        assert_eq!(entry.bank_account_id, None);
        // Snapshots are left for the replay to recompute.
        assert_eq!(entry.due_amount.cents(), 300);
        assert!(EntryChanges::default().is_empty());
    }
}

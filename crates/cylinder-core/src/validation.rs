//! # Validation Module
//!
//! Input validation for ledger entries, transfers and supplier receipts.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Field checks (this module, ValidationError)                  │
//! │  ├── ids present, codes well-formed, dates not in the future           │
//! │  └── quantities within MAX_CYLINDERS_PER_DOCUMENT, amounts ≥ 0         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Entry rules (this module, CoreError::InvalidOperation)       │
//! │  ├── PAYMENT is payment-only, EMPTY_RETURN issues nothing              │
//! │  └── non-cash money needs a bank account                               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Chain and stock (chain replay, stock store)                  │
//! │  ├── balance ≥ 0, due ≥ 0 everywhere in the chain                      │
//! │  └── filled ≥ 0, empty ≥ 0 at every warehouse                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Layers 1 and 2 run before the database layer opens a transaction.
//!
//! ## Usage
//! ```rust
//! use cylinder_core::validation::validate_code;
//!
//! assert!(validate_code("warehouse code", "WH1").is_ok());
//! assert!(validate_code("warehouse code", "wh 1").is_err());
//! ```

use chrono::NaiveDate;

use crate::chain::EntryDeltas;
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::quantity::Quantity;
use crate::types::{EntryChanges, NewLedgerEntry, PaymentMode, ReceiptRequest, TransactionKind, TransferRequest};
use crate::{MAX_CODE_LEN, MAX_CYLINDERS_PER_DOCUMENT};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted update note.
pub const MAX_REASON_LEN: usize = 500;

/// Longest accepted entity id.
pub const MAX_ID_LEN: usize = 64;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a master-data code embedded in reference numbers.
///
/// ## Rules
/// - 1 to [`MAX_CODE_LEN`] characters
/// - upper-case ASCII letters, digits and `_` only (`-` separates reference
///   parts, so it is not allowed)
pub fn validate_code(field: &str, code: &str) -> ValidationResult<()> {
    if code.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if code.len() > MAX_CODE_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_CODE_LEN,
        });
    }

    if !code
        .bytes()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must contain only A-Z, 0-9 and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a required entity id.
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    let id = id.trim();

    if id.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if id.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ID_LEN,
        });
    }

    Ok(())
}

fn validate_optional_id(field: &str, id: Option<&str>) -> ValidationResult<()> {
    match id {
        Some(id) => validate_id(field, id),
        None => Ok(()),
    }
}

/// Validates an amendment or correction note.
pub fn validate_reason(reason: &str) -> ValidationResult<()> {
    let reason = reason.trim();

    if reason.is_empty() {
        return Err(ValidationError::Required {
            field: "reason".to_string(),
        });
    }

    if reason.len() > MAX_REASON_LEN {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: MAX_REASON_LEN,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric and Date Validators
// =============================================================================

/// Validates a cylinder count carried by one document.
pub fn validate_quantity(field: &str, qty: Quantity) -> ValidationResult<()> {
    if qty.value() > MAX_CYLINDERS_PER_DOCUMENT {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_CYLINDERS_PER_DOCUMENT as i64,
        });
    }
    Ok(())
}

/// Validates an amount charged or received.
pub fn validate_amount(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::Negative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Rejects dates after `today` unless future dating is allowed.
pub fn validate_date(field: &str, date: NaiveDate, today: NaiveDate, allow_future: bool) -> ValidationResult<()> {
    if !allow_future && date > today {
        return Err(ValidationError::FutureDate {
            field: field.to_string(),
            date: date.to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Ledger Entries
// =============================================================================

/// Kind and payment rules shared by new and amended entries.
///
/// ## Rules
/// - every entry moves something (cylinders or money)
/// - `PAYMENT` entries are payment-only
/// - `EMPTY_RETURN` entries issue nothing
/// - received money in a non-cash mode names a bank account
pub fn check_entry_rules(
    kind: TransactionKind,
    deltas: &EntryDeltas,
    payment_mode: PaymentMode,
    bank_account_id: Option<&str>,
) -> CoreResult<()> {
    if deltas.is_empty() {
        return Err(CoreError::invalid(format!(
            "{} entry moves no cylinders and no money",
            kind
        )));
    }

    match kind {
        TransactionKind::Payment if !deltas.is_payment_only() => {
            return Err(CoreError::invalid(
                "PAYMENT entries may only receive money against an existing due",
            ));
        }
        TransactionKind::EmptyReturn if !deltas.issued.is_zero() => {
            return Err(CoreError::invalid("EMPTY_RETURN entries cannot issue cylinders"));
        }
        _ => {}
    }

    if deltas.amount_received.is_positive()
        && payment_mode.requires_bank_account()
        && bank_account_id.is_none()
    {
        return Err(CoreError::invalid(format!(
            "{} payment requires a bank account",
            payment_mode
        )));
    }

    Ok(())
}

/// Rejects a payment larger than the due it settles.
pub fn check_payment_against_due(received: Money, due_before: Money) -> CoreResult<()> {
    if received > due_before {
        return Err(CoreError::invalid(format!(
            "payment of {} exceeds outstanding due of {}",
            received, due_before
        )));
    }
    Ok(())
}

/// Validates a new ledger entry before it reaches the store.
pub fn validate_new_entry(entry: &NewLedgerEntry, today: NaiveDate, allow_future: bool) -> CoreResult<()> {
    validate_id("customer_id", &entry.customer_id)?;
    validate_optional_id("variant_id", entry.variant_id.as_deref())?;
    validate_optional_id("warehouse_id", entry.warehouse_id.as_deref())?;
    validate_optional_id("bank_account_id", entry.bank_account_id.as_deref())?;
    validate_optional_id("sale_id", entry.sale_id.as_deref())?;
    validate_date("transaction_date", entry.transaction_date, today, allow_future)?;
    validate_quantity("issued", entry.issued)?;
    validate_quantity("returned", entry.returned)?;
    validate_amount("total_amount", entry.total_amount)?;
    validate_amount("amount_received", entry.amount_received)?;

    if entry.warehouse_id.is_some() && entry.kind.moves_warehouse_stock() && entry.variant_id.is_none() {
        return Err(ValidationError::Required {
            field: "variant_id".to_string(),
        }
        .into());
    }

    check_entry_rules(
        entry.kind,
        &entry.deltas(),
        entry.payment_mode,
        entry.bank_account_id.as_deref(),
    )
}

/// Validates the fields of an amendment. Entry rules are re-checked on the
/// amended entry by the store.
pub fn validate_changes(changes: &EntryChanges, reason: &str) -> CoreResult<()> {
    if changes.is_empty() {
        return Err(CoreError::invalid("amendment changes nothing"));
    }
    validate_reason(reason)?;

    if let Some(issued) = changes.issued {
        validate_quantity("issued", issued)?;
    }
    if let Some(returned) = changes.returned {
        validate_quantity("returned", returned)?;
    }
    if let Some(total) = changes.total_amount {
        validate_amount("total_amount", total)?;
    }
    if let Some(received) = changes.amount_received {
        validate_amount("amount_received", received)?;
    }
    if let Some(Some(bank)) = &changes.bank_account_id {
        validate_id("bank_account_id", bank)?;
    }

    Ok(())
}

// =============================================================================
// Stock Documents
// =============================================================================

/// Validates a warehouse transfer request.
///
/// Stock sufficiency is checked by the stock store inside the transaction.
pub fn validate_transfer_request(req: &TransferRequest, today: NaiveDate, allow_future: bool) -> CoreResult<()> {
    validate_id("source_warehouse_id", &req.source_warehouse_id)?;
    validate_id("destination_warehouse_id", &req.destination_warehouse_id)?;
    validate_id("variant_id", &req.variant_id)?;
    validate_date("transfer_date", req.transfer_date, today, allow_future)?;
    validate_quantity("filled", req.filled)?;
    validate_quantity("empty", req.empty)?;

    if req.source_warehouse_id == req.destination_warehouse_id {
        return Err(ValidationError::MustDiffer {
            field: "destination_warehouse_id".to_string(),
            other: "source_warehouse_id".to_string(),
        }
        .into());
    }

    if req.filled.is_zero() && req.empty.is_zero() {
        return Err(CoreError::invalid("transfer must move at least one cylinder"));
    }

    Ok(())
}

/// Validates a supplier receipt request.
pub fn validate_receipt_request(req: &ReceiptRequest, today: NaiveDate, allow_future: bool) -> CoreResult<()> {
    validate_id("supplier_id", &req.supplier_id)?;
    validate_id("warehouse_id", &req.warehouse_id)?;
    validate_id("variant_id", &req.variant_id)?;
    validate_date("receipt_date", req.receipt_date, today, allow_future)?;
    validate_quantity("filled_received", req.filled_received)?;
    validate_quantity("empty_returned", req.empty_returned)?;

    if req.filled_received.is_zero() && req.empty_returned.is_zero() {
        return Err(CoreError::invalid("receipt must move at least one cylinder"));
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 20).unwrap()
    }

    fn sale() -> NewLedgerEntry {
        NewLedgerEntry::new(TransactionKind::Sale, "cust-1", Some("v-14kg".into()), today())
            .warehouse("wh-1")
            .issued(10)
            .total(Money::from_cents(50_000))
            .received(Money::from_cents(20_000))
    }

    #[test]
    fn test_validate_code() {
        assert!(validate_code("code", "WH1").is_ok());
        assert!(validate_code("code", "BHARAT_GAS").is_ok());
        assert!(validate_code("code", "").is_err());
        assert!(validate_code("code", "wh1").is_err());
        assert!(validate_code("code", "WH-1").is_err());
        assert!(validate_code("code", "ABCDEFGHIJKLM").is_err());
    }

    #[test]
    fn test_validate_date() {
        let tomorrow = today().succ_opt().unwrap();
        assert!(validate_date("d", today(), today(), false).is_ok());
        assert!(matches!(
            validate_date("d", tomorrow, today(), false),
            Err(ValidationError::FutureDate { .. })
        ));
        assert!(validate_date("d", tomorrow, today(), true).is_ok());
    }

    #[test]
    fn test_valid_sale() {
        assert!(validate_new_entry(&sale(), today(), false).is_ok());
    }

    #[test]
    fn test_entry_must_move_something() {
        let empty = NewLedgerEntry::new(TransactionKind::Sale, "cust-1", None, today());
        assert!(matches!(
            validate_new_entry(&empty, today(), false),
            Err(CoreError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_payment_kind_must_be_payment_only() {
        let mut entry = sale();
        entry.kind = TransactionKind::Payment;
        assert!(matches!(
            validate_new_entry(&entry, today(), false),
            Err(CoreError::InvalidOperation(_))
        ));

        let payment = NewLedgerEntry::new(TransactionKind::Payment, "cust-1", None, today())
            .received(Money::from_cents(100));
        assert!(validate_new_entry(&payment, today(), false).is_ok());
    }

    #[test]
    fn test_empty_return_cannot_issue() {
        let mut entry = sale();
        entry.kind = TransactionKind::EmptyReturn;
        assert!(validate_new_entry(&entry, today(), false).is_err());
    }

    #[test]
    fn test_non_cash_payment_needs_bank_account() {
        let upi = NewLedgerEntry::new(TransactionKind::Payment, "cust-1", None, today())
            .received(Money::from_cents(100))
            .paid_via(PaymentMode::Upi, None);
        let err = validate_new_entry(&upi, today(), false).unwrap_err();
        assert!(err.to_string().contains("bank account"));

        let upi = upi.paid_via(PaymentMode::Upi, Some("bank-1".into()));
        assert!(validate_new_entry(&upi, today(), false).is_ok());
    }

    #[test]
    fn test_warehouse_sale_needs_variant() {
        let mut entry = sale();
        entry.variant_id = None;
        assert!(matches!(
            validate_new_entry(&entry, today(), false),
            Err(CoreError::Validation(ValidationError::Required { .. }))
        ));
    }

    #[test]
    fn test_quantity_cap() {
        let mut entry = sale();
        entry.issued = Quantity::new(MAX_CYLINDERS_PER_DOCUMENT + 1);
        assert!(matches!(
            validate_new_entry(&entry, today(), false),
            Err(CoreError::Validation(ValidationError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn test_payment_against_due() {
        assert!(check_payment_against_due(Money::from_cents(300), Money::from_cents(300)).is_ok());
        assert!(check_payment_against_due(Money::from_cents(301), Money::from_cents(300)).is_err());
    }

    #[test]
    fn test_validate_changes() {
        let changes = EntryChanges {
            amount_received: Some(Money::from_cents(600)),
            ..Default::default()
        };
        assert!(validate_changes(&changes, "customer paid more").is_ok());
        assert!(validate_changes(&changes, "  ").is_err());
        assert!(validate_changes(&EntryChanges::default(), "x").is_err());

        let negative = EntryChanges {
            total_amount: Some(Money::from_cents(-1)),
            ..Default::default()
        };
        assert!(validate_changes(&negative, "x").is_err());
    }

    #[test]
    fn test_validate_transfer_request() {
        let mut req = TransferRequest {
            source_warehouse_id: "wh-1".into(),
            destination_warehouse_id: "wh-2".into(),
            variant_id: "v-14kg".into(),
            filled: Quantity::new(5),
            empty: Quantity::zero(),
            transfer_date: today(),
        };
        assert!(validate_transfer_request(&req, today(), false).is_ok());

        req.destination_warehouse_id = "wh-1".into();
        assert!(matches!(
            validate_transfer_request(&req, today(), false),
            Err(CoreError::Validation(ValidationError::MustDiffer { .. }))
        ));

        req.destination_warehouse_id = "wh-2".into();
        req.filled = Quantity::zero();
        assert!(matches!(
            validate_transfer_request(&req, today(), false),
            Err(CoreError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_validate_receipt_request() {
        let req = ReceiptRequest {
            supplier_id: "sup-1".into(),
            warehouse_id: "wh-1".into(),
            variant_id: "v-14kg".into(),
            filled_received: Quantity::zero(),
            empty_returned: Quantity::zero(),
            receipt_date: today(),
        };
        assert!(validate_receipt_request(&req, today(), false).is_err());
    }
}

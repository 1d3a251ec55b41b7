//! # Reference Numbers
//!
//! Human-readable document numbers, e.g. `WT-WH1-WH2-202601-000001`.
//!
//! ## Format
//! ```text
//! ┌────────┬───────────────┬────────┬──────────┐
//! │ PREFIX │ SCOPE         │ YYYYMM │ SEQUENCE │
//! ├────────┼───────────────┼────────┼──────────┤
//! │ SO     │ WH1           │ 202601 │ 000042   │  sale at WH1
//! │ WT     │ WH1-WH2       │ 202601 │ 000001   │  transfer WH1 → WH2
//! │ PO     │ BHARAT        │ 202602 │ 000003   │  supplier receipt
//! │ DEP    │ HDFC01        │ 202602 │ 000010   │  bank deposit
//! └────────┴───────────────┴────────┴──────────┘
//! ```
//!
//! The format is a persisted contract: downstream reports parse it back with
//! [`ReferenceNumber::parse`]. Sequences restart at 1 for every
//! (type, scope, month) and are allocated by the database layer with a
//! single atomic upsert.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;

/// Zero-padded width of the sequence part.
pub const SEQUENCE_WIDTH: usize = 6;

/// Largest sequence that fits the fixed width.
pub const MAX_SEQUENCE: i64 = 999_999;

// =============================================================================
// Document Type
// =============================================================================

/// Kinds of documents that receive reference numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum DocumentType {
    Sale,
    Transfer,
    Purchase,
    EmptyReturn,
    BankDeposit,
    BankWithdrawal,
    BankAdjustment,
}

impl DocumentType {
    pub const ALL: [DocumentType; 7] = [
        DocumentType::Sale,
        DocumentType::Transfer,
        DocumentType::Purchase,
        DocumentType::EmptyReturn,
        DocumentType::BankDeposit,
        DocumentType::BankWithdrawal,
        DocumentType::BankAdjustment,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentType::Sale => "SO",
            DocumentType::Transfer => "WT",
            DocumentType::Purchase => "PO",
            DocumentType::EmptyReturn => "ER",
            DocumentType::BankDeposit => "DEP",
            DocumentType::BankWithdrawal => "WIT",
            DocumentType::BankAdjustment => "ADJ",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        DocumentType::ALL.into_iter().find(|t| t.prefix() == prefix)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

// =============================================================================
// Period
// =============================================================================

/// The `YYYYMM` bucket a document date falls into.
pub fn period_of(date: NaiveDate) -> String {
    format!("{:04}{:02}", date.year(), date.month())
}

// =============================================================================
// Reference Number
// =============================================================================

/// A parsed reference number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReferenceNumber {
    pub document_type: DocumentType,
    /// Warehouse code, `SRC-DST` pair, supplier code or bank code.
    pub scope: String,
    pub year: i32,
    pub month: u32,
    pub sequence: i64,
}

impl ReferenceNumber {
    pub fn new(document_type: DocumentType, scope: impl Into<String>, date: NaiveDate, sequence: i64) -> Self {
        ReferenceNumber {
            document_type,
            scope: scope.into(),
            year: date.year(),
            month: date.month(),
            sequence,
        }
    }

    pub fn period(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }

    /// Parses `{PREFIX}-{SCOPE}-{YYYYMM}-{SEQUENCE}`.
    ///
    /// The scope may itself contain `-` (transfers), so the prefix is split
    /// from the front and the period and sequence from the back.
    ///
    /// ## Example
    /// ```rust
    /// use cylinder_core::{DocumentType, ReferenceNumber};
    ///
    /// let r = ReferenceNumber::parse("WT-WH1-WH2-202601-000001").unwrap();
    /// assert_eq!(r.document_type, DocumentType::Transfer);
    /// assert_eq!(r.scope, "WH1-WH2");
    /// assert_eq!(r.sequence, 1);
    /// ```
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let bad = |reason: &str| ValidationError::InvalidFormat {
            field: "reference".to_string(),
            reason: format!("'{}': {}", s, reason),
        };

        let (prefix, rest) = s.split_once('-').ok_or_else(|| bad("missing prefix"))?;
        let document_type = DocumentType::from_prefix(prefix).ok_or_else(|| bad("unknown prefix"))?;

        let (rest, sequence) = rest.rsplit_once('-').ok_or_else(|| bad("missing sequence"))?;
        let (scope, period) = rest.rsplit_once('-').ok_or_else(|| bad("missing period"))?;

        if scope.is_empty() {
            return Err(bad("empty scope"));
        }
        if sequence.len() != SEQUENCE_WIDTH || !sequence.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad("sequence must be 6 digits"));
        }
        if period.len() != 6 || !period.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad("period must be YYYYMM"));
        }

        let year: i32 = period[..4].parse().map_err(|_| bad("bad year"))?;
        let month: u32 = period[4..].parse().map_err(|_| bad("bad month"))?;
        if !(1..=12).contains(&month) {
            return Err(bad("month out of range"));
        }

        let sequence: i64 = sequence.parse().map_err(|_| bad("bad sequence"))?;
        if sequence == 0 {
            return Err(bad("sequence starts at 1"));
        }

        Ok(ReferenceNumber {
            document_type,
            scope: scope.to_string(),
            year,
            month,
            sequence,
        })
    }
}

impl fmt::Display for ReferenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{:0width$}",
            self.document_type.prefix(),
            self.scope,
            self.period(),
            self.sequence,
            width = SEQUENCE_WIDTH
        )
    }
}

impl FromStr for ReferenceNumber {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReferenceNumber::parse(s)
    }
}

/// Scope of a transfer reference: both warehouse codes.
pub fn transfer_scope(source_code: &str, destination_code: &str) -> String {
    format!("{}-{}", source_code, destination_code)
}

// =============================================================================
// Unit Tests
// =============================================================================

//! # cylinder-core: Pure Business Logic for the Cylinder Ledger
//!
//! This crate holds the rules of the cylinder ledger as pure functions with
//! zero I/O dependencies. The database layer (`cylinder-db`) loads rows,
//! hands them to the functions here, and writes back whatever they return.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Cylinder Ledger Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          REST / UI adapter (outside this workspace)             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │         cylinder-db: LedgerEngine + repositories (sqlx)         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ cylinder-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌──────────┐ ┌─────────┐ ┌───────────┐ ┌───────┐ │   │
//! │  │   │  money  │ │ quantity │ │  chain  │ │ reference │ │ types │ │   │
//! │  │   │  Money  │ │ Quantity │ │ replay  │ │ SO-WH1-.. │ │ Entry │ │   │
//! │  │   └─────────┘ └──────────┘ └─────────┘ └───────────┘ └───────┘ │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Money type with integer minor units (no floating point)
//! - [`quantity`] - Non-negative cylinder counts
//! - [`types`] - Domain types (LedgerEntry, InventoryStock, WarehouseTransfer, ...)
//! - [`chain`] - Running balance / due replay for one (customer, variant) chain
//! - [`reference`] - Reference number format `{PREFIX}-{SCOPE}-{YYYYMM}-{seq}`
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use cylinder_core::chain::{ChainState, EntryDeltas};
//! use cylinder_core::{Money, Quantity};
//!
//! let sale = EntryDeltas {
//!     issued: Quantity::new(10),
//!     returned: Quantity::zero(),
//!     total_amount: Money::from_cents(50_000),
//!     amount_received: Money::from_cents(20_000),
//! };
//!
//! let next = ChainState::opening().apply(&sale).unwrap();
//! assert_eq!(next.balance.value(), 10);
//! assert_eq!(next.due.cents(), 30_000);
//! ```

pub mod chain;
pub mod error;
pub mod money;
pub mod quantity;
pub mod reference;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use quantity::Quantity;
pub use reference::{DocumentType, ReferenceNumber};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of a master-data code (warehouse, supplier, bank).
///
/// Codes are embedded in reference strings, so they stay short.
pub const MAX_CODE_LEN: usize = 12;

/// Upper bound on cylinders moved by a single ledger entry or transfer.
///
/// Catches typos such as 1000 instead of 10 before they reach a chain.
pub const MAX_CYLINDERS_PER_DOCUMENT: u32 = 100_000;

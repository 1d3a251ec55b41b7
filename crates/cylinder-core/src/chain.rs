//! # Chain Replay
//!
//! Running balance and running due for one (customer, variant) chain.
//!
//! ## The Recurrence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  state(-1)  = (balance 0, due 0)                                        │
//! │                                                                         │
//! │  balance(i) = balance(i-1) + issued(i) - returned(i)     must be ≥ 0    │
//! │  due(i)     = due(i-1)     + total(i)  - received(i)     must be ≥ 0    │
//! │                                                                         │
//! │  Entries are ordered by (transaction_date, id) and never reordered.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Recalculation After an Edit
//! ```text
//!   index:     0        1        2 (edited)   3        4
//!            ┌────┐   ┌────┐   ┌────┐      ┌────┐   ┌────┐
//!   chain:   │ ok │ → │ ok │ → │ Δ' │  →   │ ?  │ → │ ?  │
//!            └────┘   └────┘   └────┘      └────┘   └────┘
//!                        │        ▲           ▲        ▲
//!                        └─ start ┴── replay ─┴────────┘
//!
//!   1. start from the stored snapshot of index 1 (untouched upstream)
//!   2. recompute 2, 3, 4 from their own deltas
//!   3. any negative snapshot → reject everything, nothing is written
//!   4. return the indices whose snapshot actually changed
//! ```
//!
//! Everything here is pure. The database layer loads the chain inside a
//! write transaction, calls [`recalculate`], and persists the changed rows.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::quantity::Quantity;
use crate::types::LedgerEntry;

// =============================================================================
// Deltas and State
// =============================================================================

/// The movement an entry contributes to its chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDeltas {
    pub issued: Quantity,
    pub returned: Quantity,
    pub total_amount: Money,
    pub amount_received: Money,
}

impl EntryDeltas {
    /// Money received against an existing due, with nothing issued or charged.
    pub fn is_payment_only(&self) -> bool {
        self.issued.is_zero() && self.total_amount.is_zero() && self.amount_received.is_positive()
    }

    /// An entry that moves neither cylinders nor money.
    pub fn is_empty(&self) -> bool {
        self.issued.is_zero()
            && self.returned.is_zero()
            && self.total_amount.is_zero()
            && self.amount_received.is_zero()
    }
}

/// Balance and due after some entry of a chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub balance: Quantity,
    pub due: Money,
}

/// Why a state transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainViolation {
    /// More cylinders returned than the customer holds.
    NegativeBalance { balance: i64 },
    /// More money received than is owed.
    NegativeDue { due: Money },
    /// Arithmetic left the representable range.
    Overflow,
}

impl std::fmt::Display for ChainViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainViolation::NegativeBalance { balance } => {
                write!(f, "cylinder balance would become {}", balance)
            }
            ChainViolation::NegativeDue { due } => write!(f, "due amount would become {}", due),
            ChainViolation::Overflow => f.write_str("amounts exceed the supported range"),
        }
    }
}

impl ChainState {
    /// The predecessor state of the first entry in every chain.
    pub const fn opening() -> Self {
        ChainState {
            balance: Quantity::zero(),
            due: Money::zero(),
        }
    }

    /// The snapshot stored on an entry.
    pub fn of(entry: &LedgerEntry) -> Self {
        ChainState {
            balance: entry.balance,
            due: entry.due_amount,
        }
    }

    /// Applies one entry's deltas.
    pub fn apply(&self, deltas: &EntryDeltas) -> Result<ChainState, ChainViolation> {
        let balance = self.balance.as_i64() + deltas.issued.as_i64() - deltas.returned.as_i64();
        let balance = if balance < 0 {
            return Err(ChainViolation::NegativeBalance { balance });
        } else {
            Quantity::try_from_i64(balance).ok_or(ChainViolation::Overflow)?
        };

        let due = self
            .due
            .checked_add(deltas.total_amount)
            .and_then(|d| d.checked_sub(deltas.amount_received))
            .ok_or(ChainViolation::Overflow)?;
        if due.is_negative() {
            return Err(ChainViolation::NegativeDue { due });
        }

        Ok(ChainState { balance, due })
    }
}

// =============================================================================
// Replay
// =============================================================================

/// Replays `deltas` from `start`, returning one state per entry.
///
/// ## Returns
/// * `Ok(states)` - every intermediate state is valid
/// * `Err((index, violation))` - the first entry whose state is invalid
pub fn replay<'a, I>(start: ChainState, deltas: I) -> Result<Vec<ChainState>, (usize, ChainViolation)>
where
    I: IntoIterator<Item = &'a EntryDeltas>,
{
    let mut state = start;
    let mut states = Vec::new();

    for (index, delta) in deltas.into_iter().enumerate() {
        state = state.apply(delta).map_err(|violation| (index, violation))?;
        states.push(state);
    }

    Ok(states)
}

/// Recomputes the snapshots of `entries[from..]` in place.
///
/// `entries` must be one whole chain ordered by (transaction_date, id). The
/// stored snapshot of `entries[from - 1]` is the starting point, or the
/// opening state when `from == 0`.
///
/// ## Returns
/// * `Ok(indices)` - positions whose balance or due changed
/// * `Err(CoreError::InvalidOperation)` - some snapshot would be negative;
///   `entries` is left exactly as it was
pub fn recalculate(entries: &mut [LedgerEntry], from: usize) -> CoreResult<Vec<usize>> {
    if from > entries.len() {
        return Err(CoreError::invalid(format!(
            "recalculation start {} is past the end of a chain of {} entries",
            from,
            entries.len()
        )));
    }

    let start = match from {
        0 => ChainState::opening(),
        n => ChainState::of(&entries[n - 1]),
    };

    let deltas: Vec<EntryDeltas> = entries[from..].iter().map(LedgerEntry::deltas).collect();

    let states = replay(start, &deltas).map_err(|(offset, violation)| {
        let entry = &entries[from + offset];
        CoreError::invalid(format!(
            "{} entry #{} dated {} for chain {}: {}",
            entry.kind,
            entry.id,
            entry.transaction_date,
            entry.chain_key(),
            violation
        ))
    })?;

    let mut changed = Vec::new();
    for (offset, state) in states.into_iter().enumerate() {
        let entry = &mut entries[from + offset];
        if ChainState::of(entry) != state {
            entry.balance = state.balance;
            entry.due_amount = state.due;
            changed.push(from + offset);
        }
    }

    Ok(changed)
}

/// Position at which a new entry dated `date` lands in an ordered chain.
///
/// A new entry receives the largest id, so it goes after every entry dated
/// on or before `date`.
pub fn insertion_index(entries: &[LedgerEntry], date: chrono::NaiveDate) -> usize {
    entries.partition_point(|e| e.transaction_date <= date)
}

/// Appends a line to an entry's accumulated update notes.
pub fn append_note(existing: Option<&str>, note: &str) -> String {
    match existing {
        Some(prev) if !prev.is_empty() => format!("{}\n{}", prev, note),
        _ => note.to_string(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

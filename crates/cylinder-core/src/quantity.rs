//! # Quantity Module
//!
//! Non-negative cylinder counts.
//!
//! A `Quantity` can never hold a negative value, so a running balance or a
//! stock counter typed as `Quantity` is non-negative by construction. Signed
//! movements (stock deltas, balance changes) are computed in `i64` and
//! converted back with [`Quantity::try_from_i64`], which is where the
//! "would go negative" decisions are made.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

/// A count of cylinders (filled, empty, issued, returned or on loan).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export)]
pub struct Quantity(u32);

impl Quantity {
    #[inline]
    pub const fn new(value: u32) -> Self {
        Quantity(value)
    }

    #[inline]
    pub const fn zero() -> Self {
        Quantity(0)
    }

    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Widens to `i64` for signed delta arithmetic.
    #[inline]
    pub const fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    /// Converts a signed value back, rejecting negatives and overflow.
    ///
    /// ## Example
    /// ```rust
    /// use cylinder_core::Quantity;
    ///
    /// assert_eq!(Quantity::try_from_i64(6), Some(Quantity::new(6)));
    /// assert_eq!(Quantity::try_from_i64(-1), None);
    /// ```
    pub fn try_from_i64(value: i64) -> Option<Self> {
        u32::try_from(value).ok().map(Quantity)
    }

    #[inline]
    pub fn checked_add(self, other: Quantity) -> Option<Quantity> {
        self.0.checked_add(other.0).map(Quantity)
    }

    #[inline]
    pub fn checked_sub(self, other: Quantity) -> Option<Quantity> {
        self.0.checked_sub(other.0).map(Quantity)
    }
}

impl From<u32> for Quantity {
    fn from(value: u32) -> Self {
        Quantity(value)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_from_i64() {
        assert_eq!(Quantity::try_from_i64(0), Some(Quantity::zero()));
        assert_eq!(Quantity::try_from_i64(42).map(|q| q.value()), Some(42));
        assert_eq!(Quantity::try_from_i64(-3), None);
        assert_eq!(Quantity::try_from_i64(i64::from(u32::MAX) + 1), None);
    }

    #[test]
    fn test_checked_sub_never_goes_negative() {
        let six = Quantity::new(6);
        assert_eq!(six.checked_sub(Quantity::new(4)), Some(Quantity::new(2)));
        assert_eq!(six.checked_sub(Quantity::new(7)), None);
    }
}

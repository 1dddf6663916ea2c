use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Percentage must be between 0 and 100, got {0}")]
    InvalidPercentage(Decimal),

    #[error("Rental window end {end} must be after start {start}")]
    InvalidWindow { start: NaiveDate, end: NaiveDate },
}

// ============================================================================
// Money
// ============================================================================

/// Monetary amount in the marketplace currency, always held at cent precision.
///
/// Every constructor rounds half away from zero, so values read back from storage
/// or deserialized from requests compare equal to values computed in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);
    pub const SCALE: u32 = 2;

    pub fn new(amount: Decimal) -> Self {
        Self(amount.round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Build from an integer count of cents.
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, Self::SCALE))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Unit price times quantity.
    pub fn times(self, quantity: u32) -> Self {
        Self::new(self.0 * Decimal::from(quantity))
    }

    /// Subtraction that never goes below zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        if rhs.0 >= self.0 {
            Self::ZERO
        } else {
            Self(self.0 - rhs.0)
        }
    }

    /// Amount expressed in whole cents, the unit the payment gateway expects.
    pub fn to_cents(&self) -> i64 {
        let cents = self.0 * Decimal::ONE_HUNDRED;
        i64::try_from(cents.trunc()).unwrap_or(i64::MAX)
    }

    /// Split `self` across `weights` proportionally.
    ///
    /// Shares are truncated to cents and the leftover cents go to the heaviest
    /// weight, so the shares always sum back to `self` exactly.
    pub fn allocate(self, weights: &[Money]) -> Vec<Money> {
        let total_weight: Decimal = weights.iter().map(|w| w.0).sum();
        if total_weight <= Decimal::ZERO || weights.is_empty() {
            return vec![Money::ZERO; weights.len()];
        }

        let mut shares: Vec<Money> = weights
            .iter()
            .map(|w| {
                let raw = self.0 * w.0 / total_weight;
                Money(raw.round_dp_with_strategy(Self::SCALE, RoundingStrategy::ToZero))
            })
            .collect();

        let allocated: Money = shares.iter().copied().sum();
        let remainder = self - allocated;
        if !remainder.is_zero() {
            let heaviest = weights
                .iter()
                .enumerate()
                .max_by(|(ia, a), (ib, b)| a.cmp(b).then(ib.cmp(ia)))
                .map(|(idx, _)| idx);
            if let Some(share) = heaviest.and_then(|idx| shares.get_mut(idx)) {
                *share += remainder;
            }
        }

        shares
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

// ============================================================================
// Percentage
// ============================================================================

/// A percentage in the closed range 0..=100 (e.g. `15` means 15%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Percentage(Decimal);

impl Percentage {
    pub const ZERO: Self = Self(Decimal::ZERO);
    pub const FULL: Self = Self(Decimal::ONE_HUNDRED);

    pub fn new(value: Decimal) -> Result<Self, LedgerError> {
        if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
            return Err(LedgerError::InvalidPercentage(value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Apply this percentage to an amount, rounded to cents.
    pub fn of(&self, amount: Money) -> Money {
        Money::new(amount.amount() * self.0 / Decimal::ONE_HUNDRED)
    }
}

impl TryFrom<Decimal> for Percentage {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Percentage> for Decimal {
    fn from(value: Percentage) -> Self {
        value.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0.normalize())
    }
}

// ============================================================================
// Rental window
// ============================================================================

/// Inclusive start, exclusive end rental period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl RentalWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, LedgerError> {
        if end <= start {
            return Err(LedgerError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &RentalWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_rounds_to_cents() {
        assert_eq!(Money::new(dec!(10.005)).amount(), dec!(10.01));
        assert_eq!(Money::new(dec!(10.004)).amount(), dec!(10.00));
        assert_eq!(Money::from_cents(12345).amount(), dec!(123.45));
        assert_eq!(Money::new(dec!(99.5)).to_cents(), 9950);
    }

    #[test]
    fn test_saturating_sub_floors_at_zero() {
        let a = Money::new(dec!(10));
        let b = Money::new(dec!(25));
        assert_eq!(a.saturating_sub(b), Money::ZERO);
        assert_eq!(b.saturating_sub(a), Money::new(dec!(15)));
    }

    #[test]
    fn test_allocate_sums_back_exactly() {
        let weights = [Money::new(dec!(100)), Money::new(dec!(100)), Money::new(dec!(100))];
        let shares = Money::new(dec!(10)).allocate(&weights);
        assert_eq!(shares.iter().copied().sum::<Money>(), Money::new(dec!(10)));
        // 3.33 + 3.33 + 3.34, remainder lands on the first heaviest weight
        assert_eq!(shares[0], Money::new(dec!(3.34)));
        assert_eq!(shares[1], Money::new(dec!(3.33)));
    }

    #[test]
    fn test_allocate_is_proportional() {
        let weights = [Money::new(dec!(300)), Money::new(dec!(100))];
        let shares = Money::new(dec!(40)).allocate(&weights);
        assert_eq!(shares, vec![Money::new(dec!(30)), Money::new(dec!(10))]);
    }

    #[test]
    fn test_allocate_zero_weights() {
        let shares = Money::new(dec!(5)).allocate(&[Money::ZERO, Money::ZERO]);
        assert_eq!(shares, vec![Money::ZERO, Money::ZERO]);
    }

    #[test]
    fn test_percentage_bounds() {
        assert!(Percentage::new(dec!(-1)).is_err());
        assert!(Percentage::new(dec!(100.01)).is_err());
        let pct = Percentage::new(dec!(12.5)).unwrap();
        assert_eq!(pct.of(Money::new(dec!(80))), Money::new(dec!(10)));
    }

    #[test]
    fn test_percentage_deserialization_is_validated() {
        assert!(serde_json::from_str::<Percentage>("\"150\"").is_err());
        let pct: Percentage = serde_json::from_str("\"20\"").unwrap();
        assert_eq!(pct.value(), dec!(20));
    }

    #[test]
    fn test_rental_window() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        let window = RentalWindow::new(start, end).unwrap();
        assert_eq!(window.days(), 3);
        assert!(RentalWindow::new(end, start).is_err());
        assert!(RentalWindow::new(start, start).is_err());

        let later = RentalWindow::new(end, end + chrono::Days::new(2)).unwrap();
        assert!(!window.overlaps(&later));
    }
}

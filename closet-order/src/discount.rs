use chrono::{DateTime, Utc};
use closet_shared::{Money, Percentage};
use serde::{Deserialize, Serialize};

use crate::error::{OrderError, OrderResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountKind {
    Percentage(Percentage),
    Fixed(Money),
}

/// A redeemable code as the checkout sees it. Management of codes lives
/// elsewhere; the engine only reads them and counts redemptions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscountCode {
    pub code: String,
    pub kind: DiscountKind,
    /// Cap on the discount of a percentage code.
    pub max_discount: Option<Money>,
    pub min_subtotal: Option<Money>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub usage_limit: Option<u32>,
    pub times_used: u32,
    pub is_active: bool,
}

impl DiscountCode {
    /// Check the code can be used on a cart worth `subtotal` at `now`.
    pub fn ensure_redeemable(&self, subtotal: Money, now: DateTime<Utc>) -> OrderResult<()> {
        if !self.is_active {
            return Err(OrderError::Validation(format!("Discount code {} is not active", self.code)));
        }
        if self.starts_at.is_some_and(|start| now < start) || self.ends_at.is_some_and(|end| now > end) {
            return Err(OrderError::Validation(format!("Discount code {} is not valid at this time", self.code)));
        }
        if self.usage_limit.is_some_and(|limit| self.times_used >= limit) {
            return Err(OrderError::Validation(format!("Discount code {} has been fully redeemed", self.code)));
        }
        if let Some(min) = self.min_subtotal {
            if subtotal < min {
                return Err(OrderError::Validation(format!(
                    "Discount code {} requires a subtotal of at least {}",
                    self.code, min
                )));
            }
        }
        Ok(())
    }

    /// Discount earned by `subtotal`, never more than the subtotal itself.
    pub fn amount_for(&self, subtotal: Money) -> Money {
        let raw = match self.kind {
            DiscountKind::Percentage(pct) => {
                let amount = pct.of(subtotal);
                match self.max_discount {
                    Some(cap) if amount > cap => cap,
                    _ => amount,
                }
            }
            DiscountKind::Fixed(amount) => amount,
        };
        raw.min(subtotal)
    }
}

/// Spread one discount over several orders in proportion to their subtotals.
/// Leftover cents land on the largest order and no share exceeds its subtotal.
pub fn allocate_discount(discount: Money, subtotals: &[Money]) -> Vec<Money> {
    let total: Money = subtotals.iter().sum();
    let discount = discount.min(total);
    discount
        .allocate(subtotals)
        .into_iter()
        .zip(subtotals)
        .map(|(share, subtotal)| share.min(*subtotal))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn code(kind: DiscountKind) -> DiscountCode {
        DiscountCode {
            code: "SPRING".to_string(),
            kind,
            max_discount: None,
            min_subtotal: None,
            starts_at: None,
            ends_at: None,
            usage_limit: None,
            times_used: 0,
            is_active: true,
        }
    }

    #[test]
    fn test_percentage_code_respects_cap() {
        let mut discount = code(DiscountKind::Percentage(Percentage::new(dec!(20)).unwrap()));
        assert_eq!(discount.amount_for(Money::new(dec!(200))), Money::new(dec!(40)));

        discount.max_discount = Some(Money::new(dec!(25)));
        assert_eq!(discount.amount_for(Money::new(dec!(200))), Money::new(dec!(25)));
    }

    #[test]
    fn test_fixed_code_never_exceeds_subtotal() {
        let discount = code(DiscountKind::Fixed(Money::new(dec!(50))));
        assert_eq!(discount.amount_for(Money::new(dec!(30))), Money::new(dec!(30)));
    }

    #[test]
    fn test_redeemability_rules() {
        let now = Utc::now();
        let mut discount = code(DiscountKind::Fixed(Money::new(dec!(10))));
        assert!(discount.ensure_redeemable(Money::new(dec!(5)), now).is_ok());

        discount.min_subtotal = Some(Money::new(dec!(100)));
        assert!(matches!(
            discount.ensure_redeemable(Money::new(dec!(99)), now),
            Err(OrderError::Validation(_))
        ));

        discount.min_subtotal = None;
        discount.ends_at = Some(now - Duration::days(1));
        assert!(discount.ensure_redeemable(Money::new(dec!(5)), now).is_err());

        discount.ends_at = None;
        discount.usage_limit = Some(3);
        discount.times_used = 3;
        assert!(discount.ensure_redeemable(Money::new(dec!(5)), now).is_err());
    }

    #[test]
    fn test_allocation_is_proportional_with_remainder_on_largest() {
        let shares = allocate_discount(
            Money::new(dec!(10)),
            &[Money::new(dec!(100)), Money::new(dec!(200))],
        );
        assert_eq!(shares, vec![Money::new(dec!(3.33)), Money::new(dec!(6.67))]);
    }

    #[test]
    fn test_allocation_capped_by_order_subtotals() {
        let shares = allocate_discount(
            Money::new(dec!(500)),
            &[Money::new(dec!(100)), Money::new(dec!(50))],
        );
        assert_eq!(shares, vec![Money::new(dec!(100)), Money::new(dec!(50))]);
    }
}

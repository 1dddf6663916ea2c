use closet_shared::{Money, Percentage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a cart line is fulfilled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Purchase,
    Rental,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "PURCHASE",
            TransactionKind::Rental => "RENTAL",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PURCHASE" => Ok(TransactionKind::Purchase),
            "RENTAL" => Ok(TransactionKind::Rental),
            other => Err(format!("Unknown transaction kind: {}", other)),
        }
    }
}

/// Catalog view of a garment as the engine needs it: prices, deposit, the
/// provider's commission rate and the current stock level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub name: String,
    pub sale_price: Money,
    pub rental_price: Money,
    pub deposit_per_unit: Money,
    pub commission_rate: Percentage,
    pub stock: u32,
    pub is_active: bool,
}

/// Price terms frozen onto an order line at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductQuote {
    pub unit_price: Money,
    pub deposit_per_unit: Money,
    pub commission_rate: Percentage,
}

impl Product {
    pub fn allows(&self, kind: TransactionKind) -> bool {
        match kind {
            TransactionKind::Purchase => self.sale_price.is_positive(),
            TransactionKind::Rental => self.rental_price.is_positive(),
        }
    }

    /// Terms for the given kind. Purchases carry no deposit.
    pub fn quote(&self, kind: TransactionKind) -> ProductQuote {
        match kind {
            TransactionKind::Purchase => ProductQuote {
                unit_price: self.sale_price,
                deposit_per_unit: Money::ZERO,
                commission_rate: self.commission_rate,
            },
            TransactionKind::Rental => ProductQuote {
                unit_price: self.rental_price,
                deposit_per_unit: self.deposit_per_unit,
                commission_rate: self.commission_rate,
            },
        }
    }
}

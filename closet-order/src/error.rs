use closet_catalog::InventoryError;
use closet_core::{CoreError, StoreError};
use closet_shared::{LedgerError, Money};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    StockUnavailable {
        product_id: Uuid,
        requested: u32,
        available: u32,
    },

    #[error("None of the requested orders can be paid")]
    NoValidOrders,

    #[error("Invalid gateway signature")]
    InvalidSignature,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Not allowed: {0}")]
    Unauthorized(String),

    #[error("Penalties for item {order_item_id} would total {requested}, above its deposit of {deposit}")]
    PenaltyExceedsDeposit {
        order_item_id: Uuid,
        deposit: Money,
        requested: Money,
    },

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Money, available: Money },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Operation not permitted: {0}")]
    InvalidOperation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Concurrent modification, please retry: {0}")]
    Conflict(String),

    #[error("Internal service error: {0}")]
    Internal(String),
}

pub type OrderResult<T> = Result<T, OrderError>;

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        OrderError::Internal(err.to_string())
    }
}

impl From<InventoryError> for OrderError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::InsufficientStock {
                product_id,
                requested,
                available,
            } => OrderError::StockUnavailable {
                product_id,
                requested,
                available,
            },
            InventoryError::Inactive(product_id) => OrderError::StockUnavailable {
                product_id,
                requested: 0,
                available: 0,
            },
            InventoryError::NotFound(product_id) => {
                OrderError::Validation(format!("Product {} is no longer in the catalog", product_id))
            }
            InventoryError::Backend(msg) => OrderError::Internal(msg),
        }
    }
}

impl From<CoreError> for OrderError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationError(msg) => OrderError::Validation(msg),
            CoreError::InvalidSignature => OrderError::InvalidSignature,
            CoreError::GatewayError(msg) | CoreError::InternalError(msg) => OrderError::Internal(msg),
        }
    }
}

impl From<LedgerError> for OrderError {
    fn from(err: LedgerError) -> Self {
        OrderError::Validation(err.to_string())
    }
}

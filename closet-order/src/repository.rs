use async_trait::async_trait;
use chrono::{DateTime, Utc};
use closet_core::StoreResult;
use uuid::Uuid;

use crate::discount::DiscountCode;
use crate::models::{
    BankAccount, Cart, FinalizeReport, Order, OrderStatus, Payout, PayoutStatus, RentalViolation, Transaction,
    TransactionResolution,
};

#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn get_cart(&self, customer_id: Uuid) -> StoreResult<Option<Cart>>;

    async fn save_cart(&self, cart: &Cart) -> StoreResult<()>;
}

/// Order persistence. Every mutation after creation is a compare-and-swap on
/// `Order::version`, which serializes concurrent transitions per order.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert the order with its items and remove the consumed lines from the
    /// customer's cart, as one unit. `false` and nothing written when any of
    /// the lines is no longer in the cart.
    async fn commit_checkout(&self, order: &Order, consumed_cart_items: &[Uuid]) -> StoreResult<bool>;

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>>;

    async fn get_orders(&self, ids: &[Uuid]) -> StoreResult<Vec<Order>>;

    async fn list_customer_orders(&self, customer_id: Uuid) -> StoreResult<Vec<Order>>;

    async fn list_provider_orders(&self, provider_id: Uuid) -> StoreResult<Vec<Order>>;

    /// Write status, timeline, refund and deposit fields if the stored version
    /// still equals `expected_version`. Items are never rewritten. Returns
    /// `false` when another writer got there first.
    async fn update_order(&self, order: &Order, expected_version: i64) -> StoreResult<bool>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn create_transaction(&self, transaction: &Transaction) -> StoreResult<()>;

    async fn get_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>>;

    /// Close an `Initiated` transaction. On completion every linked order
    /// still in `promote.0` moves to `promote.1` in the same unit of work;
    /// the rest are recorded as skipped. Returns `None` if the transaction was
    /// already closed.
    async fn finalize(
        &self,
        transaction_id: Uuid,
        resolution: TransactionResolution,
        promote: (OrderStatus, OrderStatus),
    ) -> StoreResult<Option<FinalizeReport>>;

    async fn list_initiated_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Transaction>>;

    /// The completed transaction that paid for this order, if any.
    async fn find_completed_for_order(&self, order_id: Uuid) -> StoreResult<Option<Transaction>>;
}

#[async_trait]
pub trait ViolationRepository: Send + Sync {
    async fn list_for_order(&self, order_id: Uuid) -> StoreResult<Vec<RentalViolation>>;

    async fn get_violation(&self, id: Uuid) -> StoreResult<Option<RentalViolation>>;

    /// Insert the whole batch and bump the order version, or do nothing if the
    /// order version moved.
    async fn insert_batch(
        &self,
        order_id: Uuid,
        expected_order_version: i64,
        violations: &[RentalViolation],
    ) -> StoreResult<bool>;

    async fn update_violation(&self, violation: &RentalViolation, expected_order_version: i64) -> StoreResult<bool>;
}

/// Payout rows are guarded by a per-provider ledger version so the balance
/// check and the insert behave as one step.
#[async_trait]
pub trait PayoutRepository: Send + Sync {
    async fn ledger_version(&self, provider_id: Uuid) -> StoreResult<i64>;

    async fn insert_payout(&self, payout: &Payout, expected_ledger_version: i64) -> StoreResult<bool>;

    async fn get_payout(&self, id: Uuid) -> StoreResult<Option<Payout>>;

    async fn list_payouts(&self, provider_id: Uuid) -> StoreResult<Vec<Payout>>;

    /// Move a pending payout to a terminal status. `false` if it was not pending.
    async fn resolve_payout(
        &self,
        id: Uuid,
        status: PayoutStatus,
        rejection_reason: Option<String>,
        resolved_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn list_bank_accounts(&self, provider_id: Uuid) -> StoreResult<Vec<BankAccount>>;

    /// Insert an account; when it is primary every other account of the
    /// provider loses the flag in the same unit of work.
    async fn add_bank_account(&self, account: &BankAccount) -> StoreResult<()>;

    async fn set_primary_bank_account(&self, provider_id: Uuid, account_id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait DiscountRepository: Send + Sync {
    async fn find_discount(&self, code: &str) -> StoreResult<Option<DiscountCode>>;

    /// Count one use, respecting the usage limit. `false` if exhausted.
    async fn record_redemption(&self, code: &str) -> StoreResult<bool>;

    /// Give back a use claimed by a checkout that created no order.
    async fn release_redemption(&self, code: &str) -> StoreResult<()>;
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use closet_core::StoreResult;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::discount::DiscountCode;
use crate::models::{
    BankAccount, Cart, FinalizeReport, Order, OrderStatus, Payout, PayoutStatus, RentalViolation, Transaction,
    TransactionResolution, TransactionStatus,
};
use crate::repository::{
    CartRepository, DiscountRepository, OrderRepository, PayoutRepository, TransactionRepository,
    ViolationRepository,
};

#[derive(Default)]
struct State {
    carts: HashMap<Uuid, Cart>,
    orders: HashMap<Uuid, Order>,
    transactions: HashMap<Uuid, Transaction>,
    violations: HashMap<Uuid, RentalViolation>,
    payouts: HashMap<Uuid, Payout>,
    ledger_versions: HashMap<Uuid, i64>,
    bank_accounts: HashMap<Uuid, BankAccount>,
    discounts: HashMap<String, DiscountCode>,
}

/// A thread-safe in-memory implementation of every repository port.
///
/// All tables sit behind one lock, so each trait method is a single atomic
/// unit of work, the same guarantee the SQL adapters get from transactions.
#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_discount(&self, discount: DiscountCode) {
        self.state.write().await.discounts.insert(discount.code.clone(), discount);
    }

    pub async fn get_transaction(&self, id: Uuid) -> Option<Transaction> {
        self.state.read().await.transactions.get(&id).cloned()
    }

    pub async fn discount_usage(&self, code: &str) -> Option<u32> {
        self.state.read().await.discounts.get(code).map(|d| d.times_used)
    }
}

fn sorted_by_creation(mut orders: Vec<Order>) -> Vec<Order> {
    orders.sort_by_key(|o| o.created_at);
    orders
}

#[async_trait]
impl CartRepository for MemoryStore {
    async fn get_cart(&self, customer_id: Uuid) -> StoreResult<Option<Cart>> {
        Ok(self.state.read().await.carts.get(&customer_id).cloned())
    }

    async fn save_cart(&self, cart: &Cart) -> StoreResult<()> {
        self.state.write().await.carts.insert(cart.customer_id, cart.clone());
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn commit_checkout(&self, order: &Order, consumed_cart_items: &[Uuid]) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if !consumed_cart_items.is_empty() {
            let Some(cart) = state.carts.get_mut(&order.customer_id) else {
                return Ok(false);
            };
            let present = cart
                .items
                .iter()
                .filter(|item| consumed_cart_items.contains(&item.id))
                .count();
            if present != consumed_cart_items.len() {
                return Ok(false);
            }
            cart.items.retain(|item| !consumed_cart_items.contains(&item.id));
            cart.updated_at = Utc::now();
        }
        state.orders.insert(order.id, order.clone());
        Ok(true)
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn get_orders(&self, ids: &[Uuid]) -> StoreResult<Vec<Order>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.orders.get(id).cloned()).collect())
    }

    async fn list_customer_orders(&self, customer_id: Uuid) -> StoreResult<Vec<Order>> {
        let state = self.state.read().await;
        let orders = state.orders.values().filter(|o| o.customer_id == customer_id).cloned().collect();
        Ok(sorted_by_creation(orders))
    }

    async fn list_provider_orders(&self, provider_id: Uuid) -> StoreResult<Vec<Order>> {
        let state = self.state.read().await;
        let orders = state.orders.values().filter(|o| o.provider_id == provider_id).cloned().collect();
        Ok(sorted_by_creation(orders))
    }

    async fn update_order(&self, order: &Order, expected_version: i64) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let Some(stored) = state.orders.get_mut(&order.id) else {
            return Ok(false);
        };
        if stored.version != expected_version {
            return Ok(false);
        }

        let items = std::mem::take(&mut stored.items);
        *stored = order.clone();
        stored.items = items;
        stored.version = expected_version + 1;
        Ok(true)
    }
}

#[async_trait]
impl TransactionRepository for MemoryStore {
    async fn create_transaction(&self, transaction: &Transaction) -> StoreResult<()> {
        self.state.write().await.transactions.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn get_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state.transactions.values().find(|t| t.reference == reference).cloned())
    }

    async fn finalize(
        &self,
        transaction_id: Uuid,
        resolution: TransactionResolution,
        promote: (OrderStatus, OrderStatus),
    ) -> StoreResult<Option<FinalizeReport>> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let Some(txn) = state.transactions.get_mut(&transaction_id) else {
            return Ok(None);
        };
        if txn.status != TransactionStatus::Initiated {
            return Ok(None);
        }

        let now = Utc::now();
        let mut report = FinalizeReport::default();
        match resolution {
            TransactionResolution::Completed {
                response_code,
                gateway_transaction_no,
            } => {
                let (from, to) = promote;
                for order_id in &txn.order_ids {
                    match state.orders.get_mut(order_id) {
                        Some(order) if order.status == from => {
                            order.mark_status(to, now);
                            order.version += 1;
                            report.promoted.push(*order_id);
                        }
                        _ => report.skipped.push(*order_id),
                    }
                }
                txn.status = TransactionStatus::Completed;
                txn.gateway_response_code = Some(response_code);
                txn.gateway_transaction_no = gateway_transaction_no;
                txn.skipped_order_ids = report.skipped.clone();
            }
            TransactionResolution::Failed { response_code } => {
                txn.status = TransactionStatus::Failed;
                txn.gateway_response_code = Some(response_code);
            }
        }
        txn.completed_at = Some(now);
        Ok(Some(report))
    }

    async fn list_initiated_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| t.status == TransactionStatus::Initiated && t.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn find_completed_for_order(&self, order_id: Uuid) -> StoreResult<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .find(|t| t.status == TransactionStatus::Completed && t.paid_order_ids().any(|id| *id == order_id))
            .cloned())
    }
}

#[async_trait]
impl ViolationRepository for MemoryStore {
    async fn list_for_order(&self, order_id: Uuid) -> StoreResult<Vec<RentalViolation>> {
        let state = self.state.read().await;
        let mut violations: Vec<RentalViolation> =
            state.violations.values().filter(|v| v.order_id == order_id).cloned().collect();
        violations.sort_by_key(|v| v.created_at);
        Ok(violations)
    }

    async fn get_violation(&self, id: Uuid) -> StoreResult<Option<RentalViolation>> {
        Ok(self.state.read().await.violations.get(&id).cloned())
    }

    async fn insert_batch(
        &self,
        order_id: Uuid,
        expected_order_version: i64,
        violations: &[RentalViolation],
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.orders.get_mut(&order_id) {
            Some(order) if order.version == expected_order_version => order.version += 1,
            _ => return Ok(false),
        }
        for violation in violations {
            state.violations.insert(violation.id, violation.clone());
        }
        Ok(true)
    }

    async fn update_violation(&self, violation: &RentalViolation, expected_order_version: i64) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.orders.get_mut(&violation.order_id) {
            Some(order) if order.version == expected_order_version => order.version += 1,
            _ => return Ok(false),
        }
        state.violations.insert(violation.id, violation.clone());
        Ok(true)
    }
}

#[async_trait]
impl PayoutRepository for MemoryStore {
    async fn ledger_version(&self, provider_id: Uuid) -> StoreResult<i64> {
        Ok(self.state.read().await.ledger_versions.get(&provider_id).copied().unwrap_or(0))
    }

    async fn insert_payout(&self, payout: &Payout, expected_ledger_version: i64) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let version = state.ledger_versions.entry(payout.provider_id).or_insert(0);
        if *version != expected_ledger_version {
            return Ok(false);
        }
        *version += 1;
        state.payouts.insert(payout.id, payout.clone());
        Ok(true)
    }

    async fn get_payout(&self, id: Uuid) -> StoreResult<Option<Payout>> {
        Ok(self.state.read().await.payouts.get(&id).cloned())
    }

    async fn list_payouts(&self, provider_id: Uuid) -> StoreResult<Vec<Payout>> {
        let state = self.state.read().await;
        let mut payouts: Vec<Payout> = state.payouts.values().filter(|p| p.provider_id == provider_id).cloned().collect();
        payouts.sort_by_key(|p| std::cmp::Reverse(p.requested_at));
        Ok(payouts)
    }

    async fn resolve_payout(
        &self,
        id: Uuid,
        status: PayoutStatus,
        rejection_reason: Option<String>,
        resolved_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let provider_id = match state.payouts.get_mut(&id) {
            Some(payout) if payout.status == PayoutStatus::Pending => {
                payout.status = status;
                payout.rejection_reason = rejection_reason;
                payout.resolved_at = Some(resolved_at);
                payout.provider_id
            }
            _ => return Ok(false),
        };
        *state.ledger_versions.entry(provider_id).or_insert(0) += 1;
        Ok(true)
    }

    async fn list_bank_accounts(&self, provider_id: Uuid) -> StoreResult<Vec<BankAccount>> {
        let state = self.state.read().await;
        let mut accounts: Vec<BankAccount> =
            state.bank_accounts.values().filter(|a| a.provider_id == provider_id).cloned().collect();
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }

    async fn add_bank_account(&self, account: &BankAccount) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if account.is_primary {
            for other in state.bank_accounts.values_mut().filter(|a| a.provider_id == account.provider_id) {
                other.is_primary = false;
            }
        }
        state.bank_accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn set_primary_bank_account(&self, provider_id: Uuid, account_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let owned = state
            .bank_accounts
            .get(&account_id)
            .is_some_and(|a| a.provider_id == provider_id);
        if !owned {
            return Ok(false);
        }
        for account in state.bank_accounts.values_mut().filter(|a| a.provider_id == provider_id) {
            account.is_primary = account.id == account_id;
        }
        Ok(true)
    }
}

#[async_trait]
impl DiscountRepository for MemoryStore {
    async fn find_discount(&self, code: &str) -> StoreResult<Option<DiscountCode>> {
        Ok(self.state.read().await.discounts.get(code).cloned())
    }

    async fn record_redemption(&self, code: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.discounts.get_mut(code) {
            Some(discount) if discount.usage_limit.map_or(true, |limit| discount.times_used < limit) => {
                discount.times_used += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_redemption(&self, code: &str) -> StoreResult<()> {
        if let Some(discount) = self.state.write().await.discounts.get_mut(code) {
            discount.times_used = discount.times_used.saturating_sub(1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContactSnapshot, OrderLine};
    use closet_catalog::{ProductQuote, TransactionKind};
    use closet_shared::{Money, Percentage, Redacted};
    use rust_decimal_macros::dec;

    fn order(customer_id: Uuid) -> Order {
        Order::new(
            customer_id,
            Uuid::new_v4(),
            ContactSnapshot {
                full_name: "Linh Pham".to_string(),
                phone: Redacted::new("0912000111".to_string()),
                email: None,
                address: Redacted::new("5 Hang Bai".to_string()),
            },
            None,
            None,
            vec![OrderLine {
                product_id: Uuid::new_v4(),
                product_name: "Wool coat".to_string(),
                kind: TransactionKind::Purchase,
                quantity: 1,
                quote: ProductQuote {
                    unit_price: Money::new(dec!(100)),
                    deposit_per_unit: Money::ZERO,
                    commission_rate: Percentage::new(dec!(10)).unwrap(),
                },
            }],
        )
    }

    #[tokio::test]
    async fn test_update_order_is_compare_and_swap() {
        let store = MemoryStore::new();
        let order = order(Uuid::new_v4());
        store.commit_checkout(&order, &[]).await.unwrap();

        let mut first = order.clone();
        first.mark_status(OrderStatus::Approved, Utc::now());
        assert!(store.update_order(&first, 0).await.unwrap());

        let mut stale = order.clone();
        stale.mark_status(OrderStatus::Cancelled, Utc::now());
        assert!(!store.update_order(&stale, 0).await.unwrap());

        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Approved);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_finalize_only_once() {
        let store = MemoryStore::new();
        let customer = Uuid::new_v4();
        let order = order(customer);
        store.commit_checkout(&order, &[]).await.unwrap();
        let txn = Transaction::new(customer, vec![order.id], order.total_amount(), None);
        store.create_transaction(&txn).await.unwrap();

        let resolution = TransactionResolution::Completed {
            response_code: "00".to_string(),
            gateway_transaction_no: None,
        };
        let promote = (OrderStatus::Pending, OrderStatus::Approved);
        let report = store.finalize(txn.id, resolution.clone(), promote).await.unwrap().unwrap();
        assert_eq!(report.promoted, vec![order.id]);
        assert!(store.finalize(txn.id, resolution, promote).await.unwrap().is_none());

        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Approved);
        assert!(stored.timeline.approved_at.is_some());
    }

    #[tokio::test]
    async fn test_single_primary_bank_account() {
        let store = MemoryStore::new();
        let provider = Uuid::new_v4();
        let account = |primary: bool| BankAccount {
            id: Uuid::new_v4(),
            provider_id: provider,
            bank_name: "Vietcombank".to_string(),
            account_holder: "Hoa Nguyen".to_string(),
            account_number: Redacted::new("0011002233".to_string()),
            is_primary: primary,
            created_at: Utc::now(),
        };
        let first = account(true);
        let second = account(true);
        store.add_bank_account(&first).await.unwrap();
        store.add_bank_account(&second).await.unwrap();

        let accounts = store.list_bank_accounts(provider).await.unwrap();
        assert_eq!(accounts.iter().filter(|a| a.is_primary).count(), 1);

        assert!(store.set_primary_bank_account(provider, first.id).await.unwrap());
        assert!(!store.set_primary_bank_account(Uuid::new_v4(), first.id).await.unwrap());
        let primary: Vec<Uuid> = store
            .list_bank_accounts(provider)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.is_primary)
            .map(|a| a.id)
            .collect();
        assert_eq!(primary, vec![first.id]);
    }
}

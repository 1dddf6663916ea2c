use chrono::Utc;
use closet_core::Notifier;
use closet_shared::{DomainEvent, Money};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{OrderError, OrderResult};
use crate::models::{Actor, DepositSettlement, Order, RentalViolation};
use crate::repository::{OrderRepository, ViolationRepository};
use crate::MAX_CAS_ATTEMPTS;

/// How an order's deposit splits between the customer and the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepositStatement {
    pub order_id: Uuid,
    pub total_deposit: Money,
    pub withheld: Money,
    pub refundable: Money,
    pub violation_count: usize,
    pub settled: bool,
}

impl DepositStatement {
    fn compute(order: &Order, violations: &[RentalViolation]) -> Self {
        let penalties: Money = violations.iter().map(|v| v.penalty_amount).sum();
        let withheld = penalties.min(order.total_deposit);
        Self {
            order_id: order.id,
            total_deposit: order.total_deposit,
            withheld,
            refundable: order.total_deposit - withheld,
            violation_count: violations.len(),
            settled: order.is_deposit_settled(),
        }
    }
}

pub struct SettlementService {
    orders: Arc<dyn OrderRepository>,
    violations: Arc<dyn ViolationRepository>,
    notifier: Arc<dyn Notifier>,
}

impl SettlementService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        violations: Arc<dyn ViolationRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            orders,
            violations,
            notifier,
        }
    }

    async fn load(&self, order_id: Uuid, actor: Actor) -> OrderResult<Order> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("Order {}", order_id)))?;
        let allowed = match actor {
            Actor::Provider(id) => id == order.provider_id,
            Actor::Customer(id) => id == order.customer_id,
            Actor::Staff(_) => true,
        };
        if !allowed {
            return Err(OrderError::Unauthorized("Order belongs to someone else".to_string()));
        }
        Ok(order)
    }

    /// Current statement without settling anything.
    pub async fn preview(&self, order_id: Uuid, actor: Actor) -> OrderResult<DepositStatement> {
        let order = self.load(order_id, actor).await?;
        let violations = self.violations.list_for_order(order_id).await?;
        Ok(DepositStatement::compute(&order, &violations))
    }

    /// Close the deposit of a returned order. Penalties are withheld, the rest
    /// is refundable, and violations are locked from then on.
    pub async fn settle_deposit(&self, order_id: Uuid, actor: Actor) -> OrderResult<DepositStatement> {
        if matches!(actor, Actor::Customer(_)) {
            return Err(OrderError::Unauthorized("Customers cannot settle deposits".to_string()));
        }

        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut order = self.load(order_id, actor).await?;
            if !order.status.is_fulfilled() {
                return Err(OrderError::InvalidOperation(format!(
                    "Deposit can only be settled once the order is returned, order is {}",
                    order.status
                )));
            }
            if order.is_deposit_settled() {
                return Err(OrderError::InvalidOperation("Deposit is already settled".to_string()));
            }

            let violations = self.violations.list_for_order(order_id).await?;
            let mut statement = DepositStatement::compute(&order, &violations);
            let now = Utc::now();
            let expected_version = order.version;
            order.deposit_settlement = Some(DepositSettlement {
                refunded: statement.refundable,
                withheld: statement.withheld,
                settled_at: now,
            });
            order.updated_at = now;

            if !self.orders.update_order(&order, expected_version).await? {
                warn!("Order {} changed while settling its deposit, retrying", order_id);
                continue;
            }

            statement.settled = true;
            info!(
                "Deposit of order {} settled: {} refundable, {} withheld",
                order_id, statement.refundable, statement.withheld
            );
            self.notifier.notify(DomainEvent::DepositSettled {
                order_id,
                customer_id: order.customer_id,
                refundable: statement.refundable,
                withheld: statement.withheld,
                timestamp: now.timestamp(),
            });
            return Ok(statement);
        }

        Err(OrderError::Conflict(format!("Order {} is being modified concurrently", order_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{ContactSnapshot, OrderLine, OrderStatus, ViolationType};
    use closet_catalog::{ProductQuote, TransactionKind};
    use closet_core::MemoryNotifier;
    use closet_shared::{Percentage, Redacted};
    use rust_decimal_macros::dec;

    async fn order_in(store: &MemoryStore, status: OrderStatus) -> Order {
        let mut order = Order::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ContactSnapshot {
                full_name: "Khanh Ly".to_string(),
                phone: Redacted::new("0944555666".to_string()),
                email: None,
                address: Redacted::new("3 Pasteur".to_string()),
            },
            None,
            None,
            vec![OrderLine {
                product_id: Uuid::new_v4(),
                product_name: "Sequin jacket".to_string(),
                kind: TransactionKind::Rental,
                quantity: 1,
                quote: ProductQuote {
                    unit_price: Money::new(dec!(90)),
                    deposit_per_unit: Money::new(dec!(150)),
                    commission_rate: Percentage::new(dec!(20)).unwrap(),
                },
            }],
        );
        order.status = status;
        store.commit_checkout(&order, &[]).await.unwrap();
        order
    }

    fn violation(order: &Order, amount: Money) -> RentalViolation {
        RentalViolation {
            id: Uuid::new_v4(),
            order_id: order.id,
            order_item_id: order.items[0].id,
            provider_id: order.provider_id,
            violation_type: ViolationType::Damage,
            description: "Torn sleeve".to_string(),
            penalty_percentage: None,
            penalty_amount: amount,
            evidence: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn service(store: &MemoryStore) -> SettlementService {
        SettlementService::new(Arc::new(store.clone()), Arc::new(store.clone()), Arc::new(MemoryNotifier::new()))
    }

    #[tokio::test]
    async fn test_settlement_withholds_penalties() {
        let store = MemoryStore::new();
        let order = order_in(&store, OrderStatus::ReturnedWithIssue).await;
        store
            .insert_batch(order.id, 0, &[violation(&order, Money::new(dec!(60)))])
            .await
            .unwrap();

        let provider = Actor::Provider(order.provider_id);
        let statement = service(&store).settle_deposit(order.id, provider).await.unwrap();
        assert_eq!(statement.withheld, Money::new(dec!(60)));
        assert_eq!(statement.refundable, Money::new(dec!(90)));
        assert!(statement.settled);

        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.deposit_settlement.unwrap().refunded, Money::new(dec!(90)));

        let again = service(&store).settle_deposit(order.id, provider).await;
        assert!(matches!(again, Err(OrderError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_settlement_requires_return() {
        let store = MemoryStore::new();
        let order = order_in(&store, OrderStatus::InUse).await;
        let result = service(&store).settle_deposit(order.id, Actor::Staff(Uuid::new_v4())).await;
        assert!(matches!(result, Err(OrderError::InvalidOperation(_))));

        let customer = Actor::Customer(order.customer_id);
        let preview = service(&store).preview(order.id, customer).await.unwrap();
        assert_eq!(preview.refundable, Money::new(dec!(150)));
        assert!(!preview.settled);
    }
}

use chrono::Utc;
use closet_catalog::{release_lines, CatalogGateway, StockLine};
use closet_core::Notifier;
use closet_shared::DomainEvent;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{OrderError, OrderResult};
use crate::models::{Actor, Order, OrderStatus, RefundStatus};
use crate::repository::{OrderRepository, TransactionRepository};
use crate::MAX_CAS_ATTEMPTS;

/// Every status change an order can go through after checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    Approve,
    MarkShipping,
    ConfirmDelivery,
    MarkReturning,
    MarkReturned,
    MarkReturnedWithIssue,
    Cancel,
}

impl OrderAction {
    pub const ALL: [OrderAction; 7] = [
        OrderAction::Approve,
        OrderAction::MarkShipping,
        OrderAction::ConfirmDelivery,
        OrderAction::MarkReturning,
        OrderAction::MarkReturned,
        OrderAction::MarkReturnedWithIssue,
        OrderAction::Cancel,
    ];

    /// Transition table row: the states this action is legal from.
    pub fn sources(&self) -> &'static [OrderStatus] {
        match self {
            OrderAction::Approve => &[OrderStatus::Pending],
            OrderAction::MarkShipping => &[OrderStatus::Approved],
            OrderAction::ConfirmDelivery => &[OrderStatus::InTransit],
            OrderAction::MarkReturning => &[OrderStatus::InUse],
            OrderAction::MarkReturned | OrderAction::MarkReturnedWithIssue => &[OrderStatus::Returning],
            OrderAction::Cancel => &[OrderStatus::Pending, OrderStatus::Approved],
        }
    }

    pub fn target(&self) -> OrderStatus {
        match self {
            OrderAction::Approve => OrderStatus::Approved,
            OrderAction::MarkShipping => OrderStatus::InTransit,
            OrderAction::ConfirmDelivery => OrderStatus::InUse,
            OrderAction::MarkReturning => OrderStatus::Returning,
            OrderAction::MarkReturned => OrderStatus::Returned,
            OrderAction::MarkReturnedWithIssue => OrderStatus::ReturnedWithIssue,
            OrderAction::Cancel => OrderStatus::Cancelled,
        }
    }

    /// Whether `actor` may perform this action on `order`.
    pub fn permits(&self, actor: Actor, order: &Order) -> bool {
        match (self, actor) {
            (OrderAction::Approve, Actor::Provider(id)) => id == order.provider_id,
            (OrderAction::Approve, Actor::Staff(_)) => true,
            (OrderAction::Cancel, Actor::Customer(id)) => id == order.customer_id,
            (OrderAction::Cancel, Actor::Staff(_)) => true,
            (OrderAction::Cancel | OrderAction::Approve, _) => false,
            (_, Actor::Provider(id)) => id == order.provider_id,
            _ => false,
        }
    }
}

/// Resolve the target state of `action` from `from`, or fail naming both states.
pub fn transition(from: OrderStatus, action: OrderAction) -> OrderResult<OrderStatus> {
    if action.sources().contains(&from) {
        Ok(action.target())
    } else {
        Err(OrderError::InvalidTransition {
            from: from.to_string(),
            to: action.target().to_string(),
        })
    }
}

/// An applied transition plus any best-effort side effects that did not go through.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub order: Order,
    pub warnings: Vec<String>,
}

/// Manages order lifecycle and state transitions
pub struct OrderManager {
    orders: Arc<dyn OrderRepository>,
    transactions: Arc<dyn TransactionRepository>,
    catalog: Arc<dyn CatalogGateway>,
    notifier: Arc<dyn Notifier>,
}

impl OrderManager {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        transactions: Arc<dyn TransactionRepository>,
        catalog: Arc<dyn CatalogGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            orders,
            transactions,
            catalog,
            notifier,
        }
    }

    pub async fn get_order(&self, order_id: Uuid) -> OrderResult<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("Order {}", order_id)))
    }

    /// Fetch an order on behalf of someone allowed to see it.
    pub async fn get_order_for(&self, order_id: Uuid, actor: Actor) -> OrderResult<Order> {
        let order = self.get_order(order_id).await?;
        let visible = match actor {
            Actor::Customer(id) => id == order.customer_id,
            Actor::Provider(id) => id == order.provider_id,
            Actor::Staff(_) => true,
        };
        if !visible {
            return Err(OrderError::Unauthorized("Order belongs to someone else".to_string()));
        }
        Ok(order)
    }

    pub async fn list_for(&self, actor: Actor) -> OrderResult<Vec<Order>> {
        match actor {
            Actor::Customer(id) => Ok(self.orders.list_customer_orders(id).await?),
            Actor::Provider(id) => Ok(self.orders.list_provider_orders(id).await?),
            Actor::Staff(_) => Err(OrderError::InvalidOperation(
                "Staff must query a specific customer or provider".to_string(),
            )),
        }
    }

    /// Apply `action` to the order under an optimistic version check.
    pub async fn apply(&self, order_id: Uuid, action: OrderAction, actor: Actor) -> OrderResult<TransitionOutcome> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut order = self.get_order(order_id).await?;
            if !action.permits(actor, &order) {
                return Err(OrderError::Unauthorized(format!(
                    "{:?} may not perform {:?} on order {}",
                    actor, action, order_id
                )));
            }

            let from = order.status;
            let to = transition(from, action)?;
            let expected_version = order.version;

            order.mark_status(to, Utc::now());
            if to == OrderStatus::Cancelled && self.transactions.find_completed_for_order(order_id).await?.is_some() {
                order.refund_status = RefundStatus::Pending;
            }

            if !self.orders.update_order(&order, expected_version).await? {
                warn!("Order {} changed while applying {:?}, retrying", order_id, action);
                continue;
            }
            order.version = expected_version + 1;

            info!("Order {} moved {} -> {}", order_id, from, to);
            let mut warnings = Vec::new();
            if to == OrderStatus::Cancelled {
                warnings.extend(self.restock(&order).await);
            }
            self.notifier.notify(DomainEvent::OrderStatusChanged {
                order_id,
                customer_id: order.customer_id,
                provider_id: order.provider_id,
                from: from.to_string(),
                to: to.to_string(),
                timestamp: order.updated_at.timestamp(),
            });

            return Ok(TransitionOutcome { order, warnings });
        }

        Err(OrderError::Conflict(format!("Order {} is being modified concurrently", order_id)))
    }

    async fn restock(&self, order: &Order) -> Vec<String> {
        let lines: Vec<StockLine> = order
            .items
            .iter()
            .map(|item| StockLine {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect();

        release_lines(self.catalog.as_ref(), &lines)
            .await
            .into_iter()
            .map(|line| format!("Stock for product {} was not restored ({} unit(s))", line.product_id, line.quantity))
            .collect()
    }

    pub async fn approve(&self, order_id: Uuid, actor: Actor) -> OrderResult<TransitionOutcome> {
        self.apply(order_id, OrderAction::Approve, actor).await
    }

    pub async fn mark_shipping(&self, order_id: Uuid, actor: Actor) -> OrderResult<TransitionOutcome> {
        self.apply(order_id, OrderAction::MarkShipping, actor).await
    }

    pub async fn confirm_delivery(&self, order_id: Uuid, actor: Actor) -> OrderResult<TransitionOutcome> {
        self.apply(order_id, OrderAction::ConfirmDelivery, actor).await
    }

    pub async fn mark_returning(&self, order_id: Uuid, actor: Actor) -> OrderResult<TransitionOutcome> {
        self.apply(order_id, OrderAction::MarkReturning, actor).await
    }

    pub async fn mark_returned(&self, order_id: Uuid, actor: Actor) -> OrderResult<TransitionOutcome> {
        self.apply(order_id, OrderAction::MarkReturned, actor).await
    }

    pub async fn mark_returned_with_issue(&self, order_id: Uuid, actor: Actor) -> OrderResult<TransitionOutcome> {
        self.apply(order_id, OrderAction::MarkReturnedWithIssue, actor).await
    }

    pub async fn cancel(&self, order_id: Uuid, actor: Actor) -> OrderResult<TransitionOutcome> {
        self.apply(order_id, OrderAction::Cancel, actor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{ContactSnapshot, OrderLine, Transaction, TransactionResolution};
    use closet_catalog::{InMemoryCatalog, Product, TransactionKind};
    use closet_core::MemoryNotifier;
    use closet_shared::{Money, Percentage, Redacted};
    use rust_decimal_macros::dec;

    struct Fixture {
        store: MemoryStore,
        catalog: Arc<InMemoryCatalog>,
        notifier: Arc<MemoryNotifier>,
        manager: OrderManager,
        product: Product,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let catalog = Arc::new(InMemoryCatalog::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let product = Product {
            id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            name: "Velvet gown".to_string(),
            sale_price: Money::ZERO,
            rental_price: Money::new(dec!(120)),
            deposit_per_unit: Money::new(dec!(200)),
            commission_rate: Percentage::new(dec!(15)).unwrap(),
            stock: 1,
            is_active: true,
        };
        catalog.upsert(product.clone()).await;
        let manager = OrderManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            catalog.clone(),
            notifier.clone(),
        );
        Fixture {
            store,
            catalog,
            notifier,
            manager,
            product,
        }
    }

    async fn place_order(f: &Fixture, customer_id: Uuid) -> Order {
        f.catalog.decrement_stock(f.product.id, 1).await.unwrap();
        let order = Order::new(
            customer_id,
            f.product.provider_id,
            ContactSnapshot {
                full_name: "Thu Ha".to_string(),
                phone: Redacted::new("0987654321".to_string()),
                email: None,
                address: Redacted::new("88 Tran Hung Dao".to_string()),
            },
            None,
            None,
            vec![OrderLine {
                product_id: f.product.id,
                product_name: f.product.name.clone(),
                kind: TransactionKind::Rental,
                quantity: 1,
                quote: f.product.quote(TransactionKind::Rental),
            }],
        );
        f.store.commit_checkout(&order, &[]).await.unwrap();
        order
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(transition(OrderStatus::Pending, OrderAction::Approve).unwrap(), OrderStatus::Approved);
        assert_eq!(transition(OrderStatus::Approved, OrderAction::Cancel).unwrap(), OrderStatus::Cancelled);

        let err = transition(OrderStatus::InUse, OrderAction::Cancel).unwrap_err();
        match err {
            OrderError::InvalidTransition { from, to } => {
                assert_eq!(from, "IN_USE");
                assert_eq!(to, "CANCELLED");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(transition(OrderStatus::Returned, OrderAction::MarkReturning).is_err());
    }

    #[test]
    fn test_failed_transition_names_the_action_target() {
        let expected = [
            (OrderAction::Approve, "APPROVED"),
            (OrderAction::MarkShipping, "IN_TRANSIT"),
            (OrderAction::ConfirmDelivery, "IN_USE"),
            (OrderAction::MarkReturning, "RETURNING"),
            (OrderAction::MarkReturned, "RETURNED"),
            (OrderAction::MarkReturnedWithIssue, "RETURNED_WITH_ISSUE"),
            (OrderAction::Cancel, "CANCELLED"),
        ];
        for (action, target) in expected {
            // Cancelled is terminal, so every action is illegal from it.
            match transition(OrderStatus::Cancelled, action) {
                Err(OrderError::InvalidTransition { from, to }) => {
                    assert_eq!(from, "CANCELLED");
                    assert_eq!(to, target, "{:?}", action);
                }
                other => panic!("{:?} from CANCELLED: {:?}", action, other),
            }
        }
        for action in OrderAction::ALL {
            for &from in action.sources() {
                assert_eq!(transition(from, action).unwrap(), action.target());
            }
        }
    }

    #[tokio::test]
    async fn test_order_lifecycle() {
        let f = fixture().await;
        let order = place_order(&f, Uuid::new_v4()).await;
        let provider = Actor::Provider(f.product.provider_id);

        f.manager.approve(order.id, provider).await.unwrap();
        f.manager.mark_shipping(order.id, provider).await.unwrap();
        let delivered = f.manager.confirm_delivery(order.id, provider).await.unwrap().order;
        assert_eq!(delivered.status, OrderStatus::InUse);
        assert!(delivered.timeline.delivered_at.is_some());

        f.manager.mark_returning(order.id, provider).await.unwrap();
        let returned = f.manager.mark_returned(order.id, provider).await.unwrap().order;
        assert_eq!(returned.status, OrderStatus::Returned);
        assert!(returned.timeline.returned_at.is_some());
        assert_eq!(returned.total_amount(), order.total_amount());
        assert_eq!(returned.version, 5);

        assert_eq!(f.notifier.events().len(), 5);
    }

    #[tokio::test]
    async fn test_invalid_transition_leaves_status() {
        let f = fixture().await;
        let order = place_order(&f, Uuid::new_v4()).await;
        let provider = Actor::Provider(f.product.provider_id);

        let result = f.manager.mark_returned(order.id, provider).await;
        assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));
        assert_eq!(f.manager.get_order(order.id).await.unwrap().status, OrderStatus::Pending);
        assert!(f.notifier.events().is_empty());
    }

    #[tokio::test]
    async fn test_only_owner_may_act() {
        let f = fixture().await;
        let customer = Uuid::new_v4();
        let order = place_order(&f, customer).await;

        let stranger = Actor::Provider(Uuid::new_v4());
        assert!(matches!(f.manager.approve(order.id, stranger).await, Err(OrderError::Unauthorized(_))));
        assert!(matches!(
            f.manager.mark_shipping(order.id, Actor::Customer(customer)).await,
            Err(OrderError::Unauthorized(_))
        ));
        assert!(matches!(
            f.manager.cancel(order.id, Actor::Customer(Uuid::new_v4())).await,
            Err(OrderError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_restores_stock_and_flags_refund() {
        let f = fixture().await;
        let customer = Uuid::new_v4();
        let order = place_order(&f, customer).await;
        assert_eq!(f.catalog.stock_of(f.product.id).await, Some(0));

        let txn = Transaction::new(customer, vec![order.id], order.total_amount(), None);
        f.store.create_transaction(&txn).await.unwrap();
        f.store
            .finalize(
                txn.id,
                TransactionResolution::Completed {
                    response_code: "00".to_string(),
                    gateway_transaction_no: Some("1001".to_string()),
                },
                (OrderStatus::Pending, OrderStatus::Approved),
            )
            .await
            .unwrap();

        let outcome = f.manager.cancel(order.id, Actor::Customer(customer)).await.unwrap();
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.order.status, OrderStatus::Cancelled);
        assert_eq!(outcome.order.refund_status, RefundStatus::Pending);
        assert!(outcome.order.timeline.cancelled_at.is_some());
        assert_eq!(f.catalog.stock_of(f.product.id).await, Some(1));

        let again = f.manager.cancel(order.id, Actor::Staff(Uuid::new_v4())).await;
        assert!(matches!(again, Err(OrderError::InvalidTransition { .. })));
        assert_eq!(f.catalog.stock_of(f.product.id).await, Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_transitions_only_one_wins() {
        let f = fixture().await;
        let customer = Uuid::new_v4();
        let order = place_order(&f, customer).await;

        let (approved, cancelled) = tokio::join!(
            f.manager.approve(order.id, Actor::Provider(f.product.provider_id)),
            f.manager.cancel(order.id, Actor::Customer(customer)),
        );
        // Cancel is legal from both pending and approved, so it may land after the approval.
        assert!(cancelled.is_ok());
        let final_status = f.manager.get_order(order.id).await.unwrap().status;
        assert_eq!(final_status, OrderStatus::Cancelled);
        if approved.is_err() {
            assert!(matches!(approved, Err(OrderError::InvalidTransition { .. })));
        }
    }
}

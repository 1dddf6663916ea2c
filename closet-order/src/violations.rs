use chrono::Utc;
use closet_core::{ContentModerator, ModerationVerdict, Notifier};
use closet_shared::{DomainEvent, Money, Percentage};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{OrderError, OrderResult};
use crate::models::{Order, OrderItem, OrderStatus, RentalViolation, ViolationType};
use crate::repository::{OrderRepository, ViolationRepository};
use crate::MAX_CAS_ATTEMPTS;

/// How the provider expressed a penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyInput {
    /// Share of the line's total deposit.
    Percentage(Percentage),
    Amount(Money),
}

impl PenaltyInput {
    /// Exactly one of the two must be supplied.
    pub fn from_parts(percentage: Option<Decimal>, amount: Option<Decimal>) -> OrderResult<Self> {
        match (percentage, amount) {
            (Some(pct), None) => Ok(PenaltyInput::Percentage(Percentage::new(pct)?)),
            (None, Some(amount)) => {
                let amount = Money::new(amount);
                if amount < Money::ZERO {
                    return Err(OrderError::InvalidAmount("Penalty cannot be negative".to_string()));
                }
                Ok(PenaltyInput::Amount(amount))
            }
            _ => Err(OrderError::Validation(
                "Give either a penalty percentage or a penalty amount".to_string(),
            )),
        }
    }

    fn resolve(&self, item: &OrderItem) -> Money {
        match self {
            PenaltyInput::Percentage(pct) => pct.of(item.total_deposit()),
            PenaltyInput::Amount(amount) => *amount,
        }
    }

    fn percentage(&self) -> Option<Percentage> {
        match self {
            PenaltyInput::Percentage(pct) => Some(*pct),
            PenaltyInput::Amount(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViolationInput {
    pub order_item_id: Uuid,
    pub violation_type: ViolationType,
    pub description: String,
    pub penalty: PenaltyInput,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ViolationUpdate {
    pub violation_type: Option<ViolationType>,
    pub description: Option<String>,
    pub penalty: Option<PenaltyInput>,
    pub evidence: Option<Vec<String>>,
}

/// Records and edits post-return violations and keeps every line's penalties
/// within its deposit.
pub struct ViolationService {
    orders: Arc<dyn OrderRepository>,
    violations: Arc<dyn ViolationRepository>,
    moderator: Arc<dyn ContentModerator>,
    notifier: Arc<dyn Notifier>,
}

fn ensure_admissible(order: &Order) -> OrderResult<()> {
    if !matches!(order.status, OrderStatus::Returning | OrderStatus::ReturnedWithIssue) {
        return Err(OrderError::InvalidOperation(format!(
            "Violations cannot be recorded on a {} order",
            order.status
        )));
    }
    if order.is_deposit_settled() {
        return Err(OrderError::InvalidOperation("The deposit has already been settled".to_string()));
    }
    Ok(())
}

fn penalty_totals(violations: &[RentalViolation]) -> HashMap<Uuid, Money> {
    let mut totals: HashMap<Uuid, Money> = HashMap::new();
    for violation in violations {
        *totals.entry(violation.order_item_id).or_default() += violation.penalty_amount;
    }
    totals
}

/// Add `amount` to the running total of `item` or fail if it would pass the deposit.
fn charge(totals: &mut HashMap<Uuid, Money>, item: &OrderItem, amount: Money) -> OrderResult<()> {
    let running = totals.entry(item.id).or_default();
    let requested = *running + amount;
    let deposit = item.total_deposit();
    if requested > deposit {
        return Err(OrderError::PenaltyExceedsDeposit {
            order_item_id: item.id,
            deposit,
            requested,
        });
    }
    *running = requested;
    Ok(())
}

impl ViolationService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        violations: Arc<dyn ViolationRepository>,
        moderator: Arc<dyn ContentModerator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            orders,
            violations,
            moderator,
            notifier,
        }
    }

    async fn load_order(&self, order_id: Uuid) -> OrderResult<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("Order {}", order_id)))
    }

    async fn check_description(&self, description: &str) -> OrderResult<()> {
        if description.trim().is_empty() {
            return Err(OrderError::Validation("Violation description is required".to_string()));
        }
        match self.moderator.check("description", description).await? {
            ModerationVerdict::Pass => Ok(()),
            ModerationVerdict::Reject(reason) => Err(OrderError::Validation(reason)),
        }
    }

    pub async fn list_for_order(&self, order_id: Uuid) -> OrderResult<Vec<RentalViolation>> {
        Ok(self.violations.list_for_order(order_id).await?)
    }

    /// Record a batch of violations on one order. Either every line is stored
    /// or none is.
    pub async fn create_multiple(
        &self,
        order_id: Uuid,
        provider_id: Uuid,
        inputs: Vec<ViolationInput>,
    ) -> OrderResult<Vec<RentalViolation>> {
        if inputs.is_empty() {
            return Err(OrderError::Validation("At least one violation is required".to_string()));
        }
        for input in &inputs {
            self.check_description(&input.description).await?;
        }

        for _ in 0..MAX_CAS_ATTEMPTS {
            let order = self.load_order(order_id).await?;
            if order.provider_id != provider_id {
                return Err(OrderError::Unauthorized("Only the order's provider can record violations".to_string()));
            }
            ensure_admissible(&order)?;

            let mut totals = penalty_totals(&self.violations.list_for_order(order_id).await?);
            let now = Utc::now();
            let mut batch = Vec::with_capacity(inputs.len());
            for input in &inputs {
                let item = order.item(input.order_item_id).ok_or_else(|| {
                    OrderError::Validation(format!("Item {} is not part of order {}", input.order_item_id, order_id))
                })?;
                let amount = input.penalty.resolve(item);
                charge(&mut totals, item, amount)?;

                batch.push(RentalViolation {
                    id: Uuid::new_v4(),
                    order_id,
                    order_item_id: item.id,
                    provider_id,
                    violation_type: input.violation_type,
                    description: input.description.trim().to_string(),
                    penalty_percentage: input.penalty.percentage(),
                    penalty_amount: amount,
                    evidence: input.evidence.clone(),
                    created_at: now,
                    updated_at: now,
                });
            }

            if !self.violations.insert_batch(order_id, order.version, &batch).await? {
                warn!("Order {} changed while recording violations, retrying", order_id);
                continue;
            }

            let total_penalty: Money = batch.iter().map(|v| v.penalty_amount).sum();
            info!("Recorded {} violation(s) on order {}, penalty {}", batch.len(), order_id, total_penalty);
            self.notifier.notify(DomainEvent::ViolationsRecorded {
                order_id,
                provider_id,
                violation_ids: batch.iter().map(|v| v.id).collect(),
                total_penalty,
                timestamp: now.timestamp(),
            });
            return Ok(batch);
        }

        Err(OrderError::Conflict(format!("Order {} is being modified concurrently", order_id)))
    }

    /// Edit a violation until the order's deposit is settled.
    pub async fn update_by_provider(
        &self,
        violation_id: Uuid,
        provider_id: Uuid,
        update: ViolationUpdate,
    ) -> OrderResult<RentalViolation> {
        if let Some(description) = update.description.as_deref() {
            self.check_description(description).await?;
        }

        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut violation = self
                .violations
                .get_violation(violation_id)
                .await?
                .ok_or_else(|| OrderError::NotFound(format!("Violation {}", violation_id)))?;
            if violation.provider_id != provider_id {
                return Err(OrderError::Unauthorized("Only the reporting provider can edit a violation".to_string()));
            }

            let order = self.load_order(violation.order_id).await?;
            let editable = order.status == OrderStatus::Returning || order.status.is_fulfilled();
            if !editable || order.is_deposit_settled() {
                return Err(OrderError::InvalidOperation(
                    "The order is past the point where violations can change".to_string(),
                ));
            }
            let item = order
                .item(violation.order_item_id)
                .ok_or_else(|| OrderError::Internal(format!("Violation {} points at a missing item", violation_id)))?;

            if let Some(kind) = update.violation_type {
                violation.violation_type = kind;
            }
            if let Some(description) = &update.description {
                violation.description = description.trim().to_string();
            }
            if let Some(evidence) = &update.evidence {
                violation.evidence = evidence.clone();
            }
            if let Some(penalty) = update.penalty {
                let others: Vec<RentalViolation> = self
                    .violations
                    .list_for_order(order.id)
                    .await?
                    .into_iter()
                    .filter(|v| v.id != violation_id)
                    .collect();
                let amount = penalty.resolve(item);
                charge(&mut penalty_totals(&others), item, amount)?;
                violation.penalty_amount = amount;
                violation.penalty_percentage = penalty.percentage();
            }
            violation.updated_at = Utc::now();

            if self.violations.update_violation(&violation, order.version).await? {
                info!("Violation {} on order {} updated", violation_id, order.id);
                return Ok(violation);
            }
            warn!("Order {} changed while updating violation {}, retrying", order.id, violation_id);
        }

        Err(OrderError::Conflict(format!("Violation {} is being modified concurrently", violation_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{ContactSnapshot, OrderLine};
    use closet_catalog::{ProductQuote, TransactionKind};
    use closet_core::{BlocklistModerator, MemoryNotifier};
    use closet_shared::Redacted;
    use rust_decimal_macros::dec;

    async fn returning_order(store: &MemoryStore, provider_id: Uuid) -> Order {
        let mut order = Order::new(
            Uuid::new_v4(),
            provider_id,
            ContactSnapshot {
                full_name: "Quynh Do".to_string(),
                phone: Redacted::new("0933444555".to_string()),
                email: None,
                address: Redacted::new("9 Le Loi".to_string()),
            },
            None,
            None,
            vec![OrderLine {
                product_id: Uuid::new_v4(),
                product_name: "Beaded clutch".to_string(),
                kind: TransactionKind::Rental,
                quantity: 2,
                quote: ProductQuote {
                    unit_price: Money::new(dec!(50)),
                    deposit_per_unit: Money::new(dec!(20)),
                    commission_rate: Percentage::new(dec!(10)).unwrap(),
                },
            }],
        );
        order.status = OrderStatus::Returning;
        store.commit_checkout(&order, &[]).await.unwrap();
        order
    }

    fn service(store: &MemoryStore) -> ViolationService {
        ViolationService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(BlocklistModerator::new(vec!["idiot".to_string()])),
            Arc::new(MemoryNotifier::new()),
        )
    }

    fn input(item_id: Uuid, penalty: PenaltyInput) -> ViolationInput {
        ViolationInput {
            order_item_id: item_id,
            violation_type: ViolationType::Stain,
            description: "Wine stain on the lining".to_string(),
            penalty,
            evidence: vec!["https://cdn.example.com/evidence/1.jpg".to_string()],
        }
    }

    #[test]
    fn test_penalty_input_requires_exactly_one() {
        assert!(PenaltyInput::from_parts(None, None).is_err());
        assert!(PenaltyInput::from_parts(Some(dec!(10)), Some(dec!(5))).is_err());
        assert!(matches!(
            PenaltyInput::from_parts(Some(dec!(150)), None),
            Err(OrderError::Validation(_))
        ));
        assert!(matches!(
            PenaltyInput::from_parts(None, Some(dec!(-1))),
            Err(OrderError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn test_percentage_resolves_against_line_deposit() {
        let store = MemoryStore::new();
        let provider = Uuid::new_v4();
        let order = returning_order(&store, provider).await;
        let item_id = order.items[0].id;

        let pct = PenaltyInput::Percentage(Percentage::new(dec!(25)).unwrap());
        let created = service(&store).create_multiple(order.id, provider, vec![input(item_id, pct)]).await.unwrap();
        assert_eq!(created[0].penalty_amount, Money::new(dec!(10)));
        assert_eq!(created[0].penalty_percentage, Some(Percentage::new(dec!(25)).unwrap()));
    }

    #[tokio::test]
    async fn test_batch_over_deposit_persists_nothing() {
        let store = MemoryStore::new();
        let provider = Uuid::new_v4();
        let order = returning_order(&store, provider).await;
        let item_id = order.items[0].id;
        let violations = service(&store);

        let batch = vec![
            input(item_id, PenaltyInput::Amount(Money::new(dec!(25)))),
            input(item_id, PenaltyInput::Amount(Money::new(dec!(20)))),
        ];
        let err = violations.create_multiple(order.id, provider, batch).await.unwrap_err();
        match err {
            OrderError::PenaltyExceedsDeposit { deposit, requested, .. } => {
                assert_eq!(deposit, Money::new(dec!(40)));
                assert_eq!(requested, Money::new(dec!(45)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(violations.list_for_order(order.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cap_counts_earlier_batches() {
        let store = MemoryStore::new();
        let provider = Uuid::new_v4();
        let order = returning_order(&store, provider).await;
        let item_id = order.items[0].id;
        let violations = service(&store);

        violations
            .create_multiple(order.id, provider, vec![input(item_id, PenaltyInput::Amount(Money::new(dec!(40))))])
            .await
            .unwrap();
        let second = violations
            .create_multiple(order.id, provider, vec![input(item_id, PenaltyInput::Amount(Money::new(dec!(0.01))))])
            .await;
        assert!(matches!(second, Err(OrderError::PenaltyExceedsDeposit { .. })));
    }

    #[tokio::test]
    async fn test_wrong_provider_and_state() {
        let store = MemoryStore::new();
        let provider = Uuid::new_v4();
        let order = returning_order(&store, provider).await;
        let item_id = order.items[0].id;
        let violations = service(&store);
        let penalty = PenaltyInput::Amount(Money::new(dec!(5)));

        let result = violations.create_multiple(order.id, Uuid::new_v4(), vec![input(item_id, penalty)]).await;
        assert!(matches!(result, Err(OrderError::Unauthorized(_))));

        let mut in_use = store.get_order(order.id).await.unwrap().unwrap();
        in_use.status = OrderStatus::InUse;
        store.update_order(&in_use, in_use.version).await.unwrap();
        let result = violations.create_multiple(order.id, provider, vec![input(item_id, penalty)]).await;
        assert!(matches!(result, Err(OrderError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_update_respects_owner_and_cap() {
        let store = MemoryStore::new();
        let provider = Uuid::new_v4();
        let order = returning_order(&store, provider).await;
        let item_id = order.items[0].id;
        let violations = service(&store);

        let created = violations
            .create_multiple(order.id, provider, vec![input(item_id, PenaltyInput::Amount(Money::new(dec!(15))))])
            .await
            .unwrap();
        let violation_id = created[0].id;

        let raise = ViolationUpdate {
            penalty: Some(PenaltyInput::Amount(Money::new(dec!(40)))),
            ..Default::default()
        };
        let updated = violations.update_by_provider(violation_id, provider, raise).await.unwrap();
        assert_eq!(updated.penalty_amount, Money::new(dec!(40)));

        let too_much = ViolationUpdate {
            penalty: Some(PenaltyInput::Amount(Money::new(dec!(41)))),
            ..Default::default()
        };
        assert!(matches!(
            violations.update_by_provider(violation_id, provider, too_much).await,
            Err(OrderError::PenaltyExceedsDeposit { .. })
        ));

        let stranger = violations
            .update_by_provider(violation_id, Uuid::new_v4(), ViolationUpdate::default())
            .await;
        assert!(matches!(stranger, Err(OrderError::Unauthorized(_))));

        let rude = ViolationUpdate {
            description: Some("Customer is an idiot".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            violations.update_by_provider(violation_id, provider, rude).await,
            Err(OrderError::Validation(_))
        ));
    }
}

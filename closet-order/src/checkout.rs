use chrono::{NaiveDate, Utc};
use closet_catalog::{release_lines, reserve_lines, CatalogGateway, Product, StockLine, TransactionKind};
use closet_core::{ContentModerator, ModerationVerdict, Notifier};
use closet_shared::{DomainEvent, Money, RentalWindow};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::discount::{allocate_discount, DiscountCode};
use crate::error::{OrderError, OrderResult};
use crate::models::{CartItem, ContactSnapshot, Order, OrderLine};
use crate::repository::{CartRepository, DiscountRepository, OrderRepository};

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub rental_start: Option<NaiveDate>,
    pub rental_end: Option<NaiveDate>,
    pub agreed_to_policy: bool,
    pub contact: ContactSnapshot,
    pub discount_code: Option<String>,
    pub note: Option<String>,
}

/// A provider whose order could not be created. Its cart lines stay in the cart.
#[derive(Debug)]
pub struct ProviderRejection {
    pub provider_id: Uuid,
    pub error: OrderError,
}

#[derive(Debug)]
pub struct CheckoutOutcome {
    pub orders: Vec<Order>,
    pub rejected: Vec<ProviderRejection>,
}

/// Cart lines of one provider, already priced against the catalog.
struct ProviderGroup {
    provider_id: Uuid,
    lines: Vec<(CartItem, Product)>,
}

impl ProviderGroup {
    fn stock_lines(&self) -> Vec<StockLine> {
        self.lines
            .iter()
            .map(|(item, _)| StockLine {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect()
    }

    fn subtotal(&self) -> Money {
        self.lines
            .iter()
            .map(|(item, product)| product.quote(item.kind).unit_price.times(item.quantity))
            .sum()
    }
}

/// Split lines by provider, keeping the order in which providers first appear.
fn partition_by_provider(lines: Vec<(CartItem, Product)>) -> Vec<ProviderGroup> {
    let mut groups: Vec<ProviderGroup> = Vec::new();
    for (item, product) in lines {
        match groups.iter_mut().find(|g| g.provider_id == product.provider_id) {
            Some(group) => group.lines.push((item, product)),
            None => groups.push(ProviderGroup {
                provider_id: product.provider_id,
                lines: vec![(item, product)],
            }),
        }
    }
    groups
}

/// Turns a customer's cart into one pending order per provider.
pub struct CheckoutOrchestrator {
    carts: Arc<dyn CartRepository>,
    orders: Arc<dyn OrderRepository>,
    discounts: Arc<dyn DiscountRepository>,
    catalog: Arc<dyn CatalogGateway>,
    moderator: Arc<dyn ContentModerator>,
    notifier: Arc<dyn Notifier>,
}

impl CheckoutOrchestrator {
    pub fn new(
        carts: Arc<dyn CartRepository>,
        orders: Arc<dyn OrderRepository>,
        discounts: Arc<dyn DiscountRepository>,
        catalog: Arc<dyn CatalogGateway>,
        moderator: Arc<dyn ContentModerator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            carts,
            orders,
            discounts,
            catalog,
            moderator,
            notifier,
        }
    }

    pub async fn checkout(&self, customer_id: Uuid, request: CheckoutRequest) -> OrderResult<CheckoutOutcome> {
        if !request.agreed_to_policy {
            return Err(OrderError::Validation("The rental policy must be accepted".to_string()));
        }
        validate_contact(&request.contact)?;
        let window = match (request.rental_start, request.rental_end) {
            (Some(start), Some(end)) => Some(RentalWindow::new(start, end)?),
            (None, None) => None,
            _ => {
                return Err(OrderError::Validation(
                    "Rental start and end must be given together".to_string(),
                ))
            }
        };
        if let Some(note) = request.note.as_deref() {
            self.moderate("note", note).await?;
        }

        let cart = self.carts.get_cart(customer_id).await?.ok_or(OrderError::EmptyCart)?;
        if cart.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        let mut priced = Vec::with_capacity(cart.items.len());
        for item in cart.items {
            let product = self.price_line(&item, window).await?;
            priced.push((item, product));
        }

        let discount = match request.discount_code.as_deref() {
            Some(code) => {
                let subtotal: Money = priced
                    .iter()
                    .map(|(item, product)| product.quote(item.kind).unit_price.times(item.quantity))
                    .sum();
                Some(self.load_discount(code, subtotal).await?)
            }
            None => None,
        };

        let mut rejected = Vec::new();
        let mut reserved: Vec<ProviderGroup> = Vec::new();
        for group in partition_by_provider(priced) {
            match reserve_lines(self.catalog.as_ref(), &group.stock_lines()).await {
                Ok(()) => reserved.push(group),
                Err(e) => {
                    warn!("Checkout for customer {} skips provider {}: {}", customer_id, group.provider_id, e);
                    rejected.push(ProviderRejection {
                        provider_id: group.provider_id,
                        error: e.into(),
                    });
                }
            }
        }

        // The code is claimed before any order carries its discount.
        let discount = match discount {
            Some(code) if !reserved.is_empty() => match self.discounts.record_redemption(&code.code).await {
                Ok(true) => Some(code),
                Ok(false) => {
                    self.release_groups(&reserved).await;
                    return Err(OrderError::Validation(format!(
                        "Discount code {} has been fully redeemed",
                        code.code
                    )));
                }
                Err(e) => {
                    self.release_groups(&reserved).await;
                    return Err(e.into());
                }
            },
            other => other,
        };

        let shares = match &discount {
            Some(code) => {
                let subtotals: Vec<Money> = reserved.iter().map(ProviderGroup::subtotal).collect();
                let total: Money = subtotals.iter().sum();
                allocate_discount(code.amount_for(total), &subtotals)
            }
            None => vec![Money::ZERO; reserved.len()],
        };

        let mut created = Vec::with_capacity(reserved.len());
        for (group, share) in reserved.into_iter().zip(shares) {
            let stock = group.stock_lines();
            let consumed: Vec<Uuid> = group.lines.iter().map(|(item, _)| item.id).collect();
            let lines = group
                .lines
                .into_iter()
                .map(|(item, product)| OrderLine {
                    product_id: product.id,
                    product_name: product.name.clone(),
                    kind: item.kind,
                    quantity: item.quantity,
                    quote: product.quote(item.kind),
                })
                .collect();

            let mut order = Order::new(
                customer_id,
                group.provider_id,
                request.contact.clone(),
                window,
                request.note.clone(),
                lines,
            );
            if let Some(code) = &discount {
                if share.is_positive() {
                    order.apply_discount(&code.code, share);
                }
            }

            let error = match self.orders.commit_checkout(&order, &consumed).await {
                Ok(true) => {
                    created.push(order);
                    continue;
                }
                Ok(false) => {
                    warn!(
                        "Cart lines of customer {} for provider {} were checked out concurrently",
                        customer_id, group.provider_id
                    );
                    OrderError::Conflict(format!(
                        "Cart lines for provider {} were already checked out",
                        group.provider_id
                    ))
                }
                Err(e) => {
                    error!("Failed to persist order for provider {}: {}", group.provider_id, e);
                    OrderError::from(e)
                }
            };
            release_lines(self.catalog.as_ref(), &stock).await;
            rejected.push(ProviderRejection {
                provider_id: group.provider_id,
                error,
            });
        }

        if created.is_empty() {
            if let Some(code) = &discount {
                if let Err(e) = self.discounts.release_redemption(&code.code).await {
                    error!("Failed to release discount code {}: {}", code.code, e);
                }
            }
            return Err(rejected
                .into_iter()
                .next()
                .map(|r| r.error)
                .unwrap_or(OrderError::EmptyCart));
        }

        for order in &created {
            info!(
                "Order {} placed for provider {} ({} item(s), total {})",
                order.id,
                order.provider_id,
                order.items.len(),
                order.total_amount()
            );
            self.notifier.notify(DomainEvent::OrderPlaced {
                order_id: order.id,
                customer_id,
                provider_id: order.provider_id,
                total: order.total_amount(),
                timestamp: order.created_at.timestamp(),
            });
        }

        Ok(CheckoutOutcome {
            orders: created,
            rejected,
        })
    }

    async fn release_groups(&self, groups: &[ProviderGroup]) {
        for group in groups {
            release_lines(self.catalog.as_ref(), &group.stock_lines()).await;
        }
    }

    async fn price_line(&self, item: &CartItem, window: Option<RentalWindow>) -> OrderResult<Product> {
        if item.quantity == 0 {
            return Err(OrderError::Validation(format!("Cart line {} has no quantity", item.id)));
        }
        let product = self
            .catalog
            .get_product(item.product_id)
            .await?
            .ok_or_else(|| OrderError::Validation(format!("Product {} is no longer in the catalog", item.product_id)))?;
        if !product.allows(item.kind) {
            return Err(OrderError::Validation(format!(
                "{} is not offered for {}",
                product.name,
                item.kind.as_str().to_lowercase()
            )));
        }
        if item.kind == TransactionKind::Rental && window.is_none() {
            return Err(OrderError::Validation("Rental items need a rental window".to_string()));
        }
        Ok(product)
    }

    async fn load_discount(&self, code: &str, cart_subtotal: Money) -> OrderResult<DiscountCode> {
        let discount = self
            .discounts
            .find_discount(code)
            .await?
            .ok_or_else(|| OrderError::Validation(format!("Unknown discount code {}", code)))?;
        discount.ensure_redeemable(cart_subtotal, Utc::now())?;
        Ok(discount)
    }

    async fn moderate(&self, field: &str, text: &str) -> OrderResult<()> {
        match self.moderator.check(field, text).await? {
            ModerationVerdict::Pass => Ok(()),
            ModerationVerdict::Reject(reason) => Err(OrderError::Validation(reason)),
        }
    }
}

fn validate_contact(contact: &ContactSnapshot) -> OrderResult<()> {
    if contact.full_name.trim().is_empty() {
        return Err(OrderError::Validation("Recipient name is required".to_string()));
    }
    if contact.phone.expose().trim().is_empty() {
        return Err(OrderError::Validation("Recipient phone is required".to_string()));
    }
    if contact.address.expose().trim().is_empty() {
        return Err(OrderError::Validation("Shipping address is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::Cart;
    use closet_catalog::InMemoryCatalog;
    use closet_core::{BlocklistModerator, MemoryNotifier};
    use closet_shared::{Percentage, Redacted};
    use rust_decimal_macros::dec;

    fn product(provider_id: Uuid, sale: Money, rental: Money, deposit: Money, stock: u32) -> Product {
        Product {
            id: Uuid::new_v4(),
            provider_id,
            name: "Cocktail dress".to_string(),
            sale_price: sale,
            rental_price: rental,
            deposit_per_unit: deposit,
            commission_rate: Percentage::new(dec!(10)).unwrap(),
            stock,
            is_active: true,
        }
    }

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            rental_start: NaiveDate::from_ymd_opt(2025, 6, 1),
            rental_end: NaiveDate::from_ymd_opt(2025, 6, 4),
            agreed_to_policy: true,
            contact: ContactSnapshot {
                full_name: "Bao Le".to_string(),
                phone: Redacted::new("0903111222".to_string()),
                email: None,
                address: Redacted::new("1 Dong Khoi".to_string()),
            },
            discount_code: None,
            note: None,
        }
    }

    fn orchestrator(store: &MemoryStore, catalog: Arc<InMemoryCatalog>) -> CheckoutOrchestrator {
        CheckoutOrchestrator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            catalog,
            Arc::new(BlocklistModerator::new(vec!["scam".to_string()])),
            Arc::new(MemoryNotifier::new()),
        )
    }

    #[test]
    fn test_partition_keeps_first_appearance_order() {
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let a = product(p1, Money::new(dec!(10)), Money::ZERO, Money::ZERO, 1);
        let b = product(p2, Money::new(dec!(10)), Money::ZERO, Money::ZERO, 1);
        let c = product(p1, Money::new(dec!(10)), Money::ZERO, Money::ZERO, 1);
        let lines = vec![a, b, c]
            .into_iter()
            .map(|p| (CartItem::new(p.id, 1, TransactionKind::Purchase), p))
            .collect();

        let groups = partition_by_provider(lines);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].provider_id, p1);
        assert_eq!(groups[0].lines.len(), 2);
        assert_eq!(groups[1].provider_id, p2);
    }

    #[tokio::test]
    async fn test_policy_and_window_validation() {
        let store = MemoryStore::new();
        let checkout = orchestrator(&store, Arc::new(InMemoryCatalog::new()));
        let customer = Uuid::new_v4();

        let mut req = request();
        req.agreed_to_policy = false;
        assert!(matches!(checkout.checkout(customer, req).await, Err(OrderError::Validation(_))));

        let mut req = request();
        req.rental_end = req.rental_start;
        assert!(matches!(checkout.checkout(customer, req).await, Err(OrderError::Validation(_))));

        assert!(matches!(checkout.checkout(customer, request()).await, Err(OrderError::EmptyCart)));

        store.save_cart(&Cart::new(customer)).await.unwrap();
        assert!(matches!(checkout.checkout(customer, request()).await, Err(OrderError::EmptyCart)));
    }

    #[tokio::test]
    async fn test_moderated_note_is_rejected() {
        let store = MemoryStore::new();
        let checkout = orchestrator(&store, Arc::new(InMemoryCatalog::new()));
        let mut req = request();
        req.note = Some("this is a SCAM".to_string());
        assert!(matches!(checkout.checkout(Uuid::new_v4(), req).await, Err(OrderError::Validation(_))));
    }

    #[tokio::test]
    async fn test_rental_needs_window() {
        let store = MemoryStore::new();
        let catalog = Arc::new(InMemoryCatalog::new());
        let p = product(Uuid::new_v4(), Money::ZERO, Money::new(dec!(40)), Money::new(dec!(60)), 2);
        catalog.upsert(p.clone()).await;

        let customer = Uuid::new_v4();
        let mut cart = Cart::new(customer);
        cart.add_item(CartItem::new(p.id, 1, TransactionKind::Rental));
        store.save_cart(&cart).await.unwrap();

        let mut req = request();
        req.rental_start = None;
        req.rental_end = None;
        let checkout = orchestrator(&store, catalog.clone());
        assert!(matches!(checkout.checkout(customer, req).await, Err(OrderError::Validation(_))));
        assert_eq!(catalog.stock_of(p.id).await, Some(2));
    }

    #[tokio::test]
    async fn test_discount_split_across_providers() {
        let store = MemoryStore::new();
        let catalog = Arc::new(InMemoryCatalog::new());
        let a = product(Uuid::new_v4(), Money::new(dec!(300)), Money::ZERO, Money::ZERO, 5);
        let b = product(Uuid::new_v4(), Money::new(dec!(100)), Money::ZERO, Money::ZERO, 5);
        catalog.upsert(a.clone()).await;
        catalog.upsert(b.clone()).await;
        store
            .insert_discount(DiscountCode {
                code: "WELCOME".to_string(),
                kind: crate::discount::DiscountKind::Fixed(Money::new(dec!(40))),
                max_discount: None,
                min_subtotal: Some(Money::new(dec!(100))),
                starts_at: None,
                ends_at: None,
                usage_limit: Some(1),
                times_used: 0,
                is_active: true,
            })
            .await;

        let customer = Uuid::new_v4();
        let mut cart = Cart::new(customer);
        cart.add_item(CartItem::new(a.id, 1, TransactionKind::Purchase));
        cart.add_item(CartItem::new(b.id, 1, TransactionKind::Purchase));
        store.save_cart(&cart).await.unwrap();

        let mut req = request();
        req.discount_code = Some("WELCOME".to_string());
        let outcome = orchestrator(&store, catalog).checkout(customer, req).await.unwrap();

        assert_eq!(outcome.orders.len(), 2);
        assert_eq!(outcome.orders[0].discount_amount, Money::new(dec!(30)));
        assert_eq!(outcome.orders[1].discount_amount, Money::new(dec!(10)));
        assert_eq!(outcome.orders[0].total_amount(), Money::new(dec!(270)));
        assert_eq!(store.discount_usage("WELCOME").await, Some(1));
    }
}

use closet_catalog::{CatalogGateway, InMemoryCatalog};
use closet_core::{ContentModerator, Notifier, PaymentGateway};
use closet_order::{
    CartRepository, CheckoutOrchestrator, DiscountRepository, FinancialManager, MemoryStore, OrderManager,
    OrderRepository, PaymentOrchestrator, PayoutRepository, SettlementService, TransactionRepository,
    ViolationRepository, ViolationService,
};
use closet_store::app_config::BusinessRules;
use closet_store::RateLimiter;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

/// Persistence adapters the services are wired over.
#[derive(Clone)]
pub struct Backends {
    pub carts: Arc<dyn CartRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub violations: Arc<dyn ViolationRepository>,
    pub payouts: Arc<dyn PayoutRepository>,
    pub discounts: Arc<dyn DiscountRepository>,
    pub catalog: Arc<dyn CatalogGateway>,
}

impl Backends {
    /// Every repository backed by one in-memory store. Local runs and tests.
    pub fn in_memory(store: &MemoryStore, catalog: Arc<InMemoryCatalog>) -> Self {
        Self {
            carts: Arc::new(store.clone()),
            orders: Arc::new(store.clone()),
            transactions: Arc::new(store.clone()),
            violations: Arc::new(store.clone()),
            payouts: Arc::new(store.clone()),
            discounts: Arc::new(store.clone()),
            catalog,
        }
    }
}

/// External collaborators: payment gateway, moderation, notifications, throttling.
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn PaymentGateway>,
    pub moderator: Arc<dyn ContentModerator>,
    pub notifier: Arc<dyn Notifier>,
    pub rate_limiter: Arc<dyn RateLimiter>,
}

#[derive(Clone)]
pub struct AppState {
    pub carts: Arc<dyn CartRepository>,
    pub catalog: Arc<dyn CatalogGateway>,
    pub checkout: Arc<CheckoutOrchestrator>,
    pub orders: Arc<OrderManager>,
    pub payments: Arc<PaymentOrchestrator>,
    pub violations: Arc<ViolationService>,
    pub settlement: Arc<SettlementService>,
    pub finance: Arc<FinancialManager>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
}

impl AppState {
    pub fn new(backends: Backends, collaborators: Collaborators, auth: AuthConfig, business_rules: BusinessRules) -> Self {
        let Backends {
            carts,
            orders,
            transactions,
            violations,
            payouts,
            discounts,
            catalog,
        } = backends;
        let Collaborators {
            gateway,
            moderator,
            notifier,
            rate_limiter,
        } = collaborators;

        let checkout = CheckoutOrchestrator::new(
            carts.clone(),
            orders.clone(),
            discounts,
            catalog.clone(),
            moderator.clone(),
            notifier.clone(),
        );
        let manager = OrderManager::new(orders.clone(), transactions.clone(), catalog.clone(), notifier.clone());
        let payments = PaymentOrchestrator::new(orders.clone(), transactions, gateway, notifier.clone());
        let violation_service = ViolationService::new(orders.clone(), violations.clone(), moderator, notifier.clone());
        let settlement = SettlementService::new(orders.clone(), violations, notifier.clone());
        let finance = FinancialManager::new(orders, payouts, notifier, business_rules.payout_rules());

        Self {
            carts,
            catalog,
            checkout: Arc::new(checkout),
            orders: Arc::new(manager),
            payments: Arc::new(payments),
            violations: Arc::new(violation_service),
            settlement: Arc::new(settlement),
            finance: Arc::new(finance),
            rate_limiter,
            auth,
            business_rules,
        }
    }
}

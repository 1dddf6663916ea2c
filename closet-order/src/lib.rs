pub mod checkout;
pub mod discount;
pub mod error;
pub mod finance;
pub mod manager;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod repository;
pub mod settlement;
pub mod violations;

pub use checkout::{CheckoutOrchestrator, CheckoutOutcome, CheckoutRequest, ProviderRejection};
pub use discount::{DiscountCode, DiscountKind};
pub use error::{OrderError, OrderResult};
pub use finance::{FinancialManager, PayoutRules, PayoutSummary};
pub use manager::{OrderAction, OrderManager, TransitionOutcome};
pub use memory::MemoryStore;
pub use models::*;
pub use orchestrator::{CallbackAck, PaymentLink, PaymentOrchestrator};
pub use repository::{
    CartRepository, DiscountRepository, OrderRepository, PayoutRepository, TransactionRepository,
    ViolationRepository,
};
pub use settlement::{DepositStatement, SettlementService};
pub use violations::{PenaltyInput, ViolationInput, ViolationService, ViolationUpdate};

/// Attempts made at an optimistic write before giving up with `Conflict`.
pub(crate) const MAX_CAS_ATTEMPTS: usize = 3;

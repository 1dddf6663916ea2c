pub mod models;
pub mod money;
pub mod pii;

pub use models::events::DomainEvent;
pub use money::{LedgerError, Money, Percentage, RentalWindow};
pub use pii::Redacted;

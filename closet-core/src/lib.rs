pub mod moderation;
pub mod notification;
pub mod payment;

pub use moderation::{BlocklistModerator, ContentModerator, ModerationVerdict};
pub use notification::{run_dispatcher, EventSink, LogSink, MemoryNotifier, Notifier, OutboxNotifier};
pub use payment::{
    GatewayOutcome, GatewaySettings, PaymentGateway, PaymentRequest, SignedUrlGateway, VerifiedCallback,
};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Invalid gateway signature")]
    InvalidSignature,
    #[error("Gateway error: {0}")]
    GatewayError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Failure reported by a persistence adapter.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage backend failure: {0}")]
    Backend(String),
    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

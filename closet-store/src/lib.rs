pub mod app_config;
pub mod cart_repo;
pub mod catalog_repo;
pub mod database;
pub mod discount_repo;
#[cfg(feature = "kafka")]
pub mod events;
pub mod order_repo;
pub mod payment_repo;
pub mod payout_repo;
pub mod redis_repo;

pub use app_config::Config;
pub use cart_repo::PgCartRepository;
pub use catalog_repo::PgCatalog;
pub use database::DbClient;
pub use discount_repo::PgDiscountRepository;
#[cfg(feature = "kafka")]
pub use events::EventProducer;
pub use order_repo::PgOrderRepository;
pub use payment_repo::PgTransactionRepository;
pub use payout_repo::PgPayoutRepository;
pub use redis_repo::{NoopRateLimiter, RateLimiter, RedisClient};

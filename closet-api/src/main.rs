use anyhow::Context;
use closet_api::state::{AppState, AuthConfig, Backends, Collaborators};
use closet_api::{app, worker};
use closet_core::{BlocklistModerator, EventSink, OutboxNotifier, SignedUrlGateway};
use closet_store::{
    Config, DbClient, PgCartRepository, PgCatalog, PgDiscountRepository, PgOrderRepository, PgPayoutRepository,
    PgTransactionRepository, RedisClient,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const OUTBOX_CAPACITY: usize = 1024;

#[cfg(feature = "kafka")]
fn event_sink(config: &Config) -> anyhow::Result<Arc<dyn EventSink>> {
    let producer = closet_store::EventProducer::new(&config.kafka).context("Failed to create Kafka producer")?;
    Ok(Arc::new(producer))
}

#[cfg(not(feature = "kafka"))]
fn event_sink(_config: &Config) -> anyhow::Result<Arc<dyn EventSink>> {
    Ok(Arc::new(closet_core::LogSink))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "closet_api=debug,closet_order=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Closet API on port {}", config.server.port);

    let db = DbClient::new(&config.database).await.context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    let pool = db.pool.clone();

    let redis = RedisClient::new(&config.redis.url).await.context("Failed to connect to Redis")?;

    let (notifier, outbox) = OutboxNotifier::channel(OUTBOX_CAPACITY);
    worker::spawn_notification_dispatcher(outbox, event_sink(&config)?);

    let default_commission = config
        .business_rules
        .default_commission()
        .context("business_rules.default_commission_rate is out of range")?;

    let backends = Backends {
        carts: Arc::new(PgCartRepository::new(pool.clone())),
        orders: Arc::new(PgOrderRepository::new(pool.clone())),
        transactions: Arc::new(PgTransactionRepository::new(pool.clone())),
        violations: Arc::new(PgOrderRepository::new(pool.clone())),
        payouts: Arc::new(PgPayoutRepository::new(pool.clone())),
        discounts: Arc::new(PgDiscountRepository::new(pool.clone())),
        catalog: Arc::new(PgCatalog::new(pool, default_commission)),
    };
    let collaborators = Collaborators {
        gateway: Arc::new(SignedUrlGateway::new(config.gateway.clone())),
        moderator: Arc::new(BlocklistModerator::new(config.moderation.blocked_terms.clone())),
        notifier: Arc::new(notifier),
        rate_limiter: Arc::new(redis),
    };
    let auth = AuthConfig {
        secret: config.auth.jwt_secret.clone(),
        expiration: config.auth.jwt_expiration_seconds,
    };

    let app_state = AppState::new(backends, collaborators, auth, config.business_rules.clone());

    worker::spawn_stale_transaction_sweeper(
        app_state.payments.clone(),
        config.business_rules.transaction_ttl(),
        Duration::from_secs(config.business_rules.sweep_interval_seconds.max(1)),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(app_state)).await?;
    Ok(())
}

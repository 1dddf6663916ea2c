use async_trait::async_trait;
use redis::RedisResult;
use tracing::warn;

/// Fixed-window request counter keyed by caller.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// `true` while `key` has made at most `limit` calls in the current window.
    async fn allow(&self, key: &str, limit: i64, window_seconds: i64) -> bool;
}

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, window_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count <= limit)
    }
}

#[async_trait]
impl RateLimiter for RedisClient {
    async fn allow(&self, key: &str, limit: i64, window_seconds: i64) -> bool {
        match self.check_rate_limit(&format!("ratelimit:{}", key), limit, window_seconds).await {
            Ok(allowed) => allowed,
            Err(e) => {
                // Fail open
                warn!("Rate limiter unavailable, allowing request: {}", e);
                true
            }
        }
    }
}

/// Limiter that never refuses. Used when Redis is not configured and in tests.
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn allow(&self, _key: &str, _limit: i64, _window_seconds: i64) -> bool {
        true
    }
}

use closet_core::StoreError;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::app_config::DatabaseConfig;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

pub(crate) fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Parse a stored enum label, reporting the row as corrupt when it is unknown.
pub(crate) fn parse_label<T>(column: &str, raw: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>()
        .map_err(|e| StoreError::Corrupt(format!("{}: {}", column, e)))
}

pub(crate) fn to_count(column: &str, raw: i32) -> Result<u32, StoreError> {
    u32::try_from(raw).map_err(|_| StoreError::Corrupt(format!("{} is negative: {}", column, raw)))
}

pub(crate) fn from_count(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use closet_order::OrderStatus;

    #[test]
    fn test_unknown_labels_are_corrupt() {
        let status: OrderStatus = parse_label("status", "IN_USE").unwrap();
        assert_eq!(status, OrderStatus::InUse);

        let err = parse_label::<OrderStatus>("status", "LOST_IN_MAIL").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(msg) if msg.contains("LOST_IN_MAIL")));
    }

    #[test]
    fn test_counts_reject_negative_values() {
        assert_eq!(to_count("stock", 4).unwrap(), 4);
        assert!(to_count("stock", -1).is_err());
        assert_eq!(from_count(u32::MAX), i32::MAX);
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use closet_core::{StoreError, StoreResult};
use closet_order::{DiscountCode, DiscountKind, DiscountRepository};
use closet_shared::{Money, Percentage};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::database::{backend, to_count};

pub struct PgDiscountRepository {
    pool: PgPool,
}

impl PgDiscountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DiscountRow {
    code: String,
    kind: String,
    value: Decimal,
    max_discount: Option<Decimal>,
    min_subtotal: Option<Decimal>,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    usage_limit: Option<i32>,
    times_used: i32,
    is_active: bool,
}

impl TryFrom<DiscountRow> for DiscountCode {
    type Error = StoreError;

    fn try_from(row: DiscountRow) -> Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "PERCENTAGE" => DiscountKind::Percentage(
                Percentage::new(row.value).map_err(|e| StoreError::Corrupt(format!("discount_codes.value: {}", e)))?,
            ),
            "FIXED" => DiscountKind::Fixed(Money::new(row.value)),
            other => return Err(StoreError::Corrupt(format!("discount_codes.kind: {}", other))),
        };

        Ok(DiscountCode {
            code: row.code,
            kind,
            max_discount: row.max_discount.map(Money::new),
            min_subtotal: row.min_subtotal.map(Money::new),
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            usage_limit: row
                .usage_limit
                .map(|limit| to_count("discount_codes.usage_limit", limit))
                .transpose()?,
            times_used: to_count("discount_codes.times_used", row.times_used)?,
            is_active: row.is_active,
        })
    }
}

#[async_trait]
impl DiscountRepository for PgDiscountRepository {
    async fn find_discount(&self, code: &str) -> StoreResult<Option<DiscountCode>> {
        let row = sqlx::query_as::<_, DiscountRow>(
            r#"
            SELECT code, kind, value, max_discount, min_subtotal, starts_at, ends_at,
                   usage_limit, times_used, is_active
            FROM discount_codes
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(DiscountCode::try_from).transpose()
    }

    async fn record_redemption(&self, code: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE discount_codes
            SET times_used = times_used + 1
            WHERE code = $1 AND (usage_limit IS NULL OR times_used < usage_limit)
            "#,
        )
        .bind(code)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_redemption(&self, code: &str) -> StoreResult<()> {
        sqlx::query("UPDATE discount_codes SET times_used = times_used - 1 WHERE code = $1 AND times_used > 0")
            .bind(code)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

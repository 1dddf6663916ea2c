use async_trait::async_trait;
use closet_catalog::{CatalogGateway, InventoryError, Product};
use closet_shared::{Money, Percentage};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::from_count;

/// Postgres view of the product table. Stock moves are single conditional
/// updates, so two checkouts can never both take the last unit.
pub struct PgCatalog {
    pool: PgPool,
    default_commission: Percentage,
}

impl PgCatalog {
    pub fn new(pool: PgPool, default_commission: Percentage) -> Self {
        Self {
            pool,
            default_commission,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    provider_id: Uuid,
    name: String,
    sale_price: Decimal,
    rental_price: Decimal,
    deposit_per_unit: Decimal,
    commission_rate: Option<Decimal>,
    stock: i32,
    is_active: bool,
}

impl ProductRow {
    fn into_product(self, default_commission: Percentage) -> Result<Product, InventoryError> {
        let commission_rate = match self.commission_rate {
            Some(rate) => Percentage::new(rate).map_err(|e| InventoryError::Backend(e.to_string()))?,
            None => default_commission,
        };
        Ok(Product {
            id: self.id,
            provider_id: self.provider_id,
            name: self.name,
            sale_price: Money::new(self.sale_price),
            rental_price: Money::new(self.rental_price),
            deposit_per_unit: Money::new(self.deposit_per_unit),
            commission_rate,
            stock: u32::try_from(self.stock).unwrap_or(0),
            is_active: self.is_active,
        })
    }
}

fn backend(e: sqlx::Error) -> InventoryError {
    InventoryError::Backend(e.to_string())
}

#[async_trait]
impl CatalogGateway for PgCatalog {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, InventoryError> {
        let row = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT id, provider_id, name, sale_price, rental_price, deposit_per_unit,
                   commission_rate, stock, is_active
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(|r| r.into_product(self.default_commission)).transpose()
    }

    async fn decrement_stock(&self, product_id: Uuid, quantity: u32) -> Result<u32, InventoryError> {
        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock = stock - $2, updated_at = NOW()
            WHERE id = $1 AND is_active AND stock >= $2
            RETURNING stock
            "#,
        )
        .bind(product_id)
        .bind(from_count(quantity))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        if let Some(stock) = remaining {
            return Ok(u32::try_from(stock).unwrap_or(0));
        }

        // Work out why the guarded update matched nothing
        match self.get_product(product_id).await? {
            None => Err(InventoryError::NotFound(product_id)),
            Some(p) if !p.is_active => Err(InventoryError::Inactive(product_id)),
            Some(p) => Err(InventoryError::InsufficientStock {
                product_id,
                requested: quantity,
                available: p.stock,
            }),
        }
    }

    async fn restore_stock(&self, product_id: Uuid, quantity: u32) -> Result<(), InventoryError> {
        let result = sqlx::query("UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1")
            .bind(product_id)
            .bind(from_count(quantity))
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(InventoryError::NotFound(product_id));
        }
        Ok(())
    }
}

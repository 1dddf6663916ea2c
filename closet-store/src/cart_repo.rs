use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use closet_core::StoreResult;
use closet_order::{Cart, CartItem, CartRepository};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::{backend, from_count, parse_label, to_count};

pub struct PgCartRepository {
    pool: PgPool,
}

impl PgCartRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CartRow {
    id: Uuid,
    customer_id: Uuid,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CartItemRow {
    id: Uuid,
    product_id: Uuid,
    quantity: i32,
    kind: String,
    rental_start: Option<NaiveDate>,
    rental_end: Option<NaiveDate>,
    added_at: DateTime<Utc>,
}

impl TryFrom<CartItemRow> for CartItem {
    type Error = closet_core::StoreError;

    fn try_from(row: CartItemRow) -> Result<Self, Self::Error> {
        Ok(CartItem {
            id: row.id,
            product_id: row.product_id,
            quantity: to_count("cart_items.quantity", row.quantity)?,
            kind: parse_label("cart_items.kind", &row.kind)?,
            rental_start: row.rental_start,
            rental_end: row.rental_end,
            added_at: row.added_at,
        })
    }
}

#[async_trait]
impl CartRepository for PgCartRepository {
    async fn get_cart(&self, customer_id: Uuid) -> StoreResult<Option<Cart>> {
        let row = sqlx::query_as::<_, CartRow>("SELECT id, customer_id, updated_at FROM carts WHERE customer_id = $1")
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, CartItemRow>(
            r#"
            SELECT id, product_id, quantity, kind, rental_start, rental_end, added_at
            FROM cart_items
            WHERE cart_id = $1
            ORDER BY added_at, id
            "#,
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(CartItem::try_from)
        .collect::<StoreResult<Vec<_>>>()?;

        Ok(Some(Cart {
            id: row.id,
            customer_id: row.customer_id,
            items,
            updated_at: row.updated_at,
        }))
    }

    async fn save_cart(&self, cart: &Cart) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // A customer owns exactly one cart row; keep whichever id came first
        let cart_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO carts (id, customer_id, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (customer_id) DO UPDATE SET updated_at = EXCLUDED.updated_at
            RETURNING id
            "#,
        )
        .bind(cart.id)
        .bind(cart.customer_id)
        .bind(cart.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        for item in &cart.items {
            sqlx::query(
                r#"
                INSERT INTO cart_items (id, cart_id, product_id, quantity, kind, rental_start, rental_end, added_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.id)
            .bind(cart_id)
            .bind(item.product_id)
            .bind(from_count(item.quantity))
            .bind(item.kind.as_str())
            .bind(item.rental_start)
            .bind(item.rental_end)
            .bind(item.added_at)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)
    }
}

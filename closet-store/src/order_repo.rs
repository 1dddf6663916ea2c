use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use closet_core::{StoreError, StoreResult};
use closet_order::{
    ContactSnapshot, DepositSettlement, Order, OrderItem, OrderRepository, OrderStatus, OrderTimeline,
    RentalViolation, ViolationRepository,
};
use closet_shared::{Money, Percentage, Redacted, RentalWindow};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use crate::database::{backend, from_count, parse_label, to_count};

/// Orders, their items and the violations recorded against them. Every write
/// after checkout is guarded by the order's `version` column.
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_items(&self, order_ids: &[Uuid]) -> StoreResult<HashMap<Uuid, Vec<OrderItem>>> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT id, order_id, product_id, product_name, kind, quantity, unit_price,
                   deposit_per_unit, commission_rate, commission_amount, created_at
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY created_at, id
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut grouped: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            let item = OrderItem::try_from(row)?;
            grouped.entry(item.order_id).or_default().push(item);
        }
        Ok(grouped)
    }

    async fn hydrate(&self, rows: Vec<OrderRow>) -> StoreResult<Vec<Order>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut items = self.load_items(&ids).await?;
        rows.into_iter()
            .map(|row| {
                let lines = items.remove(&row.id).unwrap_or_default();
                row.into_order(lines)
            })
            .collect()
    }

    async fn fetch_orders(&self, filter: &str, id: Uuid) -> StoreResult<Vec<Order>> {
        let sql = format!("{} WHERE {} = $1 ORDER BY created_at DESC", SELECT_ORDER, filter);
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        self.hydrate(rows).await
    }
}

const SELECT_ORDER: &str = r#"
    SELECT id, customer_id, provider_id, status, subtotal, discount_amount, discount_code,
           total_deposit, rental_start, rental_end, contact_name, contact_phone, contact_email,
           contact_address, note, approved_at, shipped_at, delivered_at, returning_at,
           returned_at, cancelled_at, refund_status, deposit_refunded, deposit_withheld,
           deposit_settled_at, version, created_at, updated_at
    FROM orders
"#;

/// Column stamped when an order enters `status`.
pub(crate) fn timeline_column(status: OrderStatus) -> Option<&'static str> {
    match status {
        OrderStatus::Pending => None,
        OrderStatus::Approved => Some("approved_at"),
        OrderStatus::InTransit => Some("shipped_at"),
        OrderStatus::InUse => Some("delivered_at"),
        OrderStatus::Returning => Some("returning_at"),
        OrderStatus::Returned | OrderStatus::ReturnedWithIssue => Some("returned_at"),
        OrderStatus::Cancelled => Some("cancelled_at"),
    }
}

/// Bump the order version if it still equals `expected`.
async fn claim_order_version(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
    expected: i64,
) -> StoreResult<bool> {
    let result = sqlx::query("UPDATE orders SET version = version + 1, updated_at = NOW() WHERE id = $1 AND version = $2")
        .bind(order_id)
        .bind(expected)
        .execute(&mut **tx)
        .await
        .map_err(backend)?;
    Ok(result.rows_affected() == 1)
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    customer_id: Uuid,
    provider_id: Uuid,
    status: String,
    subtotal: Decimal,
    discount_amount: Decimal,
    discount_code: Option<String>,
    total_deposit: Decimal,
    rental_start: Option<NaiveDate>,
    rental_end: Option<NaiveDate>,
    contact_name: String,
    contact_phone: String,
    contact_email: Option<String>,
    contact_address: String,
    note: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    returning_at: Option<DateTime<Utc>>,
    returned_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    refund_status: String,
    deposit_refunded: Option<Decimal>,
    deposit_withheld: Option<Decimal>,
    deposit_settled_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> StoreResult<Order> {
        let rental_window = match (self.rental_start, self.rental_end) {
            (Some(start), Some(end)) => Some(
                RentalWindow::new(start, end).map_err(|e| StoreError::Corrupt(format!("orders.rental_window: {}", e)))?,
            ),
            _ => None,
        };

        let deposit_settlement = match (self.deposit_refunded, self.deposit_withheld, self.deposit_settled_at) {
            (Some(refunded), Some(withheld), Some(settled_at)) => Some(DepositSettlement {
                refunded: Money::new(refunded),
                withheld: Money::new(withheld),
                settled_at,
            }),
            _ => None,
        };

        Ok(Order {
            id: self.id,
            customer_id: self.customer_id,
            provider_id: self.provider_id,
            status: parse_label("orders.status", &self.status)?,
            items,
            subtotal: Money::new(self.subtotal),
            discount_amount: Money::new(self.discount_amount),
            discount_code: self.discount_code,
            total_deposit: Money::new(self.total_deposit),
            rental_window,
            contact: ContactSnapshot {
                full_name: self.contact_name,
                phone: Redacted::new(self.contact_phone),
                email: self.contact_email.map(Redacted::new),
                address: Redacted::new(self.contact_address),
            },
            note: self.note,
            timeline: OrderTimeline {
                approved_at: self.approved_at,
                shipped_at: self.shipped_at,
                delivered_at: self.delivered_at,
                returning_at: self.returning_at,
                returned_at: self.returned_at,
                cancelled_at: self.cancelled_at,
            },
            refund_status: parse_label("orders.refund_status", &self.refund_status)?,
            deposit_settlement,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    product_name: String,
    kind: String,
    quantity: i32,
    unit_price: Decimal,
    deposit_per_unit: Decimal,
    commission_rate: Decimal,
    commission_amount: Decimal,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = StoreError;

    fn try_from(row: OrderItemRow) -> Result<Self, Self::Error> {
        Ok(OrderItem {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            product_name: row.product_name,
            kind: parse_label("order_items.kind", &row.kind)?,
            quantity: to_count("order_items.quantity", row.quantity)?,
            unit_price: Money::new(row.unit_price),
            deposit_per_unit: Money::new(row.deposit_per_unit),
            commission_rate: Percentage::new(row.commission_rate)
                .map_err(|e| StoreError::Corrupt(format!("order_items.commission_rate: {}", e)))?,
            commission_amount: Money::new(row.commission_amount),
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ViolationRow {
    id: Uuid,
    order_id: Uuid,
    order_item_id: Uuid,
    provider_id: Uuid,
    violation_type: String,
    description: String,
    penalty_percentage: Option<Decimal>,
    penalty_amount: Decimal,
    evidence: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ViolationRow> for RentalViolation {
    type Error = StoreError;

    fn try_from(row: ViolationRow) -> Result<Self, Self::Error> {
        let penalty_percentage = row
            .penalty_percentage
            .map(Percentage::new)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("rental_violations.penalty_percentage: {}", e)))?;

        Ok(RentalViolation {
            id: row.id,
            order_id: row.order_id,
            order_item_id: row.order_item_id,
            provider_id: row.provider_id,
            violation_type: parse_label("rental_violations.violation_type", &row.violation_type)?,
            description: row.description,
            penalty_percentage,
            penalty_amount: Money::new(row.penalty_amount),
            evidence: row.evidence,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_VIOLATION: &str = r#"
    SELECT id, order_id, order_item_id, provider_id, violation_type, description,
           penalty_percentage, penalty_amount, evidence, created_at, updated_at
    FROM rental_violations
"#;

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn commit_checkout(&self, order: &Order, consumed_cart_items: &[Uuid]) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // A concurrent checkout of the same lines blocks on these rows and
        // then finds them gone.
        if !consumed_cart_items.is_empty() {
            let removed = sqlx::query(
                r#"
                DELETE FROM cart_items
                WHERE id = ANY($1)
                  AND cart_id IN (SELECT id FROM carts WHERE customer_id = $2)
                "#,
            )
            .bind(consumed_cart_items)
            .bind(order.customer_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?
            .rows_affected();

            if removed != consumed_cart_items.len() as u64 {
                tx.rollback().await.map_err(backend)?;
                return Ok(false);
            }

            sqlx::query("UPDATE carts SET updated_at = NOW() WHERE customer_id = $1")
                .bind(order.customer_id)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, customer_id, provider_id, status, subtotal, discount_amount, discount_code,
                total_deposit, rental_start, rental_end, contact_name, contact_phone, contact_email,
                contact_address, note, refund_status, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(order.id)
        .bind(order.customer_id)
        .bind(order.provider_id)
        .bind(order.status.as_str())
        .bind(order.subtotal.amount())
        .bind(order.discount_amount.amount())
        .bind(order.discount_code.as_deref())
        .bind(order.total_deposit.amount())
        .bind(order.rental_window.map(|w| w.start))
        .bind(order.rental_window.map(|w| w.end))
        .bind(&order.contact.full_name)
        .bind(order.contact.phone.expose())
        .bind(order.contact.email.as_ref().map(|e| e.expose().clone()))
        .bind(order.contact.address.expose())
        .bind(order.note.as_deref())
        .bind(order.refund_status.as_str())
        .bind(order.version)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    id, order_id, product_id, product_name, kind, quantity, unit_price,
                    deposit_per_unit, commission_rate, commission_amount, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(item.id)
            .bind(order.id)
            .bind(item.product_id)
            .bind(&item.product_name)
            .bind(item.kind.as_str())
            .bind(from_count(item.quantity))
            .bind(item.unit_price.amount())
            .bind(item.deposit_per_unit.amount())
            .bind(item.commission_rate.value())
            .bind(item.commission_amount.amount())
            .bind(item.created_at)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(true)
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.fetch_orders("id", id).await?.into_iter().next())
    }

    async fn get_orders(&self, ids: &[Uuid]) -> StoreResult<Vec<Order>> {
        let sql = format!("{} WHERE id = ANY($1)", SELECT_ORDER);
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        self.hydrate(rows).await
    }

    async fn list_customer_orders(&self, customer_id: Uuid) -> StoreResult<Vec<Order>> {
        self.fetch_orders("customer_id", customer_id).await
    }

    async fn list_provider_orders(&self, provider_id: Uuid) -> StoreResult<Vec<Order>> {
        self.fetch_orders("provider_id", provider_id).await
    }

    async fn update_order(&self, order: &Order, expected_version: i64) -> StoreResult<bool> {
        let settlement = order.deposit_settlement;
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3,
                approved_at = $4,
                shipped_at = $5,
                delivered_at = $6,
                returning_at = $7,
                returned_at = $8,
                cancelled_at = $9,
                refund_status = $10,
                deposit_refunded = $11,
                deposit_withheld = $12,
                deposit_settled_at = $13,
                updated_at = $14,
                version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(order.id)
        .bind(expected_version)
        .bind(order.status.as_str())
        .bind(order.timeline.approved_at)
        .bind(order.timeline.shipped_at)
        .bind(order.timeline.delivered_at)
        .bind(order.timeline.returning_at)
        .bind(order.timeline.returned_at)
        .bind(order.timeline.cancelled_at)
        .bind(order.refund_status.as_str())
        .bind(settlement.map(|s| s.refunded.amount()))
        .bind(settlement.map(|s| s.withheld.amount()))
        .bind(settlement.map(|s| s.settled_at))
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ViolationRepository for PgOrderRepository {
    async fn list_for_order(&self, order_id: Uuid) -> StoreResult<Vec<RentalViolation>> {
        let sql = format!("{} WHERE order_id = $1 ORDER BY created_at, id", SELECT_VIOLATION);
        sqlx::query_as::<_, ViolationRow>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?
            .into_iter()
            .map(RentalViolation::try_from)
            .collect()
    }

    async fn get_violation(&self, id: Uuid) -> StoreResult<Option<RentalViolation>> {
        let sql = format!("{} WHERE id = $1", SELECT_VIOLATION);
        sqlx::query_as::<_, ViolationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(RentalViolation::try_from)
            .transpose()
    }

    async fn insert_batch(
        &self,
        order_id: Uuid,
        expected_order_version: i64,
        violations: &[RentalViolation],
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        if !claim_order_version(&mut tx, order_id, expected_order_version).await? {
            tx.rollback().await.map_err(backend)?;
            return Ok(false);
        }

        for v in violations {
            sqlx::query(
                r#"
                INSERT INTO rental_violations (
                    id, order_id, order_item_id, provider_id, violation_type, description,
                    penalty_percentage, penalty_amount, evidence, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(v.id)
            .bind(v.order_id)
            .bind(v.order_item_id)
            .bind(v.provider_id)
            .bind(v.violation_type.as_str())
            .bind(&v.description)
            .bind(v.penalty_percentage.map(|p| p.value()))
            .bind(v.penalty_amount.amount())
            .bind(&v.evidence)
            .bind(v.created_at)
            .bind(v.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(true)
    }

    async fn update_violation(&self, violation: &RentalViolation, expected_order_version: i64) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        if !claim_order_version(&mut tx, violation.order_id, expected_order_version).await? {
            tx.rollback().await.map_err(backend)?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE rental_violations
            SET violation_type = $2,
                description = $3,
                penalty_percentage = $4,
                penalty_amount = $5,
                evidence = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(violation.id)
        .bind(violation.violation_type.as_str())
        .bind(&violation.description)
        .bind(violation.penalty_percentage.map(|p| p.value()))
        .bind(violation.penalty_amount.amount())
        .bind(&violation.evidence)
        .bind(violation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_non_pending_status_has_a_timeline_column() {
        assert_eq!(timeline_column(OrderStatus::Pending), None);
        assert_eq!(timeline_column(OrderStatus::Approved), Some("approved_at"));
        assert_eq!(timeline_column(OrderStatus::ReturnedWithIssue), Some("returned_at"));
        assert_eq!(timeline_column(OrderStatus::Cancelled), Some("cancelled_at"));
    }
}

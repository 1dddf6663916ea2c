use async_trait::async_trait;
use chrono::{DateTime, Utc};
use closet_core::StoreResult;
use closet_order::{
    FinalizeReport, OrderStatus, Transaction, TransactionRepository, TransactionResolution, TransactionStatus,
};
use closet_shared::Money;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::database::{backend, parse_label};
use crate::order_repo::timeline_column;

pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, rows: Vec<TransactionRow>) -> StoreResult<Vec<Transaction>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let links = sqlx::query_as::<_, LinkRow>(
            r#"
            SELECT transaction_id, order_id, skipped
            FROM transaction_orders
            WHERE transaction_id = ANY($1)
            ORDER BY position
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut grouped: HashMap<Uuid, Vec<LinkRow>> = HashMap::new();
        for link in links {
            grouped.entry(link.transaction_id).or_default().push(link);
        }

        rows.into_iter()
            .map(|row| {
                let links = grouped.remove(&row.id).unwrap_or_default();
                row.into_transaction(links)
            })
            .collect()
    }

    async fn fetch_one(&self, sql: &str, bind: &str) -> StoreResult<Option<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(sql)
            .bind(bind)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(self.hydrate(rows).await?.into_iter().next())
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    reference: String,
    customer_id: Uuid,
    amount: Decimal,
    status: String,
    note: Option<String>,
    gateway_response_code: Option<String>,
    gateway_transaction_no: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct LinkRow {
    transaction_id: Uuid,
    order_id: Uuid,
    skipped: bool,
}

impl TransactionRow {
    fn into_transaction(self, links: Vec<LinkRow>) -> StoreResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            reference: self.reference,
            customer_id: self.customer_id,
            order_ids: links.iter().map(|l| l.order_id).collect(),
            amount: Money::new(self.amount),
            status: parse_label("transactions.status", &self.status)?,
            note: self.note,
            gateway_response_code: self.gateway_response_code,
            gateway_transaction_no: self.gateway_transaction_no,
            skipped_order_ids: links.iter().filter(|l| l.skipped).map(|l| l.order_id).collect(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

const SELECT_TRANSACTION: &str = r#"
    SELECT t.id, t.reference, t.customer_id, t.amount, t.status, t.note,
           t.gateway_response_code, t.gateway_transaction_no, t.created_at, t.completed_at
    FROM transactions t
"#;

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn create_transaction(&self, transaction: &Transaction) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO transactions (id, reference, customer_id, amount, status, note, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(transaction.id)
        .bind(&transaction.reference)
        .bind(transaction.customer_id)
        .bind(transaction.amount.amount())
        .bind(transaction.status.as_str())
        .bind(transaction.note.as_deref())
        .bind(transaction.created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        for (position, order_id) in transaction.order_ids.iter().enumerate() {
            sqlx::query("INSERT INTO transaction_orders (transaction_id, order_id, position) VALUES ($1, $2, $3)")
                .bind(transaction.id)
                .bind(order_id)
                .bind(position as i32)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)
    }

    async fn get_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        let sql = format!("{} WHERE t.reference = $1", SELECT_TRANSACTION);
        self.fetch_one(&sql, reference).await
    }

    async fn finalize(
        &self,
        transaction_id: Uuid,
        resolution: TransactionResolution,
        promote: (OrderStatus, OrderStatus),
    ) -> StoreResult<Option<FinalizeReport>> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // Row lock makes concurrent duplicate callbacks queue up here
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM transactions WHERE id = $1 FOR UPDATE")
            .bind(transaction_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;

        let still_open = match status {
            Some(s) => parse_label::<TransactionStatus>("transactions.status", &s)? == TransactionStatus::Initiated,
            None => false,
        };
        if !still_open {
            tx.rollback().await.map_err(backend)?;
            return Ok(None);
        }

        let now = Utc::now();
        let mut report = FinalizeReport::default();

        match resolution {
            TransactionResolution::Completed {
                response_code,
                gateway_transaction_no,
            } => {
                let (from, to) = promote;
                let order_ids: Vec<Uuid> = sqlx::query_scalar(
                    "SELECT order_id FROM transaction_orders WHERE transaction_id = $1 ORDER BY position",
                )
                .bind(transaction_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(backend)?;

                let stamp = timeline_column(to)
                    .map(|column| format!(", {} = $3", column))
                    .unwrap_or_default();
                let promote_sql = format!(
                    "UPDATE orders SET status = $2, updated_at = $3, version = version + 1{} WHERE id = $1 AND status = $4",
                    stamp
                );

                for order_id in order_ids {
                    let result = sqlx::query(&promote_sql)
                        .bind(order_id)
                        .bind(to.as_str())
                        .bind(now)
                        .bind(from.as_str())
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;

                    if result.rows_affected() == 1 {
                        report.promoted.push(order_id);
                    } else {
                        debug!("Order {} was no longer {} when payment {} landed", order_id, from, transaction_id);
                        report.skipped.push(order_id);
                    }
                }

                if !report.skipped.is_empty() {
                    sqlx::query(
                        "UPDATE transaction_orders SET skipped = TRUE WHERE transaction_id = $1 AND order_id = ANY($2)",
                    )
                    .bind(transaction_id)
                    .bind(&report.skipped)
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
                }

                sqlx::query(
                    r#"
                    UPDATE transactions
                    SET status = $2, gateway_response_code = $3, gateway_transaction_no = $4, completed_at = $5
                    WHERE id = $1
                    "#,
                )
                .bind(transaction_id)
                .bind(TransactionStatus::Completed.as_str())
                .bind(response_code)
                .bind(gateway_transaction_no)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            }
            TransactionResolution::Failed { response_code } => {
                sqlx::query(
                    "UPDATE transactions SET status = $2, gateway_response_code = $3, completed_at = $4 WHERE id = $1",
                )
                .bind(transaction_id)
                .bind(TransactionStatus::Failed.as_str())
                .bind(response_code)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            }
        }

        tx.commit().await.map_err(backend)?;
        Ok(Some(report))
    }

    async fn list_initiated_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Transaction>> {
        let sql = format!("{} WHERE t.status = $1 AND t.created_at < $2 ORDER BY t.created_at", SELECT_TRANSACTION);
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(TransactionStatus::Initiated.as_str())
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        self.hydrate(rows).await
    }

    async fn find_completed_for_order(&self, order_id: Uuid) -> StoreResult<Option<Transaction>> {
        let sql = format!(
            r#"{}
            JOIN transaction_orders o ON o.transaction_id = t.id
            WHERE o.order_id = $1 AND NOT o.skipped AND t.status = $2
            LIMIT 1
            "#,
            SELECT_TRANSACTION
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(order_id)
            .bind(TransactionStatus::Completed.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(self.hydrate(rows).await?.into_iter().next())
    }
}

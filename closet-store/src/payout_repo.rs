use async_trait::async_trait;
use chrono::{DateTime, Utc};
use closet_core::{StoreError, StoreResult};
use closet_order::{BankAccount, Payout, PayoutRepository, PayoutStatus};
use closet_shared::{Money, Redacted};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::{backend, parse_label};

/// Payout requests and provider bank accounts. Each provider has a ledger row
/// whose version is bumped by every payout insert or resolution.
pub struct PgPayoutRepository {
    pool: PgPool,
}

impl PgPayoutRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PayoutRow {
    id: Uuid,
    provider_id: Uuid,
    bank_account_id: Uuid,
    amount: Decimal,
    status: String,
    note: Option<String>,
    rejection_reason: Option<String>,
    requested_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<PayoutRow> for Payout {
    type Error = StoreError;

    fn try_from(row: PayoutRow) -> Result<Self, Self::Error> {
        Ok(Payout {
            id: row.id,
            provider_id: row.provider_id,
            bank_account_id: row.bank_account_id,
            amount: Money::new(row.amount),
            status: parse_label("payouts.status", &row.status)?,
            note: row.note,
            rejection_reason: row.rejection_reason,
            requested_at: row.requested_at,
            resolved_at: row.resolved_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BankAccountRow {
    id: Uuid,
    provider_id: Uuid,
    bank_name: String,
    account_holder: String,
    account_number: String,
    is_primary: bool,
    created_at: DateTime<Utc>,
}

impl From<BankAccountRow> for BankAccount {
    fn from(row: BankAccountRow) -> Self {
        BankAccount {
            id: row.id,
            provider_id: row.provider_id,
            bank_name: row.bank_name,
            account_holder: row.account_holder,
            account_number: Redacted::new(row.account_number),
            is_primary: row.is_primary,
            created_at: row.created_at,
        }
    }
}

const SELECT_PAYOUT: &str = r#"
    SELECT id, provider_id, bank_account_id, amount, status, note, rejection_reason,
           requested_at, resolved_at
    FROM payouts
"#;

#[async_trait]
impl PayoutRepository for PgPayoutRepository {
    async fn ledger_version(&self, provider_id: Uuid) -> StoreResult<i64> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM provider_ledgers WHERE provider_id = $1")
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(version.unwrap_or(0))
    }

    async fn insert_payout(&self, payout: &Payout, expected_ledger_version: i64) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("INSERT INTO provider_ledgers (provider_id, version) VALUES ($1, 0) ON CONFLICT DO NOTHING")
            .bind(payout.provider_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let claimed = sqlx::query(
            "UPDATE provider_ledgers SET version = version + 1 WHERE provider_id = $1 AND version = $2",
        )
        .bind(payout.provider_id)
        .bind(expected_ledger_version)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if claimed.rows_affected() != 1 {
            tx.rollback().await.map_err(backend)?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO payouts (id, provider_id, bank_account_id, amount, status, note, requested_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(payout.id)
        .bind(payout.provider_id)
        .bind(payout.bank_account_id)
        .bind(payout.amount.amount())
        .bind(payout.status.as_str())
        .bind(payout.note.as_deref())
        .bind(payout.requested_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(true)
    }

    async fn get_payout(&self, id: Uuid) -> StoreResult<Option<Payout>> {
        let sql = format!("{} WHERE id = $1", SELECT_PAYOUT);
        sqlx::query_as::<_, PayoutRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(Payout::try_from)
            .transpose()
    }

    async fn list_payouts(&self, provider_id: Uuid) -> StoreResult<Vec<Payout>> {
        let sql = format!("{} WHERE provider_id = $1 ORDER BY requested_at DESC", SELECT_PAYOUT);
        sqlx::query_as::<_, PayoutRow>(&sql)
            .bind(provider_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?
            .into_iter()
            .map(Payout::try_from)
            .collect()
    }

    async fn resolve_payout(
        &self,
        id: Uuid,
        status: PayoutStatus,
        rejection_reason: Option<String>,
        resolved_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let provider: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE payouts
            SET status = $2, rejection_reason = $3, resolved_at = $4
            WHERE id = $1 AND status = $5
            RETURNING provider_id
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(rejection_reason)
        .bind(resolved_at)
        .bind(PayoutStatus::Pending.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let Some(provider_id) = provider else {
            tx.rollback().await.map_err(backend)?;
            return Ok(false);
        };

        // A rejection frees balance, so in-flight requests must re-read it
        sqlx::query("UPDATE provider_ledgers SET version = version + 1 WHERE provider_id = $1")
            .bind(provider_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(true)
    }

    async fn list_bank_accounts(&self, provider_id: Uuid) -> StoreResult<Vec<BankAccount>> {
        let rows = sqlx::query_as::<_, BankAccountRow>(
            r#"
            SELECT id, provider_id, bank_name, account_holder, account_number, is_primary, created_at
            FROM bank_accounts
            WHERE provider_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(provider_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(BankAccount::from).collect())
    }

    async fn add_bank_account(&self, account: &BankAccount) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        if account.is_primary {
            sqlx::query("UPDATE bank_accounts SET is_primary = FALSE WHERE provider_id = $1 AND is_primary")
                .bind(account.provider_id)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        sqlx::query(
            r#"
            INSERT INTO bank_accounts (id, provider_id, bank_name, account_holder, account_number, is_primary, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(account.id)
        .bind(account.provider_id)
        .bind(&account.bank_name)
        .bind(&account.account_holder)
        .bind(account.account_number.expose())
        .bind(account.is_primary)
        .bind(account.created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)
    }

    async fn set_primary_bank_account(&self, provider_id: Uuid, account_id: Uuid) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let owned: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM bank_accounts WHERE id = $1 AND provider_id = $2 FOR UPDATE")
                .bind(account_id)
                .bind(provider_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;

        if owned.is_none() {
            tx.rollback().await.map_err(backend)?;
            return Ok(false);
        }

        // Clear first; the partial unique index allows one primary at a time
        sqlx::query("UPDATE bank_accounts SET is_primary = FALSE WHERE provider_id = $1 AND is_primary")
            .bind(provider_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        sqlx::query("UPDATE bank_accounts SET is_primary = TRUE WHERE id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(true)
    }
}

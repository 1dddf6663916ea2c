use chrono::Utc;
use closet_core::Notifier;
use closet_shared::{DomainEvent, Money, Redacted};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{OrderError, OrderResult};
use crate::models::{BankAccount, Order, Payout, PayoutStatus};
use crate::repository::{OrderRepository, PayoutRepository};

#[derive(Debug, Clone, Copy)]
pub struct PayoutRules {
    pub min_amount: Money,
    /// Attempts at the ledger compare-and-swap before reporting `Conflict`.
    pub max_retries: usize,
}

impl Default for PayoutRules {
    fn default() -> Self {
        Self {
            min_amount: Money::ZERO,
            max_retries: 5,
        }
    }
}

/// Provider balance, recomputed from order and payout history on every call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayoutSummary {
    pub provider_id: Uuid,
    pub eligible_orders: usize,
    /// Line totals less commission on settled orders.
    pub sales_earnings: Money,
    /// Deposit penalties kept for the provider.
    pub penalty_income: Money,
    pub pending_payouts: Money,
    pub completed_payouts: Money,
    pub available_balance: Money,
}

impl PayoutSummary {
    /// Orders count once they are back with the provider and their deposit is
    /// settled. Rejected payouts do not reduce the balance.
    pub fn compute(provider_id: Uuid, orders: &[Order], payouts: &[Payout]) -> Self {
        let eligible: Vec<&Order> = orders
            .iter()
            .filter(|o| o.provider_id == provider_id && o.status.is_fulfilled())
            .filter(|o| o.is_deposit_settled())
            .collect();

        let sales_earnings: Money = eligible.iter().map(|o| o.provider_earnings()).sum();
        let penalty_income: Money = eligible
            .iter()
            .filter_map(|o| o.deposit_settlement.map(|s| s.withheld))
            .sum();

        let sum_of = |status: PayoutStatus| -> Money {
            payouts
                .iter()
                .filter(|p| p.provider_id == provider_id && p.status == status)
                .map(|p| p.amount)
                .sum()
        };
        let pending_payouts = sum_of(PayoutStatus::Pending);
        let completed_payouts = sum_of(PayoutStatus::Completed);

        Self {
            provider_id,
            eligible_orders: eligible.len(),
            sales_earnings,
            penalty_income,
            pending_payouts,
            completed_payouts,
            available_balance: (sales_earnings + penalty_income).saturating_sub(pending_payouts + completed_payouts),
        }
    }
}

/// Handles financial operations for providers
pub struct FinancialManager {
    orders: Arc<dyn OrderRepository>,
    payouts: Arc<dyn PayoutRepository>,
    notifier: Arc<dyn Notifier>,
    rules: PayoutRules,
}

impl FinancialManager {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        payouts: Arc<dyn PayoutRepository>,
        notifier: Arc<dyn Notifier>,
        rules: PayoutRules,
    ) -> Self {
        Self {
            orders,
            payouts,
            notifier,
            rules,
        }
    }

    pub async fn payout_summary(&self, provider_id: Uuid) -> OrderResult<PayoutSummary> {
        let orders = self.orders.list_provider_orders(provider_id).await?;
        let payouts = self.payouts.list_payouts(provider_id).await?;
        Ok(PayoutSummary::compute(provider_id, &orders, &payouts))
    }

    pub async fn list_payouts(&self, provider_id: Uuid) -> OrderResult<Vec<Payout>> {
        Ok(self.payouts.list_payouts(provider_id).await?)
    }

    /// Withdraw `amount` to the provider's primary bank account. The balance
    /// check and the insert are tied together by the provider's ledger version.
    pub async fn request_payout(&self, provider_id: Uuid, amount: Money, note: Option<String>) -> OrderResult<Payout> {
        if !amount.is_positive() {
            return Err(OrderError::InvalidAmount("Payout amount must be greater than zero".to_string()));
        }
        if amount < self.rules.min_amount {
            return Err(OrderError::InvalidAmount(format!(
                "Payout amount must be at least {}",
                self.rules.min_amount
            )));
        }

        let account = self
            .payouts
            .list_bank_accounts(provider_id)
            .await?
            .into_iter()
            .find(|a| a.is_primary)
            .ok_or_else(|| OrderError::InvalidOperation("Add a primary bank account before requesting a payout".to_string()))?;

        for attempt in 1..=self.rules.max_retries.max(1) {
            let version = self.payouts.ledger_version(provider_id).await?;
            let summary = self.payout_summary(provider_id).await?;
            if amount > summary.available_balance {
                return Err(OrderError::InsufficientBalance {
                    requested: amount,
                    available: summary.available_balance,
                });
            }

            let payout = Payout::new(provider_id, account.id, amount, note.clone());
            if self.payouts.insert_payout(&payout, version).await? {
                info!("Payout {} of {} requested by provider {}", payout.id, amount, provider_id);
                self.notifier.notify(DomainEvent::PayoutRequested {
                    payout_id: payout.id,
                    provider_id,
                    amount,
                    timestamp: payout.requested_at.timestamp(),
                });
                return Ok(payout);
            }
            warn!("Ledger of provider {} moved (attempt {}), retrying payout", provider_id, attempt);
        }

        Err(OrderError::Conflict(format!("Payouts for provider {} are busy, try again", provider_id)))
    }

    pub async fn complete_payout(&self, payout_id: Uuid) -> OrderResult<Payout> {
        self.resolve(payout_id, PayoutStatus::Completed, None).await
    }

    /// Rejected amounts go back into the available balance.
    pub async fn reject_payout(&self, payout_id: Uuid, reason: String) -> OrderResult<Payout> {
        if reason.trim().is_empty() {
            return Err(OrderError::Validation("A rejection reason is required".to_string()));
        }
        self.resolve(payout_id, PayoutStatus::Rejected, Some(reason)).await
    }

    async fn resolve(&self, payout_id: Uuid, status: PayoutStatus, reason: Option<String>) -> OrderResult<Payout> {
        let now = Utc::now();
        if !self.payouts.resolve_payout(payout_id, status, reason, now).await? {
            return match self.payouts.get_payout(payout_id).await? {
                Some(existing) => Err(OrderError::InvalidOperation(format!(
                    "Payout {} is already {}",
                    payout_id,
                    existing.status.as_str()
                ))),
                None => Err(OrderError::NotFound(format!("Payout {}", payout_id))),
            };
        }

        let payout = self
            .payouts
            .get_payout(payout_id)
            .await?
            .ok_or_else(|| OrderError::Internal(format!("Payout {} vanished after resolution", payout_id)))?;
        info!("Payout {} marked {}", payout_id, status.as_str());
        self.notifier.notify(DomainEvent::PayoutResolved {
            payout_id,
            provider_id: payout.provider_id,
            status: status.as_str().to_string(),
            timestamp: now.timestamp(),
        });
        Ok(payout)
    }

    pub async fn list_bank_accounts(&self, provider_id: Uuid) -> OrderResult<Vec<BankAccount>> {
        Ok(self.payouts.list_bank_accounts(provider_id).await?)
    }

    /// The first account a provider adds is primary regardless of `make_primary`.
    pub async fn add_bank_account(
        &self,
        provider_id: Uuid,
        bank_name: String,
        account_holder: String,
        account_number: String,
        make_primary: bool,
    ) -> OrderResult<BankAccount> {
        if bank_name.trim().is_empty() || account_holder.trim().is_empty() {
            return Err(OrderError::Validation("Bank name and account holder are required".to_string()));
        }
        if account_number.is_empty() || !account_number.chars().all(|c| c.is_ascii_digit()) {
            return Err(OrderError::Validation("Account number must be digits only".to_string()));
        }

        let first = self.payouts.list_bank_accounts(provider_id).await?.is_empty();
        let account = BankAccount {
            id: Uuid::new_v4(),
            provider_id,
            bank_name: bank_name.trim().to_string(),
            account_holder: account_holder.trim().to_string(),
            account_number: Redacted::new(account_number),
            is_primary: make_primary || first,
            created_at: Utc::now(),
        };
        self.payouts.add_bank_account(&account).await?;
        info!("Bank account {} added for provider {}", account.id, provider_id);
        Ok(account)
    }

    pub async fn set_primary_bank_account(&self, provider_id: Uuid, account_id: Uuid) -> OrderResult<()> {
        if !self.payouts.set_primary_bank_account(provider_id, account_id).await? {
            return Err(OrderError::NotFound(format!("Bank account {}", account_id)));
        }
        Ok(())
    }
}

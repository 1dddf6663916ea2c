use chrono::{Duration, Utc};
use closet_core::{GatewayOutcome, Notifier, PaymentGateway, PaymentRequest};
use closet_shared::{DomainEvent, Money};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{OrderError, OrderResult};
use crate::models::{OrderStatus, Transaction, TransactionResolution, TransactionStatus};
use crate::repository::{OrderRepository, TransactionRepository};

/// Response code recorded on transactions closed by the expiry sweep.
pub const EXPIRED_CODE: &str = "EXPIRED";

/// What the customer needs to go and pay.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentLink {
    pub transaction_id: Uuid,
    pub reference: String,
    pub amount: Money,
    pub payment_url: String,
    pub order_ids: Vec<Uuid>,
    /// Requested orders left out because they were not payable.
    pub skipped: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAck {
    Confirmed {
        transaction_id: Uuid,
        approved: Vec<Uuid>,
        skipped: Vec<Uuid>,
    },
    Declined {
        transaction_id: Uuid,
        response_code: String,
    },
    /// Duplicate delivery; nothing changed.
    AlreadyProcessed { transaction_id: Uuid },
}

pub struct PaymentOrchestrator {
    orders: Arc<dyn OrderRepository>,
    transactions: Arc<dyn TransactionRepository>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
}

impl PaymentOrchestrator {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        transactions: Arc<dyn TransactionRepository>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            orders,
            transactions,
            gateway,
            notifier,
        }
    }

    /// Open one transaction covering every requested order the customer can
    /// still pay for. Orders that are not theirs or not pending are dropped.
    pub async fn create_payment_request(
        &self,
        customer_id: Uuid,
        order_ids: &[Uuid],
        note: Option<String>,
        client_ip: &str,
    ) -> OrderResult<PaymentLink> {
        if order_ids.is_empty() {
            return Err(OrderError::Validation("At least one order is required".to_string()));
        }
        let mut requested = order_ids.to_vec();
        requested.sort();
        requested.dedup();

        let payable: Vec<_> = self
            .orders
            .get_orders(&requested)
            .await?
            .into_iter()
            .filter(|o| o.customer_id == customer_id && o.status == OrderStatus::Pending)
            .collect();
        if payable.is_empty() {
            return Err(OrderError::NoValidOrders);
        }

        let payable_ids: Vec<Uuid> = payable.iter().map(|o| o.id).collect();
        let skipped: Vec<Uuid> = requested.into_iter().filter(|id| !payable_ids.contains(id)).collect();
        let amount: Money = payable.iter().map(|o| o.total_amount()).sum();
        if !amount.is_positive() {
            return Err(OrderError::InvalidAmount("Selected orders have nothing to pay".to_string()));
        }

        let transaction = Transaction::new(customer_id, payable_ids, amount, note);
        let payment_url = self.gateway.build_payment_url(&PaymentRequest {
            reference: transaction.reference.clone(),
            amount,
            order_info: format!("Payment for {} order(s)", transaction.order_ids.len()),
            client_ip: client_ip.to_string(),
            created_at: transaction.created_at,
        })?;
        self.transactions.create_transaction(&transaction).await?;

        if !skipped.is_empty() {
            warn!("Transaction {} leaves out unpayable orders {:?}", transaction.reference, skipped);
        }
        info!(
            "Transaction {} initiated for {} order(s), amount {}",
            transaction.reference,
            transaction.order_ids.len(),
            amount
        );

        Ok(PaymentLink {
            transaction_id: transaction.id,
            reference: transaction.reference,
            amount,
            payment_url,
            order_ids: transaction.order_ids,
            skipped,
        })
    }

    /// Verify a gateway callback and close its transaction. Safe to call any
    /// number of times with the same payload.
    pub async fn handle_callback(&self, params: &BTreeMap<String, String>) -> OrderResult<CallbackAck> {
        let callback = self.gateway.verify_callback(params)?;

        let transaction = self
            .transactions
            .get_by_reference(&callback.reference)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("Transaction {}", callback.reference)))?;

        if transaction.status != TransactionStatus::Initiated {
            info!("Ignoring duplicate callback for transaction {}", transaction.reference);
            return Ok(CallbackAck::AlreadyProcessed {
                transaction_id: transaction.id,
            });
        }

        if let Some(cents) = callback.amount_cents {
            if cents != transaction.amount.to_cents() {
                warn!(
                    "Callback amount {} does not match transaction {} ({})",
                    cents,
                    transaction.reference,
                    transaction.amount.to_cents()
                );
                return Err(OrderError::InvalidAmount(format!(
                    "Callback amount does not match transaction {}",
                    transaction.reference
                )));
            }
        }

        let resolution = match &callback.outcome {
            GatewayOutcome::Succeeded => TransactionResolution::Completed {
                response_code: "00".to_string(),
                gateway_transaction_no: callback.gateway_transaction_no.clone(),
            },
            GatewayOutcome::Failed { code } => TransactionResolution::Failed {
                response_code: code.clone(),
            },
        };

        let Some(report) = self
            .transactions
            .finalize(transaction.id, resolution, (OrderStatus::Pending, OrderStatus::Approved))
            .await?
        else {
            info!("Transaction {} was closed concurrently", transaction.reference);
            return Ok(CallbackAck::AlreadyProcessed {
                transaction_id: transaction.id,
            });
        };

        let now = Utc::now().timestamp();
        match callback.outcome {
            GatewayOutcome::Succeeded => {
                if !report.skipped.is_empty() {
                    warn!(
                        "Transaction {} paid for orders no longer pending, refund needed: {:?}",
                        transaction.reference, report.skipped
                    );
                }
                info!(
                    "Transaction {} completed, {} order(s) approved",
                    transaction.reference,
                    report.promoted.len()
                );
                self.notify_approved(&report.promoted).await;
                self.notifier.notify(DomainEvent::PaymentCompleted {
                    transaction_id: transaction.id,
                    reference: transaction.reference.clone(),
                    order_ids: report.promoted.clone(),
                    amount: transaction.amount,
                    timestamp: now,
                });
                Ok(CallbackAck::Confirmed {
                    transaction_id: transaction.id,
                    approved: report.promoted,
                    skipped: report.skipped,
                })
            }
            GatewayOutcome::Failed { code } => {
                info!("Transaction {} failed with code {}", transaction.reference, code);
                self.notifier.notify(DomainEvent::PaymentFailed {
                    transaction_id: transaction.id,
                    reference: transaction.reference,
                    reason: format!("Gateway response {}", code),
                    timestamp: now,
                });
                Ok(CallbackAck::Declined {
                    transaction_id: transaction.id,
                    response_code: code,
                })
            }
        }
    }

    /// Mark transactions still `Initiated` after `ttl` as failed. Returns how
    /// many this call closed.
    pub async fn expire_stale_transactions(&self, ttl: Duration) -> OrderResult<usize> {
        let cutoff = Utc::now() - ttl;
        let mut expired = 0;
        for transaction in self.transactions.list_initiated_before(cutoff).await? {
            let closed = self
                .transactions
                .finalize(
                    transaction.id,
                    TransactionResolution::Failed {
                        response_code: EXPIRED_CODE.to_string(),
                    },
                    (OrderStatus::Pending, OrderStatus::Approved),
                )
                .await?;
            if closed.is_some() {
                expired += 1;
                self.notifier.notify(DomainEvent::PaymentFailed {
                    transaction_id: transaction.id,
                    reference: transaction.reference,
                    reason: "Payment window expired".to_string(),
                    timestamp: Utc::now().timestamp(),
                });
            }
        }
        if expired > 0 {
            info!("Expired {} stale transaction(s)", expired);
        }
        Ok(expired)
    }

    async fn notify_approved(&self, order_ids: &[Uuid]) {
        let orders = match self.orders.get_orders(order_ids).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!("Skipping approval notifications: {}", e);
                return;
            }
        };
        for order in orders {
            self.notifier.notify(DomainEvent::OrderStatusChanged {
                order_id: order.id,
                customer_id: order.customer_id,
                provider_id: order.provider_id,
                from: OrderStatus::Pending.to_string(),
                to: order.status.to_string(),
                timestamp: order.updated_at.timestamp(),
            });
        }
    }
}

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Extension, Form, Json, Router,
};
use closet_order::{Actor, CallbackAck, OrderError, PaymentLink};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::require_customer;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub order_ids: Vec<Uuid>,
    pub note: Option<String>,
}

/// Acknowledgement body the gateway expects from the merchant's IPN endpoint.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct GatewayAck {
    #[serde(rename = "RspCode")]
    pub rsp_code: &'static str,
    #[serde(rename = "Message")]
    pub message: &'static str,
}

impl GatewayAck {
    const fn new(rsp_code: &'static str, message: &'static str) -> Self {
        Self { rsp_code, message }
    }
}

/// Map the reconciler result onto the gateway's acknowledgement codes.
pub fn acknowledge(result: &Result<CallbackAck, OrderError>) -> GatewayAck {
    match result {
        Ok(CallbackAck::Confirmed { .. }) | Ok(CallbackAck::Declined { .. }) => {
            GatewayAck::new("00", "Confirm Success")
        }
        Ok(CallbackAck::AlreadyProcessed { .. }) => GatewayAck::new("02", "Order already confirmed"),
        Err(OrderError::NotFound(_)) => GatewayAck::new("01", "Order not found"),
        Err(OrderError::InvalidAmount(_)) => GatewayAck::new("04", "Invalid amount"),
        Err(OrderError::InvalidSignature) => GatewayAck::new("97", "Invalid signature"),
        Err(_) => GatewayAck::new("99", "Unknown error"),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/payments", post(create_payment))
}

/// Unauthenticated: the gateway calls these directly.
pub fn callback_routes() -> Router<AppState> {
    Router::new().route("/payments/callback", get(callback_get).post(callback_post))
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/payments
async fn create_payment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    headers: HeaderMap,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentLink>), AppError> {
    let customer_id = require_customer(actor)?;

    let limit = state.business_rules.payment_requests_per_minute;
    if !state.rate_limiter.allow(&format!("payments:{}", customer_id), limit, 60).await {
        warn!("Payment requests from customer {} throttled", customer_id);
        return Err(AppError::RateLimited);
    }

    let link = state
        .payments
        .create_payment_request(customer_id, &req.order_ids, req.note, &client_ip(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(link)))
}

async fn process_callback(state: &AppState, params: BTreeMap<String, String>) -> Json<GatewayAck> {
    let result = state.payments.handle_callback(&params).await;
    match &result {
        Ok(ack) => info!("Gateway callback handled: {:?}", ack),
        Err(OrderError::Internal(msg)) => error!("Gateway callback failed: {}", msg),
        Err(e) => warn!("Gateway callback rejected: {}", e),
    }
    Json(acknowledge(&result))
}

/// GET /api/v1/payments/callback
async fn callback_get(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Json<GatewayAck> {
    process_callback(&state, params).await
}

/// POST /api/v1/payments/callback
async fn callback_post(
    State(state): State<AppState>,
    Form(params): Form<BTreeMap<String, String>>,
) -> Json<GatewayAck> {
    process_callback(&state, params).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acknowledgement_codes() {
        let txn = Uuid::new_v4();
        let confirmed = Ok(CallbackAck::Confirmed {
            transaction_id: txn,
            approved: vec![],
            skipped: vec![],
        });
        assert_eq!(acknowledge(&confirmed).rsp_code, "00");
        assert_eq!(acknowledge(&Ok(CallbackAck::AlreadyProcessed { transaction_id: txn })).rsp_code, "02");
        assert_eq!(acknowledge(&Err(OrderError::InvalidSignature)).rsp_code, "97");
        assert_eq!(acknowledge(&Err(OrderError::Internal("db".to_string()))).rsp_code, "99");
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "127.0.0.1");
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }
}

use axum::{
    extract::{Path, State},
    routing::post,
    Extension, Json, Router,
};
use closet_order::{Actor, Payout};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::require_staff;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RejectPayoutRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct ExpireResponse {
    pub expired: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/payouts/{id}/complete", post(complete_payout))
        .route("/admin/payouts/{id}/reject", post(reject_payout))
        .route("/admin/transactions/expire", post(expire_transactions))
}

/// POST /api/v1/admin/payouts/{id}/complete
async fn complete_payout(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(payout_id): Path<Uuid>,
) -> Result<Json<Payout>, AppError> {
    let staff_id = require_staff(actor)?;
    let payout = state.finance.complete_payout(payout_id).await?;
    info!("Payout {} completed by staff {}", payout_id, staff_id);
    Ok(Json(payout))
}

/// POST /api/v1/admin/payouts/{id}/reject
async fn reject_payout(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(payout_id): Path<Uuid>,
    Json(req): Json<RejectPayoutRequest>,
) -> Result<Json<Payout>, AppError> {
    let staff_id = require_staff(actor)?;
    let payout = state.finance.reject_payout(payout_id, req.reason).await?;
    info!("Payout {} rejected by staff {}", payout_id, staff_id);
    Ok(Json(payout))
}

/// POST /api/v1/admin/transactions/expire
///
/// Runs the same sweep as the background worker, on demand.
async fn expire_transactions(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<ExpireResponse>, AppError> {
    require_staff(actor)?;
    let expired = state
        .payments
        .expire_stale_transactions(state.business_rules.transaction_ttl())
        .await?;
    Ok(Json(ExpireResponse { expired }))
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use closet_order::{Actor, BankAccount, Payout, PayoutSummary};
use closet_shared::Money;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::require_provider;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PayoutRequest {
    pub amount: Money,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddBankAccountRequest {
    pub bank_name: String,
    pub account_holder: String,
    pub account_number: String,
    #[serde(default)]
    pub make_primary: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/payouts", get(list_payouts).post(request_payout))
        .route("/payouts/summary", get(payout_summary))
        .route("/bank-accounts", get(list_bank_accounts).post(add_bank_account))
        .route("/bank-accounts/{id}/primary", post(set_primary_bank_account))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/payouts/summary
async fn payout_summary(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<PayoutSummary>, AppError> {
    let provider_id = require_provider(actor)?;
    Ok(Json(state.finance.payout_summary(provider_id).await?))
}

/// GET /api/v1/payouts
async fn list_payouts(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<Payout>>, AppError> {
    let provider_id = require_provider(actor)?;
    Ok(Json(state.finance.list_payouts(provider_id).await?))
}

/// POST /api/v1/payouts
async fn request_payout(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<PayoutRequest>,
) -> Result<(StatusCode, Json<Payout>), AppError> {
    let provider_id = require_provider(actor)?;
    let payout = state.finance.request_payout(provider_id, req.amount, req.note).await?;
    Ok((StatusCode::CREATED, Json(payout)))
}

/// GET /api/v1/bank-accounts
async fn list_bank_accounts(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<BankAccount>>, AppError> {
    let provider_id = require_provider(actor)?;
    Ok(Json(state.finance.list_bank_accounts(provider_id).await?))
}

/// POST /api/v1/bank-accounts
async fn add_bank_account(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<AddBankAccountRequest>,
) -> Result<(StatusCode, Json<BankAccount>), AppError> {
    let provider_id = require_provider(actor)?;
    let account = state
        .finance
        .add_bank_account(provider_id, req.bank_name, req.account_holder, req.account_number, req.make_primary)
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// POST /api/v1/bank-accounts/{id}/primary
async fn set_primary_bank_account(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(account_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let provider_id = require_provider(actor)?;
    state.finance.set_primary_bank_account(provider_id, account_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

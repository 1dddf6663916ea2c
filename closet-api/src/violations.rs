use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use closet_order::{
    Actor, DepositStatement, PenaltyInput, RentalViolation, ViolationInput, ViolationType, ViolationUpdate,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::require_provider;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ViolationLine {
    pub order_item_id: Uuid,
    pub violation_type: ViolationType,
    pub description: String,
    pub penalty_percentage: Option<Decimal>,
    pub penalty_amount: Option<Decimal>,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateViolationsRequest {
    pub violations: Vec<ViolationLine>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateViolationRequest {
    pub violation_type: Option<ViolationType>,
    pub description: Option<String>,
    pub penalty_percentage: Option<Decimal>,
    pub penalty_amount: Option<Decimal>,
    pub evidence: Option<Vec<String>>,
}

impl TryFrom<ViolationLine> for ViolationInput {
    type Error = AppError;

    fn try_from(line: ViolationLine) -> Result<Self, Self::Error> {
        Ok(ViolationInput {
            order_item_id: line.order_item_id,
            violation_type: line.violation_type,
            description: line.description,
            penalty: PenaltyInput::from_parts(line.penalty_percentage, line.penalty_amount)?,
            evidence: line.evidence,
        })
    }
}

impl TryFrom<UpdateViolationRequest> for ViolationUpdate {
    type Error = AppError;

    fn try_from(req: UpdateViolationRequest) -> Result<Self, Self::Error> {
        let penalty = match (req.penalty_percentage, req.penalty_amount) {
            (None, None) => None,
            (pct, amount) => Some(PenaltyInput::from_parts(pct, amount)?),
        };
        Ok(ViolationUpdate {
            violation_type: req.violation_type,
            description: req.description,
            penalty,
            evidence: req.evidence,
        })
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders/{id}/violations", get(list_violations).post(create_violations))
        .route("/violations/{id}", patch(update_violation))
        .route("/orders/{id}/deposit", get(preview_deposit))
        .route("/orders/{id}/settle-deposit", post(settle_deposit))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/orders/{id}/violations
async fn list_violations(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Vec<RentalViolation>>, AppError> {
    // Visibility follows the order
    state.orders.get_order_for(order_id, actor).await?;
    Ok(Json(state.violations.list_for_order(order_id).await?))
}

/// POST /api/v1/orders/{id}/violations
async fn create_violations(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<CreateViolationsRequest>,
) -> Result<(StatusCode, Json<Vec<RentalViolation>>), AppError> {
    let provider_id = require_provider(actor)?;
    let inputs = req
        .violations
        .into_iter()
        .map(ViolationInput::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let created = state.violations.create_multiple(order_id, provider_id, inputs).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PATCH /api/v1/violations/{id}
async fn update_violation(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(violation_id): Path<Uuid>,
    Json(req): Json<UpdateViolationRequest>,
) -> Result<Json<RentalViolation>, AppError> {
    let provider_id = require_provider(actor)?;
    let update = ViolationUpdate::try_from(req)?;
    Ok(Json(state.violations.update_by_provider(violation_id, provider_id, update).await?))
}

/// GET /api/v1/orders/{id}/deposit
async fn preview_deposit(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<DepositStatement>, AppError> {
    Ok(Json(state.settlement.preview(order_id, actor).await?))
}

/// POST /api/v1/orders/{id}/settle-deposit
async fn settle_deposit(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<DepositStatement>, AppError> {
    Ok(Json(state.settlement.settle_deposit(order_id, actor).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_violation_line_requires_one_penalty_form() {
        let line = |pct: Option<Decimal>, amount: Option<Decimal>| ViolationLine {
            order_item_id: Uuid::new_v4(),
            violation_type: ViolationType::Stain,
            description: "Wine stain".to_string(),
            penalty_percentage: pct,
            penalty_amount: amount,
            evidence: vec![],
        };

        assert!(ViolationInput::try_from(line(Some(dec!(25)), None)).is_ok());
        assert!(ViolationInput::try_from(line(None, Some(dec!(40)))).is_ok());
        assert!(ViolationInput::try_from(line(Some(dec!(25)), Some(dec!(40)))).is_err());
        assert!(ViolationInput::try_from(line(None, None)).is_err());
    }

    #[test]
    fn test_update_without_penalty_keeps_it() {
        let update = ViolationUpdate::try_from(UpdateViolationRequest {
            description: Some("Two stains".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert!(update.penalty.is_none());
        assert_eq!(update.description.as_deref(), Some("Two stains"));
    }
}

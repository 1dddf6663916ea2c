use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use closet_order::{Actor, Order, OrderAction};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Staff must name the customer or provider whose orders they want.
#[derive(Debug, Deserialize, Default)]
pub struct ListOrdersQuery {
    pub customer_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub order: Order,
    pub warnings: Vec<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/{action}", post(transition_order))
}

/// URL segment for each lifecycle action.
pub fn parse_action(segment: &str) -> Option<OrderAction> {
    Some(match segment {
        "approve" => OrderAction::Approve,
        "ship" => OrderAction::MarkShipping,
        "deliver" => OrderAction::ConfirmDelivery,
        "start-return" => OrderAction::MarkReturning,
        "returned" => OrderAction::MarkReturned,
        "returned-with-issue" => OrderAction::MarkReturnedWithIssue,
        "cancel" => OrderAction::Cancel,
        _ => return None,
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/orders
async fn list_orders(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    let scope = match (actor, query.customer_id, query.provider_id) {
        (Actor::Staff(_), Some(customer), None) => Actor::Customer(customer),
        (Actor::Staff(_), None, Some(provider)) => Actor::Provider(provider),
        (Actor::Staff(_), Some(_), Some(_)) => {
            return Err(AppError::ValidationError(
                "Filter by customer_id or provider_id, not both".to_string(),
            ))
        }
        (other, _, _) => other,
    };
    Ok(Json(state.orders.list_for(scope).await?))
}

/// GET /api/v1/orders/{id}
async fn get_order(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.get_order_for(id, actor).await?))
}

/// POST /api/v1/orders/{id}/{action}
async fn transition_order(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((id, action)): Path<(Uuid, String)>,
) -> Result<Json<TransitionResponse>, AppError> {
    let action = parse_action(&action)
        .ok_or_else(|| AppError::ValidationError(format!("Unknown order action: {}", action)))?;

    let outcome = state.orders.apply(id, action, actor).await?;
    Ok(Json(TransitionResponse {
        order: outcome.order,
        warnings: outcome.warnings,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_segments() {
        assert_eq!(parse_action("ship"), Some(OrderAction::MarkShipping));
        assert_eq!(parse_action("returned-with-issue"), Some(OrderAction::MarkReturnedWithIssue));
        assert_eq!(parse_action("teleport"), None);
    }
}

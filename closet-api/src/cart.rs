use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::NaiveDate;
use closet_catalog::TransactionKind;
use closet_order::{Actor, Cart, CartItem, CheckoutRequest, Order};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::require_customer;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    pub quantity: u32,
    pub kind: TransactionKind,
    pub rental_start: Option<NaiveDate>,
    pub rental_end: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct RejectedProvider {
    pub provider_id: Uuid,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub orders: Vec<Order>,
    pub rejected: Vec<RejectedProvider>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(get_cart))
        .route("/cart/items", post(add_item))
        .route("/checkout", post(checkout))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/cart
async fn get_cart(State(state): State<AppState>, Extension(actor): Extension<Actor>) -> Result<Json<Cart>, AppError> {
    let customer_id = require_customer(actor)?;
    let cart = state
        .carts
        .get_cart(customer_id)
        .await?
        .unwrap_or_else(|| Cart::new(customer_id));
    Ok(Json(cart))
}

/// POST /api/v1/cart/items
async fn add_item(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<AddCartItemRequest>,
) -> Result<(StatusCode, Json<Cart>), AppError> {
    let customer_id = require_customer(actor)?;
    if req.quantity == 0 {
        return Err(AppError::ValidationError("Quantity must be at least 1".to_string()));
    }

    let product = state
        .catalog
        .get_product(req.product_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| AppError::ValidationError(format!("Product {} is not available", req.product_id)))?;

    if !product.allows(req.kind) {
        return Err(AppError::ValidationError(format!(
            "Product {} cannot be ordered as {}",
            product.id,
            req.kind.as_str()
        )));
    }

    let mut cart = state
        .carts
        .get_cart(customer_id)
        .await?
        .unwrap_or_else(|| Cart::new(customer_id));

    let mut item = CartItem::new(product.id, req.quantity, req.kind);
    item.rental_start = req.rental_start;
    item.rental_end = req.rental_end;
    cart.add_item(item);

    state.carts.save_cart(&cart).await?;
    Ok((StatusCode::CREATED, Json(cart)))
}

/// POST /api/v1/checkout
async fn checkout(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    let customer_id = require_customer(actor)?;
    let outcome = state.checkout.checkout(customer_id, req).await?;

    info!(
        "Checkout by customer {} created {} order(s), {} provider(s) rejected",
        customer_id,
        outcome.orders.len(),
        outcome.rejected.len()
    );

    let response = CheckoutResponse {
        orders: outcome.orders,
        rejected: outcome
            .rejected
            .into_iter()
            .map(|r| RejectedProvider {
                provider_id: r.provider_id,
                error: r.error.to_string(),
            })
            .collect(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use closet_catalog::InventoryError;
use closet_core::StoreError;
use closet_order::OrderError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    AuthenticationError(String),
    #[error("{0}")]
    AuthorizationError(String),
    #[error("{0}")]
    ValidationError(String),
    #[error("Too many requests, slow down")]
    RateLimited,
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error("{0}")]
    InternalServerError(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Order(err.into())
    }
}

impl From<InventoryError> for AppError {
    fn from(err: InventoryError) -> Self {
        AppError::Order(err.into())
    }
}

fn order_status(err: &OrderError) -> StatusCode {
    match err {
        OrderError::Validation(_)
        | OrderError::EmptyCart
        | OrderError::NoValidOrders
        | OrderError::InvalidAmount(_)
        | OrderError::InvalidSignature => StatusCode::BAD_REQUEST,
        OrderError::Unauthorized(_) => StatusCode::FORBIDDEN,
        OrderError::NotFound(_) => StatusCode::NOT_FOUND,
        OrderError::StockUnavailable { .. } | OrderError::InvalidTransition { .. } | OrderError::Conflict(_) => {
            StatusCode::CONFLICT
        }
        OrderError::PenaltyExceedsDeposit { .. }
        | OrderError::InsufficientBalance { .. }
        | OrderError::InvalidOperation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OrderError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, AppError::RateLimited.to_string()),
            AppError::Order(err) => {
                let status = order_status(&err);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!("Internal Server Error: {}", err);
                    (status, "Internal Server Error".to_string())
                } else {
                    (status, err.to_string())
                }
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_engine_errors_map_to_statuses() {
        let cases = [
            (OrderError::EmptyCart, StatusCode::BAD_REQUEST),
            (OrderError::NotFound("Order".to_string()), StatusCode::NOT_FOUND),
            (
                OrderError::InvalidTransition {
                    from: "PENDING".to_string(),
                    to: "IN_USE".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (
                OrderError::StockUnavailable {
                    product_id: Uuid::new_v4(),
                    requested: 2,
                    available: 1,
                },
                StatusCode::CONFLICT,
            ),
            (OrderError::Unauthorized("no".to_string()), StatusCode::FORBIDDEN),
            (OrderError::InvalidOperation("settled".to_string()), StatusCode::UNPROCESSABLE_ENTITY),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let response = AppError::from(OrderError::Internal("connection refused".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

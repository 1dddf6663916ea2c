use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use chrono::{Duration, Utc};
use closet_order::Actor;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::{AppState, AuthConfig};

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Provider,
    Staff,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: usize,
}

impl Claims {
    pub fn actor(&self) -> Actor {
        match self.role {
            Role::Customer => Actor::Customer(self.sub),
            Role::Provider => Actor::Provider(self.sub),
            Role::Staff => Actor::Staff(self.sub),
        }
    }
}

/// Sign a token for `sub`. Issued by the identity service in production; kept
/// here for tooling and tests.
pub fn issue_token(auth: &AuthConfig, sub: Uuid, role: Role) -> Result<String, AppError> {
    let claims = Claims {
        sub,
        role,
        exp: (Utc::now() + Duration::seconds(auth.expiration as i64)).timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(auth.secret.as_bytes()))
        .map_err(|e| AppError::InternalServerError(format!("Token encoding failed: {}", e)))
}

// ============================================================================
// Authentication Middleware
// ============================================================================

/// Decode the bearer token and put the caller's `Actor` into request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let TypedHeader(Authorization(bearer)) =
        bearer.ok_or_else(|| AppError::AuthenticationError("Missing bearer token".to_string()))?;

    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::AuthenticationError(format!("Invalid token: {}", e)))?;

    req.extensions_mut().insert(token_data.claims.actor());

    Ok(next.run(req).await)
}

// ============================================================================
// Role helpers
// ============================================================================

pub fn require_customer(actor: Actor) -> Result<Uuid, AppError> {
    match actor {
        Actor::Customer(id) => Ok(id),
        _ => Err(AppError::AuthorizationError("Customer access required".to_string())),
    }
}

pub fn require_provider(actor: Actor) -> Result<Uuid, AppError> {
    match actor {
        Actor::Provider(id) => Ok(id),
        _ => Err(AppError::AuthorizationError("Provider access required".to_string())),
    }
}

pub fn require_staff(actor: Actor) -> Result<Uuid, AppError> {
    match actor {
        Actor::Staff(id) => Ok(id),
        _ => Err(AppError::AuthorizationError("Staff access required".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip_yields_actor() {
        let auth = AuthConfig {
            secret: "unit-secret".to_string(),
            expiration: 60,
        };
        let provider = Uuid::new_v4();
        let token = issue_token(&auth, provider, Role::Provider).unwrap();

        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(auth.secret.as_bytes()),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(decoded.claims.actor(), Actor::Provider(provider));
    }

    #[test]
    fn test_role_helpers_reject_other_roles() {
        let id = Uuid::new_v4();
        assert_eq!(require_provider(Actor::Provider(id)).unwrap(), id);
        assert!(require_customer(Actor::Staff(id)).is_err());
        assert!(require_staff(Actor::Customer(id)).is_err());
    }
}

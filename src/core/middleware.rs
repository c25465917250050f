use axum::{
    extract::Request,
    http::header::{self, HeaderMap},
    middleware::Next,
    response::Response,
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::app_error::AppError;

/// Header carrying the anonymous shopper session, issued by the storefront.
pub const SESSION_ID_HEADER: &str = "session-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Vendor,
    Admin,
}

impl Role {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(Role::Customer),
            "vendor" => Some(Role::Vendor),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// The authenticated principal injected into request extensions.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: i32,
    pub role: Role,
}

/// Identity used by the cart endpoints: either an authenticated user or a
/// guest session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShopperId {
    User(i32),
    Guest(String),
}

/// Bearer token claims. Tokens are minted by the upstream auth service as
/// base64url-encoded JSON; this service only decodes and checks expiry.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i32,
    role: String,
    exp: i64,
}

fn decode_claims(token: &str) -> Result<AuthUser, AppError> {
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| AppError::Unauthorized)?;
    let claims: Claims = serde_json::from_slice(&raw).map_err(|_| AppError::Unauthorized)?;

    if claims.exp <= Utc::now().timestamp() {
        return Err(AppError::Unauthorized);
    }

    let role = Role::parse(&claims.role).ok_or(AppError::Unauthorized)?;
    Ok(AuthUser {
        id: claims.sub,
        role,
    })
}

fn bearer_user(headers: &HeaderMap) -> Result<AuthUser, AppError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;
    decode_claims(token)
}

/// Requires a valid bearer token. Injects both the full principal and the
/// bare user id (most handlers only need the latter).
pub async fn customers_authorization(mut req: Request, next: Next) -> Result<Response, AppError> {
    let user = bearer_user(req.headers())?;
    req.extensions_mut().insert(user.id);
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Requires a valid bearer token with the `admin` role.
pub async fn admin_authorization(mut req: Request, next: Next) -> Result<Response, AppError> {
    let user = bearer_user(req.headers())?;
    if user.role != Role::Admin {
        return Err(AppError::ForbiddenResource("Admin role required".into()));
    }
    req.extensions_mut().insert(user.id);
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Accepts either a bearer token or a guest `session-id` header. Used by the
/// cart endpoints, which serve both authenticated and anonymous shoppers.
pub async fn shopper_identity(mut req: Request, next: Next) -> Result<Response, AppError> {
    let shopper = match bearer_user(req.headers()) {
        Ok(user) => ShopperId::User(user.id),
        Err(_) => {
            let session_id = req
                .headers()
                .get(SESSION_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .ok_or(AppError::Unauthorized)?;
            ShopperId::Guest(session_id.to_string())
        }
    };
    req.extensions_mut().insert(shopper);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(sub: i32, role: &str, exp: i64) -> String {
        let claims = serde_json::json!({ "sub": sub, "role": role, "exp": exp });
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap())
    }

    #[test]
    fn decodes_valid_token() {
        let exp = Utc::now().timestamp() + 3600;
        let user = decode_claims(&token(42, "admin", exp)).unwrap();
        assert_eq!(user.id, 42);
        assert_eq!(user.role, Role::Admin);
    }

    #[test]
    fn rejects_expired_token() {
        let exp = Utc::now().timestamp() - 1;
        assert!(decode_claims(&token(42, "customer", exp)).is_err());
    }

    #[test]
    fn rejects_unknown_role() {
        let exp = Utc::now().timestamp() + 3600;
        assert!(decode_claims(&token(42, "superuser", exp)).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_claims("not-base64!").is_err());
        assert!(decode_claims(&URL_SAFE_NO_PAD.encode(b"{}")).is_err());
    }
}

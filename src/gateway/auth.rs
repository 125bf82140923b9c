//! JWT authentication for the gateway
//!
//! Tokens are issued by the platform's auth service; this gateway only
//! verifies them. Claims carry the user id in `sub` and a `role` used to
//! gate the admin surface.

use axum::{
    Json,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::state::AppState;
use super::types::{ApiResponse, error_codes};

pub const ROLE_USER: &str = "user";
pub const ROLE_ADMIN: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub email: String,
    #[serde(default = "default_role")]
    pub role: String,
    pub exp: usize,
    pub iat: usize,
}

fn default_role() -> String {
    ROLE_USER.to_string()
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, AuthError> {
        self.sub.parse().map_err(|_| AuthError::InvalidToken)
    }

    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Admin role required")]
    Forbidden,
}

#[derive(Clone)]
pub struct AuthService {
    secret: String,
}

impl AuthService {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| {
            debug!(error = %e, "token verification failed");
            AuthError::InvalidToken
        })?;
        Ok(data.claims)
    }

    /// Token issuance lives in the auth service; this exists for tests
    /// and local tooling.
    pub fn issue_token(
        &self,
        user_id: i64,
        email: &str,
        role: &str,
        ttl_secs: u64,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = chrono::Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role: role.to_string(),
            exp: now + ttl_secs as usize,
            iat: now,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
    }
}

fn auth_failure(code: i32, msg: &str) -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::error(code, msg)),
    )
}

fn extract_bearer(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Verify the bearer token and stash the claims for handlers
pub async fn jwt_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    let token = extract_bearer(&request)
        .ok_or_else(|| auth_failure(error_codes::MISSING_AUTH, "Missing bearer token"))?;

    let claims = state
        .auth
        .verify_token(token)
        .map_err(|e| auth_failure(error_codes::AUTH_FAILED, &e.to_string()))?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Admin surface guard; layered after `jwt_auth_middleware`
pub async fn require_admin_middleware(
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    let is_admin = request
        .extensions()
        .get::<Claims>()
        .is_some_and(Claims::is_admin);
    if !is_admin {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ApiResponse::<()>::error(
                error_codes::FORBIDDEN,
                "Admin role required",
            )),
        ));
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let auth = AuthService::new("test-secret");
        let token = auth.issue_token(42, "a@b.c", ROLE_USER, 3600).unwrap();
        let claims = auth.verify_token(&token).unwrap();
        assert_eq!(claims.user_id().unwrap(), 42);
        assert!(!claims.is_admin());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = AuthService::new("secret-a");
        let verifier = AuthService::new("secret-b");
        let token = issuer.issue_token(1, "a@b.c", ROLE_USER, 3600).unwrap();
        assert!(verifier.verify_token(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = AuthService::new("test-secret");
        let now = chrono::Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: "1".to_string(),
            email: "a@b.c".to_string(),
            role: ROLE_USER.to_string(),
            exp: now - 120,
            iat: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(auth.verify_token(&token).is_err());
    }

    #[test]
    fn test_admin_role() {
        let auth = AuthService::new("test-secret");
        let token = auth.issue_token(9, "ops@b.c", ROLE_ADMIN, 3600).unwrap();
        assert!(auth.verify_token(&token).unwrap().is_admin());
    }
}

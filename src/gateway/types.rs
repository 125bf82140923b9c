//! API response envelope, error codes and request/response DTOs

use axum::{Json, http::StatusCode};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::engine::EngineError;
use crate::journal::Transaction;
use crate::rails::RailError;
use crate::store::StoreError;

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or null (error)
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    #[schema(example = 0)]
    pub code: i32,
    #[schema(example = "ok")]
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

/// Standard API error codes
pub mod error_codes {
    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_SUPPLY: i32 = 1002;
    pub const UNSUPPORTED_RAIL: i32 = 1003;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const AUTH_FAILED: i32 = 2002;
    pub const FORBIDDEN: i32 = 2003;
    pub const INVALID_SIGNATURE: i32 = 2004;

    // Resource errors (4xxx)
    pub const TRANSACTION_NOT_FOUND: i32 = 4001;
    pub const DUPLICATE_REFERENCE: i32 = 4002;
    pub const PROOF_NOT_FOUND: i32 = 4003;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const PROVIDER_ERROR: i32 = 5002;
}

pub type ApiError = (StatusCode, Json<ApiResponse<()>>);

pub fn api_error(status: StatusCode, code: i32, msg: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::<()>::error(code, msg)))
}

/// Map an engine failure onto the envelope
pub fn engine_error(e: EngineError) -> ApiError {
    use crate::calculator::QuoteError;

    match &e {
        EngineError::NotFound(_) => api_error(
            StatusCode::NOT_FOUND,
            error_codes::TRANSACTION_NOT_FOUND,
            e.to_string(),
        ),
        EngineError::Quote(QuoteError::InsufficientSupply { .. }) => api_error(
            StatusCode::BAD_REQUEST,
            error_codes::INSUFFICIENT_SUPPLY,
            e.to_string(),
        ),
        EngineError::Quote(_) => api_error(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            e.to_string(),
        ),
        EngineError::InvalidOperation(_) => api_error(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            e.to_string(),
        ),
        EngineError::Rail(RailError::Provider(_)) => api_error(
            StatusCode::BAD_GATEWAY,
            error_codes::PROVIDER_ERROR,
            e.to_string(),
        ),
        EngineError::Rail(_) => api_error(
            StatusCode::BAD_REQUEST,
            error_codes::UNSUPPORTED_RAIL,
            e.to_string(),
        ),
        EngineError::Store(StoreError::NotFound(_)) => api_error(
            StatusCode::NOT_FOUND,
            error_codes::TRANSACTION_NOT_FOUND,
            e.to_string(),
        ),
        EngineError::Store(StoreError::DuplicateReference(_)) => api_error(
            StatusCode::CONFLICT,
            error_codes::DUPLICATE_REFERENCE,
            e.to_string(),
        ),
        EngineError::Store(StoreError::Catalog(_)) => api_error(
            StatusCode::BAD_REQUEST,
            error_codes::INSUFFICIENT_SUPPLY,
            e.to_string(),
        ),
        EngineError::Store(_) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_codes::INTERNAL_ERROR,
            e.to_string(),
        ),
    }
}

pub fn store_error(e: StoreError) -> ApiError {
    engine_error(EngineError::Store(e))
}

pub fn validation_error(e: validator::ValidationErrors) -> ApiError {
    api_error(
        StatusCode::BAD_REQUEST,
        error_codes::INVALID_PARAMETER,
        e.to_string(),
    )
}

// === Requests ===

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct QuoteRequest {
    /// "regular" or "co_founder"
    #[serde(default = "default_class")]
    pub class: String,
    #[validate(range(min = 1))]
    pub quantity: i64,
    /// "naira" or "usdt"
    #[serde(default = "default_currency")]
    pub currency: String,
}

pub fn default_class() -> String {
    "regular".to_string()
}

pub fn default_currency() -> String {
    "naira".to_string()
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PurchaseRequest {
    #[serde(default = "default_class")]
    pub class: String,
    #[validate(range(min = 1))]
    pub quantity: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// "card", "invoice" or "usdt"
    pub rail: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct OnchainVerifyRequest {
    pub reference: String,
    #[validate(length(min = 66, max = 66))]
    pub tx_hash: String,
    #[validate(length(min = 42, max = 42))]
    pub sender_wallet: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct GrantRequest {
    pub user_id: i64,
    #[serde(default = "default_class")]
    pub class: String,
    #[validate(range(min = 1))]
    pub quantity: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[validate(length(min = 1, max = 500))]
    pub note: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DecideRequest {
    pub approved: bool,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ReverseRequest {
    #[validate(length(min = 1, max = 500))]
    pub note: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TierPriceRequest {
    /// "tier1", "tier2" or "tier3"
    pub level: String,
    #[schema(value_type = Option<String>)]
    pub price_naira: Option<rust_decimal::Decimal>,
    #[schema(value_type = Option<String>)]
    pub price_usdt: Option<rust_decimal::Decimal>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CoFounderPriceRequest {
    #[schema(value_type = Option<String>)]
    pub price_naira: Option<rust_decimal::Decimal>,
    #[schema(value_type = Option<String>)]
    pub price_usdt: Option<rust_decimal::Decimal>,
}

/// Admin journal listing filters, all optional
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ListQuery {
    pub status: Option<String>,
    pub rail: Option<String>,
    pub class: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

// === Responses ===

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub reference: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub transaction: Transaction,
}

#[derive(Debug, Serialize)]
pub struct SettleResponse {
    pub reference: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shapes() {
        let ok = ApiResponse::success(42);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["code"], 0);
        assert_eq!(json["data"], 42);

        let err = ApiResponse::<()>::error(error_codes::INVALID_PARAMETER, "bad");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], 1001);
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_engine_error_mapping() {
        let (status, body) = engine_error(EngineError::NotFound("SHR-X".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, error_codes::TRANSACTION_NOT_FOUND);

        let (status, body) = engine_error(EngineError::Quote(
            crate::calculator::QuoteError::InsufficientSupply {
                requested: 10,
                available: 5,
            },
        ));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, error_codes::INSUFFICIENT_SUPPLY);
    }

    #[test]
    fn test_purchase_request_validation() {
        let req = PurchaseRequest {
            class: "regular".to_string(),
            quantity: 0,
            currency: "naira".to_string(),
            rail: "card".to_string(),
        };
        assert!(req.validate().is_err());
    }
}

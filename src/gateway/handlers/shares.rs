//! User-facing share purchase surface

use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::calculator::{self, Quote};
use crate::gateway::auth::Claims;
use crate::gateway::state::AppState;
use crate::gateway::types::{
    ApiError, ApiResponse, OnchainVerifyRequest, PurchaseRequest, PurchaseResponse, QuoteRequest,
    SettleResponse, api_error, engine_error, error_codes, store_error, validation_error,
};
use crate::journal::{PaymentRail, RailPayload, ShareClass, Transaction};
use crate::money::Currency;
use crate::rails::{RailContext, VerifyProof};
use crate::view::{self, CatalogView, EffectiveShareView};

fn parse_class(s: &str) -> Result<ShareClass, ApiError> {
    ShareClass::from_str(s).map_err(|_| {
        api_error(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            format!("Unknown share class: {}", s),
        )
    })
}

fn parse_currency(s: &str) -> Result<Currency, ApiError> {
    Currency::from_str(s).map_err(|_| {
        api_error(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            format!("Unknown currency: {}", s),
        )
    })
}

fn parse_rail(s: &str) -> Result<PaymentRail, ApiError> {
    PaymentRail::from_str(s).map_err(|_| {
        api_error(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            format!("Unknown payment rail: {}", s),
        )
    })
}

fn user_id_of(claims: &Claims) -> Result<i64, ApiError> {
    claims.user_id().map_err(|e| {
        api_error(
            StatusCode::UNAUTHORIZED,
            error_codes::AUTH_FAILED,
            e.to_string(),
        )
    })
}

fn rail_context(claims: &Claims, user_id: i64) -> RailContext {
    RailContext {
        user_id,
        email: claims.email.clone(),
        name: None,
    }
}

/// Current tier availability and prices
#[utoipa::path(
    get,
    path = "/api/v1/shares/catalog",
    responses((status = 200, description = "Tier availability and prices", body = CatalogView)),
    tag = "shares"
)]
pub async fn get_catalog(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<CatalogView>>, ApiError> {
    let catalog = crate::gateway::cache::load_catalog_cached(state.store().clone())
        .await
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                e,
            )
        })?;
    Ok(Json(ApiResponse::success(catalog)))
}

/// Price a prospective purchase without creating anything
#[utoipa::path(
    post,
    path = "/api/v1/shares/quote",
    request_body = QuoteRequest,
    responses((status = 200, description = "Priced quote", body = Quote)),
    tag = "shares"
)]
pub async fn post_quote(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QuoteRequest>,
) -> Result<Json<ApiResponse<Quote>>, ApiError> {
    req.validate().map_err(validation_error)?;
    let class = parse_class(&req.class)?;
    let currency = parse_currency(&req.currency)?;

    let catalog = state.store().catalog().await.map_err(store_error)?;
    let quote = calculator::quote(&catalog, class, req.quantity, currency)
        .map_err(|e| engine_error(e.into()))?;
    Ok(Json(ApiResponse::success(quote)))
}

async fn initiate(
    state: &AppState,
    claims: &Claims,
    class: ShareClass,
    req: &PurchaseRequest,
) -> Result<Json<ApiResponse<PurchaseResponse>>, ApiError> {
    req.validate().map_err(validation_error)?;
    let currency = parse_currency(&req.currency)?;
    let rail = parse_rail(&req.rail)?;
    if rail.is_manual() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            error_codes::UNSUPPORTED_RAIL,
            "Manual payments go through the proof upload endpoint",
        ));
    }

    let user_id = user_id_of(claims)?;
    let ctx = rail_context(claims, user_id);
    let initiated = state
        .engine
        .initiate_purchase(user_id, class, req.quantity, currency, rail, &ctx, None)
        .await
        .map_err(engine_error)?;

    Ok(Json(ApiResponse::success(PurchaseResponse {
        reference: initiated.transaction.reference.clone(),
        status: initiated.transaction.status.to_string(),
        redirect_url: initiated.redirect_url,
        transaction: initiated.transaction,
    })))
}

/// Start a purchase on a provider-driven rail (card, invoice, on-chain)
pub async fn post_purchase(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<ApiResponse<PurchaseResponse>>, ApiError> {
    let class = parse_class(&req.class)?;
    initiate(&state, &claims, class, &req).await
}

/// Co-founder purchase; the class is fixed regardless of the body
pub async fn post_co_founder_purchase(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<ApiResponse<PurchaseResponse>>, ApiError> {
    initiate(&state, &claims, ShareClass::CoFounder, &req).await
}

/// Manual payment: multipart form carrying the purchase fields plus an
/// uploaded proof-of-payment document
pub async fn post_manual_purchase(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<PurchaseResponse>>, ApiError> {
    let mut class = "regular".to_string();
    let mut quantity: Option<i64> = None;
    let mut currency = "naira".to_string();
    let mut rail = "manual_bank".to_string();
    let mut bank_name: Option<String> = None;
    let mut account_name: Option<String> = None;
    let mut proof: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            e.to_string(),
        )
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "proof" => {
                let file_name = field.file_name().unwrap_or("proof").to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    api_error(
                        StatusCode::BAD_REQUEST,
                        error_codes::INVALID_PARAMETER,
                        e.to_string(),
                    )
                })?;
                proof = Some((file_name, bytes.to_vec()));
            }
            other => {
                let value = field.text().await.map_err(|e| {
                    api_error(
                        StatusCode::BAD_REQUEST,
                        error_codes::INVALID_PARAMETER,
                        e.to_string(),
                    )
                })?;
                match other {
                    "class" => class = value,
                    "quantity" => quantity = value.parse().ok(),
                    "currency" => currency = value,
                    "rail" => rail = value,
                    "bank_name" => bank_name = Some(value),
                    "account_name" => account_name = Some(value),
                    _ => {}
                }
            }
        }
    }

    let quantity = quantity.filter(|q| *q >= 1).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            "quantity must be a positive integer",
        )
    })?;
    let (file_name, bytes) = proof.ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            "A proof-of-payment file is required",
        )
    })?;

    let class = parse_class(&class)?;
    let currency = parse_currency(&currency)?;
    let rail = parse_rail(&rail)?;
    if !rail.is_manual() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            error_codes::UNSUPPORTED_RAIL,
            "This endpoint accepts manual rails only",
        ));
    }

    let handle = state.proofs.store(&file_name, &bytes).await.map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            e.to_string(),
        )
    })?;
    let payload = RailPayload::Manual {
        proof_handle: handle,
        bank_name,
        account_name,
    };

    let user_id = user_id_of(&claims)?;
    let ctx = rail_context(&claims, user_id);
    let initiated = state
        .engine
        .initiate_purchase(user_id, class, quantity, currency, rail, &ctx, Some(payload))
        .await
        .map_err(engine_error)?;

    info!(reference = %initiated.transaction.reference, user_id, "manual proof submitted");
    Ok(Json(ApiResponse::success(PurchaseResponse {
        reference: initiated.transaction.reference.clone(),
        status: initiated.transaction.status.to_string(),
        redirect_url: None,
        transaction: initiated.transaction,
    })))
}

async fn owned_transaction(
    state: &AppState,
    claims: &Claims,
    reference: &str,
) -> Result<Transaction, ApiError> {
    let txn = state
        .store()
        .get_transaction(reference)
        .await
        .map_err(store_error)?
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                error_codes::TRANSACTION_NOT_FOUND,
                format!("Transaction not found: {}", reference),
            )
        })?;
    let user_id = user_id_of(claims)?;
    if txn.user_id != user_id && !claims.is_admin() {
        return Err(api_error(
            StatusCode::FORBIDDEN,
            error_codes::FORBIDDEN,
            "Not your transaction",
        ));
    }
    Ok(txn)
}

/// Submit on-chain transfer evidence and trigger verification
pub async fn post_verify(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OnchainVerifyRequest>,
) -> Result<Json<ApiResponse<SettleResponse>>, ApiError> {
    req.validate().map_err(validation_error)?;
    owned_transaction(&state, &claims, &req.reference).await?;

    let proof = VerifyProof::Onchain {
        tx_hash: req.tx_hash,
        sender_wallet: req.sender_wallet,
    };
    let outcome = state
        .engine
        .settle(&req.reference, proof, "user")
        .await
        .map_err(engine_error)?;

    let txn = outcome.transaction();
    Ok(Json(ApiResponse::success(SettleResponse {
        reference: txn.reference.clone(),
        status: txn.status.to_string(),
        note: txn.status_note.clone(),
    })))
}

/// Re-check a pending card or invoice payment with the provider
pub async fn post_refresh(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(reference): Path<String>,
) -> Result<Json<ApiResponse<SettleResponse>>, ApiError> {
    owned_transaction(&state, &claims, &reference).await?;

    let outcome = state
        .engine
        .settle(&reference, VerifyProof::None, "user")
        .await
        .map_err(engine_error)?;
    let txn = outcome.transaction();
    Ok(Json(ApiResponse::success(SettleResponse {
        reference: txn.reference.clone(),
        status: txn.status.to_string(),
        note: txn.status_note.clone(),
    })))
}

/// Abandon a pending purchase
pub async fn post_cancel(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(reference): Path<String>,
) -> Result<Json<ApiResponse<SettleResponse>>, ApiError> {
    owned_transaction(&state, &claims, &reference).await?;

    let outcome = state
        .engine
        .cancel(&reference, "cancelled by purchaser")
        .await
        .map_err(engine_error)?;
    let txn = outcome.transaction();
    Ok(Json(ApiResponse::success(SettleResponse {
        reference: txn.reference.clone(),
        status: txn.status.to_string(),
        note: txn.status_note.clone(),
    })))
}

/// The caller's holdings with co-founder equivalents
#[utoipa::path(
    get,
    path = "/api/v1/shares/me",
    responses((status = 200, description = "Effective share view", body = EffectiveShareView)),
    security(("bearer" = [])),
    tag = "shares"
)]
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiResponse<EffectiveShareView>>, ApiError> {
    let user_id = user_id_of(&claims)?;
    let catalog = state.store().catalog().await.map_err(store_error)?;
    let txns = state
        .store()
        .list_by_user(user_id, None)
        .await
        .map_err(store_error)?;
    Ok(Json(ApiResponse::success(view::project_user(
        user_id,
        &txns,
        catalog.co_founder_to_regular_ratio,
    ))))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub class: Option<String>,
}

/// The caller's purchase history
pub async fn get_transactions(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<Transaction>>>, ApiError> {
    let user_id = user_id_of(&claims)?;
    let class = query.class.as_deref().map(parse_class).transpose()?;
    let txns = state
        .store()
        .list_by_user(user_id, class)
        .await
        .map_err(store_error)?;
    Ok(Json(ApiResponse::success(txns)))
}

//! Admin reconciliation surface
//!
//! Every route here sits behind the admin-role guard. The verifier id
//! recorded on decisions and reversals is the admin's own user id.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::catalog::{PriceUpdate, PricingCatalog, TierLevel};
use crate::gateway::auth::Claims;
use crate::gateway::state::AppState;
use crate::gateway::types::{
    ApiError, ApiResponse, CoFounderPriceRequest, DecideRequest, GrantRequest, ListQuery,
    ReverseRequest, SettleResponse, TierPriceRequest, api_error, engine_error, error_codes,
    store_error, validation_error,
};
use crate::journal::{JournalFilter, JournalPage, PaymentRail, ShareClass, Transaction, TxStatus};
use crate::ledger::LedgerEntry;
use crate::money::Currency;
use crate::view::{self, AdminOverview, LedgerDrift};

fn admin_id(claims: &Claims) -> Result<i64, ApiError> {
    claims.user_id().map_err(|e| {
        api_error(
            StatusCode::UNAUTHORIZED,
            error_codes::AUTH_FAILED,
            e.to_string(),
        )
    })
}

fn bad_param(msg: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
}

/// Journal stats plus live catalog counters
#[utoipa::path(
    get,
    path = "/api/v1/admin/overview",
    responses((status = 200, description = "Dashboard aggregates", body = AdminOverview)),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn get_overview(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<AdminOverview>>, ApiError> {
    let (stats, catalog) = tokio::try_join!(state.store().journal_stats(), state.store().catalog())
        .map_err(store_error)?;
    Ok(Json(ApiResponse::success(AdminOverview {
        stats,
        catalog: view::project_catalog(&catalog),
    })))
}

/// Paged journal listing with optional status/rail/class filters
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<JournalPage>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|s| TxStatus::from_str(s).map_err(|_| bad_param(format!("Unknown status: {}", s))))
        .transpose()?;
    let rail = query
        .rail
        .as_deref()
        .map(|s| PaymentRail::from_str(s).map_err(|_| bad_param(format!("Unknown rail: {}", s))))
        .transpose()?;
    let class = query
        .class
        .as_deref()
        .map(|s| ShareClass::from_str(s).map_err(|_| bad_param(format!("Unknown class: {}", s))))
        .transpose()?;

    let filter = JournalFilter {
        status,
        rail,
        class,
        page: query.page.unwrap_or(1),
        limit: query.limit.unwrap_or(50),
    };
    let page = state.store().list_page(&filter).await.map_err(store_error)?;
    Ok(Json(ApiResponse::success(page)))
}

pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<Json<ApiResponse<Transaction>>, ApiError> {
    let txn = state
        .store()
        .get_transaction(&reference)
        .await
        .map_err(store_error)?
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                error_codes::TRANSACTION_NOT_FOUND,
                format!("Transaction not found: {}", reference),
            )
        })?;
    Ok(Json(ApiResponse::success(txn)))
}

/// Approve or reject a pending transaction (manual rails and held
/// on-chain transfers)
pub async fn post_decide(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(reference): Path<String>,
    Json(req): Json<DecideRequest>,
) -> Result<Json<ApiResponse<SettleResponse>>, ApiError> {
    let verifier_id = admin_id(&claims)?;
    let outcome = state
        .engine
        .admin_decide(&reference, verifier_id, req.approved, req.note)
        .await
        .map_err(engine_error)?;
    let txn = outcome.transaction();
    Ok(Json(ApiResponse::success(SettleResponse {
        reference: txn.reference.clone(),
        status: txn.status.to_string(),
        note: txn.status_note.clone(),
    })))
}

/// Reopen a completed transaction, giving its supply back
pub async fn post_reverse(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(reference): Path<String>,
    Json(req): Json<ReverseRequest>,
) -> Result<Json<ApiResponse<SettleResponse>>, ApiError> {
    req.validate().map_err(validation_error)?;
    let verifier_id = admin_id(&claims)?;
    let outcome = state
        .engine
        .reverse(&reference, verifier_id, &req.note)
        .await
        .map_err(engine_error)?;
    let txn = outcome.transaction();
    Ok(Json(ApiResponse::success(SettleResponse {
        reference: txn.reference.clone(),
        status: txn.status.to_string(),
        note: txn.status_note.clone(),
    })))
}

pub async fn delete_transaction(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(reference): Path<String>,
) -> Result<Json<ApiResponse<bool>>, ApiError> {
    let verifier_id = admin_id(&claims)?;
    let removed = state.engine.delete(&reference).await.map_err(engine_error)?;
    info!(%reference, verifier_id, removed, "journal record deleted");
    Ok(Json(ApiResponse::success(removed)))
}

/// Credit shares without payment; always recorded through the journal
pub async fn post_grant(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GrantRequest>,
) -> Result<Json<ApiResponse<Transaction>>, ApiError> {
    req.validate().map_err(validation_error)?;
    let granted_by = admin_id(&claims)?;
    let class = ShareClass::from_str(&req.class)
        .map_err(|_| bad_param(format!("Unknown share class: {}", req.class)))?;
    let currency = Currency::from_str(&req.currency)
        .map_err(|_| bad_param(format!("Unknown currency: {}", req.currency)))?;

    let txn = state
        .engine
        .grant(granted_by, req.user_id, class, req.quantity, currency, &req.note)
        .await
        .map_err(engine_error)?;
    Ok(Json(ApiResponse::success(txn)))
}

/// Change a tier's prices. Existing quotes and completed records keep
/// the price they were written with.
pub async fn put_tier_price(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TierPriceRequest>,
) -> Result<Json<ApiResponse<PricingCatalog>>, ApiError> {
    let level = TierLevel::from_str(&req.level)
        .map_err(|_| bad_param(format!("Unknown tier: {}", req.level)))?;
    let update = PriceUpdate {
        price_naira: req.price_naira,
        price_usdt: req.price_usdt,
    };
    let catalog = state
        .store()
        .update_tier_price(level, update)
        .await
        .map_err(store_error)?;
    Ok(Json(ApiResponse::success(catalog)))
}

pub async fn put_co_founder_price(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CoFounderPriceRequest>,
) -> Result<Json<ApiResponse<PricingCatalog>>, ApiError> {
    let update = PriceUpdate {
        price_naira: req.price_naira,
        price_usdt: req.price_usdt,
    };
    let catalog = state
        .store()
        .update_co_founder_price(update)
        .await
        .map_err(store_error)?;
    Ok(Json(ApiResponse::success(catalog)))
}

#[derive(Debug, Serialize)]
pub struct UserLedgerResponse {
    pub view: view::EffectiveShareView,
    pub entries: Vec<LedgerEntry>,
    /// Present only when the mirror disagrees with the journal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<LedgerDrift>,
}

/// A user's ledger with the journal-derived view and a drift check
pub async fn get_user_ledger(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiResponse<UserLedgerResponse>>, ApiError> {
    let (catalog, ledger, txns) = tokio::try_join!(
        state.store().catalog(),
        state.store().user_ledger(user_id),
        state.store().list_by_user(user_id, None),
    )
    .map_err(store_error)?;

    let view = view::project_user(user_id, &txns, catalog.co_founder_to_regular_ratio);
    let drift = view::check_ledger(&view, &ledger);
    Ok(Json(ApiResponse::success(UserLedgerResponse {
        view,
        entries: ledger.entries,
        drift,
    })))
}

/// Download an uploaded proof-of-payment document
pub async fn get_proof(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state.proofs.load(&handle).await.map_err(|_| {
        api_error(
            StatusCode::NOT_FOUND,
            error_codes::PROOF_NOT_FOUND,
            format!("Proof not found: {}", handle),
        )
    })?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", handle),
            ),
        ],
        bytes,
    ))
}

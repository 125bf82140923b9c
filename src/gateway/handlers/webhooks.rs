//! Provider webhook intake
//!
//! Webhooks are hints, not verdicts: both handlers re-verify with the
//! provider through the engine before any shares move, so a forged or
//! replayed callback can never credit a purchase by itself.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::gateway::state::AppState;
use crate::gateway::types::{ApiError, ApiResponse, api_error, error_codes};
use crate::rails::VerifyProof;
use crate::rails::invoice::verify_webhook_signature;

#[derive(Debug, Deserialize)]
struct CardEvent {
    event: String,
    data: CardEventData,
}

#[derive(Debug, Deserialize)]
struct CardEventData {
    reference: String,
}

/// Card processor callback. Only the reference is trusted; the verdict
/// comes from re-querying the processor.
pub async fn post_card_webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let event: CardEvent = serde_json::from_slice(&body).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            e.to_string(),
        )
    })?;

    info!(event = %event.event, reference = %event.data.reference, "card webhook received");
    match state
        .engine
        .settle(&event.data.reference, VerifyProof::None, "webhook")
        .await
    {
        Ok(outcome) => {
            info!(
                reference = %event.data.reference,
                status = %outcome.transaction().status,
                "card webhook processed"
            );
        }
        Err(e) => {
            // Always 200 so the processor stops retrying; the sweeper
            // re-drives anything left pending
            warn!(reference = %event.data.reference, error = %e, "card webhook settle failed");
        }
    }
    Ok(Json(ApiResponse::success(())))
}

#[derive(Debug, Deserialize)]
struct InvoiceEvent {
    #[serde(alias = "orderId")]
    order_id: String,
    #[serde(default)]
    status: String,
}

/// Invoice provider callback, authenticated by an HMAC signature over
/// the raw body
pub async fn post_invoice_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let signature = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            api_error(
                StatusCode::UNAUTHORIZED,
                error_codes::INVALID_SIGNATURE,
                "Missing webhook signature",
            )
        })?;
    if !verify_webhook_signature(&state.invoice_webhook_secret, &body, signature) {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            error_codes::INVALID_SIGNATURE,
            "Webhook signature mismatch",
        ));
    }

    let event: InvoiceEvent = serde_json::from_slice(&body).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            e.to_string(),
        )
    })?;

    let Some(txn) = state
        .store()
        .find_by_order_id(&event.order_id)
        .await
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                e.to_string(),
            )
        })?
    else {
        warn!(order_id = %event.order_id, "invoice webhook for unknown order");
        return Ok(Json(ApiResponse::success(())));
    };

    info!(order_id = %event.order_id, reference = %txn.reference, status = %event.status, "invoice webhook received");
    match state
        .engine
        .settle(&txn.reference, VerifyProof::None, "webhook")
        .await
    {
        Ok(outcome) => {
            info!(
                reference = %txn.reference,
                status = %outcome.transaction().status,
                "invoice webhook processed"
            );
        }
        Err(e) => {
            warn!(reference = %txn.reference, error = %e, "invoice webhook settle failed");
        }
    }
    Ok(Json(ApiResponse::success(())))
}

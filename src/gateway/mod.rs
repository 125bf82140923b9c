//! HTTP Gateway
//!
//! Route map:
//! - `/api/v1/shares/*`   purchase surface (JWT)
//! - `/api/v1/cofounder/*` co-founder purchase surface (JWT)
//! - `/api/v1/admin/*`    reconciliation surface (JWT + admin role)
//! - `/api/v1/webhooks/*` provider callbacks (signature-checked, no JWT)

pub mod auth;
pub mod cache;
pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/shares/catalog", get(handlers::shares::get_catalog))
        .route("/shares/quote", post(handlers::shares::post_quote));

    let user_routes = Router::new()
        .route("/shares/purchase", post(handlers::shares::post_purchase))
        .route("/shares/manual", post(handlers::shares::post_manual_purchase))
        .route("/shares/verify", post(handlers::shares::post_verify))
        .route(
            "/shares/{reference}/refresh",
            post(handlers::shares::post_refresh),
        )
        .route(
            "/shares/{reference}/cancel",
            post(handlers::shares::post_cancel),
        )
        .route("/shares/me", get(handlers::shares::get_me))
        .route(
            "/shares/transactions",
            get(handlers::shares::get_transactions),
        )
        .route(
            "/cofounder/purchase",
            post(handlers::shares::post_co_founder_purchase),
        )
        .layer(from_fn_with_state(state.clone(), auth::jwt_auth_middleware));

    let admin_routes = Router::new()
        .route("/overview", get(handlers::admin::get_overview))
        .route("/transactions", get(handlers::admin::list_transactions))
        .route(
            "/transactions/{reference}",
            get(handlers::admin::get_transaction),
        )
        .route(
            "/transactions/{reference}",
            delete(handlers::admin::delete_transaction),
        )
        .route(
            "/transactions/{reference}/decide",
            post(handlers::admin::post_decide),
        )
        .route(
            "/transactions/{reference}/reverse",
            post(handlers::admin::post_reverse),
        )
        .route("/grants", post(handlers::admin::post_grant))
        .route("/prices/tier", put(handlers::admin::put_tier_price))
        .route(
            "/prices/cofounder",
            put(handlers::admin::put_co_founder_price),
        )
        .route("/users/{user_id}/ledger", get(handlers::admin::get_user_ledger))
        .route("/proofs/{handle}", get(handlers::admin::get_proof))
        .layer(axum::middleware::from_fn(auth::require_admin_middleware))
        .layer(from_fn_with_state(state.clone(), auth::jwt_auth_middleware));

    let webhook_routes = Router::new()
        .route("/card", post(handlers::webhooks::post_card_webhook))
        .route("/invoice", post(handlers::webhooks::post_invoice_webhook));

    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        .nest("/api/v1", public_routes)
        .nest("/api/v1", user_routes)
        .nest("/api/v1/admin", admin_routes)
        .nest("/api/v1/webhooks", webhook_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

pub async fn run_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("gateway listening on {}", addr);
    info!("swagger ui at http://{}/docs", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

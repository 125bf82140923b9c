pub mod admin;
pub mod shares;
pub mod webhooks;

use axum::Json;
use serde::Serialize;

use super::types::ApiResponse;

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub status: &'static str,
    pub version: &'static str,
    pub git_hash: &'static str,
}

pub async fn health_check() -> Json<ApiResponse<HealthData>> {
    Json(ApiResponse::success(HealthData {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        git_hash: env!("GIT_HASH"),
    }))
}

use axum::{extract::State, response::Json};
use leasewatch_core::api_types::ApiResponse;
use leasewatch_model::SourceInfo;

use crate::infra::app_state::AppState;

/// Registered sources with a fresh health check for each.
pub async fn list_sources_handler(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<SourceInfo>>> {
    Json(ApiResponse::success(state.coordinator().source_catalog().await))
}

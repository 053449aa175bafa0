use axum::{extract::State, response::Json};
use leasewatch_core::{api_types::ApiResponse, scan::settings::check_settings};
use leasewatch_model::ScanSettings;
use tracing::info;

use crate::errors::AppResult;
use crate::infra::app_state::AppState;

pub async fn get_settings_handler(
    State(state): State<AppState>,
) -> Json<ApiResponse<ScanSettings>> {
    Json(ApiResponse::success(state.settings().get().await))
}

/// Replaces the stored settings. Every enabled source must be registered.
pub async fn put_settings_handler(
    State(state): State<AppState>,
    Json(settings): Json<ScanSettings>,
) -> AppResult<Json<ApiResponse<ScanSettings>>> {
    check_settings(&settings, state.coordinator().registry())?;
    let stored = state.settings().put(settings).await;
    info!(
        sources = stored.enabled_sources.len(),
        frequency = ?stored.frequency,
        "scan settings updated"
    );
    Ok(Json(
        ApiResponse::success(stored).with_message("settings saved".to_string()),
    ))
}

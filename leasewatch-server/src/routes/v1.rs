use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    AppState,
    handlers::{
        scan::{
            active_scans_handler, cancel_scan_handler, scan_detail_handler,
            scan_events_handler, scan_events_sse_handler,
            scan_history_handler, scan_insights_handler, scan_status_handler,
            start_scan_handler,
        },
        settings::{get_settings_handler, put_settings_handler},
        sources::list_sources_handler,
    },
};

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .merge(create_scan_routes())
        .route(
            "/settings",
            get(get_settings_handler).put(put_settings_handler),
        )
        .route("/sources", get(list_sources_handler))
}

fn create_scan_routes() -> Router<AppState> {
    Router::new()
        .route("/scans", post(start_scan_handler))
        .route("/scans/active", get(active_scans_handler))
        .route("/scans/history", get(scan_history_handler))
        .route("/scans/insights", get(scan_insights_handler))
        .route("/scans/{id}", get(scan_status_handler))
        .route("/scans/{id}/cancel", post(cancel_scan_handler))
        .route("/scans/{id}/events", get(scan_events_handler))
        .route("/scans/{id}/events/stream", get(scan_events_sse_handler))
        .route("/scans/{id}/detail", get(scan_detail_handler))
}

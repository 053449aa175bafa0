use axum::response::sse::{Event, KeepAlive};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Sse},
};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use leasewatch_core::{
    api_types::{ApiResponse, CancelAck, ScanAccepted},
    scan::StreamFrame,
};
use leasewatch_model::{
    HistoryFilter, HistoryPage, LiveUpdate, RunState, ScanConfiguration,
    ScanInsights, ScanRunId, ScanRunRecord, ScanStatusView,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{convert::Infallible, time::Duration};
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;

const LAST_EVENT_ID_HEADER: &str = "last-event-id";
const DEFAULT_INSIGHTS_WINDOW_DAYS: u32 = 30;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub from_seq: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ScanEventsResponse {
    pub run_id: ScanRunId,
    pub events: Vec<LiveUpdate>,
    pub last_sequence: u64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub state: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub page_token: Option<String>,
}

impl HistoryQuery {
    fn filter(&self) -> AppResult<HistoryFilter> {
        let state = self
            .state
            .as_deref()
            .map(str::parse::<RunState>)
            .transpose()
            .map_err(|_| {
                AppError::bad_request(format!(
                    "unknown run state `{}`",
                    self.state.as_deref().unwrap_or_default()
                ))
                .with_code("invalid_state_filter")
            })?;
        Ok(HistoryFilter {
            state,
            from: self.from,
            to: self.to,
            limit: self.limit,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct InsightsQuery {
    pub window_days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ActiveScansResponse {
    pub scans: Vec<ScanStatusView>,
    pub count: usize,
}

/// Starts a scan. An empty body, `null` or `{}` uses the configuration
/// derived from the stored settings.
pub async fn start_scan_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let coordinator = state.coordinator();
    let run_id = match parse_configuration(&body)? {
        Some(config) => coordinator.start_scan(config).await?,
        None => {
            let settings = state.settings().get().await;
            coordinator.start_default_scan(&settings).await?
        }
    };
    info!(run = %run_id, "scan started via api");

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(ScanAccepted { run_id })),
    ))
}

fn parse_configuration(body: &[u8]) -> AppResult<Option<ScanConfiguration>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(body).map_err(|err| {
        AppError::bad_request(format!("invalid request body: {err}"))
            .with_code("invalid_body")
    })?;
    let is_default = match &value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if is_default {
        return Ok(None);
    }
    serde_json::from_value(value).map(Some).map_err(|err| {
        AppError::bad_request(format!("invalid scan configuration: {err}"))
            .with_code("invalid_body")
    })
}

pub async fn active_scans_handler(
    State(state): State<AppState>,
) -> Json<ApiResponse<ActiveScansResponse>> {
    let scans = state.coordinator().active_runs().await;
    let count = scans.len();
    Json(ApiResponse::success(ActiveScansResponse { scans, count }))
}

pub async fn scan_status_handler(
    State(state): State<AppState>,
    Path(run_id): Path<ScanRunId>,
) -> AppResult<Json<ApiResponse<ScanStatusView>>> {
    let view = state.coordinator().status(run_id).await?;
    Ok(Json(ApiResponse::success(view)))
}

pub async fn cancel_scan_handler(
    State(state): State<AppState>,
    Path(run_id): Path<ScanRunId>,
) -> AppResult<impl IntoResponse> {
    let ack = state.coordinator().cancel_scan(run_id).await?;
    let message = if ack.already_terminal {
        "scan had already finished"
    } else {
        "cancellation requested"
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(
            ApiResponse::<CancelAck>::success(ack)
                .with_message(message.to_string()),
        ),
    ))
}

pub async fn scan_events_handler(
    State(state): State<AppState>,
    Path(run_id): Path<ScanRunId>,
    Query(query): Query<EventsQuery>,
) -> AppResult<Json<ApiResponse<ScanEventsResponse>>> {
    let offset = query.from_seq.unwrap_or(0);
    let events = state.coordinator().events(run_id, offset).await?;
    let last_sequence = events.last().map(|e| e.seq).unwrap_or(offset);
    Ok(Json(ApiResponse::success(ScanEventsResponse {
        run_id,
        events,
        last_sequence,
    })))
}

/// Live progress over SSE. Resumes after `Last-Event-ID` (or `from_seq`)
/// and ends with a `complete` frame carrying the terminal state.
pub async fn scan_events_sse_handler(
    State(state): State<AppState>,
    Path(run_id): Path<ScanRunId>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let last_sequence = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .or(query.from_seq)
        .unwrap_or(0);

    let frames = state.coordinator().subscribe(run_id, last_sequence).await?;
    let stream = frames
        .filter_map(|frame| async move { frame_to_event(frame) })
        .map(Ok::<Event, Infallible>);

    Ok(Sse::new(stream).keep_alive(default_keep_alive()))
}

pub async fn scan_detail_handler(
    State(state): State<AppState>,
    Path(run_id): Path<ScanRunId>,
) -> AppResult<Json<ApiResponse<ScanRunRecord>>> {
    let record = state.coordinator().detail(run_id).await?;
    Ok(Json(ApiResponse::success(record)))
}

pub async fn scan_history_handler(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<ApiResponse<HistoryPage>>> {
    let filter = query.filter()?;
    let page = state
        .coordinator()
        .history(&filter, query.page_token.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

pub async fn scan_insights_handler(
    State(state): State<AppState>,
    Query(query): Query<InsightsQuery>,
) -> AppResult<Json<ApiResponse<ScanInsights>>> {
    let window = query.window_days.unwrap_or(DEFAULT_INSIGHTS_WINDOW_DAYS);
    let insights = state.coordinator().insights(window).await?;
    Ok(Json(ApiResponse::success(insights)))
}

fn frame_to_event(frame: StreamFrame) -> Option<Event> {
    match frame {
        StreamFrame::Update(update) => {
            let id = update.seq.to_string();
            match serde_json::to_string(&update) {
                Ok(data) => Some(Event::default().event("update").id(id).data(data)),
                Err(err) => {
                    warn!(seq = update.seq, "failed to encode live update: {err}");
                    None
                }
            }
        }
        StreamFrame::Closed(terminal) => {
            let data = serde_json::json!({ "state": terminal }).to_string();
            Some(Event::default().event("complete").data(data))
        }
    }
}

fn default_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keep-alive")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bodies_use_defaults() {
        for body in [&b""[..], b"  \n", b"null", b"{}", b" { } "] {
            assert!(parse_configuration(body).expect("accepted").is_none());
        }
    }

    #[test]
    fn malformed_bodies_are_bad_requests() {
        for body in [&b"{"[..], b"[1,2]", br#"{"sources": 3}"#] {
            let err = parse_configuration(body).expect_err("rejected");
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn unknown_state_filter_is_rejected() {
        let query = HistoryQuery {
            state: Some("exploded".into()),
            from: None,
            to: None,
            limit: None,
            page_token: None,
        };
        assert!(query.filter().is_err());

        let query = HistoryQuery {
            state: Some("cancelled".into()),
            ..query
        };
        assert_eq!(
            query.filter().expect("valid").state,
            Some(RunState::Cancelled)
        );
    }
}

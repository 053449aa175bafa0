mod support;

use std::{sync::Arc, time::Duration};

use axum::http::{HeaderName, HeaderValue, StatusCode};
use leasewatch_core::scan::{SourceRegistry, connectors::ScriptedConnector};
use leasewatch_model::ScanRunId;
use serde_json::{Value, json};

use support::{
    build_test_app, build_test_app_with, scan_body, start_scan,
    wait_for_terminal,
};

#[tokio::test]
async fn scan_runs_to_completion_despite_one_failed_source() {
    let app = build_test_app().expect("app");
    let run_id = start_scan(&app.server, &["dnb", "moodys", "news"]).await;
    wait_for_terminal(&app.state, run_id).await;

    let response = app.server.get(&format!("/api/v1/scans/{run_id}")).await;
    response.assert_status_ok();
    let body: Value = response.json();
    let view = &body["data"];
    assert_eq!(body["status"], "success");
    assert_eq!(view["state"], "complete");
    assert_eq!(view["metrics"]["tenants_scanned"], 15);

    let news = view["sources"]
        .as_array()
        .expect("sources")
        .iter()
        .find(|s| s["id"] == "news")
        .expect("news status");
    assert_eq!(news["state"], "error");
    assert_eq!(news["error"]["kind"], "unavailable");
    assert!(news["records_found"].is_null());

    let detail: Value = app
        .server
        .get(&format!("/api/v1/scans/{run_id}/detail"))
        .await
        .json();
    assert_eq!(detail["data"]["tenant_results"].as_array().map(Vec::len), Some(15));
}

#[tokio::test]
async fn empty_body_scans_the_enabled_sources() {
    let app = build_test_app().expect("app");

    let response = app.server.post("/api/v1/scans").await;
    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    let run_id: ScanRunId =
        serde_json::from_value(body["data"]["run_id"].clone()).expect("id");
    wait_for_terminal(&app.state, run_id).await;

    let detail: Value = app
        .server
        .get(&format!("/api/v1/scans/{run_id}/detail"))
        .await
        .json();
    assert_eq!(
        detail["data"]["configuration"]["sources"],
        json!(["dnb", "moodys"])
    );
    assert_eq!(detail["data"]["state"], "complete");
}

#[tokio::test]
async fn invalid_configurations_are_rejected() {
    let app = build_test_app().expect("app");

    let response = app
        .server
        .post("/api/v1/scans")
        .json(&scan_body(&[]))
        .expect_failure()
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "no_sources_enabled");

    let response = app
        .server
        .post("/api/v1/scans")
        .json(&scan_body(&["dnb", "lexis"]))
        .expect_failure()
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "unknown_source");

    let response = app
        .server
        .post("/api/v1/scans")
        .text("{ not json")
        .expect_failure()
        .await;
    response.assert_status_bad_request();

    assert!(app.state.coordinator().active_runs().await.is_empty());
}

#[tokio::test]
async fn unknown_runs_are_not_found() {
    let app = build_test_app().expect("app");
    let missing = ScanRunId::new();

    for path in [
        format!("/api/v1/scans/{missing}"),
        format!("/api/v1/scans/{missing}/detail"),
        format!("/api/v1/scans/{missing}/events"),
    ] {
        let response = app.server.get(&path).expect_failure().await;
        response.assert_status_not_found();
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "scan_not_found", "{path}");
    }

    app.server
        .post(&format!("/api/v1/scans/{missing}/cancel"))
        .expect_failure()
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn cancel_stops_a_running_scan_and_is_idempotent() {
    let app = build_test_app().expect("app");
    let run_id = start_scan(&app.server, &["dnb", "courts"]).await;

    // courts collects until cancelled
    tokio::time::sleep(Duration::from_millis(50)).await;
    let active: Value = app.server.get("/api/v1/scans/active").await.json();
    assert_eq!(active["data"]["count"], 1);

    let response = app
        .server
        .get(&format!("/api/v1/scans/{run_id}/detail"))
        .expect_failure()
        .await;
    response.assert_status(StatusCode::CONFLICT);

    let response = app
        .server
        .post(&format!("/api/v1/scans/{run_id}/cancel"))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["data"]["already_terminal"], false);
    assert_eq!(body["message"], "cancellation requested");

    wait_for_terminal(&app.state, run_id).await;

    let detail: Value = app
        .server
        .get(&format!("/api/v1/scans/{run_id}/detail"))
        .await
        .json();
    assert_eq!(detail["data"]["state"], "cancelled");
    let last_seq = detail["data"]["events"]
        .as_array()
        .and_then(|events| events.last())
        .map(|e| e["seq"].clone());

    let body: Value = app
        .server
        .post(&format!("/api/v1/scans/{run_id}/cancel"))
        .await
        .json();
    assert_eq!(body["data"]["already_terminal"], true);

    let again: Value = app
        .server
        .get(&format!("/api/v1/scans/{run_id}/detail"))
        .await
        .json();
    assert_eq!(again["data"]["state"], "cancelled");
    assert_eq!(
        again["data"]["events"]
            .as_array()
            .and_then(|events| events.last())
            .map(|e| e["seq"].clone()),
        last_seq
    );
}

#[tokio::test]
async fn events_resume_after_offset() {
    let app = build_test_app().expect("app");
    let run_id = start_scan(&app.server, &["dnb", "moodys"]).await;
    wait_for_terminal(&app.state, run_id).await;

    let all: Value = app
        .server
        .get(&format!("/api/v1/scans/{run_id}/events"))
        .await
        .json();
    let seqs: Vec<u64> = all["data"]["events"]
        .as_array()
        .expect("events")
        .iter()
        .filter_map(|e| e["seq"].as_u64())
        .collect();
    assert!(seqs.len() >= 15);
    assert_eq!(seqs, (1..=seqs.len() as u64).collect::<Vec<_>>());

    let tail: Value = app
        .server
        .get(&format!("/api/v1/scans/{run_id}/events"))
        .add_query_param("from_seq", 5)
        .await
        .json();
    let first = tail["data"]["events"][0]["seq"].as_u64();
    assert_eq!(first, Some(6));
    assert_eq!(
        tail["data"]["last_sequence"].as_u64(),
        seqs.last().copied()
    );
}

#[tokio::test]
async fn sse_replays_a_finished_run_and_honours_last_event_id() {
    let app = build_test_app().expect("app");
    let run_id = start_scan(&app.server, &["dnb"]).await;
    wait_for_terminal(&app.state, run_id).await;

    let response = app
        .server
        .get(&format!("/api/v1/scans/{run_id}/events/stream"))
        .await;
    response.assert_status_ok();
    let body = response.text();
    assert!(body.contains("event: update"), "missing updates: {body}");
    assert!(body.contains("\nid: 1\n"), "missing first update: {body}");
    assert!(body.contains("event: complete"), "missing terminal frame");
    assert!(body.contains(r#"{"state":"complete"}"#));

    let response = app
        .server
        .get(&format!("/api/v1/scans/{run_id}/events/stream"))
        .add_header(
            HeaderName::from_static("last-event-id"),
            HeaderValue::from_static("3"),
        )
        .await;
    let body = response.text();
    assert!(!body.contains("\nid: 3\n"), "resume repeated an update");
    assert!(body.contains("\nid: 4\n"), "resume skipped an update");
}

#[tokio::test]
async fn sse_follows_a_live_run_until_it_closes() {
    let registry = SourceRegistry::new().with(Arc::new(
        ScriptedConnector::succeeding("dnb", 6)
            .with_item_delay(Duration::from_millis(20)),
    ));
    let app = build_test_app_with(registry).expect("app");
    let run_id = start_scan(&app.server, &["dnb"]).await;

    let response = app
        .server
        .get(&format!("/api/v1/scans/{run_id}/events/stream"))
        .await;
    response.assert_status_ok();
    let body = response.text();

    let updates = body.matches("event: update").count();
    assert!(updates >= 6, "expected every finding, got {updates}");
    assert!(body.trim_end().ends_with(r#"data: {"state":"complete"}"#));
}

#[tokio::test]
async fn history_pages_newest_first() {
    let app = build_test_app().expect("app");
    let mut runs = Vec::new();
    for _ in 0..3 {
        let run_id = start_scan(&app.server, &["sec"]).await;
        wait_for_terminal(&app.state, run_id).await;
        runs.push(run_id);
    }

    let first: Value = app
        .server
        .get("/api/v1/scans/history")
        .add_query_param("limit", 2)
        .await
        .json();
    let items = first["data"]["items"].as_array().expect("items");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["id"], json!(runs[2]));
    let token = first["data"]["next_page_token"]
        .as_str()
        .expect("more pages")
        .to_string();

    let second: Value = app
        .server
        .get("/api/v1/scans/history")
        .add_query_param("limit", 2)
        .add_query_param("page_token", &token)
        .await
        .json();
    let items = second["data"]["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], json!(runs[0]));
    assert!(second["data"]["next_page_token"].is_null());

    let cancelled: Value = app
        .server
        .get("/api/v1/scans/history")
        .add_query_param("state", "cancelled")
        .await
        .json();
    assert!(cancelled["data"]["items"].as_array().expect("items").is_empty());
}

#[tokio::test]
async fn history_rejects_bad_queries() {
    let app = build_test_app().expect("app");

    let response = app
        .server
        .get("/api/v1/scans/history")
        .add_query_param("page_token", "not-a-token")
        .expect_failure()
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "invalid_page_token");

    let response = app
        .server
        .get("/api/v1/scans/history")
        .add_query_param("state", "exploded")
        .expect_failure()
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "invalid_state_filter");
}

#[tokio::test]
async fn insights_aggregate_stored_runs() {
    let app = build_test_app().expect("app");
    let run_id = start_scan(&app.server, &["dnb", "moodys"]).await;
    wait_for_terminal(&app.state, run_id).await;

    let body: Value = app
        .server
        .get("/api/v1/scans/insights")
        .add_query_param("window_days", 7)
        .await
        .json();
    let insights = &body["data"];
    assert_eq!(insights["window_days"], 7);
    assert_eq!(insights["total_runs"], 1);
    assert_eq!(insights["complete_runs"], 1);
    assert_eq!(insights["success_rate"], 1.0);
    assert_eq!(insights["total_tenants_scanned"], 15);
}

#[tokio::test]
async fn oversized_insights_window_is_a_bad_request() {
    let app = build_test_app().expect("app");

    let response = app
        .server
        .get("/api/v1/scans/insights")
        .add_query_param("window_days", 4_000_000_000u32)
        .expect_failure()
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "insights_window_out_of_range");

    app.server
        .get("/api/v1/scans/insights")
        .add_query_param("window_days", 3_650)
        .await
        .assert_status_ok();
}

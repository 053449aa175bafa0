mod support;

use serde_json::{Value, json};

use support::build_test_app;

#[tokio::test]
async fn settings_round_trip_through_the_api() {
    let app = build_test_app().expect("app");

    let body: Value = app.server.get("/api/v1/settings").await.json();
    assert_eq!(body["data"]["enabled_sources"], json!(["dnb", "moodys"]));
    assert_eq!(body["data"]["default_lookback_days"], 7);

    let response = app
        .server
        .put("/api/v1/settings")
        .json(&json!({
            "enabled_sources": ["sec", "courts"],
            "frequency": "daily",
            "notify_on_alerts": false,
            "default_lookback_days": 14
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["message"], "settings saved");

    let body: Value = app.server.get("/api/v1/settings").await.json();
    assert_eq!(body["data"]["enabled_sources"], json!(["courts", "sec"]));
    assert_eq!(body["data"]["frequency"], "daily");
    assert_eq!(body["data"]["default_lookback_days"], 14);
}

#[tokio::test]
async fn settings_with_unregistered_source_are_rejected() {
    let app = build_test_app().expect("app");

    let response = app
        .server
        .put("/api/v1/settings")
        .json(&json!({ "enabled_sources": ["dnb", "lexis"] }))
        .expect_failure()
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "unknown_source");

    let body: Value = app.server.get("/api/v1/settings").await.json();
    assert_eq!(body["data"]["enabled_sources"], json!(["dnb", "moodys"]));
}

#[tokio::test]
async fn settings_with_oversized_lookback_are_rejected() {
    let app = build_test_app().expect("app");

    let response = app
        .server
        .put("/api/v1/settings")
        .json(&json!({
            "enabled_sources": ["dnb"],
            "default_lookback_days": 4_000_000_000u32
        }))
        .expect_failure()
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "lookback_out_of_range");

    let body: Value = app.server.get("/api/v1/settings").await.json();
    assert_eq!(body["data"]["default_lookback_days"], 7);
}

#[tokio::test]
async fn source_catalog_reports_health() {
    let app = build_test_app().expect("app");

    let body: Value = app.server.get("/api/v1/sources").await.json();
    let sources = body["data"].as_array().expect("sources");
    assert_eq!(sources.len(), 5);
    let dnb = sources
        .iter()
        .find(|s| s["id"] == "dnb")
        .expect("dnb listed");
    assert_eq!(dnb["name"], "D&B");
    assert_eq!(dnb["health"]["status"], "healthy");
}

#[tokio::test]
async fn health_and_ping() {
    let app = build_test_app().expect("app");

    let body: Value = app.server.get("/health").await.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_scans"], 0);
    assert_eq!(body["sources"], 5);
    assert_eq!(body["shutting_down"], false);

    app.server.get("/ping").await.assert_text("pong");
}

#![allow(dead_code)]

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum_test::TestServer;
use chrono::{Duration as ChronoDuration, Utc};
use leasewatch_core::scan::{
    InMemoryScanHistoryStore, InMemorySettingsStore, OrchestratorConfig,
    ScanCoordinator, SourceRegistry,
    connectors::{ScriptOutcome, ScriptedConnector},
};
use leasewatch_model::{
    DateRange, ScanRunId, ScanSettings, SourceErrorKind, SourceId,
};
use leasewatch_server::{AppState, create_app, infra::config::Config};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
}

/// Three healthy sources, one that cannot connect and one that collects
/// until cancelled.
pub fn scripted_registry() -> SourceRegistry {
    SourceRegistry::new()
        .with(Arc::new(ScriptedConnector::succeeding("dnb", 10)))
        .with(Arc::new(ScriptedConnector::succeeding("moodys", 5)))
        .with(Arc::new(ScriptedConnector::succeeding("sec", 2)))
        .with(Arc::new(ScriptedConnector::failing_connect(
            "news",
            SourceErrorKind::Unavailable,
        )))
        .with(Arc::new(
            ScriptedConnector::succeeding("courts", 1)
                .with_collect(ScriptOutcome::Hang),
        ))
}

pub fn build_test_app() -> Result<TestApp> {
    build_test_app_with(scripted_registry())
}

pub fn build_test_app_with(registry: SourceRegistry) -> Result<TestApp> {
    let settings = ScanSettings {
        enabled_sources: ["dnb", "moodys"].into_iter().map(SourceId::from).collect(),
        ..ScanSettings::default()
    };

    let orchestrator = OrchestratorConfig {
        cancel_grace_ms: 200,
        metrics_tick_ms: 50,
        ..OrchestratorConfig::default()
    };
    let coordinator = ScanCoordinator::builder(
        registry,
        Arc::new(InMemoryScanHistoryStore::new()),
    )
    .config(orchestrator.clone())
    .build();

    let config = Config {
        orchestrator,
        dev_mode: true,
        ..Config::default()
    };

    let state = AppState {
        coordinator,
        settings: Arc::new(InMemorySettingsStore::new(settings)),
        config: Arc::new(config),
        shutdown: CancellationToken::new(),
    };

    let server = TestServer::new(create_app(state.clone()))
        .context("failed to build test server")?;
    Ok(TestApp { server, state })
}

/// JSON body for `POST /api/v1/scans` covering every tenant over the last
/// week.
pub fn scan_body(sources: &[&str]) -> Value {
    let now = Utc::now();
    let range = DateRange::new(now - ChronoDuration::days(7), now);
    let sources: BTreeSet<&str> = sources.iter().copied().collect();
    json!({
        "selection": "all",
        "sources": sources,
        "date_range": range,
    })
}

pub async fn start_scan(server: &TestServer, sources: &[&str]) -> ScanRunId {
    let response = server
        .post("/api/v1/scans")
        .json(&scan_body(sources))
        .await;
    response.assert_status(axum::http::StatusCode::ACCEPTED);
    let body: Value = response.json();
    serde_json::from_value(body["data"]["run_id"].clone()).expect("run id")
}

pub async fn wait_for_terminal(state: &AppState, run_id: ScanRunId) {
    tokio::time::timeout(
        Duration::from_secs(10),
        state.coordinator().wait_for_terminal(run_id),
    )
    .await
    .expect("scan finishes in time")
    .expect("scan known");
}

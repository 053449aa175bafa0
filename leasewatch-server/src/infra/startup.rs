use std::sync::Arc;

use anyhow::Context;
use leasewatch_core::scan::{
    InMemoryScanHistoryStore, InMemorySettingsStore, ScanCoordinator,
    ScanHistoryStore, settings::check_settings,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    app_state::AppState,
    config::{Config, HistoryBackend},
    sources::build_registry,
};

/// Wires the coordinator, stores and registry described by `config`.
pub async fn build_state(config: Config) -> anyhow::Result<AppState> {
    config.validate()?;

    let registry = build_registry(&config.sources)?;
    let history = connect_history(&config).await?;

    let mut settings = config.settings.clone();
    if settings.enabled_sources.is_empty() {
        settings.enabled_sources = registry.ids().cloned().collect();
    }
    check_settings(&settings, &registry)
        .context("configured settings reference an unknown source")?;

    let coordinator = ScanCoordinator::builder(registry, history)
        .config(config.orchestrator.clone())
        .build();

    info!(
        sources = coordinator.registry().len(),
        backend = ?config.history.backend,
        "scan coordinator ready"
    );

    Ok(AppState {
        coordinator,
        settings: Arc::new(InMemorySettingsStore::new(settings)),
        config: Arc::new(config),
        shutdown: CancellationToken::new(),
    })
}

async fn connect_history(
    config: &Config,
) -> anyhow::Result<Arc<dyn ScanHistoryStore>> {
    match config.history.backend {
        HistoryBackend::Memory => Ok(Arc::new(InMemoryScanHistoryStore::new())),
        HistoryBackend::Postgres => connect_postgres(config).await,
    }
}

#[cfg(feature = "postgres")]
async fn connect_postgres(
    config: &Config,
) -> anyhow::Result<Arc<dyn ScanHistoryStore>> {
    use leasewatch_core::scan::history_postgres::PostgresScanHistoryStore;

    let url = config
        .history
        .database_url
        .as_deref()
        .context("postgres history backend requires DATABASE_URL")?;
    let store = PostgresScanHistoryStore::connect(url)
        .await
        .context("failed to connect to PostgreSQL history store")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(
    _config: &Config,
) -> anyhow::Result<Arc<dyn ScanHistoryStore>> {
    anyhow::bail!(
        "history.backend = \"postgres\" requires building with the `postgres` feature"
    )
}

#[cfg(test)]
mod tests {
    use leasewatch_model::SourceId;

    use super::*;

    #[tokio::test]
    async fn settings_default_to_every_registered_source() {
        let state = build_state(Config::default()).await.expect("state");
        let settings = state.settings().get().await;
        assert_eq!(settings.enabled_sources.len(), 6);
    }

    #[tokio::test]
    async fn unknown_configured_source_is_rejected() {
        let mut config = Config::default();
        config
            .settings
            .enabled_sources
            .insert(SourceId::from("lexis"));
        assert!(build_state(config).await.is_err());
    }
}

use std::sync::Arc;

use anyhow::Context;
use leasewatch_core::scan::{
    SourceRegistry,
    connectors::{HttpFeedConnector, demo_registry},
};
use tracing::info;

use super::config::SourcesConfig;

/// Builds the connector registry: configured HTTP feeds, plus scripted demo
/// sources when enabled. A feed replaces the demo source with the same id.
pub fn build_registry(config: &SourcesConfig) -> anyhow::Result<SourceRegistry> {
    let mut registry = if config.demo_enabled() {
        info!(
            pace_ms = config.demo_pace_ms,
            "registering scripted demo sources"
        );
        demo_registry(config.demo_pace())
    } else {
        SourceRegistry::new()
    };

    for feed in &config.feeds {
        let id = feed.descriptor.id.clone();
        let connector = HttpFeedConnector::new(feed.clone())
            .with_context(|| format!("failed to build feed connector `{id}`"))?;
        info!(source = %id, url = %feed.feed_url, "registering feed source");
        registry.register(Arc::new(connector));
    }

    if registry.is_empty() {
        anyhow::bail!(
            "no sources configured: add [[sources.feeds]] entries or enable sources.demo"
        );
    }
    Ok(registry)
}

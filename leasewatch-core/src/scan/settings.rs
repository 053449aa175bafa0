//! Settings persisted between scans and the default configuration derived
//! from them.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leasewatch_model::{
    DateRange, ScanConfiguration, ScanSettings, TenantSelection,
};
use parking_lot::RwLock;

use super::connector::SourceRegistry;
use super::validation::{MAX_WINDOW_DAYS, ValidationError, window_start};

#[async_trait]
pub trait SettingsStore: Send + Sync + fmt::Debug {
    async fn get(&self) -> ScanSettings;

    async fn put(&self, settings: ScanSettings) -> ScanSettings;
}

#[derive(Default)]
pub struct InMemorySettingsStore {
    settings: RwLock<ScanSettings>,
}

impl fmt::Debug for InMemorySettingsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySettingsStore")
            .field("settings", &self.settings.try_read().map(|s| s.clone()))
            .finish()
    }
}

impl InMemorySettingsStore {
    pub fn new(initial: ScanSettings) -> Self {
        Self {
            settings: RwLock::new(initial),
        }
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get(&self) -> ScanSettings {
        self.settings.read().clone()
    }

    async fn put(&self, settings: ScanSettings) -> ScanSettings {
        *self.settings.write() = settings.clone();
        settings
    }
}

/// Rejects settings that name unregistered sources or a lookback longer
/// than [`MAX_WINDOW_DAYS`].
pub fn check_settings(
    settings: &ScanSettings,
    registry: &SourceRegistry,
) -> Result<(), ValidationError> {
    if let Some(unknown) = settings
        .enabled_sources
        .iter()
        .find(|id| !registry.contains(id))
    {
        return Err(ValidationError::UnknownSource(unknown.clone()));
    }
    if settings.default_lookback_days > MAX_WINDOW_DAYS {
        return Err(ValidationError::LookbackOutOfRange(
            settings.default_lookback_days,
        ));
    }
    Ok(())
}

/// Configuration used when a scan is triggered without overrides: every
/// tenant, the enabled sources, and the trailing lookback window.
pub fn default_configuration(
    settings: &ScanSettings,
    now: DateTime<Utc>,
) -> Result<ScanConfiguration, ValidationError> {
    let from = window_start(now, settings.default_lookback_days).ok_or(
        ValidationError::LookbackOutOfRange(settings.default_lookback_days),
    )?;
    Ok(ScanConfiguration {
        selection: TenantSelection::All,
        statuses: Default::default(),
        tenant_ids: Default::default(),
        property_ids: Default::default(),
        sources: settings.enabled_sources.clone(),
        date_range: DateRange::new(from, now),
        analysis_instructions: settings.custom_instructions.clone(),
        focus_areas: settings.focus_areas.clone(),
        notify_on_alerts: settings.notify_on_alerts,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;
    use leasewatch_model::{FocusArea, SourceId};

    use super::*;
    use crate::scan::connectors::scripted::ScriptedConnector;

    #[test]
    fn default_configuration_uses_seven_day_lookback() {
        let now = Utc::now();
        let settings = ScanSettings {
            enabled_sources: [SourceId::from("dnb")].into(),
            focus_areas: [FocusArea::Credit].into(),
            custom_instructions: Some("flag restaurants".into()),
            ..ScanSettings::default()
        };
        let config = default_configuration(&settings, now).expect("in range");
        assert_eq!(config.date_range.to, now);
        assert_eq!(config.date_range.from, now - ChronoDuration::days(7));
        assert_eq!(config.selection, TenantSelection::All);
        assert!(config.notify_on_alerts);
        assert_eq!(
            config.analysis_instructions.as_deref(),
            Some("flag restaurants")
        );
    }

    #[tokio::test]
    async fn store_round_trips_and_checks_sources() {
        let store = InMemorySettingsStore::default();
        let mut settings = store.get().await;
        settings.enabled_sources.insert(SourceId::from("courts"));
        store.put(settings.clone()).await;
        assert_eq!(store.get().await, settings);

        let registry = SourceRegistry::new()
            .with(Arc::new(ScriptedConnector::succeeding("dnb", 0)));
        assert_eq!(
            check_settings(&settings, &registry),
            Err(ValidationError::UnknownSource(SourceId::from("courts")))
        );
    }

    #[test]
    fn oversized_lookback_is_rejected_instead_of_overflowing() {
        let settings = ScanSettings {
            enabled_sources: [SourceId::from("dnb")].into(),
            default_lookback_days: u32::MAX,
            ..ScanSettings::default()
        };
        assert_eq!(
            default_configuration(&settings, Utc::now()),
            Err(ValidationError::LookbackOutOfRange(u32::MAX))
        );

        let registry = SourceRegistry::new()
            .with(Arc::new(ScriptedConnector::succeeding("dnb", 0)));
        assert_eq!(
            check_settings(&settings, &registry),
            Err(ValidationError::LookbackOutOfRange(u32::MAX))
        );

        let settings = ScanSettings {
            default_lookback_days: MAX_WINDOW_DAYS,
            ..settings
        };
        assert_eq!(check_settings(&settings, &registry), Ok(()));
        assert!(default_configuration(&settings, Utc::now()).is_ok());
    }
}

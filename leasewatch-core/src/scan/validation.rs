use chrono::{DateTime, Duration as ChronoDuration, Utc};
use leasewatch_model::{ScanConfiguration, SourceId, TenantSelection};
use thiserror::Error;

use super::connector::SourceRegistry;

/// Upper bound for lookback and insights windows, in days.
pub const MAX_WINDOW_DAYS: u32 = 3_650;

/// Reasons a configuration is rejected before any run state exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("at least one source must be enabled")]
    NoSourcesEnabled,

    #[error("source `{0}` is not registered")]
    UnknownSource(SourceId),

    #[error("custom selection requires tenant or property identifiers")]
    EmptyCustomSelection,

    #[error("status selection requires at least one status")]
    EmptyStatusSelection,

    #[error("date range starts after it ends")]
    InvertedDateRange,

    #[error("lookback of {0} days exceeds the {max} day limit", max = MAX_WINDOW_DAYS)]
    LookbackOutOfRange(u32),

    #[error("insights window of {0} days exceeds the {max} day limit", max = MAX_WINDOW_DAYS)]
    InsightsWindowOutOfRange(u32),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::NoSourcesEnabled => "no_sources_enabled",
            ValidationError::UnknownSource(_) => "unknown_source",
            ValidationError::EmptyCustomSelection => "empty_custom_selection",
            ValidationError::EmptyStatusSelection => "empty_status_selection",
            ValidationError::InvertedDateRange => "inverted_date_range",
            ValidationError::LookbackOutOfRange(_) => "lookback_out_of_range",
            ValidationError::InsightsWindowOutOfRange(_) => {
                "insights_window_out_of_range"
            }
        }
    }
}

pub fn validate(
    config: &ScanConfiguration,
    registry: &SourceRegistry,
) -> Result<(), ValidationError> {
    if config.sources.is_empty() {
        return Err(ValidationError::NoSourcesEnabled);
    }
    if let Some(unknown) =
        config.sources.iter().find(|id| !registry.contains(id))
    {
        return Err(ValidationError::UnknownSource(unknown.clone()));
    }

    match config.selection {
        TenantSelection::All => {}
        TenantSelection::ByStatus if config.statuses.is_empty() => {
            return Err(ValidationError::EmptyStatusSelection);
        }
        TenantSelection::ByStatus => {}
        TenantSelection::Custom
            if config.tenant_ids.is_empty()
                && config.property_ids.is_empty() =>
        {
            return Err(ValidationError::EmptyCustomSelection);
        }
        TenantSelection::Custom => {}
    }

    if config.date_range.from > config.date_range.to {
        return Err(ValidationError::InvertedDateRange);
    }

    Ok(())
}

/// Start of the `days`-long window ending at `now`. `None` when `days` is
/// above [`MAX_WINDOW_DAYS`] or the start is not representable.
pub fn window_start(now: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    if days > MAX_WINDOW_DAYS {
        return None;
    }
    now.checked_sub_signed(ChronoDuration::days(i64::from(days)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use leasewatch_model::{DateRange, TenantId, TenantStatus};

    use super::*;
    use crate::scan::connectors::scripted::ScriptedConnector;

    fn registry() -> SourceRegistry {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(ScriptedConnector::succeeding("dnb", 1)));
        registry.register(Arc::new(ScriptedConnector::succeeding("sec", 1)));
        registry
    }

    fn config(sources: &[&str]) -> ScanConfiguration {
        let now = Utc::now();
        ScanConfiguration::all_tenants(
            sources.iter().copied(),
            DateRange::new(now - Duration::days(7), now),
        )
    }

    #[test]
    fn accepts_all_tenant_selection() {
        assert_eq!(validate(&config(&["dnb", "sec"]), &registry()), Ok(()));
    }

    #[test]
    fn rejects_empty_source_set() {
        assert_eq!(
            validate(&config(&[]), &registry()),
            Err(ValidationError::NoSourcesEnabled)
        );
    }

    #[test]
    fn rejects_unregistered_source() {
        assert_eq!(
            validate(&config(&["dnb", "courts"]), &registry()),
            Err(ValidationError::UnknownSource(SourceId::from("courts")))
        );
    }

    #[test]
    fn custom_selection_needs_identifiers() {
        let mut cfg = config(&["dnb"]);
        cfg.selection = TenantSelection::Custom;
        assert_eq!(
            validate(&cfg, &registry()),
            Err(ValidationError::EmptyCustomSelection)
        );
        cfg.tenant_ids.insert(TenantId::from("t-1"));
        assert_eq!(validate(&cfg, &registry()), Ok(()));
    }

    #[test]
    fn status_selection_needs_statuses() {
        let mut cfg = config(&["dnb"]);
        cfg.selection = TenantSelection::ByStatus;
        assert_eq!(
            validate(&cfg, &registry()),
            Err(ValidationError::EmptyStatusSelection)
        );
        cfg.statuses.insert(TenantStatus::Watch);
        assert_eq!(validate(&cfg, &registry()), Ok(()));
    }

    #[test]
    fn window_start_is_bounded() {
        let now = Utc::now();
        assert_eq!(window_start(now, 0), Some(now));
        assert_eq!(window_start(now, 30), Some(now - Duration::days(30)));
        assert!(window_start(now, MAX_WINDOW_DAYS).is_some());
        assert_eq!(window_start(now, MAX_WINDOW_DAYS + 1), None);
        assert_eq!(window_start(now, u32::MAX), None);
    }

    #[test]
    fn rejects_inverted_dates() {
        let mut cfg = config(&["dnb"]);
        std::mem::swap(&mut cfg.date_range.from, &mut cfg.date_range.to);
        assert_eq!(
            validate(&cfg, &registry()),
            Err(ValidationError::InvertedDateRange)
        );
    }
}

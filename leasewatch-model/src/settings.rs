use std::collections::BTreeSet;

use crate::ids::SourceId;
use crate::scan::FocusArea;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ScanFrequency {
    Continuous,
    Hourly,
    #[default]
    Daily,
    Weekly,
}

/// Settings persisted between scans. A scan started without an explicit
/// configuration derives one from these.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ScanSettings {
    pub enabled_sources: BTreeSet<SourceId>,
    pub frequency: ScanFrequency,
    pub focus_areas: BTreeSet<FocusArea>,
    pub custom_instructions: Option<String>,
    pub notify_on_alerts: bool,
    pub default_lookback_days: u32,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            enabled_sources: BTreeSet::new(),
            frequency: ScanFrequency::default(),
            focus_areas: BTreeSet::new(),
            custom_instructions: None,
            notify_on_alerts: true,
            default_lookback_days: 7,
        }
    }
}

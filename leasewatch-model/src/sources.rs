use crate::chrono::{DateTime, Utc};
use crate::ids::SourceId;

/// Static identity of a data source.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceDescriptor {
    pub id: SourceId,
    pub name: String,
    pub description: String,
}

impl SourceDescriptor {
    pub fn new(
        id: impl Into<SourceId>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "status", rename_all = "snake_case")
)]
pub enum SourceHealth {
    Healthy,
    Degraded { reason: String },
    Unreachable { reason: String },
}

/// Catalog entry: descriptor plus last known health.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceInfo {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub descriptor: SourceDescriptor,
    pub health: SourceHealth,
    pub checked_at: DateTime<Utc>,
}

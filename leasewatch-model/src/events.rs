use uuid::Uuid;

use crate::chrono::{DateTime, Utc};
use crate::ids::{SourceId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum UpdateKind {
    Info,
    Finding,
    ScoreChange,
    Alert,
}

/// One entry of a run's event stream.
///
/// `seq` is the authoritative order. Timestamps come from concurrent
/// connectors and may tie or arrive out of order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LiveUpdate {
    pub id: Uuid,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: UpdateKind,
    pub message: String,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub tenant: Option<TenantId>,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub source: Option<SourceId>,
    /// Signed risk movement for `score_change` entries. Positive is an
    /// upgrade.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub score_delta: Option<i32>,
    /// Set on updates carrying a record collected from a source, as opposed
    /// to status messages about that source. Only these count toward
    /// throughput.
    #[cfg_attr(feature = "serde", serde(default))]
    pub collected: bool,
}

//! Core data model definitions shared across Leasewatch crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod error;
pub mod events;
pub mod history;
pub mod ids;
pub mod metrics;
pub mod prelude;
pub mod scan;
pub mod settings;
pub mod sources;

// Intentionally curated re-exports for downstream consumers.
pub use error::{ModelError, Result as ModelResult};
pub use events::{LiveUpdate, UpdateKind};
pub use history::{
    HistoryFilter, HistoryPage, ScanInsights, ScanRunRecord, ScanRunSummary,
    ScoreDirection, TenantResult, TenantScoreDelta,
};
pub use ids::{PropertyId, ScanRunId, SourceId, TenantId};
pub use metrics::ScanMetrics;
pub use scan::{
    DateRange, FocusArea, RunState, ScanConfiguration, ScanStatusView,
    SourceErrorInfo, SourceErrorKind, SourceState, SourceStatus, StageId,
    StageState, StageStatus, TenantSelection, TenantStatus,
};
pub use settings::{ScanFrequency, ScanSettings};
pub use sources::{SourceDescriptor, SourceHealth, SourceInfo};

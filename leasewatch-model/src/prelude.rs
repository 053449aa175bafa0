pub use crate::chrono::{DateTime, Duration as ChronoDuration, Utc};
pub use crate::events::{LiveUpdate, UpdateKind};
pub use crate::ids::{PropertyId, ScanRunId, SourceId, TenantId};
pub use crate::metrics::ScanMetrics;
pub use crate::scan::{
    DateRange, RunState, ScanConfiguration, SourceState, SourceStatus,
    StageId, StageState, StageStatus, TenantSelection,
};

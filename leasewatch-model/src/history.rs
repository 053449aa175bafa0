use crate::chrono::{DateTime, Utc};
use crate::events::LiveUpdate;
use crate::ids::{ScanRunId, SourceId, TenantId};
use crate::metrics::ScanMetrics;
use crate::scan::{
    RunState, ScanConfiguration, ScanStatusView, SourceStatus, StageState,
};

/// Findings compiled for a single tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TenantResult {
    pub tenant: TenantId,
    pub findings: u64,
    pub alerts: u64,
    pub net_score_change: i64,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ScoreDirection {
    Upgraded,
    Downgraded,
    Unchanged,
}

impl ScoreDirection {
    pub fn from_net(net: i64) -> Self {
        match net {
            n if n > 0 => ScoreDirection::Upgraded,
            n if n < 0 => ScoreDirection::Downgraded,
            _ => ScoreDirection::Unchanged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TenantScoreDelta {
    pub tenant: TenantId,
    pub direction: ScoreDirection,
    pub net_change: i64,
}

/// Terminal record of a scan run as written to history.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanRunRecord {
    pub id: ScanRunId,
    pub configuration: ScanConfiguration,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub stages: Vec<StageState>,
    pub sources: Vec<SourceStatus>,
    pub events: Vec<LiveUpdate>,
    pub metrics: ScanMetrics,
    pub tenant_results: Vec<TenantResult>,
    pub score_deltas: Vec<TenantScoreDelta>,
    pub analysis_digest: Option<String>,
    pub failure_reason: Option<String>,
}

impl ScanRunRecord {
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0)
    }

    /// Status view of a stored run, as returned by status polling.
    pub fn status_view(&self) -> ScanStatusView {
        ScanStatusView {
            run_id: self.id,
            state: self.state,
            started_at: self.started_at,
            ended_at: Some(self.ended_at),
            stages: self.stages.clone(),
            sources: self.sources.clone(),
            metrics: self.metrics,
            last_sequence: self.events.last().map_or(0, |e| e.seq),
            failure_reason: self.failure_reason.clone(),
        }
    }

    pub fn summary(&self) -> ScanRunSummary {
        ScanRunSummary {
            id: self.id,
            state: self.state,
            started_at: self.started_at,
            ended_at: self.ended_at,
            duration_ms: self.duration_ms(),
            tenants_scanned: self.metrics.tenants_scanned,
            findings: self.metrics.findings,
            alerts: self.metrics.alerts,
            sources: self.sources.iter().map(|s| s.id.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanRunSummary {
    pub id: ScanRunId,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub tenants_scanned: u64,
    pub findings: u64,
    pub alerts: u64,
    pub sources: Vec<SourceId>,
}

/// Filter for history listings. Bounds apply to `started_at` and are
/// inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HistoryFilter {
    pub state: Option<RunState>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub const DEFAULT_LIMIT: usize = 20;
    pub const MAX_LIMIT: usize = 200;

    pub fn page_size(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn matches(&self, summary: &ScanRunSummary) -> bool {
        if let Some(state) = self.state
            && summary.state != state
        {
            return false;
        }
        if let Some(from) = self.from
            && summary.started_at < from
        {
            return false;
        }
        if let Some(to) = self.to
            && summary.started_at > to
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HistoryPage {
    pub items: Vec<ScanRunSummary>,
    pub next_page_token: Option<String>,
}

/// Aggregates over stored runs.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanInsights {
    pub window_days: u32,
    pub total_runs: u64,
    pub complete_runs: u64,
    pub failed_runs: u64,
    pub cancelled_runs: u64,
    pub success_rate: f64,
    pub average_duration_ms: Option<i64>,
    pub average_alerts_per_run: f64,
    pub total_tenants_scanned: u64,
    pub total_alerts: u64,
}

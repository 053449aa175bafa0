use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::chrono::{DateTime, Utc};
use crate::error::ModelError;
use crate::ids::{PropertyId, ScanRunId, SourceId, TenantId};
use crate::metrics::ScanMetrics;

/// How the tenants covered by a scan are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TenantSelection {
    #[default]
    All,
    ByStatus,
    Custom,
}

/// Risk status buckets a `by_status` selection filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TenantStatus {
    Critical,
    Watch,
    Stable,
    Improving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FocusArea {
    Bankruptcy,
    Revenue,
    Litigation,
    Leadership,
    Credit,
    Layoffs,
}

impl FocusArea {
    pub const ALL: [FocusArea; 6] = [
        FocusArea::Bankruptcy,
        FocusArea::Revenue,
        FocusArea::Litigation,
        FocusArea::Leadership,
        FocusArea::Credit,
        FocusArea::Layoffs,
    ];

    /// Lowercase keywords a finding message is matched against.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            FocusArea::Bankruptcy => &["bankrupt", "chapter 11", "insolven"],
            FocusArea::Revenue => &["revenue", "earnings", "sales"],
            FocusArea::Litigation => &["lawsuit", "litigation", "court"],
            FocusArea::Leadership => &["ceo", "cfo", "executive", "leadership"],
            FocusArea::Credit => &["credit", "downgrade", "rating", "debt"],
            FocusArea::Layoffs => &["layoff", "workforce", "closure"],
        }
    }
}

/// Inclusive date window a scan collects over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at <= self.to
    }
}

/// Immutable input of a scan run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanConfiguration {
    #[cfg_attr(feature = "serde", serde(default))]
    pub selection: TenantSelection,
    #[cfg_attr(feature = "serde", serde(default))]
    pub statuses: BTreeSet<TenantStatus>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub tenant_ids: BTreeSet<TenantId>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub property_ids: BTreeSet<PropertyId>,
    pub sources: BTreeSet<SourceId>,
    pub date_range: DateRange,
    #[cfg_attr(feature = "serde", serde(default))]
    pub analysis_instructions: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub focus_areas: BTreeSet<FocusArea>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub notify_on_alerts: bool,
}

impl ScanConfiguration {
    /// Configuration covering every tenant from the given sources.
    pub fn all_tenants<I, S>(sources: I, date_range: DateRange) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SourceId>,
    {
        Self {
            selection: TenantSelection::All,
            statuses: BTreeSet::new(),
            tenant_ids: BTreeSet::new(),
            property_ids: BTreeSet::new(),
            sources: sources.into_iter().map(Into::into).collect(),
            date_range,
            analysis_instructions: None,
            focus_areas: BTreeSet::new(),
            notify_on_alerts: false,
        }
    }
}

/// Top-level state of a scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RunState {
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Complete | RunState::Failed | RunState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Complete => "complete",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunState::Pending),
            "running" => Ok(RunState::Running),
            "complete" => Ok(RunState::Complete),
            "failed" => Ok(RunState::Failed),
            "cancelled" | "canceled" => Ok(RunState::Cancelled),
            other => Err(ModelError::UnknownVariant {
                kind: "run state",
                value: other.to_string(),
            }),
        }
    }
}

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum StageId {
    Connect,
    Collect,
    Analyze,
    Compile,
    Score,
}

impl StageId {
    pub const PIPELINE: [StageId; 5] = [
        StageId::Connect,
        StageId::Collect,
        StageId::Analyze,
        StageId::Compile,
        StageId::Score,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StageId::Connect => "Connecting to data sources",
            StageId::Collect => "Collecting tenant data",
            StageId::Analyze => "Analyzing findings",
            StageId::Compile => "Compiling tenant results",
            StageId::Score => "Updating risk scores",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::Connect => "connect",
            StageId::Collect => "collect",
            StageId::Analyze => "analyze",
            StageId::Compile => "compile",
            StageId::Score => "score",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum StageStatus {
    Pending,
    Active,
    Complete,
    Error,
    /// The stage was active when the run was cancelled.
    Interrupted,
    /// The run ended before the stage started.
    NotReached,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StageStatus::Pending | StageStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StageState {
    pub id: StageId,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageState {
    pub fn pending(id: StageId) -> Self {
        Self {
            id,
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Per-source progress within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SourceState {
    Pending,
    Connecting,
    Collecting,
    Complete,
    Error,
    /// The run halted before this source finished.
    Cancelled,
}

impl SourceState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SourceState::Complete | SourceState::Error | SourceState::Cancelled
        )
    }

    fn rank(self) -> u8 {
        match self {
            SourceState::Pending => 0,
            SourceState::Connecting => 1,
            SourceState::Collecting => 2,
            SourceState::Complete
            | SourceState::Error
            | SourceState::Cancelled => 3,
        }
    }

    /// Forward-only transitions along
    /// `pending -> connecting -> collecting -> complete`; `error` and
    /// `cancelled` are reachable from any non-terminal state.
    pub fn can_transition_to(self, next: SourceState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            SourceState::Error | SourceState::Cancelled => true,
            SourceState::Complete => self == SourceState::Collecting,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SourceErrorKind {
    Unauthorized,
    Timeout,
    RateLimited,
    Unavailable,
    Malformed,
}

impl SourceErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceErrorKind::Unauthorized => "unauthorized",
            SourceErrorKind::Timeout => "timeout",
            SourceErrorKind::RateLimited => "rate_limited",
            SourceErrorKind::Unavailable => "unavailable",
            SourceErrorKind::Malformed => "malformed",
        }
    }
}

impl fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceErrorInfo {
    pub kind: SourceErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceStatus {
    pub id: SourceId,
    pub name: String,
    pub state: SourceState,
    /// Only set once the source reaches `complete`.
    pub records_found: Option<u64>,
    pub error: Option<SourceErrorInfo>,
}

impl SourceStatus {
    pub fn pending(id: SourceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: SourceState::Pending,
            records_found: None,
            error: None,
        }
    }
}

/// Point-in-time view returned by status polling.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanStatusView {
    pub run_id: ScanRunId,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageState>,
    pub sources: Vec<SourceStatus>,
    pub metrics: ScanMetrics,
    pub last_sequence: u64,
    pub failure_reason: Option<String>,
}

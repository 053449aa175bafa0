//! Source connector capability and the registry the coordinator draws from.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use leasewatch_model::{
    DateRange, FocusArea, PropertyId, ScanConfiguration, ScanRunId,
    SourceDescriptor, SourceErrorKind, SourceHealth, SourceId, TenantId,
    TenantSelection, TenantStatus, UpdateKind,
};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Typed connector failures. All of them put the source into `error`; the
/// variant is kept as the diagnostic reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    /// The call observed cancellation of its context.
    #[error("cancelled")]
    Cancelled,
}

impl ConnectorError {
    pub fn kind(&self) -> Option<SourceErrorKind> {
        match self {
            ConnectorError::Unauthorized(_) => {
                Some(SourceErrorKind::Unauthorized)
            }
            ConnectorError::Timeout(_) => Some(SourceErrorKind::Timeout),
            ConnectorError::RateLimited(_) => {
                Some(SourceErrorKind::RateLimited)
            }
            ConnectorError::Unavailable(_) => {
                Some(SourceErrorKind::Unavailable)
            }
            ConnectorError::Malformed(_) => Some(SourceErrorKind::Malformed),
            ConnectorError::Cancelled => None,
        }
    }

    pub fn from_kind(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            SourceErrorKind::Unauthorized => {
                ConnectorError::Unauthorized(message)
            }
            SourceErrorKind::Timeout => ConnectorError::Timeout(message),
            SourceErrorKind::RateLimited => ConnectorError::RateLimited(message),
            SourceErrorKind::Unavailable => ConnectorError::Unavailable(message),
            SourceErrorKind::Malformed => ConnectorError::Malformed(message),
        }
    }

    pub fn message(&self) -> String {
        match self {
            ConnectorError::Unauthorized(m)
            | ConnectorError::Timeout(m)
            | ConnectorError::RateLimited(m)
            | ConnectorError::Unavailable(m)
            | ConnectorError::Malformed(m) => m.clone(),
            ConnectorError::Cancelled => "cancelled".to_string(),
        }
    }
}

/// Per-call context handed to a connector.
///
/// `cancel` is a child of the run's token, so cancelling the run closes every
/// outstanding context. `deadline` is the earlier of the per-source and the
/// scan-wide deadline.
#[derive(Debug, Clone)]
pub struct ConnectorContext {
    pub run_id: ScanRunId,
    pub source: SourceId,
    pub cancel: CancellationToken,
    pub deadline: Instant,
}

impl ConnectorContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// The slice of a configuration a single source needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectScope {
    pub run_id: ScanRunId,
    pub selection: TenantSelection,
    pub statuses: BTreeSet<TenantStatus>,
    pub tenant_ids: BTreeSet<TenantId>,
    pub property_ids: BTreeSet<PropertyId>,
    pub date_range: DateRange,
    pub focus_areas: BTreeSet<FocusArea>,
}

impl CollectScope {
    pub fn from_config(run_id: ScanRunId, config: &ScanConfiguration) -> Self {
        Self {
            run_id,
            selection: config.selection,
            statuses: config.statuses.clone(),
            tenant_ids: config.tenant_ids.clone(),
            property_ids: config.property_ids.clone(),
            date_range: config.date_range,
            focus_areas: config.focus_areas.clone(),
        }
    }

    /// Whether an item about `tenant` falls inside a custom tenant list.
    /// Other selection modes are resolved by the source itself.
    pub fn admits_tenant(&self, tenant: Option<&TenantId>) -> bool {
        match (self.selection, tenant) {
            (TenantSelection::Custom, Some(tenant))
                if !self.tenant_ids.is_empty() =>
            {
                self.tenant_ids.contains(tenant)
            }
            _ => true,
        }
    }
}

/// One record produced by `collect`. Each item becomes one live update and
/// counts as one record found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedItem {
    pub kind: UpdateKind,
    pub message: String,
    pub tenant: Option<TenantId>,
    pub score_delta: Option<i32>,
    pub observed_at: Option<DateTime<Utc>>,
}

impl CollectedItem {
    pub fn finding(tenant: impl Into<TenantId>, message: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::Finding,
            message: message.into(),
            tenant: Some(tenant.into()),
            score_delta: None,
            observed_at: None,
        }
    }

    pub fn score_change(
        tenant: impl Into<TenantId>,
        delta: i32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: UpdateKind::ScoreChange,
            message: message.into(),
            tenant: Some(tenant.into()),
            score_delta: Some(delta),
            observed_at: None,
        }
    }

    pub fn alert(tenant: impl Into<TenantId>, message: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::Alert,
            message: message.into(),
            tenant: Some(tenant.into()),
            score_delta: None,
            observed_at: None,
        }
    }

    pub fn info(tenant: impl Into<TenantId>, message: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::Info,
            message: message.into(),
            tenant: Some(tenant.into()),
            score_delta: None,
            observed_at: None,
        }
    }
}

pub type ItemStream<'a> =
    BoxStream<'a, Result<CollectedItem, ConnectorError>>;

/// Integration with one external data source.
///
/// `connect` may be retried by callers; `collect` must not be restarted once
/// it has produced items. Implementations should return promptly once
/// `ctx.cancel` fires.
#[async_trait]
pub trait SourceConnector: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &SourceDescriptor;

    async fn connect(&self, ctx: &ConnectorContext)
    -> Result<(), ConnectorError>;

    async fn collect<'a>(
        &'a self,
        ctx: &'a ConnectorContext,
        scope: CollectScope,
    ) -> Result<ItemStream<'a>, ConnectorError>;

    async fn status(&self) -> SourceHealth {
        SourceHealth::Healthy
    }
}

/// Connectors available to the coordinator, keyed by source id.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    connectors: BTreeMap<SourceId, Arc<dyn SourceConnector>>,
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.connectors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `connector`, replacing any connector with the same id.
    pub fn register(&mut self, connector: Arc<dyn SourceConnector>) {
        let id = connector.descriptor().id.clone();
        self.connectors.insert(id, connector);
    }

    pub fn with(mut self, connector: Arc<dyn SourceConnector>) -> Self {
        self.register(connector);
        self
    }

    pub fn get(&self, id: &SourceId) -> Option<Arc<dyn SourceConnector>> {
        self.connectors.get(id).cloned()
    }

    pub fn contains(&self, id: &SourceId) -> bool {
        self.connectors.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &SourceId> {
        self.connectors.keys()
    }

    pub fn descriptors(&self) -> Vec<SourceDescriptor> {
        self.connectors
            .values()
            .map(|c| c.descriptor().clone())
            .collect()
    }

    pub fn connectors(
        &self,
    ) -> impl Iterator<Item = &Arc<dyn SourceConnector>> {
        self.connectors.values()
    }
}

//! The scan run aggregate.
//!
//! Every mutation of stage, source, event and metric state goes through the
//! run's mutex. Once a halt has been requested (cancel, deadline or failure)
//! the run refuses further completions and appends, so nothing commits after
//! the halt point except the final freeze performed by [`ScanRun::finish`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use leasewatch_model::{
    LiveUpdate, RunState, ScanConfiguration, ScanMetrics, ScanRunId,
    ScanRunRecord, ScanStatusView, SourceErrorInfo, SourceId, SourceState,
    SourceStatus, StageId, TenantResult, TenantScoreDelta,
};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::clock::Clock;
use super::config::OrchestratorConfig;
use super::connector::{CollectedItem, ConnectorError, SourceRegistry};
use super::event_stream::{EventStream, UpdateDraft};
use super::metrics::MetricsAggregator;
use super::stage::StagePipeline;

/// Why a run stopped before completing its pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Halt {
    pub outcome: RunState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltRequest {
    /// This call halted the run.
    Accepted,
    /// A halt was already in effect.
    AlreadyHalted,
    /// The run had already reached a terminal state.
    Terminal,
}

#[derive(Debug)]
struct ScanRunState {
    status: RunState,
    ended_at: Option<DateTime<Utc>>,
    pipeline: StagePipeline,
    sources: BTreeMap<SourceId, SourceStatus>,
    records: BTreeMap<SourceId, u64>,
    metrics: MetricsAggregator,
    halt: Option<Halt>,
    tenant_results: Vec<TenantResult>,
    score_deltas: Vec<TenantScoreDelta>,
    analysis_digest: Option<String>,
}

impl ScanRunState {
    fn errored(&self) -> usize {
        self.sources
            .values()
            .filter(|s| s.state == SourceState::Error)
            .count()
    }

    fn transition(&mut self, source: &SourceId, next: SourceState) -> bool {
        let Some(status) = self.sources.get_mut(source) else {
            return false;
        };
        if !status.state.can_transition_to(next) {
            return false;
        }
        status.state = next;
        true
    }
}

pub struct ScanRun {
    id: ScanRunId,
    config: Arc<ScanConfiguration>,
    started_at: DateTime<Utc>,
    policy: OrchestratorConfig,
    cancel: CancellationToken,
    events: Arc<EventStream>,
    clock: Arc<dyn Clock>,
    state: Mutex<ScanRunState>,
    finalized: watch::Sender<Option<RunState>>,
}

impl fmt::Debug for ScanRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.state.try_lock().ok().map(|s| s.status);
        f.debug_struct("ScanRun")
            .field("id", &self.id)
            .field("status", &status)
            .field("events", &self.events.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ScanRun {
    pub fn new(
        config: ScanConfiguration,
        registry: &SourceRegistry,
        policy: &OrchestratorConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let sources = config
            .sources
            .iter()
            .map(|id| {
                let name = registry
                    .get(id)
                    .map(|c| c.descriptor().name.clone())
                    .unwrap_or_else(|| id.to_string());
                (id.clone(), SourceStatus::pending(id.clone(), name))
            })
            .collect();
        let records = config.sources.iter().map(|id| (id.clone(), 0)).collect();
        let (finalized, _rx) = watch::channel(None);
        // Stored with microsecond precision so page anchors survive storage.
        let started_at = clock.now().trunc_subsecs(6);

        Arc::new(ScanRun {
            id: ScanRunId::new(),
            config: Arc::new(config),
            started_at,
            policy: policy.clone(),
            cancel: CancellationToken::new(),
            events: Arc::new(EventStream::new(
                Arc::clone(&clock),
                policy.broadcast_capacity,
            )),
            clock,
            state: Mutex::new(ScanRunState {
                status: RunState::Pending,
                ended_at: None,
                pipeline: StagePipeline::new(),
                sources,
                records,
                metrics: MetricsAggregator::new(policy.throughput_window()),
                halt: None,
                tenant_results: Vec::new(),
                score_deltas: Vec::new(),
                analysis_digest: None,
            }),
            finalized,
        })
    }

    pub fn id(&self) -> ScanRunId {
        self.id
    }

    pub fn config(&self) -> &ScanConfiguration {
        &self.config
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Parent token of every connector context in this run.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn events(&self) -> &Arc<EventStream> {
        &self.events
    }

    pub async fn state(&self) -> RunState {
        self.state.lock().await.status
    }

    pub async fn mark_running(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.status != RunState::Pending || state.halt.is_some() {
            return false;
        }
        state.status = RunState::Running;
        self.append_locked(
            &mut state,
            UpdateDraft::info(format!(
                "Scan started across {} sources",
                self.config.sources.len()
            )),
        );
        true
    }

    /// Starts `stage`. Returns false when the run is halted.
    pub async fn begin_stage(&self, stage: StageId) -> bool {
        let mut state = self.state.lock().await;
        if state.halt.is_some() {
            return false;
        }
        let now = self.clock.now();
        if let Err(err) = state.pipeline.begin(stage, now) {
            warn!(run = %self.id, %err, "rejected stage start");
            return false;
        }
        debug!(run = %self.id, stage = stage.as_str(), "stage active");
        true
    }

    /// Completes `stage`. Returns false when the run is halted.
    pub async fn complete_stage(&self, stage: StageId) -> bool {
        let mut state = self.state.lock().await;
        if state.halt.is_some() {
            return false;
        }
        let now = self.clock.now();
        if let Err(err) = state.pipeline.complete(stage, now) {
            warn!(run = %self.id, %err, "rejected stage completion");
            return false;
        }
        debug!(run = %self.id, stage = stage.as_str(), "stage complete");
        true
    }

    /// Moves a source forward. Refused once halted or when the transition
    /// would go backwards.
    pub async fn advance_source(
        &self,
        source: &SourceId,
        next: SourceState,
    ) -> bool {
        let mut state = self.state.lock().await;
        if state.halt.is_some() {
            return false;
        }
        state.transition(source, next)
    }

    /// Appends an item collected by `source`, which must be collecting.
    pub async fn record_item(
        &self,
        source: &SourceId,
        item: CollectedItem,
    ) -> Option<LiveUpdate> {
        let mut state = self.state.lock().await;
        if state.halt.is_some() {
            return None;
        }
        let collecting = state
            .sources
            .get(source)
            .is_some_and(|s| s.state == SourceState::Collecting);
        if !collecting {
            return None;
        }
        let update = self
            .append_locked(&mut state, UpdateDraft::from_item(source, item))?;
        *state.records.entry(source.clone()).or_default() += 1;
        Some(update)
    }

    /// Appends a coordinator-authored update.
    pub async fn emit(&self, draft: UpdateDraft) -> Option<LiveUpdate> {
        let mut state = self.state.lock().await;
        if state.halt.is_some() {
            return None;
        }
        self.append_locked(&mut state, draft)
    }

    pub async fn complete_source(&self, source: &SourceId) -> bool {
        let mut state = self.state.lock().await;
        if state.halt.is_some()
            || !state.transition(source, SourceState::Complete)
        {
            return false;
        }
        let records = state.records.get(source).copied().unwrap_or_default();
        let snapshot = state.sources.get_mut(source).map(|status| {
            status.records_found = Some(records);
            status.clone()
        });
        if let Some(status) = snapshot {
            state.metrics.on_source(&status);
            let name = status.name.clone();
            self.append_locked(
                &mut state,
                UpdateDraft::info(format!(
                    "{name} complete: {records} records found"
                ))
                .from_source(source),
            );
        }
        true
    }

    /// Marks `source` as errored and applies the failure threshold. Returns
    /// true when this failure halted the run.
    pub async fn fail_source(
        &self,
        source: &SourceId,
        err: &ConnectorError,
    ) -> bool {
        let Some(kind) = err.kind() else {
            return false;
        };
        let mut state = self.state.lock().await;
        if state.halt.is_some() || !state.transition(source, SourceState::Error)
        {
            return false;
        }
        let name = match state.sources.get_mut(source) {
            Some(status) => {
                status.error = Some(SourceErrorInfo {
                    kind,
                    message: err.message(),
                });
                status.name.clone()
            }
            None => source.to_string(),
        };
        warn!(run = %self.id, %source, error = %err, "source failed");
        self.append_locked(
            &mut state,
            UpdateDraft::info(format!("{name} failed: {kind}"))
                .from_source(source),
        );

        let errored = state.errored();
        let enabled = state.sources.len();
        if self.policy.exceeds_failure_threshold(errored, enabled) {
            let reason = format!(
                "{errored} of {enabled} sources failed (threshold {})",
                self.policy.failure_threshold
            );
            warn!(run = %self.id, %reason, "failure threshold exceeded");
            self.halt_locked(&mut state, RunState::Failed, reason);
            return true;
        }
        false
    }

    /// Stops the run. `outcome` is the terminal state it will finish in.
    pub async fn request_halt(
        &self,
        outcome: RunState,
        reason: impl Into<String>,
    ) -> HaltRequest {
        let mut state = self.state.lock().await;
        if state.status.is_terminal() {
            return HaltRequest::Terminal;
        }
        if state.halt.is_some() {
            return HaltRequest::AlreadyHalted;
        }
        self.halt_locked(&mut state, outcome, reason.into());
        HaltRequest::Accepted
    }

    fn halt_locked(
        &self,
        state: &mut ScanRunState,
        outcome: RunState,
        reason: String,
    ) {
        state.halt = Some(Halt {
            outcome,
            reason,
            at: self.clock.now(),
        });
        self.cancel.cancel();
    }

    fn append_locked(
        &self,
        state: &mut ScanRunState,
        draft: UpdateDraft,
    ) -> Option<LiveUpdate> {
        let update = self.events.append(draft)?;
        state.metrics.on_update(&update);
        Some(update)
    }

    pub async fn set_analysis_digest(&self, digest: String) -> bool {
        let mut state = self.state.lock().await;
        if state.halt.is_some() {
            return false;
        }
        state.analysis_digest = Some(digest);
        true
    }

    pub async fn set_tenant_results(&self, results: Vec<TenantResult>) -> bool {
        let mut state = self.state.lock().await;
        if state.halt.is_some() {
            return false;
        }
        state.tenant_results = results;
        true
    }

    pub async fn set_score_deltas(&self, deltas: Vec<TenantScoreDelta>) -> bool {
        let mut state = self.state.lock().await;
        if state.halt.is_some() {
            return false;
        }
        state.score_deltas = deltas;
        true
    }

    /// Refreshes throughput. Driven by the metrics ticker.
    pub async fn tick(&self) -> ScanMetrics {
        let mut state = self.state.lock().await;
        state.metrics.tick(self.clock.now())
    }

    pub async fn snapshot(&self) -> ScanStatusView {
        let state = self.state.lock().await;
        ScanStatusView {
            run_id: self.id,
            state: state.status,
            started_at: self.started_at,
            ended_at: state.ended_at,
            stages: state.pipeline.stages().to_vec(),
            sources: state.sources.values().cloned().collect(),
            metrics: state.metrics.current(),
            last_sequence: self.events.last_seq(),
            failure_reason: state.halt.as_ref().map(|h| h.reason.clone()),
        }
    }

    /// Moves the run into its terminal state and seals the event stream.
    ///
    /// Sources still in flight become `cancelled`; stages are frozen by
    /// [`StagePipeline::halt`]. Calling this twice returns the same record.
    pub async fn finish(&self) -> ScanRunRecord {
        let mut state = self.state.lock().await;
        if !state.status.is_terminal() {
            let now = self.clock.now();
            let halted = state.halt.as_ref().map(|h| h.outcome);
            let outcome = match halted {
                Some(outcome) => outcome,
                None if state.pipeline.all_complete() => RunState::Complete,
                None => {
                    let reason = "pipeline ended early".to_string();
                    self.halt_locked(&mut state, RunState::Failed, reason);
                    RunState::Failed
                }
            };

            if outcome == RunState::Complete {
                let metrics = state.metrics.current();
                self.append_locked(
                    &mut state,
                    UpdateDraft::info(format!(
                        "Scan complete: {} tenants scanned, {} findings, {} alerts",
                        metrics.tenants_scanned, metrics.findings, metrics.alerts
                    )),
                );
            } else {
                state.pipeline.halt(outcome, now);
                for status in state.sources.values_mut() {
                    if !status.state.is_terminal() {
                        status.state = SourceState::Cancelled;
                    }
                }
            }

            state.metrics.tick(now);
            state.status = outcome;
            state.ended_at = Some(now);
            self.events.seal(outcome);
        }

        ScanRunRecord {
            id: self.id,
            configuration: (*self.config).clone(),
            state: state.status,
            started_at: self.started_at,
            ended_at: state.ended_at.unwrap_or(self.started_at),
            stages: state.pipeline.stages().to_vec(),
            sources: state.sources.values().cloned().collect(),
            events: self.events.snapshot(),
            metrics: state.metrics.current(),
            tenant_results: state.tenant_results.clone(),
            score_deltas: state.score_deltas.clone(),
            analysis_digest: state.analysis_digest.clone(),
            failure_reason: state.halt.as_ref().map(|h| h.reason.clone()),
        }
    }

    /// Signals waiters that the run has been written to history.
    pub fn mark_finalized(&self, state: RunState) {
        self.finalized.send_replace(Some(state));
    }

    pub async fn wait_finalized(&self) -> RunState {
        let mut rx = self.finalized.subscribe();
        loop {
            if let Some(state) = *rx.borrow_and_update() {
                return state;
            }
            if rx.changed().await.is_err() {
                return self.state().await;
            }
        }
    }
}

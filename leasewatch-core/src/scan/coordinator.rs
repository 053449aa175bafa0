//! Stage coordinator: the command surface and supervisor for scan runs.
//!
//! Each run is driven by one supervising task. Connector calls fan out onto
//! a bounded worker pool; everything they report flows back through the
//! run's serialization point ([`ScanRun`]). Manual cancellation, the scan
//! deadline and the failure threshold all stop a run through
//! [`ScanRun::request_halt`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use leasewatch_model::{
    HistoryFilter, HistoryPage, LiveUpdate, RunState, ScanConfiguration,
    ScanInsights, ScanRunId, ScanRunRecord, ScanSettings, ScanStatusView,
    SourceId, SourceInfo, SourceState, StageId, UpdateKind,
};
use rand::Rng;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::api_types::CancelAck;
use crate::error::{Result, ScanError};

use super::analysis::{self, AnalysisInput, DigestAnalyzer, FindingAnalyzer};
use super::clock::{Clock, SystemClock};
use super::config::OrchestratorConfig;
use super::connector::{
    CollectScope, ConnectorContext, ConnectorError, SourceConnector,
    SourceRegistry,
};
use super::event_stream::{StreamFrame, UpdateDraft};
use super::history::{HistoryError, ScanHistoryStore};
use super::notifier::{AlertNotifier, TracingNotifier};
use super::run::{HaltRequest, ScanRun};
use super::settings::default_configuration;
use super::validation::{MAX_WINDOW_DAYS, ValidationError, validate};

const DEADLINE_REASON: &str = "scan deadline exceeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connect,
    Collect,
}

/// Deadline inputs for one connector call.
#[derive(Debug, Clone, Copy)]
struct CallLimits {
    per_source: Duration,
    scan_deadline: Instant,
}

impl CallLimits {
    /// Earlier of the per-source and scan deadlines, and whether the scan
    /// deadline is the one that binds.
    fn deadline(&self) -> (Instant, bool) {
        let per_source = Instant::now() + self.per_source;
        if per_source < self.scan_deadline {
            (per_source, false)
        } else {
            (self.scan_deadline, true)
        }
    }
}

/// Command dispatcher and read model for scan runs.
#[derive(Clone)]
pub struct ScanCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl fmt::Debug for ScanCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = self.inner.active.try_read().ok().map(|g| g.len());
        f.debug_struct("ScanCoordinator")
            .field("active_scans", &active)
            .field("sources", &self.inner.registry)
            .field("history", &self.inner.history)
            .finish()
    }
}

struct CoordinatorInner {
    registry: SourceRegistry,
    config: OrchestratorConfig,
    history: Arc<dyn ScanHistoryStore>,
    analyzer: Arc<dyn FindingAnalyzer>,
    notifier: Arc<dyn AlertNotifier>,
    clock: Arc<dyn Clock>,
    active: RwLock<HashMap<ScanRunId, Arc<ScanRun>>>,
}

pub struct ScanCoordinatorBuilder {
    registry: SourceRegistry,
    history: Arc<dyn ScanHistoryStore>,
    config: OrchestratorConfig,
    analyzer: Arc<dyn FindingAnalyzer>,
    notifier: Arc<dyn AlertNotifier>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ScanCoordinatorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanCoordinatorBuilder")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScanCoordinatorBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn analyzer(mut self, analyzer: Arc<dyn FindingAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> ScanCoordinator {
        ScanCoordinator {
            inner: Arc::new(CoordinatorInner {
                registry: self.registry,
                config: self.config,
                history: self.history,
                analyzer: self.analyzer,
                notifier: self.notifier,
                clock: self.clock,
                active: RwLock::new(HashMap::new()),
            }),
        }
    }
}

impl ScanCoordinator {
    pub fn builder(
        registry: SourceRegistry,
        history: Arc<dyn ScanHistoryStore>,
    ) -> ScanCoordinatorBuilder {
        ScanCoordinatorBuilder {
            registry,
            history,
            config: OrchestratorConfig::default(),
            analyzer: Arc::new(DigestAnalyzer),
            notifier: Arc::new(TracingNotifier),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn new(
        registry: SourceRegistry,
        history: Arc<dyn ScanHistoryStore>,
    ) -> Self {
        Self::builder(registry, history).build()
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Validates `config` and launches a run. Nothing is created when
    /// validation fails.
    #[instrument(skip_all)]
    pub async fn start_scan(
        &self,
        config: ScanConfiguration,
    ) -> Result<ScanRunId> {
        validate(&config, &self.inner.registry)?;

        let run = ScanRun::new(
            config,
            &self.inner.registry,
            &self.inner.config,
            Arc::clone(&self.inner.clock),
        );
        let run_id = run.id();
        {
            let mut active = self.inner.active.write().await;
            active.insert(run_id, Arc::clone(&run));
        }
        info!(
            run = %run_id,
            sources = run.config().sources.len(),
            "scan accepted"
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.supervise(run).await });
        Ok(run_id)
    }

    /// Starts a run from persisted settings.
    pub async fn start_default_scan(
        &self,
        settings: &ScanSettings,
    ) -> Result<ScanRunId> {
        let config = default_configuration(settings, self.inner.clock.now())?;
        self.start_scan(config).await
    }

    /// Idempotent. Cancelling a finished run acknowledges without touching
    /// its stored record.
    pub async fn cancel_scan(&self, run_id: ScanRunId) -> Result<CancelAck> {
        if let Some(run) = self.inner.lookup(&run_id).await {
            let outcome = run
                .request_halt(RunState::Cancelled, "cancelled by operator")
                .await;
            if outcome == HaltRequest::Accepted {
                info!(run = %run_id, "scan cancellation requested");
            }
            return Ok(CancelAck {
                run_id,
                already_terminal: outcome == HaltRequest::Terminal,
            });
        }

        match self.inner.history.get(run_id).await {
            Ok(_) => Ok(CancelAck {
                run_id,
                already_terminal: true,
            }),
            Err(HistoryError::NotFound(_)) => Err(ScanError::NotFound(run_id)),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn status(&self, run_id: ScanRunId) -> Result<ScanStatusView> {
        if let Some(run) = self.inner.lookup(&run_id).await {
            return Ok(run.snapshot().await);
        }
        Ok(self.stored(run_id).await?.status_view())
    }

    pub async fn active_runs(&self) -> Vec<ScanStatusView> {
        let runs: Vec<_> =
            self.inner.active.read().await.values().cloned().collect();
        let mut views = Vec::with_capacity(runs.len());
        for run in runs {
            views.push(run.snapshot().await);
        }
        views.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        views
    }

    /// Event stream entries with `seq > offset`.
    pub async fn events(
        &self,
        run_id: ScanRunId,
        offset: u64,
    ) -> Result<Vec<LiveUpdate>> {
        if let Some(run) = self.inner.lookup(&run_id).await {
            return Ok(run.events().read_from(offset));
        }
        let record = self.stored(run_id).await?;
        Ok(record.events.into_iter().filter(|e| e.seq > offset).collect())
    }

    /// Live, resumable subscription. Finite: ends after the terminal frame.
    pub async fn subscribe(
        &self,
        run_id: ScanRunId,
        offset: u64,
    ) -> Result<BoxStream<'static, StreamFrame>> {
        if let Some(run) = self.inner.lookup(&run_id).await {
            return Ok(run.events().subscribe_from(offset).boxed());
        }
        let record = self.stored(run_id).await?;
        let terminal = record.state;
        let frames: Vec<StreamFrame> = record
            .events
            .into_iter()
            .filter(|e| e.seq > offset)
            .map(StreamFrame::Update)
            .chain(std::iter::once(StreamFrame::Closed(terminal)))
            .collect();
        Ok(stream::iter(frames).boxed())
    }

    /// Full record of a finished run.
    pub async fn detail(&self, run_id: ScanRunId) -> Result<ScanRunRecord> {
        if self.inner.lookup(&run_id).await.is_some() {
            return Err(ScanError::StillRunning(run_id));
        }
        self.stored(run_id).await
    }

    pub async fn history(
        &self,
        filter: &HistoryFilter,
        page_token: Option<&str>,
    ) -> Result<HistoryPage> {
        Ok(self.inner.history.list(filter, page_token).await?)
    }

    pub async fn insights(&self, window_days: u32) -> Result<ScanInsights> {
        if window_days > MAX_WINDOW_DAYS {
            return Err(ValidationError::InsightsWindowOutOfRange(window_days).into());
        }
        let now = self.inner.clock.now();
        Ok(self.inner.history.insights(now, window_days).await?)
    }

    /// Registered sources with their current health.
    pub async fn source_catalog(&self) -> Vec<SourceInfo> {
        let checks = self.inner.registry.connectors().map(|connector| {
            let connector = Arc::clone(connector);
            let clock = Arc::clone(&self.inner.clock);
            async move {
                let health = connector.status().await;
                SourceInfo {
                    descriptor: connector.descriptor().clone(),
                    health,
                    checked_at: clock.now(),
                }
            }
        });
        futures::future::join_all(checks).await
    }

    /// Resolves once the run has been written to history.
    pub async fn wait_for_terminal(&self, run_id: ScanRunId) -> Result<RunState> {
        if let Some(run) = self.inner.lookup(&run_id).await {
            return Ok(run.wait_finalized().await);
        }
        Ok(self.stored(run_id).await?.state)
    }

    /// Cancels every active run and waits for each to be persisted.
    pub async fn shutdown(&self) {
        let runs: Vec<_> =
            self.inner.active.read().await.values().cloned().collect();
        if runs.is_empty() {
            return;
        }
        info!(count = runs.len(), "cancelling active scans for shutdown");
        for run in &runs {
            run.request_halt(RunState::Cancelled, "server shutting down")
                .await;
        }
        for run in runs {
            run.wait_finalized().await;
        }
    }

    async fn stored(&self, run_id: ScanRunId) -> Result<ScanRunRecord> {
        match self.inner.history.get(run_id).await {
            Ok(record) => Ok(record),
            Err(HistoryError::NotFound(_)) => Err(ScanError::NotFound(run_id)),
            Err(err) => Err(err.into()),
        }
    }
}

impl CoordinatorInner {
    async fn lookup(&self, run_id: &ScanRunId) -> Option<Arc<ScanRun>> {
        self.active.read().await.get(run_id).cloned()
    }

    async fn supervise(self: Arc<Self>, run: Arc<ScanRun>) {
        let scan_deadline = Instant::now() + self.config.scan_timeout();
        let watchers = CancellationToken::new();

        let deadline_watch = tokio::spawn({
            let run = Arc::clone(&run);
            let stop = watchers.clone();
            async move {
                tokio::select! {
                    _ = sleep_until(scan_deadline) => {
                        if run
                            .request_halt(RunState::Cancelled, DEADLINE_REASON)
                            .await
                            == HaltRequest::Accepted
                        {
                            warn!(run = %run.id(), "scan deadline exceeded");
                        }
                    }
                    _ = stop.cancelled() => {}
                }
            }
        });

        let ticker = tokio::spawn({
            let run = Arc::clone(&run);
            let stop = watchers.clone();
            let period = self.config.metrics_tick();
            async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            run.tick().await;
                        }
                        _ = stop.cancelled() => break,
                    }
                }
            }
        });

        if run.mark_running().await {
            info!(run = %run.id(), "scan running");
            self.run_pipeline(&run, scan_deadline).await;
        }

        watchers.cancel();
        let _ = deadline_watch.await;
        let _ = ticker.await;

        let record = run.finish().await;
        self.finalize(&run, record).await;
    }

    async fn run_pipeline(&self, run: &Arc<ScanRun>, scan_deadline: Instant) {
        let sources: Vec<SourceId> = run.config().sources.iter().cloned().collect();

        if !run.begin_stage(StageId::Connect).await {
            return;
        }
        let connected = self
            .fan_out(run, Phase::Connect, sources, scan_deadline)
            .await;
        if !run.complete_stage(StageId::Connect).await {
            return;
        }

        if !run.begin_stage(StageId::Collect).await {
            return;
        }
        if connected.is_empty() {
            run.emit(UpdateDraft::info(
                "No sources connected; nothing to collect",
            ))
            .await;
        } else {
            self.fan_out(run, Phase::Collect, connected, scan_deadline)
                .await;
        }
        if !run.complete_stage(StageId::Collect).await {
            return;
        }

        if !run.begin_stage(StageId::Analyze).await {
            return;
        }
        let events = run.events().snapshot();
        let input = AnalysisInput {
            run_id: run.id(),
            events: &events,
            instructions: run.config().analysis_instructions.as_deref(),
            focus_areas: &run.config().focus_areas,
        };
        let analyzed = tokio::select! {
            res = self.analyzer.analyze(input) => res,
            _ = run.cancel_token().cancelled() => return,
        };
        match analyzed {
            Ok(digest) => {
                run.emit(UpdateDraft::info(digest.summary.clone())).await;
                run.set_analysis_digest(digest.summary).await;
            }
            Err(err) => {
                error!(run = %run.id(), error = %err, "analysis failed");
                run.request_halt(RunState::Failed, err.to_string()).await;
                return;
            }
        }
        if !run.complete_stage(StageId::Analyze).await {
            return;
        }

        if !run.begin_stage(StageId::Compile).await {
            return;
        }
        let results = analysis::compile(&run.events().snapshot());
        run.emit(UpdateDraft::info(format!(
            "Compiled results for {} tenants",
            results.len()
        )))
        .await;
        let deltas = analysis::score(&results);
        run.set_tenant_results(results).await;
        if !run.complete_stage(StageId::Compile).await {
            return;
        }

        if !run.begin_stage(StageId::Score).await {
            return;
        }
        let upgrades = deltas.iter().filter(|d| d.net_change > 0).count();
        let downgrades = deltas.iter().filter(|d| d.net_change < 0).count();
        run.emit(UpdateDraft::info(format!(
            "Risk scores updated: {upgrades} upgraded, {downgrades} downgraded"
        )))
        .await;
        run.set_score_deltas(deltas).await;
        run.complete_stage(StageId::Score).await;
    }

    /// Runs `phase` for every source on a bounded pool and returns the
    /// sources that succeeded.
    async fn fan_out(
        &self,
        run: &Arc<ScanRun>,
        phase: Phase,
        sources: Vec<SourceId>,
        scan_deadline: Instant,
    ) -> Vec<SourceId> {
        let semaphore =
            Arc::new(Semaphore::new(self.config.worker_slots(sources.len())));
        let limits = CallLimits {
            per_source: self.config.per_source_timeout(),
            scan_deadline,
        };
        let mut tasks = JoinSet::new();
        let mut task_sources = HashMap::new();

        for source in sources {
            let Some(connector) = self.registry.get(&source) else {
                continue;
            };
            let run = Arc::clone(run);
            let semaphore = Arc::clone(&semaphore);
            let id = source.clone();
            let handle = tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                if run.cancel_token().is_cancelled() {
                    return None;
                }
                let ok = match phase {
                    Phase::Connect => {
                        connect_source(&run, connector.as_ref(), &id, limits)
                            .await
                    }
                    Phase::Collect => {
                        collect_source(&run, connector.as_ref(), &id, limits)
                            .await
                    }
                };
                ok.then_some(id)
            });
            task_sources.insert(handle.id(), source);
        }

        let mut succeeded = Vec::new();
        let grace = self.config.cancel_grace();
        let expired = {
            let drain = async {
                while let Some(joined) = tasks.join_next_with_id().await {
                    match joined {
                        Ok((_, Some(id))) => succeeded.push(id),
                        Ok((_, None)) => {}
                        Err(err) => {
                            let source = task_sources.get(&err.id()).cloned();
                            if err.is_panic()
                                && let Some(source) = source
                            {
                                error!(run = %run.id(), %source, "connector task panicked");
                                run.fail_source(
                                    &source,
                                    &ConnectorError::Unavailable(
                                        "connector task panicked".into(),
                                    ),
                                )
                                .await;
                            }
                        }
                    }
                }
            };
            let grace_timer = async {
                run.cancel_token().cancelled().await;
                tokio::time::sleep(grace).await;
            };
            tokio::select! {
                _ = drain => false,
                _ = grace_timer => true,
            }
        };

        if expired {
            warn!(
                run = %run.id(),
                remaining = tasks.len(),
                ?phase,
                "aborting connector calls after cancel grace"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
        succeeded
    }

    async fn finalize(&self, run: &Arc<ScanRun>, record: ScanRunRecord) {
        self.persist(&record).await;

        info!(
            run = %record.id,
            state = %record.state,
            tenants = record.metrics.tenants_scanned,
            findings = record.metrics.findings,
            alerts = record.metrics.alerts,
            duration_ms = record.duration_ms(),
            "scan finished"
        );

        if record.state == RunState::Complete
            && record.configuration.notify_on_alerts
            && record.metrics.alerts > 0
        {
            let alerts: Vec<LiveUpdate> = record
                .events
                .iter()
                .filter(|e| e.kind == UpdateKind::Alert)
                .cloned()
                .collect();
            if let Err(err) =
                self.notifier.notify(&record.summary(), &alerts).await
            {
                warn!(run = %record.id, error = %err, "alert notification failed");
            }
        }

        {
            let mut active = self.active.write().await;
            active.remove(&record.id);
        }
        run.mark_finalized(record.state);
    }

    /// Writes a terminal run to history, retrying with backoff until it
    /// sticks.
    async fn persist(&self, record: &ScanRunRecord) {
        let retry = self.config.history_retry;
        let mut attempt = 0u32;
        loop {
            match self.history.save(record).await {
                Ok(()) => {
                    if attempt > 0 {
                        info!(run = %record.id, attempts = attempt + 1, "scan run persisted after retries");
                    }
                    return;
                }
                Err(HistoryError::DuplicateRun(id)) => {
                    warn!(run = %id, "scan run already in history");
                    return;
                }
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    let unit: f64 = rand::rng().random();
                    let delay = retry.delay_for(attempt, unit);
                    error!(
                        run = %record.id,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "failed to persist scan run; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn context_for(
    run: &ScanRun,
    source: &SourceId,
    limits: CallLimits,
) -> (ConnectorContext, bool) {
    let (deadline, scan_bound) = limits.deadline();
    let ctx = ConnectorContext {
        run_id: run.id(),
        source: source.clone(),
        cancel: run.cancel_token().child_token(),
        deadline,
    };
    (ctx, scan_bound)
}

async fn settle_failure(
    run: &ScanRun,
    source: &SourceId,
    err: ConnectorError,
) {
    if err == ConnectorError::Cancelled {
        debug!(run = %run.id(), %source, "connector observed cancellation");
        return;
    }
    run.fail_source(source, &err).await;
}

async fn settle_deadline(
    run: &ScanRun,
    source: &SourceId,
    limits: CallLimits,
    scan_bound: bool,
) {
    if scan_bound {
        run.request_halt(RunState::Cancelled, DEADLINE_REASON).await;
        return;
    }
    let err = ConnectorError::Timeout(format!(
        "no response within {} ms",
        limits.per_source.as_millis()
    ));
    run.fail_source(source, &err).await;
}

async fn connect_source(
    run: &ScanRun,
    connector: &dyn SourceConnector,
    source: &SourceId,
    limits: CallLimits,
) -> bool {
    if !run.advance_source(source, SourceState::Connecting).await {
        return false;
    }
    let (ctx, scan_bound) = context_for(run, source, limits);
    match timeout_at(ctx.deadline, connector.connect(&ctx)).await {
        Ok(Ok(())) => {
            debug!(run = %run.id(), %source, "source connected");
            true
        }
        Ok(Err(err)) => {
            settle_failure(run, source, err).await;
            false
        }
        Err(_) => {
            settle_deadline(run, source, limits, scan_bound).await;
            false
        }
    }
}

async fn collect_source(
    run: &ScanRun,
    connector: &dyn SourceConnector,
    source: &SourceId,
    limits: CallLimits,
) -> bool {
    if !run.advance_source(source, SourceState::Collecting).await {
        return false;
    }
    let (ctx, scan_bound) = context_for(run, source, limits);
    let scope = CollectScope::from_config(run.id(), run.config());

    let work = async {
        let mut items = connector.collect(&ctx, scope).await?;
        while let Some(item) = items.next().await {
            if run.record_item(source, item?).await.is_none() {
                return Err(ConnectorError::Cancelled);
            }
        }
        Ok::<(), ConnectorError>(())
    };

    match timeout_at(ctx.deadline, work).await {
        Ok(Ok(())) => run.complete_source(source).await,
        Ok(Err(err)) => {
            settle_failure(run, source, err).await;
            false
        }
        Err(_) => {
            settle_deadline(run, source, limits, scan_bound).await;
            false
        }
    }
}

//! Counters derived from a run's event stream and source statuses.
//!
//! [`fold`] is the reference definition. [`MetricsAggregator`] maintains the
//! same numbers incrementally as updates and source transitions arrive, and
//! refreshes throughput on a tick.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use leasewatch_model::{
    LiveUpdate, ScanMetrics, SourceId, SourceState, SourceStatus, TenantId,
    UpdateKind,
};

fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let window = chrono::Duration::from_std(window)
        .unwrap_or_else(|_| chrono::Duration::seconds(1));
    now.checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn rate(count: usize, window: Duration) -> f64 {
    let secs = window.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    count as f64 / secs
}

/// Computes metrics from scratch.
///
/// Tenants scanned counts distinct tenants referenced by updates from sources
/// that reached `complete`. Throughput counts collected records whose
/// timestamp falls in `(now - window, now]`; status messages about a source
/// do not count.
pub fn fold(
    events: &[LiveUpdate],
    sources: &[SourceStatus],
    now: DateTime<Utc>,
    window: Duration,
) -> ScanMetrics {
    let complete: BTreeSet<&SourceId> = sources
        .iter()
        .filter(|s| s.state == SourceState::Complete)
        .map(|s| &s.id)
        .collect();
    let since = window_start(now, window);

    let mut metrics = ScanMetrics::default();
    let mut tenants: BTreeSet<&TenantId> = BTreeSet::new();
    let mut recent = 0usize;

    for update in events {
        match update.kind {
            UpdateKind::Finding => metrics.findings += 1,
            UpdateKind::Alert => metrics.alerts += 1,
            UpdateKind::ScoreChange => match update.score_delta {
                Some(d) if d > 0 => metrics.score_upgrades += 1,
                Some(d) if d < 0 => metrics.score_downgrades += 1,
                _ => {}
            },
            UpdateKind::Info => {}
        }
        if let (Some(source), Some(tenant)) = (&update.source, &update.tenant)
            && complete.contains(source)
        {
            tenants.insert(tenant);
        }
        if update.collected
            && update.timestamp > since
            && update.timestamp <= now
        {
            recent += 1;
        }
    }

    metrics.tenants_scanned = tenants.len() as u64;
    metrics.records_per_second = rate(recent, window);
    metrics
}

/// Incremental form of [`fold`].
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    window: Duration,
    current: ScanMetrics,
    tenants_by_source: HashMap<SourceId, BTreeSet<TenantId>>,
    complete_sources: BTreeSet<SourceId>,
    scanned: BTreeSet<TenantId>,
    recent: VecDeque<DateTime<Utc>>,
}

impl MetricsAggregator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            current: ScanMetrics::default(),
            tenants_by_source: HashMap::new(),
            complete_sources: BTreeSet::new(),
            scanned: BTreeSet::new(),
            recent: VecDeque::new(),
        }
    }

    pub fn current(&self) -> ScanMetrics {
        self.current
    }

    pub fn on_update(&mut self, update: &LiveUpdate) {
        match update.kind {
            UpdateKind::Finding => self.current.findings += 1,
            UpdateKind::Alert => self.current.alerts += 1,
            UpdateKind::ScoreChange => match update.score_delta {
                Some(d) if d > 0 => self.current.score_upgrades += 1,
                Some(d) if d < 0 => self.current.score_downgrades += 1,
                _ => {}
            },
            UpdateKind::Info => {}
        }

        let Some(source) = &update.source else {
            return;
        };
        if update.collected {
            self.recent.push_back(update.timestamp);
        }
        if let Some(tenant) = &update.tenant {
            if self.complete_sources.contains(source) {
                self.scanned.insert(tenant.clone());
                self.current.tenants_scanned = self.scanned.len() as u64;
            }
            self.tenants_by_source
                .entry(source.clone())
                .or_default()
                .insert(tenant.clone());
        }
    }

    pub fn on_source(&mut self, status: &SourceStatus) {
        if status.state != SourceState::Complete
            || !self.complete_sources.insert(status.id.clone())
        {
            return;
        }
        if let Some(tenants) = self.tenants_by_source.get(&status.id) {
            self.scanned.extend(tenants.iter().cloned());
        }
        self.current.tenants_scanned = self.scanned.len() as u64;
    }

    /// Refreshes throughput for `now`. Called on a fixed cadence, not per
    /// update.
    pub fn tick(&mut self, now: DateTime<Utc>) -> ScanMetrics {
        let since = window_start(now, self.window);
        while self.recent.front().is_some_and(|at| *at <= since) {
            self.recent.pop_front();
        }
        let in_window =
            self.recent.iter().filter(|at| **at <= now).count();
        self.current.records_per_second = rate(in_window, self.window);
        self.current
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    use super::*;

    fn update(
        seq: u64,
        kind: UpdateKind,
        source: &str,
        tenant: &str,
        at: DateTime<Utc>,
    ) -> LiveUpdate {
        LiveUpdate {
            id: Uuid::now_v7(),
            seq,
            timestamp: at,
            kind,
            message: format!("event {seq}"),
            tenant: Some(TenantId::from(tenant)),
            source: Some(SourceId::from(source)),
            score_delta: None,
            collected: true,
        }
    }

    fn status(id: &str, state: SourceState) -> SourceStatus {
        let mut s = SourceStatus::pending(SourceId::from(id), id);
        s.state = state;
        s
    }

    fn sample(now: DateTime<Utc>) -> Vec<LiveUpdate> {
        let mut events = vec![
            update(1, UpdateKind::Finding, "dnb", "t1", now),
            update(2, UpdateKind::Finding, "dnb", "t2", now),
            update(3, UpdateKind::Alert, "sec", "t3", now),
            update(4, UpdateKind::ScoreChange, "dnb", "t1", now),
            update(5, UpdateKind::ScoreChange, "sec", "t3", now),
            update(6, UpdateKind::ScoreChange, "sec", "t3", now),
        ];
        events[3].score_delta = Some(2);
        events[4].score_delta = Some(-1);
        events[5].score_delta = Some(0);
        events
    }

    #[test]
    fn fold_counts_kinds_and_partitions_score_changes() {
        let now = Utc::now();
        let sources = [
            status("dnb", SourceState::Complete),
            status("sec", SourceState::Error),
        ];
        let metrics =
            fold(&sample(now), &sources, now, Duration::from_secs(10));
        assert_eq!(metrics.findings, 2);
        assert_eq!(metrics.alerts, 1);
        assert_eq!(metrics.score_upgrades, 1);
        assert_eq!(metrics.score_downgrades, 1);
        // Only the complete source contributes tenants.
        assert_eq!(metrics.tenants_scanned, 2);
        assert!((metrics.records_per_second - 0.6).abs() < 1e-9);
    }

    #[test]
    fn fold_is_idempotent_and_monotone_over_prefixes() {
        let now = Utc::now();
        let events = sample(now);
        let sources = [
            status("dnb", SourceState::Complete),
            status("sec", SourceState::Complete),
        ];
        let window = Duration::from_secs(10);
        let full = fold(&events, &sources, now, window);
        assert_eq!(full, fold(&events, &sources, now, window));
        for n in 0..events.len() {
            let prefix = fold(&events[..n], &sources, now, window);
            assert!(prefix.findings <= full.findings);
            assert!(prefix.alerts <= full.alerts);
            assert!(prefix.tenants_scanned <= full.tenants_scanned);
            assert!(prefix.score_upgrades <= full.score_upgrades);
            assert!(prefix.score_downgrades <= full.score_downgrades);
        }
    }

    #[test]
    fn aggregator_matches_fold() {
        let now = Utc::now();
        let events = sample(now);
        let window = Duration::from_secs(10);
        let mut agg = MetricsAggregator::new(window);

        let mut sources = vec![
            status("dnb", SourceState::Collecting),
            status("sec", SourceState::Collecting),
        ];
        for e in &events {
            agg.on_update(e);
        }
        sources[0].state = SourceState::Complete;
        agg.on_source(&sources[0]);
        sources[1].state = SourceState::Complete;
        agg.on_source(&sources[1]);

        assert_eq!(agg.tick(now), fold(&events, &sources, now, window));
    }

    #[test]
    fn throughput_follows_the_clock_not_the_run() {
        let start = Utc::now();
        let window = Duration::from_secs(10);
        let mut agg = MetricsAggregator::new(window);
        for seq in 0..20 {
            agg.on_update(&update(
                seq + 1,
                UpdateKind::Info,
                "news",
                "t",
                start,
            ));
        }
        assert!((agg.tick(start).records_per_second - 2.0).abs() < 1e-9);
        let later = start + ChronoDuration::seconds(11);
        assert_eq!(agg.tick(later).records_per_second, 0.0);
    }

    #[test]
    fn source_status_messages_are_not_throughput() {
        let now = Utc::now();
        let window = Duration::from_secs(10);
        let mut status_only = update(1, UpdateKind::Info, "dnb", "t", now);
        status_only.tenant = None;
        status_only.collected = false;
        let events = vec![status_only.clone(), status_only];

        let sources = [status("dnb", SourceState::Complete)];
        assert_eq!(fold(&events, &sources, now, window).records_per_second, 0.0);

        let mut agg = MetricsAggregator::new(window);
        for e in &events {
            agg.on_update(e);
        }
        assert_eq!(agg.tick(now).records_per_second, 0.0);
    }
}

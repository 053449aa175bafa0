use std::time::Duration;

use leasewatch_model::{ScanFrequency, ScanRunId};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::app_state::AppState;

/// Period between scheduled scans, `None` for continuous mode.
pub fn period(frequency: ScanFrequency) -> Option<Duration> {
    match frequency {
        ScanFrequency::Continuous => None,
        ScanFrequency::Hourly => Some(Duration::from_secs(60 * 60)),
        ScanFrequency::Daily => Some(Duration::from_secs(24 * 60 * 60)),
        ScanFrequency::Weekly => Some(Duration::from_secs(7 * 24 * 60 * 60)),
    }
}

/// Starts scans from the stored settings at their configured frequency.
///
/// Continuous mode starts the next run once the previous one is terminal,
/// after `continuous_gap`. Periodic modes skip a slot while the previous
/// scheduled run is still active. Stops when `state.shutdown` fires.
#[derive(Debug)]
pub struct ScanScheduler {
    state: AppState,
    continuous_gap: Duration,
}

impl ScanScheduler {
    pub fn new(state: AppState) -> Self {
        let continuous_gap = state.config().scheduler.continuous_gap();
        Self {
            state,
            continuous_gap,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let shutdown = self.state.shutdown.clone();
        let mut previous: Option<ScanRunId> = None;
        info!("scan scheduler started");

        loop {
            let frequency = self.state.settings().get().await.frequency;
            let wait = period(frequency).unwrap_or(self.continuous_gap);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            if let Some(id) = previous
                && self.is_active(id).await
            {
                debug!(run = %id, "previous scheduled scan still running; skipping slot");
                continue;
            }

            let settings = self.state.settings().get().await;
            match self.state.coordinator().start_default_scan(&settings).await {
                Ok(id) => {
                    info!(run = %id, frequency = ?settings.frequency, "scheduled scan started");
                    previous = Some(id);
                    if settings.frequency == ScanFrequency::Continuous {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = self.state.coordinator().wait_for_terminal(id) => {}
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "scheduled scan rejected");
                }
            }
        }

        info!("scan scheduler stopped");
    }

    async fn is_active(&self, id: ScanRunId) -> bool {
        self.state
            .coordinator()
            .status(id)
            .await
            .is_ok_and(|view| !view.state.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use leasewatch_model::HistoryFilter;

    use super::*;
    use crate::infra::{config::Config, startup::build_state};

    async fn state(frequency: ScanFrequency) -> AppState {
        let mut config = Config::default();
        config.sources.demo_pace_ms = 10;
        config.scheduler.continuous_gap_ms = 30_000;
        config.settings.frequency = frequency;
        build_state(config).await.expect("state")
    }

    async fn stored_runs(state: &AppState) -> usize {
        state
            .coordinator()
            .history(&HistoryFilter::default(), None)
            .await
            .expect("history")
            .items
            .len()
    }

    #[test]
    fn periods_follow_frequency() {
        assert_eq!(period(ScanFrequency::Continuous), None);
        assert_eq!(
            period(ScanFrequency::Hourly),
            Some(Duration::from_secs(3_600))
        );
        assert!(period(ScanFrequency::Weekly) > period(ScanFrequency::Daily));
    }

    #[tokio::test(start_paused = true)]
    async fn hourly_schedule_starts_one_scan_per_hour() {
        let state = state(ScanFrequency::Hourly).await;
        let handle = ScanScheduler::new(state.clone()).spawn();

        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert_eq!(stored_runs(&state).await, 0);

        tokio::time::sleep(Duration::from_secs(40 * 60)).await;
        assert_eq!(stored_runs(&state).await, 1);

        state.shutdown.cancel();
        handle.await.expect("scheduler exits");
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_schedule_waits_for_each_run() {
        let state = state(ScanFrequency::Continuous).await;
        let handle = ScanScheduler::new(state.clone()).spawn();

        tokio::time::sleep(Duration::from_secs(100)).await;
        let runs = stored_runs(&state).await;
        assert!(runs >= 2, "expected repeated runs, got {runs}");
        assert!(state.coordinator().active_runs().await.len() <= 1);

        state.shutdown.cancel();
        handle.await.expect("scheduler exits");
    }
}

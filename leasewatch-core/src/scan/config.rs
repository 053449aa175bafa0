use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs that tune the scan coordinator.
///
/// All fields carry defaults so a partial configuration file only needs to
/// name what it overrides.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrent connector calls within one run.
    pub max_concurrent_connectors: usize,
    /// A run fails once `errored / enabled` exceeds this ratio.
    pub failure_threshold: f64,
    pub per_source_timeout_ms: u64,
    pub scan_timeout_ms: u64,
    /// How long in-flight connector calls get to return after a cancel.
    pub cancel_grace_ms: u64,
    pub throughput_window_ms: u64,
    pub metrics_tick_ms: u64,
    /// Broadcast buffer for live subscribers of a run.
    pub broadcast_capacity: usize,
    /// Backoff applied while writing a terminal run to history.
    pub history_retry: RetryConfig,
}

impl OrchestratorConfig {
    pub fn per_source_timeout(&self) -> Duration {
        Duration::from_millis(self.per_source_timeout_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn throughput_window(&self) -> Duration {
        Duration::from_millis(self.throughput_window_ms.max(1))
    }

    pub fn metrics_tick(&self) -> Duration {
        Duration::from_millis(self.metrics_tick_ms.max(1))
    }

    /// Worker pool size for a run with `enabled` sources.
    pub fn worker_slots(&self, enabled: usize) -> usize {
        enabled.min(self.max_concurrent_connectors).max(1)
    }

    /// Whether `errored` failures out of `enabled` sources fail the run.
    pub fn exceeds_failure_threshold(
        &self,
        errored: usize,
        enabled: usize,
    ) -> bool {
        if enabled == 0 {
            return false;
        }
        (errored as f64) > self.failure_threshold * (enabled as f64)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_connectors: 16,
            failure_threshold: 0.5,
            per_source_timeout_ms: 60_000,
            scan_timeout_ms: 10 * 60 * 1_000,
            cancel_grace_ms: 5_000,
            throughput_window_ms: 10_000,
            metrics_tick_ms: 1_000,
            broadcast_capacity: 1024,
            history_retry: RetryConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Percentage-based jitter to spread out retries.
    pub jitter_ratio: f32,
    /// Minimum jitter in milliseconds so tiny delays still randomise a bit.
    pub jitter_min_ms: u64,
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Delay before retry number `attempt` (1-based), exponential and capped,
    /// with jitter drawn from `unit` in `[0, 1)`.
    pub fn delay_for(&self, attempt: u32, unit: f64) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let anchor = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_max_ms);
        if anchor == 0 {
            return Duration::ZERO;
        }

        let jitter_span = ((anchor as f64) * f64::from(self.jitter_ratio.max(0.0)))
            .max(self.jitter_min_ms as f64)
            .min(self.backoff_max_ms as f64);
        let lower = 0f64.max(anchor as f64 - jitter_span);
        let upper = (anchor as f64 + jitter_span).min(self.backoff_max_ms as f64);
        if upper <= lower {
            return Duration::from_millis(lower.round() as u64);
        }
        let jittered = lower + (upper - lower) * unit.clamp(0.0, 1.0);
        Duration::from_millis(jittered.round() as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 250,
            backoff_max_ms: 30_000,
            jitter_ratio: 0.2,
            jitter_min_ms: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_strictly_more_than_half_by_default() {
        let config = OrchestratorConfig::default();
        assert!(!config.exceeds_failure_threshold(1, 3));
        assert!(!config.exceeds_failure_threshold(2, 4));
        assert!(config.exceeds_failure_threshold(3, 4));
        assert!(config.exceeds_failure_threshold(2, 3));
        assert!(!config.exceeds_failure_threshold(0, 0));
    }

    #[test]
    fn worker_slots_are_capped() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.worker_slots(3), 3);
        assert_eq!(config.worker_slots(40), 16);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryConfig {
            jitter_ratio: 0.0,
            jitter_min_ms: 0,
            ..RetryConfig::default()
        };
        assert_eq!(retry.delay_for(1, 0.5), Duration::from_millis(250));
        assert_eq!(retry.delay_for(3, 0.5), Duration::from_millis(1_000));
        assert_eq!(retry.delay_for(30, 0.5), retry.backoff_max());
    }

    #[test]
    fn jitter_stays_within_span() {
        let retry = RetryConfig::default();
        for unit in [0.0, 0.3, 0.99] {
            let delay = retry.delay_for(2, unit).as_millis() as u64;
            assert!((400..=600).contains(&delay), "delay {delay}");
        }
    }
}

/// Derived counters for a scan run. Always a fold over the event stream and
/// source statuses; never updated on its own.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanMetrics {
    pub tenants_scanned: u64,
    pub findings: u64,
    pub alerts: u64,
    pub score_upgrades: u64,
    pub score_downgrades: u64,
    pub records_per_second: f64,
}

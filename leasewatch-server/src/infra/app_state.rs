use std::{fmt, sync::Arc};

use leasewatch_core::scan::{ScanCoordinator, SettingsStore};
use tokio_util::sync::CancellationToken;

use super::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: ScanCoordinator,
    pub settings: Arc<dyn SettingsStore>,
    pub config: Arc<Config>,
    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("coordinator", &self.coordinator)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn coordinator(&self) -> &ScanCoordinator {
        &self.coordinator
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

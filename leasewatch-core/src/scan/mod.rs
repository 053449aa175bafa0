//! Scan orchestration: connectors, the staged coordinator, the event stream,
//! metrics, and history.

pub mod analysis;
pub mod clock;
pub mod config;
pub mod connector;
pub mod connectors;
pub mod coordinator;
pub mod event_stream;
pub mod history;
#[cfg(feature = "postgres")]
pub mod history_postgres;
pub mod metrics;
pub mod notifier;
pub mod run;
pub mod settings;
pub mod stage;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{OrchestratorConfig, RetryConfig};
pub use connector::{
    CollectScope, CollectedItem, ConnectorContext, ConnectorError,
    SourceConnector, SourceRegistry,
};
pub use coordinator::ScanCoordinator;
pub use event_stream::{EventStream, StreamFrame};
pub use history::{InMemoryScanHistoryStore, ScanHistoryStore};
pub use settings::{InMemorySettingsStore, SettingsStore};

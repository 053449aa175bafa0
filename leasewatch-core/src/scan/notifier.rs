use std::fmt;

use async_trait::async_trait;
use leasewatch_model::{LiveUpdate, ScanRunSummary};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("alert notification failed: {0}")]
pub struct NotifyError(pub String);

/// Hands alerts from a completed run to a delivery channel.
#[async_trait]
pub trait AlertNotifier: Send + Sync + fmt::Debug {
    async fn notify(
        &self,
        summary: &ScanRunSummary,
        alerts: &[LiveUpdate],
    ) -> Result<(), NotifyError>;
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl AlertNotifier for TracingNotifier {
    async fn notify(
        &self,
        summary: &ScanRunSummary,
        alerts: &[LiveUpdate],
    ) -> Result<(), NotifyError> {
        for alert in alerts {
            info!(
                run = %summary.id,
                tenant = alert.tenant.as_ref().map(|t| t.as_str()),
                seq = alert.seq,
                "alert: {}",
                alert.message
            );
        }
        Ok(())
    }
}

//! Deterministic connector driven by a script. Backs demo mode and tests.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use leasewatch_model::{
    SourceDescriptor, SourceErrorKind, SourceHealth, SourceId,
};

use crate::scan::connector::{
    CollectScope, CollectedItem, ConnectorContext, ConnectorError,
    ItemStream, SourceConnector,
};

use super::catalog::builtin_descriptor;

/// What a scripted step does once its delay has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Succeed,
    Fail(SourceErrorKind),
    /// Waits until the context is cancelled.
    Hang,
    /// Never returns, even when cancelled.
    Stall,
}

#[derive(Debug, Clone)]
pub struct SourceScript {
    pub connect: ScriptOutcome,
    pub connect_delay: Duration,
    pub items: Vec<CollectedItem>,
    pub item_delay: Duration,
    /// Applied after every item has been yielded.
    pub collect: ScriptOutcome,
    pub health: SourceHealth,
}

impl Default for SourceScript {
    fn default() -> Self {
        Self {
            connect: ScriptOutcome::Succeed,
            connect_delay: Duration::ZERO,
            items: Vec::new(),
            item_delay: Duration::ZERO,
            collect: ScriptOutcome::Succeed,
            health: SourceHealth::Healthy,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    descriptor: SourceDescriptor,
    script: SourceScript,
}

impl ScriptedConnector {
    pub fn new(descriptor: SourceDescriptor, script: SourceScript) -> Self {
        Self { descriptor, script }
    }

    /// Uses the catalog descriptor when `id` is a built-in source.
    pub fn for_source(id: &str, script: SourceScript) -> Self {
        let descriptor = builtin_descriptor(&SourceId::from(id))
            .unwrap_or_else(|| SourceDescriptor::new(id, id, "scripted source"));
        Self::new(descriptor, script)
    }

    /// Connects and yields `records` findings, one per distinct tenant
    /// `{id}-tenant-{n}`.
    pub fn succeeding(id: &str, records: usize) -> Self {
        let items = (0..records)
            .map(|n| {
                CollectedItem::finding(
                    format!("{id}-tenant-{n}"),
                    format!("{id} record {n}"),
                )
            })
            .collect();
        Self::for_source(
            id,
            SourceScript {
                items,
                ..SourceScript::default()
            },
        )
    }

    pub fn failing_connect(id: &str, kind: SourceErrorKind) -> Self {
        Self::for_source(
            id,
            SourceScript {
                connect: ScriptOutcome::Fail(kind),
                ..SourceScript::default()
            },
        )
    }

    pub fn with_items(mut self, items: Vec<CollectedItem>) -> Self {
        self.script.items = items;
        self
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.script.item_delay = delay;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.script.connect_delay = delay;
        self
    }

    pub fn with_connect(mut self, outcome: ScriptOutcome) -> Self {
        self.script.connect = outcome;
        self
    }

    pub fn with_collect(mut self, outcome: ScriptOutcome) -> Self {
        self.script.collect = outcome;
        self
    }

    pub fn with_health(mut self, health: SourceHealth) -> Self {
        self.script.health = health;
        self
    }

    async fn play(
        outcome: &ScriptOutcome,
        ctx: &ConnectorContext,
    ) -> Result<(), ConnectorError> {
        match outcome {
            ScriptOutcome::Succeed => Ok(()),
            ScriptOutcome::Fail(kind) => Err(ConnectorError::from_kind(
                *kind,
                format!("scripted {kind} from {}", ctx.source),
            )),
            ScriptOutcome::Hang => {
                ctx.cancelled().await;
                Err(ConnectorError::Cancelled)
            }
            ScriptOutcome::Stall => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SourceConnector for ScriptedConnector {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn connect(
        &self,
        ctx: &ConnectorContext,
    ) -> Result<(), ConnectorError> {
        if !self.script.connect_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.script.connect_delay) => {}
                _ = ctx.cancelled() => return Err(ConnectorError::Cancelled),
            }
        }
        Self::play(&self.script.connect, ctx).await
    }

    async fn collect<'a>(
        &'a self,
        ctx: &'a ConnectorContext,
        scope: CollectScope,
    ) -> Result<ItemStream<'a>, ConnectorError> {
        let stream = async_stream::stream! {
            for item in &self.script.items {
                if !self.script.item_delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(self.script.item_delay) => {}
                        _ = ctx.cancelled() => {
                            yield Err(ConnectorError::Cancelled);
                            return;
                        }
                    }
                }
                if ctx.is_cancelled() {
                    yield Err(ConnectorError::Cancelled);
                    return;
                }
                if scope.admits_tenant(item.tenant.as_ref()) {
                    yield Ok(item.clone());
                }
            }
            if let Err(err) = Self::play(&self.script.collect, ctx).await {
                yield Err(err);
            }
        };
        Ok(stream.boxed())
    }

    async fn status(&self) -> SourceHealth {
        self.script.health.clone()
    }
}

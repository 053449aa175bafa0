//! Append-only, sequence-ordered log of live updates for one run.
//!
//! Sequence numbers start at 1 and are assigned under the log's write lock,
//! so they are gapless and strictly increasing. Once sealed the log rejects
//! appends. Readers either take a prefix snapshot or follow the log through
//! [`EventStream::subscribe_from`], which replays history and then switches
//! to the live broadcast without duplicates.

use std::fmt;
use std::sync::Arc;

use futures::Stream;
use leasewatch_model::{
    LiveUpdate, RunState, SourceId, TenantId, UpdateKind,
};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::clock::Clock;
use super::connector::CollectedItem;

/// Frame delivered to live subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Update(LiveUpdate),
    /// The run reached a terminal state; nothing follows.
    Closed(RunState),
}

/// Update content before the log assigns identity, sequence and time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDraft {
    pub kind: UpdateKind,
    pub message: String,
    pub tenant: Option<TenantId>,
    pub source: Option<SourceId>,
    pub score_delta: Option<i32>,
    pub collected: bool,
}

impl UpdateDraft {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::Info,
            message: message.into(),
            tenant: None,
            source: None,
            score_delta: None,
            collected: false,
        }
    }

    pub fn from_source(mut self, source: &SourceId) -> Self {
        self.source = Some(source.clone());
        self
    }

    pub fn from_item(source: &SourceId, item: CollectedItem) -> Self {
        Self {
            kind: item.kind,
            message: item.message,
            tenant: item.tenant,
            source: Some(source.clone()),
            score_delta: item.score_delta,
            collected: true,
        }
    }
}

struct Log {
    entries: Vec<LiveUpdate>,
    sealed: Option<RunState>,
}

pub struct EventStream {
    log: RwLock<Log>,
    tx: broadcast::Sender<StreamFrame>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let log = self.log.try_read();
        f.debug_struct("EventStream")
            .field("len", &log.as_ref().map(|l| l.entries.len()))
            .field("sealed", &log.as_ref().map(|l| l.sealed))
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

impl EventStream {
    pub fn new(clock: Arc<dyn Clock>, broadcast_capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            log: RwLock::new(Log {
                entries: Vec::new(),
                sealed: None,
            }),
            tx,
            clock,
        }
    }

    /// Appends `draft` and returns the committed entry, or `None` once the
    /// log is sealed.
    pub fn append(&self, draft: UpdateDraft) -> Option<LiveUpdate> {
        let update = {
            let mut log = self.log.write();
            if log.sealed.is_some() {
                return None;
            }
            let update = LiveUpdate {
                id: Uuid::now_v7(),
                seq: log.entries.len() as u64 + 1,
                timestamp: self.clock.now(),
                kind: draft.kind,
                message: draft.message,
                tenant: draft.tenant,
                source: draft.source,
                score_delta: draft.score_delta,
                collected: draft.collected,
            };
            log.entries.push(update.clone());
            update
        };
        let _ = self.tx.send(StreamFrame::Update(update.clone()));
        Some(update)
    }

    /// Closes the log. Returns false if it was already sealed.
    pub fn seal(&self, terminal: RunState) -> bool {
        {
            let mut log = self.log.write();
            if log.sealed.is_some() {
                return false;
            }
            log.sealed = Some(terminal);
        }
        let _ = self.tx.send(StreamFrame::Closed(terminal));
        true
    }

    pub fn sealed_state(&self) -> Option<RunState> {
        self.log.read().sealed
    }

    pub fn last_seq(&self) -> u64 {
        self.log.read().entries.len() as u64
    }

    pub fn len(&self) -> usize {
        self.log.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries with `seq > offset`. `read_from(0)` is the whole log.
    pub fn read_from(&self, offset: u64) -> Vec<LiveUpdate> {
        let log = self.log.read();
        let start = (offset as usize).min(log.entries.len());
        log.entries[start..].to_vec()
    }

    pub fn snapshot(&self) -> Vec<LiveUpdate> {
        self.read_from(0)
    }

    /// Replays entries after `offset`, then follows live appends until the
    /// log is sealed. Ends with a single `Closed` frame.
    pub fn subscribe_from(
        self: &Arc<Self>,
        offset: u64,
    ) -> impl Stream<Item = StreamFrame> + Send + 'static {
        let this = Arc::clone(self);
        let mut rx = this.tx.subscribe();

        async_stream::stream! {
            let (backlog, sealed) = {
                let log = this.log.read();
                let start = (offset as usize).min(log.entries.len());
                (log.entries[start..].to_vec(), log.sealed)
            };
            let mut last = offset;
            for update in backlog {
                last = update.seq;
                yield StreamFrame::Update(update);
            }
            if let Some(state) = sealed {
                yield StreamFrame::Closed(state);
                return;
            }

            loop {
                match rx.recv().await {
                    Ok(StreamFrame::Update(update)) => {
                        if update.seq <= last {
                            continue;
                        }
                        last = update.seq;
                        yield StreamFrame::Update(update);
                    }
                    Ok(StreamFrame::Closed(state)) => {
                        for update in this.read_from(last) {
                            last = update.seq;
                            yield StreamFrame::Update(update);
                        }
                        yield StreamFrame::Closed(state);
                        return;
                    }
                    Err(RecvError::Lagged(_)) => {
                        for update in this.read_from(last) {
                            last = update.seq;
                            yield StreamFrame::Update(update);
                        }
                    }
                    Err(RecvError::Closed) => {
                        for update in this.read_from(last) {
                            last = update.seq;
                            yield StreamFrame::Update(update);
                        }
                        if let Some(state) = this.sealed_state() {
                            yield StreamFrame::Closed(state);
                        }
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use futures::StreamExt;

    use super::*;
    use crate::scan::clock::ManualClock;

    fn stream() -> Arc<EventStream> {
        Arc::new(EventStream::new(Arc::new(ManualClock::new(Utc::now())), 4))
    }

    #[test]
    fn sequence_numbers_are_gapless_from_one() {
        let log = stream();
        for n in 0..5 {
            log.append(UpdateDraft::info(format!("event {n}")));
        }
        let seqs: Vec<u64> = log.snapshot().iter().map(|u| u.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(log.last_seq(), 5);
    }

    #[test]
    fn rereading_from_zero_is_identical() {
        let log = stream();
        log.append(UpdateDraft::info("a"));
        log.append(UpdateDraft::info("b"));
        let first = serde_json::to_vec(&log.read_from(0)).unwrap();
        let second = serde_json::to_vec(&log.read_from(0)).unwrap();
        assert_eq!(first, second);
        assert_eq!(log.read_from(1).len(), 1);
        assert!(log.read_from(10).is_empty());
    }

    #[test]
    fn sealed_log_rejects_appends() {
        let log = stream();
        log.append(UpdateDraft::info("before"));
        assert!(log.seal(RunState::Cancelled));
        assert!(!log.seal(RunState::Complete));
        assert!(log.append(UpdateDraft::info("after")).is_none());
        assert_eq!(log.len(), 1);
        assert_eq!(log.sealed_state(), Some(RunState::Cancelled));
    }

    #[tokio::test]
    async fn subscription_resumes_after_offset_and_ends_on_seal() {
        let log = stream();
        log.append(UpdateDraft::info("one"));
        log.append(UpdateDraft::info("two"));

        let frames = log.subscribe_from(1);
        tokio::pin!(frames);

        let writer = Arc::clone(&log);
        tokio::spawn(async move {
            // More appends than the broadcast buffer holds.
            for n in 0..10 {
                writer.append(UpdateDraft::info(format!("live {n}")));
            }
            writer.seal(RunState::Complete);
        });

        let mut seqs = Vec::new();
        let mut closed = None;
        while let Some(frame) = frames.next().await {
            match frame {
                StreamFrame::Update(update) => seqs.push(update.seq),
                StreamFrame::Closed(state) => closed = Some(state),
            }
        }
        assert_eq!(seqs, (2..=12).collect::<Vec<_>>());
        assert_eq!(closed, Some(RunState::Complete));
    }

    #[tokio::test]
    async fn subscribing_to_sealed_log_replays_and_closes() {
        let log = stream();
        log.append(UpdateDraft::info("only"));
        log.seal(RunState::Failed);
        let frames: Vec<_> = log.subscribe_from(0).collect().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], StreamFrame::Closed(RunState::Failed));
    }
}

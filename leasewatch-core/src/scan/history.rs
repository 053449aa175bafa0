//! Storage of terminal runs and paginated retrieval.
//!
//! Listings are ordered by `started_at` descending, then run id descending.
//! Page tokens anchor on the last returned `(started_at, id)` pair instead of
//! an offset, so runs written while a client pages through history never
//! cause a repeat or a skip.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, SecondsFormat, Utc};
use leasewatch_model::{
    HistoryFilter, HistoryPage, RunState, ScanInsights, ScanRunId,
    ScanRunRecord, ScanRunSummary,
};
use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use super::validation::window_start;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("run {0} is already stored")]
    DuplicateRun(ScanRunId),

    #[error("run {0} not found in history")]
    NotFound(ScanRunId),

    #[error("invalid page token: {0}")]
    InvalidPageToken(String),

    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

/// Position of the last entry on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageAnchor {
    pub started_at: DateTime<Utc>,
    pub id: ScanRunId,
}

impl PageAnchor {
    pub fn of(summary: &ScanRunSummary) -> Self {
        Self {
            started_at: summary.started_at,
            id: summary.id,
        }
    }

    pub fn encode(&self) -> String {
        let raw = format!(
            "{}|{}",
            self.started_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.id.as_uuid()
        );
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(token: &str) -> Result<Self, HistoryError> {
        let invalid = |reason: &str| {
            HistoryError::InvalidPageToken(format!("{token}: {reason}"))
        };
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| invalid("not base64"))?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid("not utf-8"))?;
        let (at, id) = raw.split_once('|').ok_or_else(|| invalid("shape"))?;
        let started_at = DateTime::parse_from_rfc3339(at)
            .map_err(|_| invalid("timestamp"))?
            .with_timezone(&Utc);
        let id = Uuid::parse_str(id).map_err(|_| invalid("run id"))?;
        Ok(Self {
            started_at,
            id: ScanRunId(id),
        })
    }

    /// Whether `summary` sorts strictly after this anchor.
    pub fn precedes(&self, summary: &ScanRunSummary) -> bool {
        (summary.started_at, summary.id) < (self.started_at, self.id)
    }
}

#[async_trait]
pub trait ScanHistoryStore: Send + Sync + fmt::Debug {
    /// Stores a terminal run. Stored runs are never overwritten.
    async fn save(&self, record: &ScanRunRecord) -> Result<(), HistoryError>;

    async fn get(&self, id: ScanRunId) -> Result<ScanRunRecord, HistoryError>;

    async fn list(
        &self,
        filter: &HistoryFilter,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, HistoryError>;

    /// Aggregates over runs started in the `window_days` before `now`. A
    /// window reaching past the representable range has no lower bound.
    async fn insights(
        &self,
        now: DateTime<Utc>,
        window_days: u32,
    ) -> Result<ScanInsights, HistoryError> {
        let filter = HistoryFilter {
            from: window_start(now, window_days),
            to: Some(now),
            limit: Some(HistoryFilter::MAX_LIMIT),
            ..HistoryFilter::default()
        };
        let mut summaries = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list(&filter, token.as_deref()).await?;
            summaries.extend(page.items);
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(compute_insights(&summaries, window_days))
    }
}

pub fn compute_insights(
    summaries: &[ScanRunSummary],
    window_days: u32,
) -> ScanInsights {
    let mut insights = ScanInsights {
        window_days,
        ..ScanInsights::default()
    };
    let mut complete_duration_ms = 0i64;
    for summary in summaries {
        insights.total_runs += 1;
        insights.total_alerts += summary.alerts;
        insights.total_tenants_scanned += summary.tenants_scanned;
        match summary.state {
            RunState::Complete => {
                insights.complete_runs += 1;
                complete_duration_ms += summary.duration_ms;
            }
            RunState::Failed => insights.failed_runs += 1,
            RunState::Cancelled => insights.cancelled_runs += 1,
            RunState::Pending | RunState::Running => {}
        }
    }
    if insights.total_runs > 0 {
        let total = insights.total_runs as f64;
        insights.success_rate = insights.complete_runs as f64 / total;
        insights.average_alerts_per_run = insights.total_alerts as f64 / total;
    }
    if insights.complete_runs > 0 {
        insights.average_duration_ms =
            Some(complete_duration_ms / insights.complete_runs as i64);
    }
    insights
}

type OrderKey = (Reverse<DateTime<Utc>>, Reverse<ScanRunId>);

#[derive(Default)]
struct MemoryIndex {
    ordered: BTreeMap<OrderKey, ScanRunSummary>,
    records: HashMap<ScanRunId, ScanRunRecord>,
}

/// Process-local history store.
#[derive(Default)]
pub struct InMemoryScanHistoryStore {
    index: RwLock<MemoryIndex>,
}

impl fmt::Debug for InMemoryScanHistoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.index.try_read().map(|i| i.records.len());
        f.debug_struct("InMemoryScanHistoryStore")
            .field("runs", &len)
            .finish()
    }
}

impl InMemoryScanHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ScanHistoryStore for InMemoryScanHistoryStore {
    async fn save(&self, record: &ScanRunRecord) -> Result<(), HistoryError> {
        let mut index = self.index.write();
        if index.records.contains_key(&record.id) {
            return Err(HistoryError::DuplicateRun(record.id));
        }
        let summary = record.summary();
        index
            .ordered
            .insert((Reverse(summary.started_at), Reverse(summary.id)), summary);
        index.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: ScanRunId) -> Result<ScanRunRecord, HistoryError> {
        self.index
            .read()
            .records
            .get(&id)
            .cloned()
            .ok_or(HistoryError::NotFound(id))
    }

    async fn list(
        &self,
        filter: &HistoryFilter,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, HistoryError> {
        let anchor = page_token.map(PageAnchor::decode).transpose()?;
        let size = filter.page_size();
        let index = self.index.read();

        let mut items: Vec<ScanRunSummary> = index
            .ordered
            .values()
            .filter(|s| anchor.is_none_or(|a| a.precedes(s)))
            .filter(|s| filter.matches(s))
            .take(size + 1)
            .cloned()
            .collect();

        let next_page_token = if items.len() > size {
            items.truncate(size);
            items.last().map(|s| PageAnchor::of(s).encode())
        } else {
            None
        };
        Ok(HistoryPage {
            items,
            next_page_token,
        })
    }
}

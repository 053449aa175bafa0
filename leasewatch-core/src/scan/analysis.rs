//! Synthesis steps run after collection: analysis, per-tenant compilation
//! and score deltas. None of these touch connectors.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use async_trait::async_trait;
use leasewatch_model::{
    FocusArea, LiveUpdate, ScanRunId, ScoreDirection, TenantId,
    TenantResult, TenantScoreDelta, UpdateKind,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("analysis failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    pub run_id: ScanRunId,
    pub events: &'a [LiveUpdate],
    /// Operator-provided guidance, passed through untouched.
    pub instructions: Option<&'a str>,
    pub focus_areas: &'a BTreeSet<FocusArea>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnalysisDigest {
    pub findings: u64,
    pub alerts: u64,
    pub score_changes: u64,
    pub focus_hits: BTreeMap<FocusArea, u64>,
    pub summary: String,
}

#[async_trait]
pub trait FindingAnalyzer: Send + Sync + fmt::Debug {
    async fn analyze(
        &self,
        input: AnalysisInput<'_>,
    ) -> Result<AnalysisDigest, AnalysisError>;
}

/// Counts findings by kind and by focus-area keyword.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestAnalyzer;

#[async_trait]
impl FindingAnalyzer for DigestAnalyzer {
    async fn analyze(
        &self,
        input: AnalysisInput<'_>,
    ) -> Result<AnalysisDigest, AnalysisError> {
        let mut digest = AnalysisDigest::default();
        for update in input.events {
            match update.kind {
                UpdateKind::Finding => digest.findings += 1,
                UpdateKind::Alert => digest.alerts += 1,
                UpdateKind::ScoreChange => digest.score_changes += 1,
                UpdateKind::Info => continue,
            }
            let message = update.message.to_lowercase();
            for area in input.focus_areas {
                if area.keywords().iter().any(|k| message.contains(k)) {
                    *digest.focus_hits.entry(*area).or_default() += 1;
                }
            }
        }

        let mut summary = format!(
            "Analysis: {} findings, {} alerts, {} score changes",
            digest.findings, digest.alerts, digest.score_changes
        );
        if !digest.focus_hits.is_empty() {
            let hits: Vec<String> = digest
                .focus_hits
                .iter()
                .map(|(area, n)| format!("{area:?}={n}").to_lowercase())
                .collect();
            summary.push_str(&format!("; focus matches {}", hits.join(", ")));
        }
        if let Some(instructions) =
            input.instructions.map(str::trim).filter(|s| !s.is_empty())
        {
            summary.push_str(&format!("; instructions: {instructions}"));
        }
        digest.summary = summary;
        Ok(digest)
    }
}

/// Groups tenant-tagged updates into per-tenant results, ordered by tenant.
pub fn compile(events: &[LiveUpdate]) -> Vec<TenantResult> {
    let mut by_tenant: BTreeMap<&TenantId, TenantResult> = BTreeMap::new();
    for update in events {
        let Some(tenant) = &update.tenant else {
            continue;
        };
        let entry =
            by_tenant.entry(tenant).or_insert_with(|| TenantResult {
                tenant: tenant.clone(),
                findings: 0,
                alerts: 0,
                net_score_change: 0,
                messages: Vec::new(),
            });
        match update.kind {
            UpdateKind::Finding => {
                entry.findings += 1;
                entry.messages.push(update.message.clone());
            }
            UpdateKind::Alert => {
                entry.alerts += 1;
                entry.messages.push(update.message.clone());
            }
            UpdateKind::ScoreChange => {
                entry.net_score_change +=
                    i64::from(update.score_delta.unwrap_or_default());
                entry.messages.push(update.message.clone());
            }
            UpdateKind::Info => {}
        }
    }
    by_tenant.into_values().collect()
}

/// Tenant-level status movement from compiled results.
pub fn score(results: &[TenantResult]) -> Vec<TenantScoreDelta> {
    results
        .iter()
        .map(|r| TenantScoreDelta {
            tenant: r.tenant.clone(),
            direction: ScoreDirection::from_net(r.net_score_change),
            net_change: r.net_score_change,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use leasewatch_model::SourceId;
    use uuid::Uuid;

    use super::*;

    fn update(
        seq: u64,
        kind: UpdateKind,
        tenant: &str,
        message: &str,
        delta: Option<i32>,
    ) -> LiveUpdate {
        LiveUpdate {
            id: Uuid::now_v7(),
            seq,
            timestamp: Utc::now(),
            kind,
            message: message.to_string(),
            tenant: Some(TenantId::from(tenant)),
            source: Some(SourceId::from("news")),
            score_delta: delta,
            collected: true,
        }
    }

    fn events() -> Vec<LiveUpdate> {
        vec![
            update(1, UpdateKind::Finding, "a", "Lawsuit filed", None),
            update(2, UpdateKind::Alert, "b", "Chapter 11 petition", None),
            update(3, UpdateKind::ScoreChange, "a", "downgrade", Some(-2)),
            update(4, UpdateKind::ScoreChange, "a", "upgrade", Some(1)),
            update(5, UpdateKind::ScoreChange, "c", "upgrade", Some(3)),
            update(6, UpdateKind::Info, "c", "profile refreshed", None),
        ]
    }

    #[tokio::test]
    async fn digest_counts_focus_matches_and_carries_instructions() {
        let focus: BTreeSet<_> =
            [FocusArea::Litigation, FocusArea::Bankruptcy].into();
        let events = events();
        let digest = DigestAnalyzer
            .analyze(AnalysisInput {
                run_id: ScanRunId::new(),
                events: &events,
                instructions: Some("watch restaurants"),
                focus_areas: &focus,
            })
            .await
            .unwrap();
        assert_eq!(digest.findings, 1);
        assert_eq!(digest.alerts, 1);
        assert_eq!(digest.score_changes, 3);
        assert_eq!(digest.focus_hits[&FocusArea::Litigation], 1);
        assert_eq!(digest.focus_hits[&FocusArea::Bankruptcy], 1);
        assert!(digest.summary.contains("watch restaurants"));
    }

    #[test]
    fn compile_and_score_per_tenant() {
        let results = compile(&events());
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].tenant.as_str(), "a");
        assert_eq!(results[0].findings, 1);
        assert_eq!(results[0].net_score_change, -1);

        let deltas = score(&results);
        let directions: Vec<_> = deltas.iter().map(|d| d.direction).collect();
        assert_eq!(
            directions,
            [
                ScoreDirection::Downgraded,
                ScoreDirection::Unchanged,
                ScoreDirection::Upgraded
            ]
        );
    }
}

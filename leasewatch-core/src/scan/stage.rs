use chrono::{DateTime, Utc};
use leasewatch_model::{RunState, StageId, StageState, StageStatus};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("stage {stage:?} cannot start while {active:?} is active")]
    AlreadyActive { stage: StageId, active: StageId },

    #[error("stage {stage:?} cannot start before {blocking:?} completes")]
    OutOfOrder { stage: StageId, blocking: StageId },

    #[error("stage {0:?} is not active")]
    NotActive(StageId),

    #[error("stage {0:?} already ran")]
    AlreadyRan(StageId),
}

/// Ordered stage states of one run.
///
/// At most one stage is active, and a stage starts only after every earlier
/// stage has completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePipeline {
    stages: Vec<StageState>,
}

impl Default for StagePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl StagePipeline {
    pub fn new() -> Self {
        Self {
            stages: StageId::PIPELINE
                .iter()
                .copied()
                .map(StageState::pending)
                .collect(),
        }
    }

    pub fn stages(&self) -> &[StageState] {
        &self.stages
    }

    pub fn active(&self) -> Option<StageId> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Active)
            .map(|s| s.id)
    }

    pub fn status(&self, id: StageId) -> StageStatus {
        self.stages[Self::index(id)].status
    }

    fn index(id: StageId) -> usize {
        StageId::PIPELINE
            .iter()
            .position(|s| *s == id)
            .unwrap_or_default()
    }

    pub fn begin(
        &mut self,
        id: StageId,
        at: DateTime<Utc>,
    ) -> Result<(), StageError> {
        if let Some(active) = self.active() {
            return Err(StageError::AlreadyActive { stage: id, active });
        }
        let idx = Self::index(id);
        if let Some(blocking) = self.stages[..idx]
            .iter()
            .find(|s| s.status != StageStatus::Complete)
        {
            return Err(StageError::OutOfOrder {
                stage: id,
                blocking: blocking.id,
            });
        }
        let stage = &mut self.stages[idx];
        if stage.status != StageStatus::Pending {
            return Err(StageError::AlreadyRan(id));
        }
        stage.status = StageStatus::Active;
        stage.started_at = Some(at);
        Ok(())
    }

    pub fn complete(
        &mut self,
        id: StageId,
        at: DateTime<Utc>,
    ) -> Result<(), StageError> {
        let stage = &mut self.stages[Self::index(id)];
        if stage.status != StageStatus::Active {
            return Err(StageError::NotActive(id));
        }
        stage.status = StageStatus::Complete;
        stage.finished_at = Some(at);
        Ok(())
    }

    /// Freezes the pipeline for a halted run. The active stage becomes
    /// `error` on failure and `interrupted` otherwise; pending stages become
    /// `not_reached`.
    pub fn halt(&mut self, outcome: RunState, at: DateTime<Utc>) {
        for stage in &mut self.stages {
            match stage.status {
                StageStatus::Active => {
                    stage.status = if outcome == RunState::Failed {
                        StageStatus::Error
                    } else {
                        StageStatus::Interrupted
                    };
                    stage.finished_at = Some(at);
                }
                StageStatus::Pending => stage.status = StageStatus::NotReached,
                _ => {}
            }
        }
    }

    pub fn all_complete(&self) -> bool {
        self.stages.iter().all(|s| s.status == StageStatus::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_run_strictly_in_order() {
        let now = Utc::now();
        let mut pipeline = StagePipeline::new();
        assert_eq!(
            pipeline.begin(StageId::Collect, now),
            Err(StageError::OutOfOrder {
                stage: StageId::Collect,
                blocking: StageId::Connect,
            })
        );
        for id in StageId::PIPELINE {
            pipeline.begin(id, now).unwrap();
            assert_eq!(pipeline.active(), Some(id));
            pipeline.complete(id, now).unwrap();
        }
        assert!(pipeline.all_complete());
        assert_eq!(
            pipeline.begin(StageId::Score, now),
            Err(StageError::AlreadyRan(StageId::Score))
        );
    }

    #[test]
    fn only_one_stage_is_active() {
        let now = Utc::now();
        let mut pipeline = StagePipeline::new();
        pipeline.begin(StageId::Connect, now).unwrap();
        assert!(matches!(
            pipeline.begin(StageId::Connect, now),
            Err(StageError::AlreadyActive { .. })
        ));
        assert_eq!(
            pipeline.complete(StageId::Collect, now),
            Err(StageError::NotActive(StageId::Collect))
        );
    }

    #[test]
    fn halting_marks_active_and_unstarted_stages() {
        let now = Utc::now();
        let mut cancelled = StagePipeline::new();
        cancelled.begin(StageId::Connect, now).unwrap();
        cancelled.complete(StageId::Connect, now).unwrap();
        cancelled.begin(StageId::Collect, now).unwrap();
        let mut failed = cancelled.clone();

        cancelled.halt(RunState::Cancelled, now);
        assert_eq!(cancelled.status(StageId::Connect), StageStatus::Complete);
        assert_eq!(
            cancelled.status(StageId::Collect),
            StageStatus::Interrupted
        );
        assert_eq!(cancelled.status(StageId::Score), StageStatus::NotReached);

        failed.halt(RunState::Failed, now);
        assert_eq!(failed.status(StageId::Collect), StageStatus::Error);
        assert!(failed.active().is_none());
    }
}

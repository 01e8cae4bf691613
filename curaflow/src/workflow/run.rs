//! Run-all descriptors, handles, and outcomes.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::oneshot;

use crate::core::{Project, ProjectId, ProjectState, RunId, StageFailureDetail, StageId, StageRecord};
use crate::errors::WorkflowError;

const CONTINUE: u8 = 0;
const PAUSE_REQUESTED: u8 = 1;
const FINISHED: u8 = 2;

/// An in-progress run-all. Exists only while the run is active.
#[derive(Debug)]
pub struct WorkflowRun {
    run_id: RunId,
    project_id: ProjectId,
    range: Range<usize>,
    control: AtomicU8,
    current_stage: Mutex<Option<StageId>>,
    started_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub(crate) fn new(project_id: ProjectId, range: Range<usize>) -> Self {
        Self {
            run_id: RunId::new(),
            project_id,
            range,
            control: AtomicU8::new(CONTINUE),
            current_stage: Mutex::new(None),
            started_at: crate::utils::now_utc(),
        }
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Returns the project this run drives.
    #[must_use]
    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Returns the catalog indices this run covers.
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Requests a stop at the next stage boundary. Returns false if a pause
    /// was already pending or the run has no boundary left.
    pub fn request_pause(&self) -> bool {
        self.control
            .compare_exchange(CONTINUE, PAUSE_REQUESTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Withdraws a pending pause request. Returns false if none was pending.
    pub fn clear_pause(&self) -> bool {
        self.control
            .compare_exchange(PAUSE_REQUESTED, CONTINUE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Returns true if the run will stop at the next boundary.
    #[must_use]
    pub fn is_pause_requested(&self) -> bool {
        self.control.load(Ordering::SeqCst) == PAUSE_REQUESTED
    }

    /// Marks the last boundary as passed. Later pause requests are refused.
    pub(crate) fn finish(&self) {
        self.control.store(FINISHED, Ordering::SeqCst);
    }

    /// Returns true once the run has passed its last boundary.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.control.load(Ordering::SeqCst) == FINISHED
    }

    /// Returns the stage currently executing.
    #[must_use]
    pub fn current_stage(&self) -> Option<StageId> {
        self.current_stage.lock().clone()
    }

    pub(crate) fn set_current_stage(&self, stage: Option<StageId>) {
        *self.current_stage.lock() = stage;
    }

    /// Captures the run's state for status queries.
    #[must_use]
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id,
            first_stage_index: self.range.start,
            current_stage: self.current_stage(),
            pause_requested: self.is_pause_requested(),
            started_at: self.started_at,
        }
    }
}

/// A point-in-time view of an active run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// The run id.
    pub run_id: RunId,
    /// Catalog index the run started from.
    pub first_stage_index: usize,
    /// The stage executing right now, if any.
    pub current_stage: Option<StageId>,
    /// Whether the run will stop at the next boundary.
    pub pause_requested: bool,
    /// When the run started.
    pub started_at: DateTime<Utc>,
}

/// How a run-all ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every stage is complete or skipped.
    Completed,
    /// The run stopped at a boundary after a pause request.
    Paused {
        /// The stage a resume starts from.
        next_stage: StageId,
    },
    /// A stage failed; earlier completed stages are preserved.
    Failed {
        /// The failed stage.
        stage: StageId,
        /// The recorded failure.
        error: StageFailureDetail,
    },
    /// The controller shut down between stages.
    Interrupted {
        /// The stage that did not start.
        next_stage: StageId,
    },
}

/// Result of a pause or resume request.
#[derive(Debug)]
pub enum ControlAck<T> {
    /// The request changed something.
    Accepted(T),
    /// Nothing to do.
    NoOp,
}

impl<T> ControlAck<T> {
    /// Returns true for [`ControlAck::Accepted`].
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// Returns the accepted value.
    #[must_use]
    pub fn accepted(self) -> Option<T> {
        match self {
            Self::Accepted(value) => Some(value),
            Self::NoOp => None,
        }
    }
}

/// The answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectStatus {
    /// The project.
    pub project: Project,
    /// The derived project state.
    pub state: ProjectState,
    /// Stage records in catalog order.
    pub stages: Vec<StageRecord>,
    /// The active run, if any.
    pub active_run: Option<RunSnapshot>,
}

/// A handle on an accepted run-all.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    project_id: ProjectId,
    first_stage: Option<StageId>,
    outcome: oneshot::Receiver<Result<RunOutcome, WorkflowError>>,
}

impl RunHandle {
    pub(crate) fn new(
        run_id: RunId,
        project_id: ProjectId,
        first_stage: Option<StageId>,
        outcome: oneshot::Receiver<Result<RunOutcome, WorkflowError>>,
    ) -> Self {
        Self {
            run_id,
            project_id,
            first_stage,
            outcome,
        }
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Returns the project.
    #[must_use]
    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Returns the first stage the run executes, or `None` if nothing was
    /// left to run.
    #[must_use]
    pub fn first_stage(&self) -> Option<&StageId> {
        self.first_stage.as_ref()
    }

    /// Waits for the run to finish.
    pub async fn wait(self) -> Result<RunOutcome, WorkflowError> {
        self.outcome.await.unwrap_or(Err(WorkflowError::ShuttingDown))
    }
}

/// A handle on an accepted single-stage execution.
#[derive(Debug)]
pub struct StageHandle {
    project_id: ProjectId,
    stage_id: StageId,
    outcome: oneshot::Receiver<Result<StageRecord, WorkflowError>>,
}

impl StageHandle {
    pub(crate) fn new(
        project_id: ProjectId,
        stage_id: StageId,
        outcome: oneshot::Receiver<Result<StageRecord, WorkflowError>>,
    ) -> Self {
        Self {
            project_id,
            stage_id,
            outcome,
        }
    }

    /// Returns the project.
    #[must_use]
    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Returns the stage.
    #[must_use]
    pub fn stage_id(&self) -> &StageId {
        &self.stage_id
    }

    /// Waits for the stage to finish. Returns the completed record, or the
    /// stage's failure.
    pub async fn wait(self) -> Result<StageRecord, WorkflowError> {
        self.outcome.await.unwrap_or(Err(WorkflowError::ShuttingDown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_request_toggles() {
        let run = WorkflowRun::new(ProjectId::new(), 1..4);
        assert!(run.request_pause());
        assert!(!run.request_pause());
        assert!(run.snapshot().pause_requested);
        assert!(run.clear_pause());
        assert!(!run.clear_pause());
        assert_eq!(run.snapshot().first_stage_index, 1);
    }

    #[test]
    fn test_finished_run_refuses_pause() {
        let run = WorkflowRun::new(ProjectId::new(), 0..1);
        assert!(run.request_pause());
        run.finish();
        assert!(run.is_finished());
        assert!(!run.is_pause_requested());
        assert!(!run.clear_pause());
        assert!(!run.request_pause());
    }

    #[test]
    fn test_outcome_json() {
        let outcome = RunOutcome::Paused {
            next_stage: StageId::new("analyze"),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "paused");
        assert_eq!(json["next_stage"], "analyze");
    }

    #[tokio::test]
    async fn test_dropped_sender_reports_shutdown() {
        let (tx, rx) = oneshot::channel();
        let handle = RunHandle::new(RunId::new(), ProjectId::new(), None, rx);
        drop(tx);
        assert!(matches!(handle.wait().await, Err(WorkflowError::ShuttingDown)));
    }
}

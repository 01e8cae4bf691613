//! Stage status, project state, and execution class enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a stage consumes resources, which decides where the runner executes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionClass {
    /// Awaits network or storage; runs on the control plane.
    Io,
    /// Long computation; runs on the isolated worker pool.
    Cpu,
}

impl fmt::Display for ExecutionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "io"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// The persisted status of one stage of one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not run yet.
    #[default]
    Pending,
    /// Stage is currently executing.
    Running,
    /// Stage finished and its result is stored.
    Complete,
    /// Stage failed; the record carries the error detail.
    Failed,
    /// Stage was deliberately not run.
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageStatus {
    /// Returns true if later stages may run after this one.
    #[must_use]
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Complete | Self::Skipped)
    }

    /// Returns true if the stage is finished, successfully or not.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Skipped)
    }

    /// Returns true if a run-all should (re)execute this stage.
    #[must_use]
    pub fn needs_run(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

/// The overall state of a project, derived from its stages and runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    /// Nothing running and work remains.
    #[default]
    Idle,
    /// A stage or a run-all is in progress.
    Running,
    /// A run-all stopped at a stage boundary on request.
    Paused,
    /// Every stage is complete or skipped.
    Complete,
    /// A stage failed and has not been re-run successfully.
    Failed,
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl ProjectState {
    /// Derives the project state from its paused flag, its stage statuses,
    /// and whether anything is currently executing.
    ///
    /// Precedence: running, failed, paused, complete, idle.
    #[must_use]
    pub fn derive<'a>(
        active: bool,
        paused: bool,
        statuses: impl IntoIterator<Item = &'a StageStatus>,
    ) -> Self {
        if active {
            return Self::Running;
        }
        let mut all_done = true;
        let mut any_failed = false;
        for status in statuses {
            match status {
                StageStatus::Failed => any_failed = true,
                StageStatus::Running => return Self::Running,
                s if !s.satisfies_dependents() => all_done = false,
                _ => {}
            }
        }
        if any_failed {
            Self::Failed
        } else if paused {
            Self::Paused
        } else if all_done {
            Self::Complete
        } else {
            Self::Idle
        }
    }
}

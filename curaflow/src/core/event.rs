//! Status events broadcast on every workflow transition.

use super::{ProjectId, ProjectState, StageId, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity attached to an event, used by observers to style log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    /// Normal progress.
    #[default]
    Info,
    /// Something recoverable happened (e.g. a retry).
    Warn,
    /// A stage or run failed.
    Error,
}

/// What changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusChange {
    /// A stage record moved to a new status.
    #[serde(rename = "status_update")]
    Stage {
        /// The new stage status.
        status: StageStatus,
    },
    /// The project as a whole settled into a new state.
    #[serde(rename = "project_state")]
    Project {
        /// The new project state.
        state: ProjectState,
    },
    /// A free-form progress line.
    Log,
}

/// An immutable notification of a state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Per-project sequence number, stamped by the broadcaster.
    #[serde(default)]
    pub sequence: u64,
    /// The project the event belongs to.
    pub project_id: ProjectId,
    /// The stage involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<StageId>,
    /// The transition itself.
    #[serde(flatten)]
    pub change: StatusChange,
    /// Event severity.
    #[serde(default)]
    pub level: EventLevel,
    /// Optional human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    fn new(project_id: ProjectId, change: StatusChange) -> Self {
        Self {
            sequence: 0,
            project_id,
            stage_id: None,
            change,
            level: EventLevel::Info,
            message: None,
            timestamp: crate::utils::now_utc(),
        }
    }

    /// Creates a stage status event. Failed stages are reported at error level.
    #[must_use]
    pub fn stage(project_id: ProjectId, stage_id: StageId, status: StageStatus) -> Self {
        let mut event = Self::new(project_id, StatusChange::Stage { status });
        event.stage_id = Some(stage_id);
        if status == StageStatus::Failed {
            event.level = EventLevel::Error;
        }
        event
    }

    /// Creates a project state event.
    #[must_use]
    pub fn project(project_id: ProjectId, state: ProjectState) -> Self {
        let mut event = Self::new(project_id, StatusChange::Project { state });
        if state == ProjectState::Failed {
            event.level = EventLevel::Error;
        }
        event
    }

    /// Creates a log line event.
    #[must_use]
    pub fn log(project_id: ProjectId, level: EventLevel, message: impl Into<String>) -> Self {
        let mut event = Self::new(project_id, StatusChange::Log);
        event.level = level;
        event.message = Some(message.into());
        event
    }

    /// Attaches a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attaches the stage involved.
    #[must_use]
    pub fn with_stage(mut self, stage_id: StageId) -> Self {
        self.stage_id = Some(stage_id);
        self
    }

    /// Returns the stage status carried by a stage event.
    #[must_use]
    pub fn stage_status(&self) -> Option<StageStatus> {
        match self.change {
            StatusChange::Stage { status } => Some(status),
            _ => None,
        }
    }

    /// Returns the project state carried by a project event.
    #[must_use]
    pub fn project_state(&self) -> Option<ProjectState> {
        match self.change {
            StatusChange::Project { state } => Some(state),
            _ => None,
        }
    }
}

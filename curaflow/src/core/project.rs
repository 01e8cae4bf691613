//! Project and stage record types persisted by the project store.

use super::{ProjectId, StageId, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A curation project: one pass of the pipeline for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier.
    pub id: ProjectId,
    /// Human-readable name.
    pub name: String,
    /// Free-text channel description consumed by the AI stages.
    pub description: String,
    /// When the project was created.
    pub created_at: DateTime<Utc>,
    /// Whether a pause was requested and not yet resumed.
    #[serde(default)]
    pub paused: bool,
    /// Index of the stage most recently marked running.
    #[serde(default)]
    pub active_stage: Option<usize>,
    /// Soft-archival flag; archived projects accept no new work.
    #[serde(default)]
    pub archived: bool,
}

impl Project {
    /// Creates a new, unpaused project.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            description: description.into(),
            created_at: crate::utils::now_utc(),
            paused: false,
            active_stage: None,
            archived: false,
        }
    }
}

/// Why a stage ended up failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The stage function reported an error or exhausted its retries.
    StageFailure,
    /// The stage exceeded its time limit or was terminated.
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StageFailure => write!(f, "stage_failure"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Error detail stored on a failed stage record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailureDetail {
    /// Failure class.
    pub kind: FailureKind,
    /// Human-readable cause.
    pub message: String,
    /// Whether the last error was marked retryable.
    pub retryable: bool,
    /// Invocations made before giving up.
    pub attempts: u32,
}

impl StageFailureDetail {
    /// Creates a stage-failure detail.
    #[must_use]
    pub fn stage_failure(message: impl Into<String>, retryable: bool, attempts: u32) -> Self {
        Self {
            kind: FailureKind::StageFailure,
            message: message.into(),
            retryable,
            attempts,
        }
    }

    /// Creates a timeout detail.
    #[must_use]
    pub fn timeout(message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: message.into(),
            retryable: false,
            attempts,
        }
    }
}

/// Persisted state of one stage of one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// The stage this record tracks.
    pub stage_id: StageId,
    /// Current status.
    pub status: StageStatus,
    /// When the latest execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the latest execution finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Stage-defined result payload, opaque to the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Present iff `status` is failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageFailureDetail>,
    /// Invocations used by the latest execution.
    #[serde(default)]
    pub attempts: u32,
    /// Optimistic-concurrency version, bumped on every accepted update.
    #[serde(default)]
    pub version: u64,
}

impl StageRecord {
    /// Creates a pending record.
    #[must_use]
    pub fn pending(stage_id: StageId) -> Self {
        Self {
            stage_id,
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            attempts: 0,
            version: 0,
        }
    }

    /// Returns the execution duration in milliseconds, if finished.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_project_defaults() {
        let project = Project::new("Daily", "Tech news for developers");
        assert!(!project.paused);
        assert!(!project.archived);
        assert_eq!(project.active_stage, None);
    }

    #[test]
    fn test_pending_record_has_no_error() {
        let record = StageRecord::pending(StageId::new("trends"));
        assert_eq!(record.status, StageStatus::Pending);
        assert!(record.error.is_none());
        assert_eq!(record.duration_ms(), None);
    }

    #[test]
    fn test_failure_detail_serialization() {
        let detail = StageFailureDetail::timeout("exceeded 30s", 1);
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["retryable"], false);
    }
}

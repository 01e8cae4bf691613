//! Project store: the system of record for projects and stage records.
//!
//! The controller is the only writer of stage status. Every stage update
//! carries the version it was computed from and is rejected with a conflict
//! when the stored record has moved on.

mod file;
mod memory;
mod state;

pub use file::JsonFileProjectStore;
pub use memory::InMemoryProjectStore;
pub use state::StoreDocument;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Project, ProjectId, StageFailureDetail, StageId, StageRecord, StageStatus};
use crate::errors::StoreError;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent storage of projects and their stage records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Creates a project with one pending record per stage id, in order.
    async fn create_project(&self, name: &str, description: &str, stages: &[StageId]) -> StoreResult<Project>;

    /// Loads a project.
    async fn get_project(&self, id: ProjectId) -> StoreResult<Project>;

    /// Lists every project, newest first.
    async fn list_projects(&self) -> StoreResult<Vec<Project>>;

    /// Lists a project's stage records in catalog order.
    async fn list_stages(&self, id: ProjectId) -> StoreResult<Vec<StageRecord>>;

    /// Applies an update to one stage record atomically.
    async fn update_stage(&self, id: ProjectId, update: StageUpdate) -> StoreResult<StageRecord>;

    /// Sets or clears the project's paused flag.
    async fn set_paused(&self, id: ProjectId, paused: bool) -> StoreResult<Project>;

    /// Marks the project archived.
    async fn archive_project(&self, id: ProjectId) -> StoreResult<Project>;
}

/// A full replacement of a stage record's mutable fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageUpdate {
    /// The stage to update.
    pub stage_id: StageId,
    /// The version the update was computed from.
    pub expected_version: u64,
    /// New status.
    pub status: StageStatus,
    /// Start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Finish time.
    pub finished_at: Option<DateTime<Utc>>,
    /// Result payload.
    pub result: Option<serde_json::Value>,
    /// Failure detail; present iff the status is failed.
    pub error: Option<StageFailureDetail>,
    /// Invocations used.
    pub attempts: u32,
}

impl StageUpdate {
    fn from_record(record: &StageRecord, status: StageStatus) -> Self {
        Self {
            stage_id: record.stage_id.clone(),
            expected_version: record.version,
            status,
            started_at: record.started_at,
            finished_at: None,
            result: None,
            error: None,
            attempts: 0,
        }
    }

    /// Marks the stage running now, clearing any earlier outcome.
    #[must_use]
    pub fn running(record: &StageRecord) -> Self {
        Self {
            started_at: Some(crate::utils::now_utc()),
            ..Self::from_record(record, StageStatus::Running)
        }
    }

    /// Marks the stage complete with its payload.
    #[must_use]
    pub fn complete(record: &StageRecord, payload: serde_json::Value, attempts: u32) -> Self {
        Self {
            finished_at: Some(crate::utils::now_utc()),
            result: Some(payload),
            attempts,
            ..Self::from_record(record, StageStatus::Complete)
        }
    }

    /// Marks the stage failed.
    #[must_use]
    pub fn failed(record: &StageRecord, error: StageFailureDetail) -> Self {
        Self {
            finished_at: Some(crate::utils::now_utc()),
            attempts: error.attempts,
            error: Some(error),
            ..Self::from_record(record, StageStatus::Failed)
        }
    }

    /// Marks the stage skipped.
    #[must_use]
    pub fn skipped(record: &StageRecord) -> Self {
        Self {
            started_at: None,
            finished_at: Some(crate::utils::now_utc()),
            ..Self::from_record(record, StageStatus::Skipped)
        }
    }
}

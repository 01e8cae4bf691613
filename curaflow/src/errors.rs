//! Error types for the curaflow orchestration core.
//!
//! `WorkflowError` is the taxonomy surfaced by the controller. Store,
//! configuration, and catalog errors have their own types and convert into it.

use crate::core::{ProjectId, StageId};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for controller operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A prerequisite stage is not complete, or the stage cannot start.
    #[error("Precondition failed for stage '{stage}' of project {project_id}: {reason}")]
    PreconditionFailed {
        /// The project.
        project_id: ProjectId,
        /// The stage that was requested.
        stage: StageId,
        /// What is missing.
        reason: String,
    },

    /// The stage or the project is already running.
    #[error("Project {project_id} is busy: {reason}")]
    Busy {
        /// The project.
        project_id: ProjectId,
        /// What is running.
        reason: String,
    },

    /// The stage reported a non-retryable error or exhausted its retries.
    #[error("Stage '{stage}' of project {project_id} failed after {attempts} attempt(s): {message}")]
    StageFailure {
        /// The project.
        project_id: ProjectId,
        /// The failed stage.
        stage: StageId,
        /// The stage's error message.
        message: String,
        /// Invocations made.
        attempts: u32,
    },

    /// The stage exceeded its allotted duration or was terminated.
    #[error("Stage '{stage}' of project {project_id} timed out: {message}")]
    Timeout {
        /// The project.
        project_id: ProjectId,
        /// The stage that timed out.
        stage: StageId,
        /// Details.
        message: String,
    },

    /// A concurrent store update was detected.
    #[error("Conflicting update to stage '{stage}' of project {project_id}")]
    Conflict {
        /// The project.
        project_id: ProjectId,
        /// The contended stage.
        stage: StageId,
    },

    /// Unknown project or stage.
    #[error("Not found: {what}")]
    NotFound {
        /// Description of the missing entity.
        what: String,
    },

    /// The controller no longer accepts work.
    #[error("Controller is shutting down")]
    ShuttingDown,

    /// The stage catalog is invalid.
    #[error("{0}")]
    InvalidCatalog(#[from] CatalogError),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A store failure other than conflict or not-found.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    /// Creates a busy error.
    #[must_use]
    pub fn busy(project_id: ProjectId, reason: impl Into<String>) -> Self {
        Self::Busy {
            project_id,
            reason: reason.into(),
        }
    }

    /// Creates a precondition error.
    #[must_use]
    pub fn precondition(project_id: ProjectId, stage: StageId, reason: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            project_id,
            stage,
            reason: reason.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Returns a stable machine-readable code for the error class.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::PreconditionFailed { .. } => "precondition_failed",
            Self::Busy { .. } => "busy",
            Self::StageFailure { .. } => "stage_failure",
            Self::Timeout { .. } => "timeout",
            Self::Conflict { .. } => "conflict",
            Self::NotFound { .. } => "not_found",
            Self::ShuttingDown => "shutting_down",
            Self::InvalidCatalog(_) => "invalid_catalog",
            Self::Config(_) => "config",
            Self::Store(_) => "store",
            Self::Internal(_) => "internal",
        }
    }

    /// Returns true for rejections that left no state behind.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::PreconditionFailed { .. } | Self::Busy { .. } | Self::NotFound { .. } | Self::ShuttingDown
        )
    }

    /// Renders the error for a presentation layer.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "type": "error",
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProjectNotFound(id) => Self::not_found(format!("project {id}")),
            StoreError::StageNotFound { project_id, stage } => {
                Self::not_found(format!("stage '{stage}' of project {project_id}"))
            }
            StoreError::Conflict {
                project_id, stage, ..
            } => Self::Conflict { project_id, stage },
            other => Self::Store(other),
        }
    }
}

/// Errors raised by a project store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No project with this id.
    #[error("Project {0} not found")]
    ProjectNotFound(ProjectId),

    /// The project has no stage with this id.
    #[error("Stage '{stage}' not found in project {project_id}")]
    StageNotFound {
        /// The project.
        project_id: ProjectId,
        /// The missing stage.
        stage: StageId,
    },

    /// The stored record changed since the writer read it.
    #[error("Conflicting update to stage '{stage}' of project {project_id}: expected version {expected}, found {actual}")]
    Conflict {
        /// The project.
        project_id: ProjectId,
        /// The contended stage.
        stage: StageId,
        /// Version the writer based its update on.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// The update violates a record invariant.
    #[error("Invalid update for stage '{stage}': {reason}")]
    InvalidUpdate {
        /// The stage.
        stage: StageId,
        /// The violated invariant.
        reason: String,
    },

    /// IO error from a file-backed store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while validating a stage catalog.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalog has no stages.
    #[error("Stage catalog is empty: add at least one stage")]
    Empty,

    /// Two stages share an id.
    #[error("Duplicate stage id '{0}' in catalog")]
    DuplicateStage(StageId),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// The file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for the schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment override could not be parsed.
    #[error("Invalid value '{value}' for environment variable {var}")]
    Env {
        /// The variable name.
        var: String,
        /// The raw value.
        value: String,
    },

    /// A value is out of range.
    #[error("Invalid configuration value for '{key}': {reason}")]
    Invalid {
        /// The config key.
        key: String,
        /// Why it is invalid.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflict_maps_to_conflict() {
        let project_id = ProjectId::new();
        let err: WorkflowError = StoreError::Conflict {
            project_id,
            stage: StageId::new("fetch"),
            expected: 1,
            actual: 2,
        }
        .into();

        assert_eq!(err.code(), "conflict");
        assert!(!err.is_rejection());
    }

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: WorkflowError = StoreError::ProjectNotFound(ProjectId::new()).into();
        assert_eq!(err.code(), "not_found");
        assert!(err.is_rejection());
    }

    #[test]
    fn test_io_store_error_is_wrapped() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: WorkflowError = StoreError::from(io).into();
        assert!(matches!(err, WorkflowError::Store(StoreError::Io(_))));
    }

    #[test]
    fn test_error_to_json() {
        let err = WorkflowError::busy(ProjectId::new(), "stage 'fetch' is running");
        let json = err.to_json();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "busy");
        assert!(json["message"].as_str().unwrap().contains("fetch"));
    }

    #[test]
    fn test_catalog_error_display() {
        let err = CatalogError::DuplicateStage(StageId::new("trends"));
        assert!(err.to_string().contains("trends"));
    }
}

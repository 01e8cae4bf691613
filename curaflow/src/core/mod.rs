//! Core domain model types for curaflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Project, stage, and run identifiers
//! - Stage status and project state enums
//! - Project and stage records
//! - Status events

mod event;
mod ids;
mod project;
mod status;

pub use event::{EventLevel, StatusChange, StatusEvent};
pub use ids::{curation_stage_ids, ProjectId, RunId, StageId, ANALYZE, FETCH, GENERATE, TRENDS};
pub use project::{FailureKind, Project, StageFailureDetail, StageRecord};
pub use status::{ExecutionClass, ProjectState, StageStatus};

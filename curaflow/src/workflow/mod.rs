//! Workflow orchestration.
//!
//! The [`WorkflowController`] owns every state transition of every project.
//! It accepts or rejects requests synchronously against a per-project
//! runtime entry, persists each transition through the
//! [`ProjectStore`](crate::store::ProjectStore), and announces it through the
//! [`StatusBroadcaster`](crate::events::StatusBroadcaster).

mod controller;
mod integration_tests;
mod run;

pub use controller::{Capabilities, WorkflowController};
pub use run::{ControlAck, ProjectStatus, RunHandle, RunOutcome, RunSnapshot, StageHandle, WorkflowRun};

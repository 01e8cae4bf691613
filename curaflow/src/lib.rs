//! # Curaflow
//!
//! The workflow orchestration core of a content-curation pipeline.
//!
//! Curaflow sequences independent processing stages (trend discovery, video
//! sourcing, video analysis, script generation) into resumable, observable
//! jobs:
//!
//! - **Ordered stages**: each stage may run only after every earlier stage
//!   is complete
//! - **Run-all with cooperative pause**: a pause stops the run at the next
//!   stage boundary, never mid-stage
//! - **Isolated CPU work**: CPU-bound stages run on a bounded worker pool,
//!   separate from the async control plane
//! - **Live status**: every transition is broadcast to any number of
//!   subscribers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use curaflow::prelude::*;
//!
//! let catalog = StageCatalog::curation(trends, fetch, analyze, generate);
//! let store = Arc::new(InMemoryProjectStore::new());
//! let controller = WorkflowController::new(
//!     Capabilities::new(catalog, store),
//!     WorkflowConfig::new().apply_env()?,
//! )?;
//!
//! let project = controller.create_project("Tech Daily", "gadget news").await?;
//! let mut status = controller.subscribe_status(project.id).await?;
//! let run = controller.run_all(project.id, serde_json::json!({})).await?;
//! let outcome = run.wait().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod runner;
pub mod stages;
pub mod store;
pub mod testing;
pub mod utils;
pub mod workflow;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::WorkflowConfig;
    pub use crate::core::{
        EventLevel, Project, ProjectId, ProjectState, RunId, StageId, StageRecord, StageStatus, StatusEvent,
    };
    pub use crate::errors::{StoreError, WorkflowError};
    pub use crate::events::{StatusBroadcaster, StatusSubscription};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::runner::RetryConfig;
    pub use crate::stages::{
        CpuStage, FnCpuStage, FnIoStage, IoStage, StageCatalog, StageDefinition, StageError, StageInput, StageResult,
    };
    pub use crate::store::{InMemoryProjectStore, JsonFileProjectStore, ProjectStore};
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
    pub use crate::workflow::{
        Capabilities, ControlAck, ProjectStatus, RunHandle, RunOutcome, StageHandle, WorkflowController,
    };
}

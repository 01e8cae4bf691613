//! Stage contract and catalog.
//!
//! Stages are opaque functions from project context, prior results, and
//! override configuration to a result payload. Their execution class is part
//! of their type: [`IoStage`] runs on the control plane, [`CpuStage`] on the
//! worker pool.

mod catalog;
mod contract;

pub use catalog::{StageCatalog, StageCatalogBuilder, StageDefinition, StageHandler};
pub use contract::{
    CpuStage, FnCpuStage, FnIoStage, IoStage, ProjectContext, StageError, StageInput, StageResult,
};

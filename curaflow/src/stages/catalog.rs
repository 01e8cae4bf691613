//! Stage definitions and the ordered, validated stage catalog.

use super::{CpuStage, IoStage};
use crate::core::{ExecutionClass, StageId};
use crate::errors::CatalogError;
use crate::runner::RetryConfig;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// The callable behind a stage, tagged with its execution class.
#[derive(Debug, Clone)]
pub enum StageHandler {
    /// Runs on the control plane.
    Io(Arc<dyn IoStage>),
    /// Runs on the worker pool.
    Cpu(Arc<dyn CpuStage>),
}

impl StageHandler {
    /// Returns the execution class.
    #[must_use]
    pub fn class(&self) -> ExecutionClass {
        match self {
            Self::Io(_) => ExecutionClass::Io,
            Self::Cpu(_) => ExecutionClass::Cpu,
        }
    }
}

/// One entry of the catalog.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    /// The stage id.
    pub id: StageId,
    /// The stage implementation.
    pub handler: StageHandler,
    /// Per-attempt time limit; falls back to the configured default.
    pub timeout: Option<Duration>,
    /// Retry policy; falls back to the configured default.
    pub retry: Option<RetryConfig>,
}

impl StageDefinition {
    /// Creates an I/O stage definition.
    #[must_use]
    pub fn io(id: impl Into<StageId>, stage: Arc<dyn IoStage>) -> Self {
        Self::new(id, StageHandler::Io(stage))
    }

    /// Creates a CPU stage definition.
    #[must_use]
    pub fn cpu(id: impl Into<StageId>, stage: Arc<dyn CpuStage>) -> Self {
        Self::new(id, StageHandler::Cpu(stage))
    }

    fn new(id: impl Into<StageId>, handler: StageHandler) -> Self {
        Self {
            id: id.into(),
            handler,
            timeout: None,
            retry: None,
        }
    }

    /// Sets the per-attempt time limit.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Returns the execution class.
    #[must_use]
    pub fn class(&self) -> ExecutionClass {
        self.handler.class()
    }
}

/// The fixed, ordered stage sequence every project runs through.
///
/// Stage `i` depends on all stages before it.
#[derive(Debug, Clone)]
pub struct StageCatalog {
    stages: Vec<StageDefinition>,
}

impl StageCatalog {
    /// Starts building a catalog.
    #[must_use]
    pub fn builder() -> StageCatalogBuilder {
        StageCatalogBuilder::default()
    }

    /// Builds the four-stage content-curation catalog.
    ///
    /// Analysis is the only CPU-bound stage.
    ///
    /// # Errors
    ///
    /// Never fails for the fixed ids; the `Result` mirrors [`StageCatalogBuilder::build`].
    pub fn curation(
        trends: Arc<dyn IoStage>,
        fetch: Arc<dyn IoStage>,
        analyze: Arc<dyn CpuStage>,
        generate: Arc<dyn IoStage>,
    ) -> Result<Self, CatalogError> {
        use crate::core::{ANALYZE, FETCH, GENERATE, TRENDS};

        Self::builder()
            .io(TRENDS, trends)
            .io(FETCH, fetch)
            .cpu(ANALYZE, analyze)
            .io(GENERATE, generate)
            .build()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a built catalog.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the stage ids in order.
    #[must_use]
    pub fn ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|s| s.id.clone()).collect()
    }

    /// Returns the index of a stage.
    #[must_use]
    pub fn index_of(&self, id: &StageId) -> Option<usize> {
        self.stages.iter().position(|s| &s.id == id)
    }

    /// Returns the definition at an index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&StageDefinition> {
        self.stages.get(index)
    }

    /// Iterates over definitions in order.
    pub fn iter(&self) -> impl Iterator<Item = &StageDefinition> {
        self.stages.iter()
    }
}

/// Builder for [`StageCatalog`].
#[derive(Debug, Default)]
pub struct StageCatalogBuilder {
    stages: Vec<StageDefinition>,
}

impl StageCatalogBuilder {
    /// Appends a definition.
    #[must_use]
    pub fn stage(mut self, definition: StageDefinition) -> Self {
        self.stages.push(definition);
        self
    }

    /// Appends an I/O stage.
    #[must_use]
    pub fn io(self, id: impl Into<StageId>, stage: Arc<dyn IoStage>) -> Self {
        self.stage(StageDefinition::io(id, stage))
    }

    /// Appends a CPU stage.
    #[must_use]
    pub fn cpu(self, id: impl Into<StageId>, stage: Arc<dyn CpuStage>) -> Self {
        self.stage(StageDefinition::cpu(id, stage))
    }

    /// Validates and builds the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog is empty or an id repeats.
    pub fn build(self) -> Result<StageCatalog, CatalogError> {
        if self.stages.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.id.clone()) {
                return Err(CatalogError::DuplicateStage(stage.id.clone()));
            }
        }
        Ok(StageCatalog {
            stages: self.stages,
        })
    }
}

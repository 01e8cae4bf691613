//! The uniform contract every pipeline stage implements.

use crate::cancellation::CancellationToken;
use crate::core::{Project, ProjectId, StageId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use thiserror::Error;

/// What a stage returns: an opaque payload or a [`StageError`].
pub type StageResult = Result<serde_json::Value, StageError>;

/// Error reported by a stage function.
///
/// Serializable because CPU stages hand it back across the worker boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct StageError {
    /// Human-readable cause.
    pub message: String,
    /// Whether a later attempt may succeed.
    pub retryable: bool,
}

impl StageError {
    /// Creates a non-retryable error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a retryable (transient) error.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// The slice of project metadata a stage may read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    /// The project id.
    pub project_id: ProjectId,
    /// The project name.
    pub name: String,
    /// The channel description used to steer the AI stages.
    pub description: String,
}

impl From<&Project> for ProjectContext {
    fn from(project: &Project) -> Self {
        Self {
            project_id: project.id,
            name: project.name.clone(),
            description: project.description.clone(),
        }
    }
}

/// Everything a stage invocation receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInput {
    /// The stage being invoked.
    pub stage_id: StageId,
    /// Project metadata.
    pub project: ProjectContext,
    /// Result payloads of the stages that completed before this one.
    #[serde(default)]
    pub prior_results: BTreeMap<StageId, serde_json::Value>,
    /// Stage defaults merged with the caller's overrides.
    #[serde(default)]
    pub overrides: serde_json::Value,
    /// 1-based attempt number within the current execution.
    #[serde(default)]
    pub attempt: u32,
}

impl StageInput {
    /// Returns the stored result of an earlier stage.
    #[must_use]
    pub fn prior(&self, stage: &str) -> Option<&serde_json::Value> {
        self.prior_results.get(&StageId::new(stage))
    }

    /// Looks up an override by JSON pointer (e.g. `/llm/temperature`).
    #[must_use]
    pub fn setting(&self, pointer: &str) -> Option<&serde_json::Value> {
        self.overrides.pointer(pointer)
    }
}

/// A stage that awaits I/O and runs on the control plane.
///
/// Implementations must not block the calling thread.
#[async_trait]
pub trait IoStage: Send + Sync + Debug {
    /// Runs the stage.
    async fn run(&self, input: StageInput, cancel: &CancellationToken) -> StageResult;
}

/// A stage that computes and runs on the isolated worker pool.
///
/// Long loops should poll `cancel.is_cancelled()`; the runner cannot stop the
/// worker thread from outside.
pub trait CpuStage: Send + Sync + Debug {
    /// Runs the stage.
    fn run(&self, input: StageInput, cancel: &CancellationToken) -> StageResult;
}

/// An async closure adapted into an [`IoStage`].
pub struct FnIoStage<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnIoStage<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send,
{
    /// Creates a closure-backed I/O stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for FnIoStage<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnIoStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> IoStage for FnIoStage<F, Fut>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send,
{
    async fn run(&self, input: StageInput, _cancel: &CancellationToken) -> StageResult {
        (self.func)(input).await
    }
}

/// A blocking closure adapted into a [`CpuStage`].
pub struct FnCpuStage<F>
where
    F: Fn(StageInput, &CancellationToken) -> StageResult + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnCpuStage<F>
where
    F: Fn(StageInput, &CancellationToken) -> StageResult + Send + Sync,
{
    /// Creates a closure-backed CPU stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnCpuStage<F>
where
    F: Fn(StageInput, &CancellationToken) -> StageResult + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCpuStage").field("name", &self.name).finish()
    }
}

impl<F> CpuStage for FnCpuStage<F>
where
    F: Fn(StageInput, &CancellationToken) -> StageResult + Send + Sync,
{
    fn run(&self, input: StageInput, cancel: &CancellationToken) -> StageResult {
        (self.func)(input, cancel)
    }
}

//! Stage runner: executes one stage invocation with isolation, retries,
//! timeouts, and single-flight enforcement per (project, stage).

mod pool;
mod retry;

pub use pool::{PoolError, PoolStats, WorkerPool};
pub use retry::{should_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision, RetryState};

use crate::cancellation::CancellationToken;
use crate::core::{ProjectId, StageFailureDetail, StageId};
use crate::stages::{StageDefinition, StageError, StageHandler, StageInput, StageResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

/// Why an invocation did not produce a payload.
#[derive(Debug, Error)]
pub enum RunError {
    /// The same stage is already in flight for this project.
    #[error("Stage '{stage}' is already running for project {project_id}")]
    Busy {
        /// The project.
        project_id: ProjectId,
        /// The stage.
        stage: StageId,
    },

    /// Non-retryable error, or retries exhausted.
    #[error("{error}")]
    Failed {
        /// The last error the stage reported.
        error: StageError,
        /// Invocations made.
        attempts: u32,
    },

    /// An attempt exceeded its time limit.
    #[error("Timed out after {}ms", limit.as_millis())]
    TimedOut {
        /// The per-attempt limit.
        limit: Duration,
        /// Invocations made, including the one that timed out.
        attempts: u32,
    },

    /// The invocation was aborted from outside (shutdown).
    #[error("Terminated: {reason}")]
    Terminated {
        /// Why it was aborted.
        reason: String,
        /// Invocations made.
        attempts: u32,
    },
}

impl RunError {
    /// Converts a completed-but-failed invocation into a persisted error detail.
    ///
    /// Returns `None` for [`RunError::Busy`], which never started.
    #[must_use]
    pub fn failure_detail(&self) -> Option<StageFailureDetail> {
        match self {
            Self::Busy { .. } => None,
            Self::Failed { error, attempts } => Some(StageFailureDetail::stage_failure(
                error.message.clone(),
                error.retryable,
                *attempts,
            )),
            Self::TimedOut { attempts, .. } | Self::Terminated { attempts, .. } => {
                Some(StageFailureDetail::timeout(self.to_string(), *attempts))
            }
        }
    }
}

/// A successful invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSuccess {
    /// The stage's payload.
    pub payload: serde_json::Value,
    /// Invocations used.
    pub attempts: u32,
}

/// Reported before each retry sleep.
#[derive(Debug, Clone)]
pub struct RetryNotice {
    /// The stage being retried.
    pub stage: StageId,
    /// The attempt that just failed.
    pub attempt: u32,
    /// How long the runner waits before the next attempt.
    pub delay: Duration,
    /// The error that triggered the retry.
    pub error: StageError,
}

/// One request to run a stage.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    /// The project the stage runs for.
    pub project_id: ProjectId,
    /// The stage to run.
    pub definition: &'a StageDefinition,
    /// The stage input.
    pub input: StageInput,
    /// Per-attempt time limit.
    pub timeout: Duration,
    /// Retry policy.
    pub retry: &'a RetryConfig,
}

/// Executes stage invocations.
#[derive(Debug)]
pub struct StageRunner {
    pool: Arc<WorkerPool>,
    in_flight: DashMap<(ProjectId, StageId), Arc<CancellationToken>>,
    closed: RwLock<Option<String>>,
}

impl StageRunner {
    /// Creates a runner backed by a worker pool.
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            in_flight: DashMap::new(),
            closed: RwLock::new(None),
        }
    }

    /// Returns the worker pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Returns true if the stage is in flight for the project.
    #[must_use]
    pub fn is_running(&self, project_id: ProjectId, stage: &StageId) -> bool {
        self.in_flight.contains_key(&(project_id, stage.clone()))
    }

    /// Returns the number of in-flight invocations across all projects.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Aborts every in-flight invocation. Each resolves with
    /// [`RunError::Terminated`]; CPU workers are abandoned. Invocations
    /// started afterwards are terminated before their first attempt.
    pub fn abort_all(&self, reason: &str) {
        *self.closed.write() = Some(reason.to_string());
        for entry in &self.in_flight {
            entry.value().cancel(reason);
        }
    }

    /// Runs a stage to completion, retrying retryable errors.
    ///
    /// # Errors
    ///
    /// See [`RunError`].
    pub async fn run<R>(&self, invocation: Invocation<'_>, on_retry: R) -> Result<StageSuccess, RunError>
    where
        R: Fn(RetryNotice) + Send + Sync,
    {
        let Invocation {
            project_id,
            definition,
            input,
            timeout,
            retry,
        } = invocation;

        let token = Arc::new(CancellationToken::new());
        let _claim = self.claim(project_id, &definition.id, token.clone())?;
        if let Some(reason) = self.closed.read().clone() {
            token.cancel(reason);
        }

        let span = info_span!(
            "stage",
            project_id = %project_id,
            stage = %definition.id,
            class = %definition.class(),
        );

        async move {
            let mut state = RetryState::new();
            loop {
                let attempt = state.begin_attempt();
                let mut input = input.clone();
                input.attempt = attempt;

                let outcome = tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        return Err(RunError::Terminated {
                            reason: token.reason().unwrap_or_default(),
                            attempts: attempt,
                        });
                    }
                    res = tokio::time::timeout(timeout, self.invoke(&definition.handler, input, token.clone())) => res,
                };

                let error = match outcome {
                    Ok(Ok(payload)) => {
                        debug!(attempt, "Stage succeeded");
                        return Ok(StageSuccess {
                            payload,
                            attempts: attempt,
                        });
                    }
                    Ok(Err(error)) => error,
                    Err(_elapsed) => {
                        token.cancel("timed out");
                        warn!(attempt, limit_ms = timeout.as_millis() as u64, "Stage timed out");
                        return Err(RunError::TimedOut {
                            limit: timeout,
                            attempts: attempt,
                        });
                    }
                };

                match should_retry(&state, retry, &error) {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Retrying stage after transient error"
                        );
                        on_retry(RetryNotice {
                            stage: definition.id.clone(),
                            attempt,
                            delay,
                            error,
                        });
                        tokio::select! {
                            biased;
                            () = token.cancelled() => {
                                return Err(RunError::Terminated {
                                    reason: token.reason().unwrap_or_default(),
                                    attempts: attempt,
                                });
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                    RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                        return Err(RunError::Failed {
                            error,
                            attempts: attempt,
                        });
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn invoke(
        &self,
        handler: &StageHandler,
        input: StageInput,
        token: Arc<CancellationToken>,
    ) -> StageResult {
        match handler {
            StageHandler::Io(stage) => stage.run(input, &token).await,
            StageHandler::Cpu(stage) => {
                let stage = stage.clone();
                match self.pool.submit(move || stage.run(input, &token)).await {
                    Ok(result) => result,
                    Err(e @ PoolError::Saturated { .. }) => Err(StageError::retryable(e.to_string())),
                    Err(e) => Err(StageError::fatal(e.to_string())),
                }
            }
        }
    }

    fn claim(
        &self,
        project_id: ProjectId,
        stage: &StageId,
        token: Arc<CancellationToken>,
    ) -> Result<InFlightClaim<'_>, RunError> {
        let key = (project_id, stage.clone());
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => Err(RunError::Busy {
                project_id,
                stage: stage.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(token);
                Ok(InFlightClaim {
                    map: &self.in_flight,
                    key,
                })
            }
        }
    }
}

struct InFlightClaim<'a> {
    map: &'a DashMap<(ProjectId, StageId), Arc<CancellationToken>>,
    key: (ProjectId, StageId),
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

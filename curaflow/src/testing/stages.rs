//! Controllable stages for tests and benchmarks.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

use crate::cancellation::CancellationToken;
use crate::core::StageId;
use crate::stages::{CpuStage, IoStage, StageError, StageInput, StageResult};

fn default_payload(input: &StageInput) -> serde_json::Value {
    json!({
        "stage": input.stage_id.as_str(),
        "project": input.project.name,
        "attempt": input.attempt,
    })
}

/// An IO stage that returns queued results in order.
///
/// Once the queue is empty it returns the fallback result, which defaults to
/// a small success payload naming the stage.
#[derive(Debug, Default)]
pub struct ScriptedStage {
    queue: Mutex<VecDeque<StageResult>>,
    fallback: Option<StageResult>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    inputs: Mutex<Vec<StageInput>>,
}

impl ScriptedStage {
    /// Creates a stage that returns `results` in order.
    #[must_use]
    pub fn new(results: Vec<StageResult>) -> Self {
        Self {
            queue: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    /// Creates a stage that always succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Creates a stage that always returns `result`.
    #[must_use]
    pub fn always(result: StageResult) -> Self {
        Self {
            fallback: Some(result),
            ..Self::default()
        }
    }

    /// Sleeps for `delay` before each result.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the inputs of every invocation.
    #[must_use]
    pub fn inputs(&self) -> Vec<StageInput> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl IoStage for ScriptedStage {
    async fn run(&self, input: StageInput, cancel: &CancellationToken) -> StageResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().push(input.clone());

        if let Some(delay) = self.delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return Err(StageError::fatal("cancelled")),
            }
        }

        let next = self.queue.lock().pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(result) => result,
            None => Ok(default_payload(&input)),
        }
    }
}

/// An IO stage that blocks each invocation until [`GatedStage::release`].
#[derive(Debug)]
pub struct GatedStage {
    gate: Semaphore,
    entered: watch::Sender<usize>,
    result: Mutex<Option<StageResult>>,
}

impl Default for GatedStage {
    fn default() -> Self {
        Self::new()
    }
}

impl GatedStage {
    /// Creates a closed gate.
    #[must_use]
    pub fn new() -> Self {
        let (entered, _) = watch::channel(0);
        Self {
            gate: Semaphore::new(0),
            entered,
            result: Mutex::new(None),
        }
    }

    /// Makes every released invocation return `result`.
    #[must_use]
    pub fn with_result(self, result: StageResult) -> Self {
        *self.result.lock() = Some(result);
        self
    }

    /// Lets one blocked (or future) invocation proceed.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    /// Returns the number of invocations that have started.
    #[must_use]
    pub fn entered(&self) -> usize {
        *self.entered.borrow()
    }

    /// Waits until at least one invocation has started.
    pub async fn wait_started(&self) {
        self.wait_entered(1).await;
    }

    /// Waits until `count` invocations have started.
    pub async fn wait_entered(&self, count: usize) {
        let mut rx = self.entered.subscribe();
        // Sender is held by self, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n >= count).await;
    }
}

#[async_trait]
impl IoStage for GatedStage {
    async fn run(&self, input: StageInput, cancel: &CancellationToken) -> StageResult {
        self.entered.send_modify(|n| *n += 1);

        tokio::select! {
            permit = self.gate.acquire() => match permit {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(StageError::fatal("gate closed")),
            },
            () = cancel.cancelled() => return Err(StageError::fatal("cancelled")),
        }

        let scripted = self.result.lock().clone();
        scripted.unwrap_or_else(|| Ok(default_payload(&input)))
    }
}

/// A CPU stage that spins for a number of iterations, polling cancellation.
#[derive(Debug, Clone, Copy)]
pub struct SpinCpuStage {
    iterations: Option<u64>,
}

impl SpinCpuStage {
    /// Spins for `iterations` rounds of arithmetic.
    #[must_use]
    pub fn new(iterations: u64) -> Self {
        Self {
            iterations: Some(iterations),
        }
    }

    /// Spins until the invocation is cancelled.
    #[must_use]
    pub fn until_cancelled() -> Self {
        Self { iterations: None }
    }
}

impl CpuStage for SpinCpuStage {
    fn run(&self, input: StageInput, cancel: &CancellationToken) -> StageResult {
        let mut checksum: u64 = 0;
        let mut i: u64 = 0;
        loop {
            if self.iterations.is_some_and(|limit| i >= limit) {
                break;
            }
            if i % 1024 == 0 {
                if cancel.is_cancelled() {
                    return Err(StageError::fatal("cancelled"));
                }
                if self.iterations.is_none() {
                    std::thread::yield_now();
                }
            }
            checksum = checksum.wrapping_mul(31).wrapping_add(i);
            i += 1;
        }

        Ok(json!({
            "stage": input.stage_id.as_str(),
            "iterations": i,
            "checksum": checksum,
            "thread": format!("{:?}", std::thread::current().id()),
        }))
    }
}

/// An IO stage that appends its stage id to a shared log and succeeds.
#[derive(Debug, Clone, Default)]
pub struct RecordingStage {
    log: Arc<Mutex<Vec<StageId>>>,
}

impl RecordingStage {
    /// Creates a stage writing to `log`.
    #[must_use]
    pub fn new(log: Arc<Mutex<Vec<StageId>>>) -> Self {
        Self { log }
    }

    /// Returns the recorded stage ids.
    #[must_use]
    pub fn recorded(&self) -> Vec<StageId> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl IoStage for RecordingStage {
    async fn run(&self, input: StageInput, _cancel: &CancellationToken) -> StageResult {
        self.log.lock().push(input.stage_id.clone());
        Ok(default_payload(&input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Project;
    use crate::stages::ProjectContext;
    use std::collections::BTreeMap;

    fn input(stage: &str) -> StageInput {
        StageInput {
            stage_id: StageId::new(stage),
            project: ProjectContext::from(&Project::new("demo", "channel")),
            prior_results: BTreeMap::new(),
            overrides: json!({}),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_scripted_stage_drains_queue_then_succeeds() {
        let stage = ScriptedStage::new(vec![Err(StageError::retryable("busy"))]);
        let token = CancellationToken::new();

        assert!(stage.run(input("fetch"), &token).await.is_err());
        let ok = stage.run(input("fetch"), &token).await.unwrap();
        assert_eq!(ok["stage"], "fetch");
        assert_eq!(stage.calls(), 2);
    }

    #[tokio::test]
    async fn test_gated_stage_blocks_until_release() {
        let stage = Arc::new(GatedStage::new());
        let task = {
            let stage = stage.clone();
            tokio::spawn(async move { stage.run(input("fetch"), &CancellationToken::new()).await })
        };

        stage.wait_started().await;
        assert!(!task.is_finished());
        stage.release();
        assert!(task.await.unwrap().is_ok());
    }

    #[test]
    fn test_spin_stage_observes_cancellation() {
        let token = CancellationToken::new();
        token.cancel("stop");
        let err = SpinCpuStage::until_cancelled()
            .run(input("analyze"), &token)
            .unwrap_err();
        assert_eq!(err.message, "cancelled");
    }

    #[tokio::test]
    async fn test_recording_stage_shares_log() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = RecordingStage::new(log.clone());
        let b = RecordingStage::new(log);
        let token = CancellationToken::new();

        a.run(input("trends"), &token).await.unwrap();
        b.run(input("fetch"), &token).await.unwrap();
        assert_eq!(a.recorded(), vec![StageId::new("trends"), StageId::new("fetch")]);
    }
}

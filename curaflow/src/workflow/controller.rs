//! The workflow controller: sequences stages per project, enforces
//! single-flight and prerequisites, and implements run-all, pause, and resume.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::run::{ControlAck, ProjectStatus, RunHandle, RunOutcome, StageHandle, WorkflowRun};
use crate::config::{deep_merge, WorkflowConfig};
use crate::core::{
    EventLevel, FailureKind, Project, ProjectId, ProjectState, RunId, StageFailureDetail, StageId, StageRecord,
    StageStatus, StatusEvent,
};
use crate::errors::WorkflowError;
use crate::events::{StatusBroadcaster, StatusSubscription};
use crate::runner::{Invocation, RunError, StageRunner, WorkerPool};
use crate::stages::{ProjectContext, StageCatalog, StageInput};
use crate::store::{ProjectStore, StageUpdate};

/// The collaborators a controller is built from.
pub struct Capabilities {
    /// The ordered stage sequence.
    pub catalog: StageCatalog,
    /// The system of record.
    pub store: Arc<dyn ProjectStore>,
    /// Where status events go. Built from the config when absent.
    pub broadcaster: Option<Arc<StatusBroadcaster>>,
}

impl Capabilities {
    /// Bundles a catalog and a store.
    #[must_use]
    pub fn new(catalog: StageCatalog, store: Arc<dyn ProjectStore>) -> Self {
        Self {
            catalog,
            store,
            broadcaster: None,
        }
    }

    /// Uses an existing broadcaster.
    #[must_use]
    pub fn with_broadcaster(mut self, broadcaster: Arc<StatusBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("catalog", &self.catalog.ids())
            .field("broadcaster", &self.broadcaster.is_some())
            .finish_non_exhaustive()
    }
}

/// What is executing for one project right now.
#[derive(Debug, Default)]
struct ProjectRuntime {
    running_stage: Option<StageId>,
    run: Option<Arc<WorkflowRun>>,
}

impl ProjectRuntime {
    fn is_idle(&self) -> bool {
        self.running_stage.is_none() && self.run.is_none()
    }
}

type RuntimeMap = Arc<DashMap<ProjectId, ProjectRuntime>>;

/// Holds a project's single stage slot until dropped.
struct StageReservation {
    runtime: RuntimeMap,
    project_id: ProjectId,
}

impl Drop for StageReservation {
    fn drop(&mut self) {
        if let Some(mut rt) = self.runtime.get_mut(&self.project_id) {
            rt.running_stage = None;
        }
        self.runtime.remove_if(&self.project_id, |_, rt| rt.is_idle());
    }
}

/// Holds a project's run slot until dropped.
struct RunReservation {
    runtime: RuntimeMap,
    project_id: ProjectId,
    run: Arc<WorkflowRun>,
}

impl Drop for RunReservation {
    fn drop(&mut self) {
        if let Some(mut rt) = self.runtime.get_mut(&self.project_id) {
            if rt.run.as_ref().is_some_and(|r| Arc::ptr_eq(r, &self.run)) {
                rt.run = None;
            }
        }
        self.runtime.remove_if(&self.project_id, |_, rt| rt.is_idle());
    }
}

/// A stage that has been marked running and is ready to execute.
struct StageJob {
    project: Project,
    index: usize,
    running: StageRecord,
    prior_results: BTreeMap<StageId, serde_json::Value>,
    overrides: serde_json::Value,
}

/// Orchestrates stage execution for every project.
pub struct WorkflowController {
    catalog: StageCatalog,
    store: Arc<dyn ProjectStore>,
    broadcaster: Arc<StatusBroadcaster>,
    runner: StageRunner,
    config: WorkflowConfig,
    runtime: RuntimeMap,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for WorkflowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowController")
            .field("catalog", &self.catalog.ids())
            .field("active_projects", &self.runtime.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl WorkflowController {
    /// Builds a controller.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Config`] if the configuration is invalid.
    pub fn new(capabilities: Capabilities, config: WorkflowConfig) -> Result<Arc<Self>, WorkflowError> {
        config.validate()?;
        let Capabilities {
            catalog,
            store,
            broadcaster,
        } = capabilities;
        let broadcaster =
            broadcaster.unwrap_or_else(|| Arc::new(StatusBroadcaster::new(config.broadcast_capacity)));
        let pool = Arc::new(WorkerPool::new(
            config.worker_pool.max_workers,
            config.worker_pool.max_queued,
        ));

        info!(
            stages = ?catalog.ids(),
            max_workers = config.worker_pool.max_workers,
            max_queued = config.worker_pool.max_queued,
            "Workflow controller ready"
        );

        Ok(Arc::new(Self {
            catalog,
            store,
            broadcaster,
            runner: StageRunner::new(pool),
            config,
            runtime: Arc::new(DashMap::new()),
            tasks: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
        }))
    }

    /// Returns the stage catalog.
    #[must_use]
    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    /// Returns the status broadcaster.
    #[must_use]
    pub fn broadcaster(&self) -> &Arc<StatusBroadcaster> {
        &self.broadcaster
    }

    /// Returns the stage runner.
    #[must_use]
    pub fn runner(&self) -> &StageRunner {
        &self.runner
    }

    /// Returns true if a stage or a run is executing for the project.
    #[must_use]
    pub fn is_active(&self, project_id: ProjectId) -> bool {
        self.runtime.get(&project_id).is_some_and(|rt| !rt.is_idle())
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    // ---------------------------------------------------------------------
    // Projects
    // ---------------------------------------------------------------------

    /// Creates a project with every catalog stage pending.
    pub async fn create_project(&self, name: &str, description: &str) -> Result<Project, WorkflowError> {
        self.ensure_accepting()?;
        let project = self
            .store
            .create_project(name, description, &self.catalog.ids())
            .await?;
        info!(project_id = %project.id, name = %project.name, "Project created");
        self.broadcaster
            .publish(StatusEvent::project(project.id, ProjectState::Idle).with_message("project created"));
        Ok(project)
    }

    /// Lists every project, newest first.
    pub async fn list_projects(&self) -> Result<Vec<Project>, WorkflowError> {
        Ok(self.store.list_projects().await?)
    }

    /// Archives a project and closes its status channels.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::Busy`] while anything executes for the project.
    pub async fn archive_project(&self, project_id: ProjectId) -> Result<Project, WorkflowError> {
        self.store.get_project(project_id).await?;
        if self.is_active(project_id) {
            return Err(WorkflowError::busy(project_id, "cannot archive while work is running"));
        }
        let project = self.store.archive_project(project_id).await?;
        self.broadcaster
            .publish(StatusEvent::log(project_id, EventLevel::Info, "project archived"));
        self.broadcaster.close_project(project_id);
        info!(project_id = %project_id, "Project archived");
        Ok(project)
    }

    // ---------------------------------------------------------------------
    // Single stages
    // ---------------------------------------------------------------------

    /// Starts one stage. Returns once the stage is marked running.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::Busy`] if anything else executes for the project,
    /// [`WorkflowError::PreconditionFailed`] if an earlier stage is not
    /// complete, [`WorkflowError::NotFound`] for an unknown project or
    /// stage. A rejected request changes nothing.
    pub async fn run_stage(
        self: &Arc<Self>,
        project_id: ProjectId,
        stage: impl Into<StageId>,
        overrides: serde_json::Value,
    ) -> Result<StageHandle, WorkflowError> {
        self.ensure_accepting()?;
        let stage = stage.into();
        let index = self.stage_index(&stage)?;
        let project = self.load_open_project(project_id).await?;

        let reservation = self.reserve_stage(project_id, &stage, None)?;
        let records = self.store.list_stages(project_id).await?;
        Self::check_prerequisites(project_id, &stage, &records, index)?;
        let record = Self::record_at(&records, index, project_id)?;

        let running = self.begin_stage(&project, record).await?;
        let job = StageJob {
            prior_results: Self::prior_results(&records[..index]),
            overrides: self.merged_overrides(&overrides),
            project,
            index,
            running,
        };

        let (tx, rx) = oneshot::channel();
        let this = Arc::clone(self);
        self.spawn(async move {
            let outcome = match this.finish_stage(job, reservation).await {
                Ok(record) => {
                    this.announce_project_state(project_id).await;
                    Self::failure_error(project_id, &record).map_or(Ok(record), Err)
                }
                Err(e) => Err(e),
            };
            let _ = tx.send(outcome);
        });

        Ok(StageHandle::new(project_id, stage, rx))
    }

    /// Runs one stage and waits for it.
    pub async fn execute_stage(
        self: &Arc<Self>,
        project_id: ProjectId,
        stage: impl Into<StageId>,
        overrides: serde_json::Value,
    ) -> Result<StageRecord, WorkflowError> {
        self.run_stage(project_id, stage, overrides).await?.wait().await
    }

    /// Marks a pending or failed stage skipped. Same preconditions as
    /// [`run_stage`](Self::run_stage).
    pub async fn skip_stage(
        &self,
        project_id: ProjectId,
        stage: impl Into<StageId>,
    ) -> Result<StageRecord, WorkflowError> {
        self.ensure_accepting()?;
        let stage = stage.into();
        let index = self.stage_index(&stage)?;
        self.load_open_project(project_id).await?;

        let reservation = self.reserve_stage(project_id, &stage, None)?;
        let records = self.store.list_stages(project_id).await?;
        Self::check_prerequisites(project_id, &stage, &records, index)?;
        let record = Self::record_at(&records, index, project_id)?;
        if !record.status.needs_run() {
            return Err(WorkflowError::precondition(
                project_id,
                stage,
                format!("stage is {}", record.status),
            ));
        }

        let skipped = self.store.update_stage(project_id, StageUpdate::skipped(record)).await?;
        drop(reservation);
        info!(project_id = %project_id, stage = %skipped.stage_id, "Stage skipped");
        self.broadcaster
            .publish(StatusEvent::stage(project_id, skipped.stage_id.clone(), StageStatus::Skipped));
        self.announce_project_state(project_id).await;
        Ok(skipped)
    }

    // ---------------------------------------------------------------------
    // Runs
    // ---------------------------------------------------------------------

    /// Runs every remaining stage in order, starting at the first stage that
    /// is neither complete nor skipped.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::Busy`] if anything executes for the project.
    pub async fn run_all(
        self: &Arc<Self>,
        project_id: ProjectId,
        overrides: serde_json::Value,
    ) -> Result<RunHandle, WorkflowError> {
        self.ensure_accepting()?;
        let project = self.load_open_project(project_id).await?;

        let records = self.store.list_stages(project_id).await?;
        let start = records
            .iter()
            .position(|r| !r.status.satisfies_dependents())
            .unwrap_or(records.len());
        let run = Arc::new(WorkflowRun::new(project_id, start..self.catalog.len()));
        let reservation = self.reserve_run(project_id, Arc::clone(&run))?;

        if project.paused {
            self.store.set_paused(project_id, false).await?;
        }

        let (tx, rx) = oneshot::channel();
        let first_stage = self.catalog.get(start).map(|d| d.id.clone());
        let Some(first_stage) = first_stage else {
            drop(reservation);
            let _ = tx.send(Ok(RunOutcome::Completed));
            return Ok(RunHandle::new(run.run_id(), project_id, None, rx));
        };

        info!(
            project_id = %project_id,
            run_id = %run.run_id(),
            first_stage = %first_stage,
            "Run started"
        );
        self.broadcaster.publish(
            StatusEvent::project(project_id, ProjectState::Running)
                .with_message(format!("run {} started at stage '{first_stage}'", run.run_id())),
        );

        let overrides = self.merged_overrides(&overrides);
        let this = Arc::clone(self);
        let task_run = Arc::clone(&run);
        self.spawn(async move {
            let outcome = this.drive_run(project, task_run, reservation, overrides).await;
            let _ = tx.send(outcome);
        });

        Ok(RunHandle::new(run.run_id(), project_id, Some(first_stage), rx))
    }

    /// Asks the active run to stop after the executing stage. Never aborts
    /// the stage itself.
    pub async fn pause(&self, project_id: ProjectId) -> Result<ControlAck<RunId>, WorkflowError> {
        self.load_open_project(project_id).await?;
        let Some(run) = self.active_run(project_id) else {
            return Ok(ControlAck::NoOp);
        };
        // Only the run persists `paused`, when it settles at a boundary.
        if !run.request_pause() {
            return Ok(ControlAck::NoOp);
        }
        let after = run
            .current_stage()
            .map_or_else(|| "the current stage".to_string(), |s| format!("stage '{s}'"));
        info!(project_id = %project_id, run_id = %run.run_id(), "Pause requested");
        self.broadcaster.publish(StatusEvent::log(
            project_id,
            EventLevel::Info,
            format!("pause requested; stopping after {after}"),
        ));
        Ok(ControlAck::Accepted(run.run_id()))
    }

    /// Withdraws a pending pause, or restarts a paused project.
    ///
    /// Returns `Accepted(None)` when the active run simply continues and
    /// `Accepted(Some(handle))` when a new run was started.
    pub async fn resume(
        self: &Arc<Self>,
        project_id: ProjectId,
    ) -> Result<ControlAck<Option<RunHandle>>, WorkflowError> {
        let project = self.load_open_project(project_id).await?;

        if let Some(run) = self.active_run(project_id) {
            if !run.clear_pause() {
                return Ok(ControlAck::NoOp);
            }
            info!(project_id = %project_id, run_id = %run.run_id(), "Pause withdrawn");
            self.broadcaster
                .publish(StatusEvent::log(project_id, EventLevel::Info, "pause withdrawn; run continues"));
            return Ok(ControlAck::Accepted(None));
        }

        if !project.paused {
            return Ok(ControlAck::NoOp);
        }
        self.broadcaster
            .publish(StatusEvent::log(project_id, EventLevel::Info, "resuming"));
        let handle = self.run_all(project_id, serde_json::Value::Null).await?;
        Ok(ControlAck::Accepted(Some(handle)))
    }

    // ---------------------------------------------------------------------
    // Observation
    // ---------------------------------------------------------------------

    /// Returns the project, its derived state, and its stage records.
    pub async fn get_status(&self, project_id: ProjectId) -> Result<ProjectStatus, WorkflowError> {
        let project = self.store.get_project(project_id).await?;
        let stages = self.store.list_stages(project_id).await?;
        let (active, active_run) = match self.runtime.get(&project_id) {
            Some(rt) => (!rt.is_idle(), rt.run.as_ref().map(|r| r.snapshot())),
            None => (false, None),
        };
        let state = ProjectState::derive(active, project.paused, stages.iter().map(|s| &s.status));
        Ok(ProjectStatus {
            project,
            state,
            stages,
            active_run,
        })
    }

    /// Subscribes to a project's status events.
    pub async fn subscribe_status(&self, project_id: ProjectId) -> Result<StatusSubscription, WorkflowError> {
        self.load_open_project(project_id).await?;
        Ok(self.broadcaster.subscribe(project_id))
    }

    // ---------------------------------------------------------------------
    // Shutdown
    // ---------------------------------------------------------------------

    /// Rejects new work, aborts in-flight stages, and waits up to `grace`
    /// for spawned tasks to record their outcome. Returns the number of
    /// tasks still running when the grace period ended; those are aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return 0;
        }
        info!(in_flight = self.runner.in_flight_count(), "Shutting down");
        self.runner.abort_all("shutdown");

        let mut handles = std::mem::take(&mut *self.tasks.lock());
        let waited = tokio::time::timeout(
            grace,
            futures::future::join_all(handles.iter_mut()),
        )
        .await;

        let stragglers = if waited.is_ok() {
            0
        } else {
            let remaining = handles.iter().filter(|h| !h.is_finished()).count();
            for handle in &handles {
                handle.abort();
            }
            warn!(remaining, "Shutdown grace period elapsed; aborting tasks");
            remaining
        };
        self.runner.pool().close();
        stragglers
    }

    /// Shuts down with the configured grace period.
    pub async fn shutdown_default(&self) -> usize {
        self.shutdown(self.config.shutdown_grace()).await
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn ensure_accepting(&self) -> Result<(), WorkflowError> {
        if self.is_shutting_down() {
            Err(WorkflowError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    fn stage_index(&self, stage: &StageId) -> Result<usize, WorkflowError> {
        self.catalog
            .index_of(stage)
            .ok_or_else(|| WorkflowError::not_found(format!("stage '{stage}'")))
    }

    /// Loads a project that still accepts work. Archived projects read as
    /// not found.
    async fn load_open_project(&self, project_id: ProjectId) -> Result<Project, WorkflowError> {
        let project = self.store.get_project(project_id).await?;
        if project.archived {
            return Err(WorkflowError::not_found(format!("project {project_id} (archived)")));
        }
        Ok(project)
    }

    fn active_run(&self, project_id: ProjectId) -> Option<Arc<WorkflowRun>> {
        self.runtime.get(&project_id).and_then(|rt| rt.run.clone())
    }

    /// Claims the project's stage slot. Within a run, only that run may
    /// claim it.
    fn reserve_stage(
        &self,
        project_id: ProjectId,
        stage: &StageId,
        run: Option<&Arc<WorkflowRun>>,
    ) -> Result<StageReservation, WorkflowError> {
        let mut rt = self.runtime.entry(project_id).or_default();
        if let Some(running) = &rt.running_stage {
            return Err(WorkflowError::busy(project_id, format!("stage '{running}' is running")));
        }
        if let Some(active) = &rt.run {
            if !run.is_some_and(|r| Arc::ptr_eq(r, active)) {
                return Err(WorkflowError::busy(
                    project_id,
                    format!("run {} is active", active.run_id()),
                ));
            }
        }
        rt.running_stage = Some(stage.clone());
        drop(rt);
        Ok(StageReservation {
            runtime: Arc::clone(&self.runtime),
            project_id,
        })
    }

    fn reserve_run(&self, project_id: ProjectId, run: Arc<WorkflowRun>) -> Result<RunReservation, WorkflowError> {
        let mut rt = self.runtime.entry(project_id).or_default();
        if let Some(running) = &rt.running_stage {
            return Err(WorkflowError::busy(project_id, format!("stage '{running}' is running")));
        }
        if let Some(active) = &rt.run {
            return Err(WorkflowError::busy(
                project_id,
                format!("run {} is active", active.run_id()),
            ));
        }
        rt.run = Some(Arc::clone(&run));
        drop(rt);
        Ok(RunReservation {
            runtime: Arc::clone(&self.runtime),
            project_id,
            run,
        })
    }

    fn check_prerequisites(
        project_id: ProjectId,
        stage: &StageId,
        records: &[StageRecord],
        index: usize,
    ) -> Result<(), WorkflowError> {
        match records.iter().take(index).find(|r| !r.status.satisfies_dependents()) {
            Some(blocking) => Err(WorkflowError::precondition(
                project_id,
                stage.clone(),
                format!("prerequisite stage '{}' is {}", blocking.stage_id, blocking.status),
            )),
            None => Ok(()),
        }
    }

    fn record_at(records: &[StageRecord], index: usize, project_id: ProjectId) -> Result<&StageRecord, WorkflowError> {
        records.get(index).ok_or_else(|| {
            WorkflowError::Internal(format!(
                "project {project_id} has {} stage records, expected at least {}",
                records.len(),
                index + 1
            ))
        })
    }

    fn prior_results(records: &[StageRecord]) -> BTreeMap<StageId, serde_json::Value> {
        records
            .iter()
            .filter(|r| r.status == StageStatus::Complete)
            .filter_map(|r| r.result.clone().map(|v| (r.stage_id.clone(), v)))
            .collect()
    }

    fn merged_overrides(&self, overrides: &serde_json::Value) -> serde_json::Value {
        let mut merged = self.config.stage_defaults.clone();
        if !overrides.is_null() {
            deep_merge(&mut merged, overrides);
        }
        merged
    }

    fn failure_error(project_id: ProjectId, record: &StageRecord) -> Option<WorkflowError> {
        let detail = record.error.as_ref()?;
        Some(match detail.kind {
            FailureKind::Timeout => WorkflowError::Timeout {
                project_id,
                stage: record.stage_id.clone(),
                message: detail.message.clone(),
            },
            FailureKind::StageFailure => WorkflowError::StageFailure {
                project_id,
                stage: record.stage_id.clone(),
                message: detail.message.clone(),
                attempts: detail.attempts,
            },
        })
    }

    /// Persists the running transition and announces it.
    async fn begin_stage(&self, project: &Project, record: &StageRecord) -> Result<StageRecord, WorkflowError> {
        let running = self.store.update_stage(project.id, StageUpdate::running(record)).await?;
        info!(project_id = %project.id, stage = %running.stage_id, "Stage started");
        self.broadcaster
            .publish(StatusEvent::stage(project.id, running.stage_id.clone(), StageStatus::Running));
        Ok(running)
    }

    /// Executes a running stage and persists its terminal record. The
    /// reservation is released once the record is terminal, before the
    /// transition is announced.
    async fn finish_stage(&self, job: StageJob, reservation: StageReservation) -> Result<StageRecord, WorkflowError> {
        let StageJob {
            project,
            index,
            running,
            prior_results,
            overrides,
        } = job;
        let project_id = project.id;
        let definition = self.catalog.get(index).ok_or_else(|| {
            WorkflowError::Internal(format!("no stage at catalog index {index}"))
        })?;

        let input = StageInput {
            stage_id: running.stage_id.clone(),
            project: ProjectContext::from(&project),
            prior_results,
            overrides,
            attempt: 0,
        };
        let broadcaster = &self.broadcaster;
        let outcome = self
            .runner
            .run(
                Invocation {
                    project_id,
                    definition,
                    input,
                    timeout: definition.timeout.unwrap_or_else(|| self.config.stage_timeout()),
                    retry: definition.retry.as_ref().unwrap_or(&self.config.retry),
                },
                |notice| {
                    broadcaster.publish(
                        StatusEvent::log(
                            project_id,
                            EventLevel::Warn,
                            format!(
                                "attempt {} failed: {}; retrying in {}ms",
                                notice.attempt,
                                notice.error,
                                notice.delay.as_millis()
                            ),
                        )
                        .with_stage(notice.stage),
                    );
                },
            )
            .await;

        let update = match outcome {
            Ok(success) => StageUpdate::complete(&running, success.payload, success.attempts),
            Err(err) => {
                let detail = err
                    .failure_detail()
                    .unwrap_or_else(|| StageFailureDetail::stage_failure(err.to_string(), true, 0));
                if matches!(err, RunError::TimedOut { .. } | RunError::Terminated { .. }) {
                    warn!(project_id = %project_id, stage = %running.stage_id, error = %err, "Stage timed out");
                } else {
                    warn!(project_id = %project_id, stage = %running.stage_id, error = %err, "Stage failed");
                }
                StageUpdate::failed(&running, detail)
            }
        };

        let persisted = self.store.update_stage(project_id, update).await;
        drop(reservation);
        let record = persisted.map_err(|e| {
            error!(project_id = %project_id, stage = %running.stage_id, error = %e, "Failed to persist stage outcome");
            WorkflowError::from(e)
        })?;

        let mut event = StatusEvent::stage(project_id, record.stage_id.clone(), record.status);
        if let Some(detail) = &record.error {
            event = event.with_message(detail.message.clone());
        }
        self.broadcaster.publish(event);
        Ok(record)
    }

    /// Drives a run to its outcome. The run slot is released before the
    /// final project state is announced.
    async fn drive_run(
        &self,
        project: Project,
        run: Arc<WorkflowRun>,
        reservation: RunReservation,
        overrides: serde_json::Value,
    ) -> Result<RunOutcome, WorkflowError> {
        let project_id = project.id;
        let outcome = self.run_stages(&project, &run, &overrides).await;
        run.finish();
        drop(reservation);

        let event = match &outcome {
            Ok(RunOutcome::Completed) => StatusEvent::project(project_id, ProjectState::Complete),
            Ok(RunOutcome::Paused { next_stage }) => StatusEvent::project(project_id, ProjectState::Paused)
                .with_message(format!("paused before stage '{next_stage}'")),
            Ok(RunOutcome::Failed { stage, error }) => StatusEvent::project(project_id, ProjectState::Failed)
                .with_stage(stage.clone())
                .with_message(error.message.clone()),
            Ok(RunOutcome::Interrupted { next_stage }) => StatusEvent::log(
                project_id,
                EventLevel::Warn,
                format!("run interrupted by shutdown before stage '{next_stage}'"),
            ),
            Err(e) => StatusEvent::log(project_id, EventLevel::Error, format!("run aborted: {e}")),
        };
        info!(project_id = %project_id, run_id = %run.run_id(), outcome = ?outcome, "Run finished");
        self.broadcaster.publish(event);
        outcome
    }

    async fn run_stages(
        &self,
        project: &Project,
        run: &Arc<WorkflowRun>,
        overrides: &serde_json::Value,
    ) -> Result<RunOutcome, WorkflowError> {
        let project_id = project.id;
        for index in run.range() {
            let records = self.store.list_stages(project_id).await?;
            let record = Self::record_at(&records, index, project_id)?;
            if record.status.satisfies_dependents() {
                continue;
            }
            if self.is_shutting_down() {
                return Ok(RunOutcome::Interrupted {
                    next_stage: record.stage_id.clone(),
                });
            }
            Self::check_prerequisites(project_id, &record.stage_id, &records, index)?;

            let reservation = self.reserve_stage(project_id, &record.stage_id, Some(run))?;
            run.set_current_stage(Some(record.stage_id.clone()));
            let started = self.begin_stage(project, record).await;
            let finished = match started {
                Ok(running) => {
                    let job = StageJob {
                        project: project.clone(),
                        index,
                        running,
                        prior_results: Self::prior_results(&records[..index]),
                        overrides: overrides.clone(),
                    };
                    self.finish_stage(job, reservation).await
                }
                Err(e) => Err(e),
            };
            run.set_current_stage(None);
            let finished = finished?;

            if let Some(error) = finished.error {
                return Ok(RunOutcome::Failed {
                    stage: finished.stage_id,
                    error,
                });
            }

            let Some(next) = self.catalog.get(index + 1) else {
                break;
            };
            if run.is_pause_requested() {
                self.store.set_paused(project_id, true).await?;
                return Ok(RunOutcome::Paused {
                    next_stage: next.id.clone(),
                });
            }
        }
        run.finish();
        Ok(RunOutcome::Completed)
    }

    /// Publishes the project's derived state after a manual transition.
    async fn announce_project_state(&self, project_id: ProjectId) {
        match self.get_status(project_id).await {
            Ok(status) => {
                self.broadcaster.publish(StatusEvent::project(project_id, status.state));
            }
            Err(e) => warn!(project_id = %project_id, error = %e, "Failed to derive project state"),
        }
    }

    fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }
}

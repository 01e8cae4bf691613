//! End-to-end workflow scenarios against the in-memory store.

#[cfg(test)]
mod tests {
    use crate::config::WorkflowConfig;
    use crate::core::{
        EventLevel, FailureKind, Project, ProjectId, ProjectState, StageId, StageRecord, StageStatus, StatusChange,
        StatusEvent,
    };
    use crate::errors::WorkflowError;
    use crate::events::StatusSubscription;
    use crate::runner::{JitterStrategy, RetryConfig};
    use crate::stages::{IoStage, StageCatalog, StageDefinition, StageError};
    use crate::store::{InMemoryProjectStore, ProjectStore, StageUpdate, StoreResult};
    use async_trait::async_trait;
    use crate::testing::{GatedStage, RecordingStage, ScriptedStage, SpinCpuStage};
    use crate::workflow::{Capabilities, ControlAck, RunOutcome, WorkflowController};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> WorkflowConfig {
        WorkflowConfig::new()
            .with_workers(2, 4)
            .with_stage_timeout(Duration::from_secs(5))
            .with_retry(RetryConfig::no_retry())
    }

    fn fast_retry(attempts: u32) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(attempts)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None)
    }

    /// Builds the four curation stages from IO stage doubles.
    fn curation(stages: [Arc<dyn IoStage>; 4]) -> StageCatalog {
        let [trends, fetch, analyze, generate] = stages;
        StageCatalog::builder()
            .io("trends", trends)
            .io("fetch", fetch)
            .io("analyze", analyze)
            .io("generate", generate)
            .build()
            .unwrap()
    }

    fn controller(catalog: StageCatalog) -> Arc<WorkflowController> {
        controller_with(catalog, config())
    }

    fn controller_with(catalog: StageCatalog, config: WorkflowConfig) -> Arc<WorkflowController> {
        let store = Arc::new(InMemoryProjectStore::new());
        WorkflowController::new(Capabilities::new(catalog, store), config).unwrap()
    }

    fn ok() -> Arc<ScriptedStage> {
        Arc::new(ScriptedStage::succeeding())
    }

    async fn statuses(controller: &WorkflowController, project_id: ProjectId) -> Vec<StageStatus> {
        controller
            .get_status(project_id)
            .await
            .unwrap()
            .stages
            .iter()
            .map(|s| s.status)
            .collect()
    }

    /// Reads events until `done` matches one, failing after five seconds.
    async fn collect_until(
        sub: &mut StatusSubscription,
        done: impl Fn(&StatusEvent) -> bool,
    ) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        let read = async {
            while let Some(event) = sub.recv().await {
                let stop = done(&event);
                events.push(event);
                if stop {
                    break;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), read)
            .await
            .expect("timed out waiting for status events");
        events
    }

    fn is_project_state(state: ProjectState) -> impl Fn(&StatusEvent) -> bool {
        move |e| e.project_state() == Some(state)
    }

    /// In-memory store whose `set_paused` yields before writing, and which
    /// records every value written.
    #[derive(Default)]
    struct SlowPauseStore {
        inner: InMemoryProjectStore,
        paused_writes: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl ProjectStore for SlowPauseStore {
        async fn create_project(&self, name: &str, description: &str, stages: &[StageId]) -> StoreResult<Project> {
            self.inner.create_project(name, description, stages).await
        }

        async fn get_project(&self, id: ProjectId) -> StoreResult<Project> {
            self.inner.get_project(id).await
        }

        async fn list_projects(&self) -> StoreResult<Vec<Project>> {
            self.inner.list_projects().await
        }

        async fn list_stages(&self, id: ProjectId) -> StoreResult<Vec<StageRecord>> {
            self.inner.list_stages(id).await
        }

        async fn update_stage(&self, id: ProjectId, update: StageUpdate) -> StoreResult<StageRecord> {
            self.inner.update_stage(id, update).await
        }

        async fn set_paused(&self, id: ProjectId, paused: bool) -> StoreResult<Project> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.paused_writes.lock().push(paused);
            self.inner.set_paused(id, paused).await
        }

        async fn archive_project(&self, id: ProjectId) -> StoreResult<Project> {
            self.inner.archive_project(id).await
        }
    }

    #[tokio::test]
    async fn test_run_all_completes_in_order_and_passes_prior_results() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let generate = Arc::new(ScriptedStage::succeeding());
        let catalog = StageCatalog::builder()
            .io("trends", Arc::new(RecordingStage::new(log.clone())))
            .io("fetch", Arc::new(RecordingStage::new(log.clone())))
            .cpu("analyze", Arc::new(SpinCpuStage::new(10_000)))
            .io("generate", generate.clone())
            .build()
            .unwrap();
        let controller = controller(catalog);
        let project = controller.create_project("Tech Daily", "gadget news").await.unwrap();

        let handle = controller.run_all(project.id, json!({})).await.unwrap();
        assert_eq!(handle.first_stage(), Some(&StageId::new("trends")));
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Completed);

        let status = controller.get_status(project.id).await.unwrap();
        assert_eq!(status.state, ProjectState::Complete);
        assert!(status.active_run.is_none());
        assert_eq!(*log.lock(), vec![StageId::new("trends"), StageId::new("fetch")]);

        let input = generate.inputs().remove(0);
        let prior: Vec<&str> = input.prior_results.keys().map(StageId::as_str).collect();
        assert_eq!(prior, vec!["analyze", "fetch", "trends"]);
        assert_eq!(input.prior("analyze").unwrap()["iterations"], 10_000);
        assert_eq!(input.project.description, "gadget news");
    }

    #[tokio::test]
    async fn test_failure_stops_run_and_preserves_completed_stages() {
        let generate = ok();
        let controller = controller(curation([
            ok(),
            ok(),
            Arc::new(ScriptedStage::always(Err(StageError::fatal("model unavailable")))),
            generate.clone(),
        ]));
        let project = controller.create_project("p", "").await.unwrap();

        let outcome = controller.run_all(project.id, json!({})).await.unwrap().wait().await.unwrap();
        match outcome {
            RunOutcome::Failed { stage, error } => {
                assert_eq!(stage, StageId::new("analyze"));
                assert_eq!(error.kind, FailureKind::StageFailure);
                assert_eq!(error.message, "model unavailable");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let status = controller.get_status(project.id).await.unwrap();
        assert_eq!(status.state, ProjectState::Failed);
        assert_eq!(
            statuses(&controller, project.id).await,
            vec![StageStatus::Complete, StageStatus::Complete, StageStatus::Failed, StageStatus::Pending]
        );
        assert!(status.stages[2].error.is_some());
        assert_eq!(generate.calls(), 0);
    }

    #[tokio::test]
    async fn test_pause_waits_for_stage_boundary_then_resume_continues() {
        let trends = ok();
        let fetch = Arc::new(GatedStage::new());
        let controller = controller(curation([trends.clone(), fetch.clone(), ok(), ok()]));
        let project = controller.create_project("p", "").await.unwrap();
        let mut sub = controller.subscribe_status(project.id).await.unwrap();

        let handle = controller.run_all(project.id, json!({})).await.unwrap();
        fetch.wait_started().await;

        let ack = controller.pause(project.id).await.unwrap();
        assert_eq!(ack.accepted(), Some(handle.run_id()));
        assert!(!controller.pause(project.id).await.unwrap().is_accepted());

        let during = controller.get_status(project.id).await.unwrap();
        assert_eq!(during.state, ProjectState::Running);
        let run = during.active_run.unwrap();
        assert!(run.pause_requested);
        assert_eq!(run.current_stage, Some(StageId::new("fetch")));

        fetch.release();
        assert_eq!(
            handle.wait().await.unwrap(),
            RunOutcome::Paused {
                next_stage: StageId::new("analyze")
            }
        );

        let events = collect_until(&mut sub, is_project_state(ProjectState::Paused)).await;
        assert!(events.iter().any(|e| e.stage_id == Some(StageId::new("fetch"))
            && e.stage_status() == Some(StageStatus::Complete)));
        assert!(!events.iter().any(|e| e.stage_id == Some(StageId::new("analyze"))));

        let status = controller.get_status(project.id).await.unwrap();
        assert_eq!(status.state, ProjectState::Paused);
        assert!(status.project.paused);
        assert_eq!(
            statuses(&controller, project.id).await,
            vec![StageStatus::Complete, StageStatus::Complete, StageStatus::Pending, StageStatus::Pending]
        );

        let resumed = controller.resume(project.id).await.unwrap().accepted().flatten().unwrap();
        assert_eq!(resumed.first_stage(), Some(&StageId::new("analyze")));
        assert_eq!(resumed.wait().await.unwrap(), RunOutcome::Completed);

        let status = controller.get_status(project.id).await.unwrap();
        assert_eq!(status.state, ProjectState::Complete);
        assert!(!status.project.paused);
        assert_eq!(trends.calls(), 1);
    }

    #[tokio::test]
    async fn test_pause_racing_final_stage_leaves_project_complete() {
        let only = Arc::new(GatedStage::new());
        let catalog = StageCatalog::builder().io("trends", only.clone()).build().unwrap();
        let store = Arc::new(SlowPauseStore::default());
        let controller = WorkflowController::new(Capabilities::new(catalog, store.clone()), config()).unwrap();
        let project = controller.create_project("p", "").await.unwrap();

        // Pause during the last stage has no boundary left to stop at.
        let handle = controller.run_all(project.id, json!({})).await.unwrap();
        only.wait_started().await;
        assert!(controller.pause(project.id).await.unwrap().is_accepted());
        only.release();
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Completed);
        assert!(matches!(controller.pause(project.id).await.unwrap(), ControlAck::NoOp));

        // Pause just after the last stage finished.
        let again = controller.create_project("q", "").await.unwrap();
        let handle = controller.run_all(again.id, json!({})).await.unwrap();
        only.wait_entered(2).await;
        only.release();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = controller.pause(again.id).await.unwrap();
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Completed);
        tokio::time::sleep(Duration::from_millis(100)).await;

        for id in [project.id, again.id] {
            let status = controller.get_status(id).await.unwrap();
            assert_eq!(status.state, ProjectState::Complete);
            assert!(!status.project.paused);
        }
        assert!(!store.paused_writes.lock().contains(&true));
    }

    #[tokio::test]
    async fn test_resume_while_draining_withdraws_pause() {
        let fetch = Arc::new(GatedStage::new());
        let controller = controller(curation([ok(), fetch.clone(), ok(), ok()]));
        let project = controller.create_project("p", "").await.unwrap();

        let handle = controller.run_all(project.id, json!({})).await.unwrap();
        fetch.wait_started().await;
        assert!(controller.pause(project.id).await.unwrap().is_accepted());

        let ack = controller.resume(project.id).await.unwrap();
        assert!(matches!(ack, ControlAck::Accepted(None)));

        fetch.release();
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Completed);
        assert_eq!(controller.get_status(project.id).await.unwrap().state, ProjectState::Complete);
    }

    #[tokio::test]
    async fn test_pause_and_resume_without_run_are_noops() {
        let controller = controller(curation([ok(), ok(), ok(), ok()]));
        let project = controller.create_project("p", "").await.unwrap();

        assert!(matches!(controller.pause(project.id).await.unwrap(), ControlAck::NoOp));
        assert!(matches!(controller.resume(project.id).await.unwrap(), ControlAck::NoOp));
        assert!(matches!(
            controller.pause(ProjectId::new()).await,
            Err(WorkflowError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_stage_with_pending_prerequisite_is_rejected_without_mutation() {
        let analyze = ok();
        let controller = controller(curation([ok(), ok(), analyze.clone(), ok()]));
        let project = controller.create_project("p", "").await.unwrap();
        controller.execute_stage(project.id, "trends", json!({})).await.unwrap();
        let before = controller.get_status(project.id).await.unwrap();

        let err = controller.run_stage(project.id, "analyze", json!({})).await.unwrap_err();
        assert!(matches!(err, WorkflowError::PreconditionFailed { ref stage, .. } if stage == "analyze"));
        assert!(err.to_string().contains("fetch"));

        assert_eq!(controller.get_status(project.id).await.unwrap(), before);
        assert_eq!(analyze.calls(), 0);
        assert!(!controller.is_active(project.id));
    }

    #[tokio::test]
    async fn test_unknown_stage_and_project_are_not_found() {
        let controller = controller(curation([ok(), ok(), ok(), ok()]));
        let project = controller.create_project("p", "").await.unwrap();

        assert!(matches!(
            controller.run_stage(project.id, "upload", json!({})).await,
            Err(WorkflowError::NotFound { .. })
        ));
        assert!(matches!(
            controller.run_all(ProjectId::new(), json!({})).await,
            Err(WorkflowError::NotFound { .. })
        ));
        assert!(matches!(
            controller.subscribe_status(ProjectId::new()).await,
            Err(WorkflowError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_single_flight_rejects_concurrent_requests() {
        let trends = Arc::new(GatedStage::new());
        let controller = controller(curation([trends.clone(), ok(), ok(), ok()]));
        let project = controller.create_project("p", "").await.unwrap();

        let handle = controller.run_stage(project.id, "trends", json!({})).await.unwrap();
        trends.wait_started().await;

        assert!(matches!(
            controller.run_stage(project.id, "trends", json!({})).await,
            Err(WorkflowError::Busy { .. })
        ));
        assert!(matches!(
            controller.run_all(project.id, json!({})).await,
            Err(WorkflowError::Busy { .. })
        ));
        assert!(matches!(
            controller.skip_stage(project.id, "trends").await,
            Err(WorkflowError::Busy { .. })
        ));
        assert!(matches!(
            controller.archive_project(project.id).await,
            Err(WorkflowError::Busy { .. })
        ));
        assert_eq!(controller.get_status(project.id).await.unwrap().state, ProjectState::Running);

        trends.release();
        let record = handle.wait().await.unwrap();
        assert_eq!(record.status, StageStatus::Complete);
        assert_eq!(record.attempts, 1);
        assert!(!controller.is_active(project.id));
    }

    #[tokio::test]
    async fn test_projects_run_concurrently() {
        let trends = Arc::new(GatedStage::new());
        let controller = controller(curation([trends.clone(), ok(), ok(), ok()]));
        let a = controller.create_project("a", "").await.unwrap();
        let b = controller.create_project("b", "").await.unwrap();

        let run_a = controller.run_all(a.id, json!({})).await.unwrap();
        let run_b = controller.run_all(b.id, json!({})).await.unwrap();
        trends.wait_entered(2).await;

        trends.release();
        trends.release();
        assert_eq!(run_a.wait().await.unwrap(), RunOutcome::Completed);
        assert_eq!(run_b.wait().await.unwrap(), RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_manual_rerun_recovers_failed_project() {
        let analyze = Arc::new(ScriptedStage::new(vec![Err(StageError::fatal("quota exceeded"))]));
        let controller = controller(curation([ok(), ok(), analyze.clone(), ok()]));
        let project = controller.create_project("p", "").await.unwrap();

        let outcome = controller.run_all(project.id, json!({})).await.unwrap().wait().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed { .. }));

        let err = controller.execute_stage(project.id, "generate", json!({})).await.unwrap_err();
        assert!(matches!(err, WorkflowError::PreconditionFailed { .. }));

        let record = controller.execute_stage(project.id, "analyze", json!({})).await.unwrap();
        assert_eq!(record.status, StageStatus::Complete);
        assert!(record.error.is_none());

        let handle = controller.run_all(project.id, json!({})).await.unwrap();
        assert_eq!(handle.first_stage(), Some(&StageId::new("generate")));
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Completed);
        assert_eq!(analyze.calls(), 2);
    }

    #[tokio::test]
    async fn test_run_all_on_complete_project_completes_immediately() {
        let trends = ok();
        let controller = controller(curation([trends.clone(), ok(), ok(), ok()]));
        let project = controller.create_project("p", "").await.unwrap();
        controller.run_all(project.id, json!({})).await.unwrap().wait().await.unwrap();

        let handle = controller.run_all(project.id, json!({})).await.unwrap();
        assert!(handle.first_stage().is_none());
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Completed);
        assert_eq!(trends.calls(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_announced_as_log_events() {
        let fetch = Arc::new(ScriptedStage::new(vec![Err(StageError::retryable("HTTP 429"))]));
        let catalog = StageCatalog::builder()
            .stage(StageDefinition::io("fetch", fetch.clone()).with_retry(fast_retry(3)))
            .build()
            .unwrap();
        let controller = controller(catalog);
        let project = controller.create_project("p", "").await.unwrap();
        let mut sub = controller.subscribe_status(project.id).await.unwrap();

        let record = controller.execute_stage(project.id, "fetch", json!({})).await.unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(fetch.calls(), 2);

        let events = collect_until(&mut sub, |e| e.stage_status() == Some(StageStatus::Complete)).await;
        let retry = events
            .iter()
            .find(|e| matches!(e.change, StatusChange::Log) && e.level == EventLevel::Warn)
            .expect("retry log event");
        assert!(retry.message.as_deref().unwrap_or_default().contains("HTTP 429"));
        assert_eq!(retry.stage_id, Some(StageId::new("fetch")));
    }

    #[tokio::test]
    async fn test_cpu_timeout_marks_stage_failed_with_timeout() {
        let catalog = StageCatalog::builder()
            .stage(
                StageDefinition::cpu("analyze", Arc::new(SpinCpuStage::until_cancelled()))
                    .with_timeout(Duration::from_millis(50))
                    .with_retry(fast_retry(3)),
            )
            .build()
            .unwrap();
        let controller = controller(catalog);
        let project = controller.create_project("p", "").await.unwrap();

        let err = controller.execute_stage(project.id, "analyze", json!({})).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Timeout { .. }));

        let status = controller.get_status(project.id).await.unwrap();
        assert_eq!(status.state, ProjectState::Failed);
        let detail = status.stages[0].error.clone().unwrap();
        assert_eq!(detail.kind, FailureKind::Timeout);
        assert_eq!(detail.attempts, 1);
    }

    #[tokio::test]
    async fn test_event_trail_never_shows_two_running_stages() {
        let controller = controller(curation([ok(), ok(), ok(), ok()]));
        let project = controller.create_project("p", "").await.unwrap();
        let mut sub = controller.subscribe_status(project.id).await.unwrap();

        controller.run_all(project.id, json!({})).await.unwrap();
        let events = collect_until(&mut sub, is_project_state(ProjectState::Complete)).await;

        let mut running = HashSet::new();
        let mut order = Vec::new();
        for event in &events {
            if let (Some(stage), Some(status)) = (&event.stage_id, event.stage_status()) {
                match status {
                    StageStatus::Running => {
                        assert!(running.is_empty(), "two stages running at once");
                        running.insert(stage.clone());
                    }
                    _ => {
                        running.remove(stage);
                        order.push(stage.as_str().to_string());
                    }
                }
            }
        }
        assert_eq!(order, vec!["trends", "fetch", "analyze", "generate"]);
        assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert_eq!(events[0].project_state(), Some(ProjectState::Running));
    }

    #[tokio::test]
    async fn test_get_status_is_idempotent() {
        let controller = controller(curation([ok(), ok(), ok(), ok()]));
        let project = controller.create_project("p", "").await.unwrap();
        controller.execute_stage(project.id, "trends", json!({})).await.unwrap();

        let first = controller.get_status(project.id).await.unwrap();
        let second = controller.get_status(project.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.state, ProjectState::Idle);
    }

    #[tokio::test]
    async fn test_skip_stage_satisfies_prerequisites() {
        let trends = ok();
        let controller = controller(curation([trends.clone(), ok(), ok(), ok()]));
        let project = controller.create_project("p", "").await.unwrap();

        let skipped = controller.skip_stage(project.id, "trends").await.unwrap();
        assert_eq!(skipped.status, StageStatus::Skipped);
        assert!(matches!(
            controller.skip_stage(project.id, "trends").await,
            Err(WorkflowError::PreconditionFailed { .. })
        ));

        controller.execute_stage(project.id, "fetch", json!({})).await.unwrap();
        let outcome = controller.run_all(project.id, json!({})).await.unwrap().wait().await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(trends.calls(), 0);
        assert_eq!(controller.get_status(project.id).await.unwrap().state, ProjectState::Complete);
    }

    #[tokio::test]
    async fn test_overrides_merge_over_stage_defaults() {
        let trends = ok();
        let config = config().with_stage_defaults(json!({
            "model": "gpt-4o-mini",
            "llm": {"temperature": 0.7, "max_tokens": 800}
        }));
        let controller = controller_with(curation([trends.clone(), ok(), ok(), ok()]), config);
        let project = controller.create_project("p", "").await.unwrap();

        controller
            .execute_stage(project.id, "trends", json!({"llm": {"temperature": 0.2}, "region": "GB"}))
            .await
            .unwrap();

        let input = trends.inputs().remove(0);
        assert_eq!(
            input.overrides,
            json!({"model": "gpt-4o-mini", "llm": {"temperature": 0.2, "max_tokens": 800}, "region": "GB"})
        );
        assert_eq!(input.setting("/llm/max_tokens"), Some(&json!(800)));
        assert_eq!(input.attempt, 1);
    }

    #[tokio::test]
    async fn test_archive_closes_streams_and_rejects_work() {
        let controller = controller(curation([ok(), ok(), ok(), ok()]));
        let project = controller.create_project("p", "").await.unwrap();
        let keep = controller.create_project("q", "").await.unwrap();
        let mut sub = controller.subscribe_status(project.id).await.unwrap();

        let archived = controller.archive_project(project.id).await.unwrap();
        assert!(archived.archived);

        let events = collect_until(&mut sub, |_| false).await;
        assert_eq!(events.last().map(|e| e.change.clone()), Some(StatusChange::Log));
        assert!(matches!(
            controller.run_all(project.id, json!({})).await,
            Err(WorkflowError::NotFound { .. })
        ));
        assert!(matches!(
            controller.subscribe_status(project.id).await,
            Err(WorkflowError::NotFound { .. })
        ));
        assert!(matches!(controller.pause(project.id).await, Err(WorkflowError::NotFound { .. })));

        let listed: Vec<ProjectId> = controller.list_projects().await.unwrap().iter().map(|p| p.id).collect();
        assert!(listed.contains(&project.id) && listed.contains(&keep.id));
    }

    #[tokio::test]
    async fn test_shutdown_records_in_flight_stage_as_timeout() {
        let fetch = Arc::new(GatedStage::new());
        let controller = controller(curation([ok(), fetch.clone(), ok(), ok()]));
        let project = controller.create_project("p", "").await.unwrap();

        let handle = controller.run_all(project.id, json!({})).await.unwrap();
        fetch.wait_started().await;

        assert_eq!(controller.shutdown(Duration::from_secs(2)).await, 0);
        match handle.wait().await.unwrap() {
            RunOutcome::Failed { stage, error } => {
                assert_eq!(stage, StageId::new("fetch"));
                assert_eq!(error.kind, FailureKind::Timeout);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert_eq!(
            statuses(&controller, project.id).await,
            vec![StageStatus::Complete, StageStatus::Failed, StageStatus::Pending, StageStatus::Pending]
        );
        assert!(matches!(
            controller.create_project("late", "").await,
            Err(WorkflowError::ShuttingDown)
        ));
    }
}

//! The in-memory document shared by both store implementations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{StageUpdate, StoreResult};
use crate::core::{Project, ProjectId, StageId, StageRecord, StageStatus};
use crate::errors::StoreError;

/// Every project and its stage records.
///
/// This is also the on-disk layout of the JSON file store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    projects: HashMap<ProjectId, Project>,
    #[serde(default)]
    stages: HashMap<ProjectId, Vec<StageRecord>>,
}

impl StoreDocument {
    pub(crate) fn insert_project(&mut self, name: &str, description: &str, stages: &[StageId]) -> Project {
        let project = Project::new(name, description);
        let records = stages.iter().cloned().map(StageRecord::pending).collect();
        self.stages.insert(project.id, records);
        self.projects.insert(project.id, project.clone());
        project
    }

    pub(crate) fn project(&self, id: ProjectId) -> StoreResult<&Project> {
        self.projects.get(&id).ok_or(StoreError::ProjectNotFound(id))
    }

    fn project_mut(&mut self, id: ProjectId) -> StoreResult<&mut Project> {
        self.projects.get_mut(&id).ok_or(StoreError::ProjectNotFound(id))
    }

    pub(crate) fn projects_newest_first(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = self.projects.values().cloned().collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        projects
    }

    pub(crate) fn stages(&self, id: ProjectId) -> StoreResult<&[StageRecord]> {
        self.stages
            .get(&id)
            .map(Vec::as_slice)
            .ok_or(StoreError::ProjectNotFound(id))
    }

    pub(crate) fn apply_update(&mut self, id: ProjectId, update: StageUpdate) -> StoreResult<StageRecord> {
        if update.error.is_some() != (update.status == StageStatus::Failed) {
            return Err(StoreError::InvalidUpdate {
                stage: update.stage_id,
                reason: "an error detail must be present exactly when the status is failed".into(),
            });
        }

        let records = self.stages.get_mut(&id).ok_or(StoreError::ProjectNotFound(id))?;
        let index = records
            .iter()
            .position(|r| r.stage_id == update.stage_id)
            .ok_or_else(|| StoreError::StageNotFound {
                project_id: id,
                stage: update.stage_id.clone(),
            })?;

        let actual = records[index].version;
        if actual != update.expected_version {
            return Err(StoreError::Conflict {
                project_id: id,
                stage: update.stage_id,
                expected: update.expected_version,
                actual,
            });
        }

        if update.status == StageStatus::Running {
            if let Some(other) = records
                .iter()
                .enumerate()
                .find(|(i, r)| *i != index && r.status == StageStatus::Running)
            {
                return Err(StoreError::InvalidUpdate {
                    stage: update.stage_id,
                    reason: format!("stage '{}' is already running", other.1.stage_id),
                });
            }
        }

        let record = &mut records[index];
        record.status = update.status;
        record.started_at = update.started_at;
        record.finished_at = update.finished_at;
        record.result = update.result;
        record.error = update.error;
        record.attempts = update.attempts;
        record.version += 1;
        let record = record.clone();

        if record.status == StageStatus::Running {
            self.project_mut(id)?.active_stage = Some(index);
        }
        Ok(record)
    }

    pub(crate) fn set_paused(&mut self, id: ProjectId, paused: bool) -> StoreResult<Project> {
        let project = self.project_mut(id)?;
        project.paused = paused;
        Ok(project.clone())
    }

    pub(crate) fn archive(&mut self, id: ProjectId) -> StoreResult<Project> {
        let project = self.project_mut(id)?;
        project.archived = true;
        Ok(project.clone())
    }
}

//! In-memory project store.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ProjectStore, StageUpdate, StoreDocument, StoreResult};
use crate::core::{Project, ProjectId, StageId, StageRecord};

/// A project store held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryProjectStore {
    document: RwLock<StoreDocument>,
}

impl InMemoryProjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current document.
    #[must_use]
    pub fn snapshot(&self) -> StoreDocument {
        self.document.read().clone()
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn create_project(&self, name: &str, description: &str, stages: &[StageId]) -> StoreResult<Project> {
        Ok(self.document.write().insert_project(name, description, stages))
    }

    async fn get_project(&self, id: ProjectId) -> StoreResult<Project> {
        self.document.read().project(id).cloned()
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        Ok(self.document.read().projects_newest_first())
    }

    async fn list_stages(&self, id: ProjectId) -> StoreResult<Vec<StageRecord>> {
        self.document.read().stages(id).map(<[StageRecord]>::to_vec)
    }

    async fn update_stage(&self, id: ProjectId, update: StageUpdate) -> StoreResult<StageRecord> {
        self.document.write().apply_update(id, update)
    }

    async fn set_paused(&self, id: ProjectId, paused: bool) -> StoreResult<Project> {
        self.document.write().set_paused(id, paused)
    }

    async fn archive_project(&self, id: ProjectId) -> StoreResult<Project> {
        self.document.write().archive(id)
    }
}

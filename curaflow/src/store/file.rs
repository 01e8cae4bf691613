//! JSON-file project store.
//!
//! The whole document is rewritten after every accepted mutation: serialized
//! to a sibling temp file, then renamed over the target so readers never see
//! a partial write.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{ProjectStore, StageUpdate, StoreDocument, StoreResult};
use crate::core::{Project, ProjectId, StageId, StageRecord};

/// A project store persisted to a single JSON file.
#[derive(Debug)]
pub struct JsonFileProjectStore {
    path: PathBuf,
    document: Mutex<StoreDocument>,
}

impl JsonFileProjectStore {
    /// Opens the store at `path`, loading it if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let document = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), "Opened project store");
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, document: &StoreDocument) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "Persisted project store");
        Ok(())
    }

    /// Applies `mutate` to a copy of the document and commits it only if the
    /// write succeeds.
    async fn mutate<T>(&self, mutate: impl FnOnce(&mut StoreDocument) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.document.lock().await;
        let mut next = guard.clone();
        let out = mutate(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }
}

#[async_trait]
impl ProjectStore for JsonFileProjectStore {
    async fn create_project(&self, name: &str, description: &str, stages: &[StageId]) -> StoreResult<Project> {
        self.mutate(|doc| Ok(doc.insert_project(name, description, stages))).await
    }

    async fn get_project(&self, id: ProjectId) -> StoreResult<Project> {
        self.document.lock().await.project(id).cloned()
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        Ok(self.document.lock().await.projects_newest_first())
    }

    async fn list_stages(&self, id: ProjectId) -> StoreResult<Vec<StageRecord>> {
        self.document.lock().await.stages(id).map(<[StageRecord]>::to_vec)
    }

    async fn update_stage(&self, id: ProjectId, update: StageUpdate) -> StoreResult<StageRecord> {
        self.mutate(|doc| doc.apply_update(id, update)).await
    }

    async fn set_paused(&self, id: ProjectId, paused: bool) -> StoreResult<Project> {
        self.mutate(|doc| doc.set_paused(id, paused)).await
    }

    async fn archive_project(&self, id: ProjectId) -> StoreResult<Project> {
        self.mutate(|doc| doc.archive(id)).await
    }
}

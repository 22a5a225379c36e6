//! JSON file state store.

use super::{RecordEnvelope, StateStore};
use crate::error::{PhaseKitError, Result};
use crate::model::RunRecord;
use crate::types::RunId;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// State store writing one JSON file per run.
///
/// Records live at `{dir}/{run_id}.json`. Each save writes and fsyncs a
/// temporary file, then renames it over the previous record, so a crash
/// mid-write leaves the last complete record in place. Archived runs are moved to
/// `{dir}/archive/`.
#[derive(Clone, Debug)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Creates a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, run_id: &RunId) -> Result<PathBuf> {
        if !run_id.is_storage_safe() {
            return Err(PhaseKitError::Store(format!(
                "Run id '{}' is not a valid storage key",
                run_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", run_id)))
    }

    /// Returns the path of an archived record.
    pub fn archive_path(&self, run_id: &RunId) -> PathBuf {
        self.dir.join("archive").join(format!("{}.json", run_id))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save(&self, record: &RunRecord) -> Result<()> {
        let path = self.record_path(record.id())?;
        let bytes = RecordEnvelope::seal(record)?.to_bytes()?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join(format!(".{}.json.tmp", record.id()));
        {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            // The rename must not become durable before the contents.
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!("Saved run {} to {}", record.id(), path.display());
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
        let path = self.record_path(run_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => RecordEnvelope::open(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn archive(&self, run_id: &RunId) -> Result<()> {
        let path = self.record_path(run_id)?;
        let target = self.archive_path(run_id);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&path, &target).await.map_err(|e| {
            PhaseKitError::Store(format!("Failed to archive run {}: {}", run_id, e))
        })?;
        tracing::info!("Archived run {}", run_id);
        Ok(())
    }
}

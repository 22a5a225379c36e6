//! In-process state store.

use super::{RecordEnvelope, StateStore};
use crate::error::{PhaseKitError, Result};
use crate::model::RunRecord;
use crate::types::RunId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// State store keeping sealed records in memory.
///
/// Records are stored serialized so that loading exercises the same
/// envelope validation as the file backend. Clones share storage.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    active: Arc<RwLock<HashMap<RunId, Vec<u8>>>>,
    archived: Arc<RwLock<HashMap<RunId, Vec<u8>>>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of active records.
    pub fn len(&self) -> usize {
        self.active.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Returns true if no active record exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the run has been archived.
    pub fn is_archived(&self, run_id: &RunId) -> bool {
        self.archived
            .read()
            .map(|m| m.contains_key(run_id))
            .unwrap_or(false)
    }
}

fn lock_error(e: impl std::fmt::Display) -> PhaseKitError {
    PhaseKitError::Store(format!("Storage lock failed: {}", e))
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, record: &RunRecord) -> Result<()> {
        let bytes = RecordEnvelope::seal(record)?.to_bytes()?;
        self.active
            .write()
            .map_err(lock_error)?
            .insert(record.id().clone(), bytes);
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
        let active = self.active.read().map_err(lock_error)?;
        active
            .get(run_id)
            .map(|bytes| RecordEnvelope::open(bytes))
            .transpose()
    }

    async fn archive(&self, run_id: &RunId) -> Result<()> {
        let bytes = self
            .active
            .write()
            .map_err(lock_error)?
            .remove(run_id)
            .ok_or_else(|| PhaseKitError::Store(format!("Run {} not found", run_id)))?;
        self.archived
            .write()
            .map_err(lock_error)?
            .insert(run_id.clone(), bytes);
        Ok(())
    }
}

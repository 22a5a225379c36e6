//! Durable run state.
//!
//! A [`StateStore`] persists one [`RunRecord`] per run. Records are wrapped
//! in a versioned [`RecordEnvelope`] carrying a SHA-256 checksum so that a
//! truncated or hand-edited record is detected on load instead of being
//! resumed.

mod file;
mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use crate::error::{PhaseKitError, Result};
use crate::model::RunRecord;
use crate::types::RunId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Newest record schema understood by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Durable key-value persistence of run records.
///
/// Every `save` is atomic with respect to a single run: readers observe
/// either the previous record or the new one, never a mix.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persists the full record of a run, replacing any previous one.
    async fn save(&self, record: &RunRecord) -> Result<()>;

    /// Loads a run record; `Ok(None)` means the run has never been saved.
    async fn load(&self, run_id: &RunId) -> Result<Option<RunRecord>>;

    /// Moves a run record out of the active set.
    async fn archive(&self, run_id: &RunId) -> Result<()>;
}

/// On-disk representation of a run record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordEnvelope {
    /// Record schema version
    pub schema_version: u32,
    /// SHA-256 of the serialized record
    pub checksum: String,
    /// The record itself
    pub record: RunRecord,
}

impl RecordEnvelope {
    /// Wraps a record, computing its checksum.
    pub fn seal(record: &RunRecord) -> Result<Self> {
        Ok(Self {
            schema_version: SCHEMA_VERSION,
            checksum: compute_checksum(record)?,
            record: record.clone(),
        })
    }

    /// Serializes the envelope as pretty JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parses and validates an envelope, returning the contained record.
    ///
    /// # Returns
    ///
    /// - `Ok(RunRecord)` if the version is supported and the checksum matches
    /// - `Err(PhaseKitError::UnsupportedVersion)` for records from a newer schema
    /// - `Err(PhaseKitError::Corrupted)` for malformed data or checksum mismatch
    pub fn open(bytes: &[u8]) -> Result<RunRecord> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| PhaseKitError::Corrupted(format!("Unreadable record: {}", e)))?;

        let version = value
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| PhaseKitError::Corrupted("Missing schema_version".to_string()))?
            as u32;
        if version > SCHEMA_VERSION {
            return Err(PhaseKitError::UnsupportedVersion {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }

        let envelope: RecordEnvelope = serde_json::from_value(value)
            .map_err(|e| PhaseKitError::Corrupted(format!("Malformed record: {}", e)))?;

        let expected = compute_checksum(&envelope.record)?;
        if envelope.checksum != expected {
            return Err(PhaseKitError::Corrupted(format!(
                "Checksum mismatch: expected {}, got {}",
                expected, envelope.checksum
            )));
        }

        Ok(envelope.record)
    }
}

fn compute_checksum(record: &RunRecord) -> Result<String> {
    let json = serde_json::to_vec(record)?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(format!("{:x}", hasher.finalize()))
}

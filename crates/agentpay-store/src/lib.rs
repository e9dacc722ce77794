//! AgentPay Store - whole-file JSON snapshot persistence
//!
//! Every engine persists its entire collection as one pretty-printed JSON
//! snapshot after each successful mutation. A crash during a write leaves
//! either the prior or the new snapshot intact: the payload is written to
//! a temp file and moved into place with an atomic rename.
//!
//! Construction with `path = None` disables persistence entirely; engines
//! run in-memory, which unit tests rely on.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use agentpay_types::{AgentPayError, Result};

/// Handle to one snapshot file holding a serializable collection
#[derive(Debug, Clone)]
pub struct SnapshotFile<T> {
    path: Option<PathBuf>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> SnapshotFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            _marker: std::marker::PhantomData,
        }
    }

    /// Ephemeral store that never touches disk
    pub fn ephemeral() -> Self {
        Self::new(None)
    }

    /// Read the snapshot at boot. A missing file yields the default
    /// collection; an unreadable or unparseable file is logged and also
    /// yields the default rather than refusing to boot.
    pub fn load(&self) -> T {
        let Some(path) = self.path.as_ref() else {
            return T::default();
        };

        let raw = match std::fs::read_to_string(path) {
            Ok(value) => value,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return T::default();
            }
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to read snapshot; booting with empty collection",
                );
                return T::default();
            }
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to parse snapshot; booting with empty collection",
                );
                T::default()
            }
        }
    }

    /// Rewrite the snapshot. Atomicity comes from writing a temp file in
    /// the same directory and renaming it over the target.
    pub async fn persist(&self, value: &T) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|error| {
                AgentPayError::persistence(format!("failed to prepare snapshot directory: {error}"))
            })?;
        }

        let payload = serde_json::to_vec_pretty(value).map_err(|error| {
            AgentPayError::persistence(format!("failed to encode snapshot: {error}"))
        })?;

        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, payload).await.map_err(|error| {
            AgentPayError::persistence(format!("failed to write snapshot: {error}"))
        })?;

        tokio::fs::rename(&temp_path, path).await.map_err(|error| {
            AgentPayError::persistence(format!("failed to finalize snapshot: {error}"))
        })?;

        Ok(())
    }
}

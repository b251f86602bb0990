// src/recording/snapshot.rs
//! Durable snapshot of the in-progress recording

use super::state::RecordingState;
use crate::error::Result;
use crate::store::{SharedStore, SNAPSHOT_KEY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted form of [`RecordingState`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySnapshot {
    #[serde(flatten)]
    pub state: RecordingState,
    pub captured_at: DateTime<Utc>,
}

impl ActivitySnapshot {
    pub fn capture(state: &RecordingState) -> Self {
        Self {
            state: state.clone(),
            captured_at: Utc::now(),
        }
    }
}

/// Writes and reads the single recovery snapshot
#[derive(Clone)]
pub struct SnapshotPersister {
    store: SharedStore,
}

impl SnapshotPersister {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Replace the stored snapshot with the current state
    pub fn persist(&self, state: &RecordingState) -> Result<()> {
        let bytes = serde_json::to_vec(&ActivitySnapshot::capture(state))?;
        self.store.set(SNAPSHOT_KEY, &bytes)
    }

    /// Read the stored snapshot. Missing, unreadable, corrupt or
    /// inconsistent data all mean "nothing to recover".
    pub fn load_snapshot(&self) -> Option<ActivitySnapshot> {
        let bytes = match self.store.get(SNAPSHOT_KEY) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read recording snapshot");
                return None;
            }
        };

        let snapshot = match serde_json::from_slice::<ActivitySnapshot>(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring corrupt recording snapshot");
                return None;
            }
        };

        if let Err(reason) = snapshot.state.check_consistency() {
            tracing::warn!(reason = %reason, "Ignoring inconsistent recording snapshot");
            return None;
        }
        Some(snapshot)
    }

    pub fn clear_snapshot(&self) -> Result<()> {
        self.store.remove(SNAPSHOT_KEY)
    }
}

// src/recording/finalize.rs
//! Sealing a stopped recording into an activity

use super::snapshot::SnapshotPersister;
use super::state::{average_speed_kph, RecordingState};
use crate::activity::{default_activity_name, generate_activity_id, Activity};
use crate::error::Result;
use crate::store::ActivityHistory;
use chrono::Utc;

#[derive(Clone)]
pub struct ActivityFinalizer {
    history: ActivityHistory,
    persister: SnapshotPersister,
}

impl ActivityFinalizer {
    pub fn new(history: ActivityHistory, persister: SnapshotPersister) -> Self {
        Self { history, persister }
    }

    pub fn history(&self) -> &ActivityHistory {
        &self.history
    }

    /// Build the activity, store it at the head of the history, then drop
    /// the recovery snapshot. If the history write fails the snapshot is
    /// kept so the recording can still be recovered.
    pub fn finalize(&self, state: &RecordingState, name: &str, user_id: &str) -> Result<Activity> {
        let now = Utc::now();
        let name = name.trim();
        let name = if name.is_empty() {
            default_activity_name(state.sport_type, now)
        } else {
            name.to_string()
        };

        let distance = state.total_distance_meters();
        let duration = state.elapsed_seconds;

        let activity = Activity {
            id: generate_activity_id(),
            user_id: user_id.to_string(),
            name,
            start_date: now,
            total_distance_meters: distance,
            total_duration_seconds: duration,
            segments: state.track.segments().to_vec(),
            flattened_coordinates: state.track.flattened(),
            average_speed_kph: average_speed_kph(distance, duration),
            sport_type: state.sport_type,
        };

        self.history.prepend(&activity)?;
        if let Err(e) = self.persister.clear_snapshot() {
            tracing::warn!(error = %e, "Activity saved but snapshot could not be cleared");
        }

        tracing::info!(
            id = %activity.id,
            distance_m = activity.total_distance_meters,
            duration_s = activity.total_duration_seconds,
            "Activity finalized"
        );
        Ok(activity)
    }

    /// Throw the recording away without writing an activity
    pub fn discard(&self) -> Result<()> {
        self.persister.clear_snapshot()
    }
}

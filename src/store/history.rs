// src/store/history.rs
//! Finalized activity history, newest first

use super::{SharedStore, ACTIVITIES_KEY};
use crate::activity::Activity;
use crate::error::{RecorderError, Result};

#[derive(Clone)]
pub struct ActivityHistory {
    store: SharedStore,
}

impl ActivityHistory {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Load the full history. Undecodable data is an error so that callers
    /// about to write never overwrite it.
    pub fn load(&self) -> Result<Vec<Activity>> {
        let Some(bytes) = self.store.get(ACTIVITIES_KEY)? else {
            return Ok(Vec::new());
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| RecorderError::Storage(format!("Activity history is unreadable: {}", e)))
    }

    /// Best-effort read for display
    pub fn list(&self) -> Vec<Activity> {
        self.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load activity history");
            Vec::new()
        })
    }

    pub fn for_user(&self, user_id: &str) -> Vec<Activity> {
        self.list()
            .into_iter()
            .filter(|a| a.user_id == user_id)
            .collect()
    }

    pub fn find(&self, id: &str) -> Result<Option<Activity>> {
        Ok(self.load()?.into_iter().find(|a| a.id == id))
    }

    /// Insert at the front (most recent first)
    pub fn prepend(&self, activity: &Activity) -> Result<()> {
        let mut activities = self.load()?;
        activities.insert(0, activity.clone());
        self.save(&activities)
    }

    /// Change the user-editable name of a stored activity
    pub fn rename(&self, id: &str, name: &str) -> Result<Activity> {
        let mut activities = self.load()?;
        let activity = activities
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| RecorderError::NotFound(format!("activity {}", id)))?;
        activity.name = name.to_string();
        let renamed = activity.clone();
        self.save(&activities)?;
        Ok(renamed)
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(ACTIVITIES_KEY)
    }

    fn save(&self, activities: &[Activity]) -> Result<()> {
        let bytes = serde_json::to_vec(activities)?;
        self.store.set(ACTIVITIES_KEY, &bytes)
    }
}

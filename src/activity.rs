// src/activity.rs
//! Finalized activity records

use crate::gps::Coordinate;
use crate::recording::segment::{Segment, SegmentKind};
use crate::recording::state::{format_duration, SportType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A completed recording. Only `name` may change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    pub name: String,
    #[serde(rename = "date")]
    pub start_date: DateTime<Utc>,
    #[serde(rename = "distance")]
    pub total_distance_meters: f64,
    #[serde(rename = "duration")]
    pub total_duration_seconds: u64,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(rename = "coordinates", default)]
    pub flattened_coordinates: Vec<Coordinate>,
    #[serde(rename = "avgSpeed", default)]
    pub average_speed_kph: f64,
    #[serde(default)]
    pub sport_type: SportType,
}

impl Activity {
    /// Segments to draw. Records written before segments were tracked only
    /// carry the flat trace, shown as a single run.
    pub fn display_segments(&self) -> Vec<Segment> {
        if self.segments.is_empty() && !self.flattened_coordinates.is_empty() {
            return vec![Segment {
                kind: SegmentKind::Run,
                coordinates: self.flattened_coordinates.clone(),
            }];
        }
        self.segments.clone()
    }

    pub fn distance_km(&self) -> f64 {
        self.total_distance_meters / 1000.0
    }

    pub fn format_duration(&self) -> String {
        format_duration(self.total_duration_seconds)
    }

    /// One-line summary for listings
    pub fn summary(&self) -> String {
        format!(
            "{}  {:<24} {:>5} {:>8.2} km {:>12} {:>6.1} km/h",
            self.start_date.format("%Y-%m-%d %H:%M"),
            self.name,
            self.sport_type,
            self.distance_km(),
            self.format_duration(),
            self.average_speed_kph
        )
    }
}

/// Fresh identifier, unique within and across processes
pub fn generate_activity_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("activity-{}-{}-{}", nanos, std::process::id(), seq)
}

/// Name used when the user leaves it blank
pub fn default_activity_name(sport_type: SportType, at: DateTime<Utc>) -> String {
    format!("{} {}", sport_type.display_name(), at.format("%Y-%m-%d %H:%M"))
}

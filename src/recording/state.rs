// src/recording/state.rs
//! In-progress recording state and lifecycle phases

use super::segment::{SegmentAccumulator, SegmentKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SportType {
    #[default]
    Run,
    Bike,
    Walk,
}

impl SportType {
    pub fn display_name(&self) -> &'static str {
        match self {
            SportType::Run => "Run",
            SportType::Bike => "Ride",
            SportType::Walk => "Walk",
        }
    }
}

impl fmt::Display for SportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SportType::Run => "run",
            SportType::Bike => "bike",
            SportType::Walk => "walk",
        };
        f.pad(name)
    }
}

impl FromStr for SportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "run" => Ok(SportType::Run),
            "bike" | "ride" => Ok(SportType::Bike),
            "walk" => Ok(SportType::Walk),
            other => Err(format!("unknown sport type '{}'", other)),
        }
    }
}

/// Lifecycle phase of the recording state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Recording,
    Paused,
    Stopped,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Recording => "recording",
            Phase::Paused => "paused",
            Phase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// The in-progress activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingState {
    #[serde(flatten)]
    pub track: SegmentAccumulator,
    pub elapsed_seconds: u64,
    pub paused: bool,
    /// Stopped and waiting to be finalized or discarded
    #[serde(default)]
    pub stopped: bool,
    pub sport_type: SportType,
}

impl RecordingState {
    /// Fresh state for a new recording: one empty run segment
    pub fn start(sport_type: SportType) -> Self {
        let mut track = SegmentAccumulator::new();
        track.open_segment(SegmentKind::Run, None);
        Self {
            track,
            elapsed_seconds: 0,
            paused: false,
            stopped: false,
            sport_type,
        }
    }

    pub fn total_distance_meters(&self) -> f64 {
        self.track.total_distance_meters()
    }

    /// Check the structural invariants a restored state must satisfy: an
    /// open segment whose kind matches `paused`, a usable distance total and
    /// valid coordinates.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        let Some(open) = self.track.open() else {
            return Err("no open segment".to_string());
        };
        let expected = if self.paused {
            SegmentKind::Pause
        } else {
            SegmentKind::Run
        };
        if open.kind != expected {
            return Err(format!(
                "open segment is {:?} but paused is {}",
                open.kind, self.paused
            ));
        }

        let distance = self.total_distance_meters();
        if !distance.is_finite() || distance < 0.0 {
            return Err(format!("invalid distance total {}", distance));
        }
        if self
            .track
            .segments()
            .iter()
            .flat_map(|s| s.coordinates.iter())
            .any(|c| !c.is_valid())
        {
            return Err("invalid coordinate".to_string());
        }
        Ok(())
    }
}

/// Average speed in km/h; zero when no time has elapsed
pub fn average_speed_kph(distance_meters: f64, duration_seconds: u64) -> f64 {
    if duration_seconds == 0 {
        return 0.0;
    }
    (distance_meters / 1000.0) / (duration_seconds as f64 / 3600.0)
}

/// Format a duration in seconds as `1h 2m 3s` / `2m 3s` / `3s`
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_state() {
        let state = RecordingState::start(SportType::Bike);
        assert_eq!(state.track.segments().len(), 1);
        assert_eq!(state.track.segments()[0].kind, SegmentKind::Run);
        assert!(state.track.segments()[0].coordinates.is_empty());
        assert_eq!(state.elapsed_seconds, 0);
        assert!(!state.paused);
    }

    #[test]
    fn test_consistency_checks() {
        let mut state = RecordingState::start(SportType::Run);
        assert!(state.check_consistency().is_ok());

        state.paused = true;
        assert!(state.check_consistency().is_err());

        state.track.open_segment(SegmentKind::Pause, None);
        assert!(state.check_consistency().is_ok());

        let empty = RecordingState {
            track: SegmentAccumulator::new(),
            ..RecordingState::start(SportType::Run)
        };
        assert!(empty.check_consistency().is_err());
    }

    #[test]
    fn test_average_speed() {
        assert!((average_speed_kph(40.0, 5) - 28.8).abs() < 1e-9);
        assert_eq!(average_speed_kph(1000.0, 0), 0.0);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(5), "5s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3725), "1h 2m 5s");
    }

    #[test]
    fn test_sport_type_parsing() {
        assert_eq!("Bike".parse::<SportType>(), Ok(SportType::Bike));
        assert_eq!("walk".parse::<SportType>(), Ok(SportType::Walk));
        assert!("swim".parse::<SportType>().is_err());
        assert_eq!(serde_json::to_string(&SportType::Run).unwrap(), "\"run\"");
    }

    #[test]
    fn test_state_wire_format() {
        let state = RecordingState::start(SportType::Walk);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["sportType"], "walk");
        assert_eq!(json["elapsedSeconds"], 0);
        assert_eq!(json["totalDistanceMeters"], 0.0);
        assert!(json["segments"].is_array());
    }
}

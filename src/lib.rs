// src/lib.rs
//! Activity Recorder Library
//!
//! Records GPS activities from a stream of location fixes: jitter and jump
//! filtering, run/pause segments, crash recovery from a persisted snapshot
//! and a local history of finalized activities.

pub mod activity;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod gps;
pub mod recording;
pub mod store;

// Re-export main types for convenience
pub use activity::Activity;
pub use config::RecorderConfig;
pub use engine::{Command, CommandOutcome, EngineHandle, RecordingEngine};
pub use error::{RecorderError, Result};
pub use gps::{Coordinate, FixSource, LocationFix};
pub use recording::{Phase, RecordingView, SportType};

// src/recording/machine.rs
//! Recording lifecycle: start, pause, resume, stop, finalize, discard

use super::filter::FixFilter;
use super::finalize::ActivityFinalizer;
use super::segment::{IngestOutcome, SegmentKind, SpeedGauge};
use super::snapshot::SnapshotPersister;
use super::state::{average_speed_kph, Phase, RecordingState, SportType};
use crate::activity::Activity;
use crate::error::{RecorderError, Result};
use crate::gps::{Coordinate, LocationFix};

/// Read-only picture of the recording for UI layers
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingView {
    pub phase: Phase,
    pub sport_type: Option<SportType>,
    pub total_distance_meters: f64,
    pub elapsed_seconds: u64,
    pub current_speed_kph: f64,
    pub average_speed_kph: f64,
    pub segment_count: usize,
    pub point_count: usize,
    pub last_coordinate: Option<Coordinate>,
}

/// Sole owner and writer of the in-progress [`RecordingState`].
///
/// User commands issued from the wrong phase fail with
/// [`RecorderError::InvalidTransition`] and change nothing. Stream events
/// (fixes, ticks) outside their phase are ignored. `discard` is idempotent.
pub struct RecordingStateMachine {
    phase: Phase,
    state: Option<RecordingState>,
    filter: FixFilter,
    speed: SpeedGauge,
    persister: SnapshotPersister,
    finalizer: ActivityFinalizer,
    user_id: String,
}

impl RecordingStateMachine {
    pub fn new(
        filter: FixFilter,
        persister: SnapshotPersister,
        finalizer: ActivityFinalizer,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            phase: Phase::Idle,
            state: None,
            filter,
            speed: SpeedGauge::default(),
            persister,
            finalizer,
            user_id: user_id.into(),
        }
    }

    /// Restore an interrupted recording, if one was persisted. The machine
    /// resumes straight into Recording, Paused or Stopped without asking.
    pub fn init(&mut self) -> Phase {
        if self.phase != Phase::Idle {
            return self.phase;
        }

        if let Some(snapshot) = self.persister.load_snapshot() {
            let state = snapshot.state;
            self.phase = if state.stopped {
                Phase::Stopped
            } else if state.paused {
                Phase::Paused
            } else {
                Phase::Recording
            };
            tracing::info!(
                phase = %self.phase,
                distance_m = state.total_distance_meters(),
                elapsed_s = state.elapsed_seconds,
                captured_at = %snapshot.captured_at,
                "Recovered interrupted recording"
            );
            self.state = Some(state);
        }
        self.phase
    }

    pub fn start(&mut self, sport_type: SportType) -> Result<()> {
        self.require("start", &[Phase::Idle])?;

        self.state = Some(RecordingState::start(sport_type));
        self.speed.reset();
        self.phase = Phase::Recording;
        tracing::info!(sport = %sport_type, "Recording started");
        self.persist();
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.require("pause", &[Phase::Recording])?;

        if let Some(state) = self.state.as_mut() {
            let seed = state.track.last_coordinate();
            state.track.open_segment(SegmentKind::Pause, seed);
            state.paused = true;
        }
        self.phase = Phase::Paused;
        tracing::info!("Recording paused");
        self.persist();
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.require("resume", &[Phase::Paused])?;

        if let Some(state) = self.state.as_mut() {
            let seed = state.track.last_coordinate();
            state.track.open_segment(SegmentKind::Run, seed);
            state.paused = false;
        }
        self.phase = Phase::Recording;
        tracing::info!("Recording resumed");
        self.persist();
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.require("stop", &[Phase::Recording, Phase::Paused])?;

        if let Some(state) = self.state.as_mut() {
            state.stopped = true;
        }
        self.phase = Phase::Stopped;
        tracing::info!(
            distance_m = self.total_distance_meters(),
            elapsed_s = self.elapsed_seconds(),
            "Recording stopped"
        );
        self.persist();
        Ok(())
    }

    /// Seal the stopped recording. On failure the machine stays Stopped and
    /// the snapshot is kept.
    pub fn finalize(&mut self, name: &str) -> Result<Activity> {
        self.require("finalize", &[Phase::Stopped])?;

        let state = self
            .state
            .as_ref()
            .ok_or_else(|| RecorderError::Other("stopped without recording state".to_string()))?;
        let activity = self.finalizer.finalize(state, name, &self.user_id)?;

        self.state = None;
        self.phase = Phase::Idle;
        Ok(activity)
    }

    /// Drop the current recording. A no-op when nothing is recording.
    pub fn discard(&mut self) -> Result<()> {
        if self.phase == Phase::Idle {
            return Ok(());
        }

        if let Err(e) = self.finalizer.discard() {
            tracing::warn!(error = %e, "Failed to clear snapshot on discard");
        }
        self.state = None;
        self.phase = Phase::Idle;
        self.speed.reset();
        tracing::info!("Recording discarded");
        Ok(())
    }

    /// Feed one fix. Only a Recording machine records it; display speed is
    /// updated while Recording or Paused.
    pub fn ingest_fix(&mut self, fix: &LocationFix) -> IngestOutcome {
        if matches!(self.phase, Phase::Recording | Phase::Paused) {
            self.speed.current_speed_kph(fix);
        }
        if self.phase != Phase::Recording {
            return IngestOutcome::NotRecording;
        }

        let Some(state) = self.state.as_mut() else {
            return IngestOutcome::NotRecording;
        };
        let outcome = state.track.ingest(fix, &self.filter);
        match outcome {
            IngestOutcome::Kept { delta_meters } => {
                tracing::trace!(delta_m = delta_meters, "Fix kept");
                self.persist();
            }
            IngestOutcome::Dropped(decision) => {
                tracing::debug!(?decision, "Fix dropped");
            }
            IngestOutcome::NotRecording => {}
        }
        outcome
    }

    /// One second of wall-clock time. Counts only while Recording.
    pub fn tick(&mut self) -> bool {
        if self.phase != Phase::Recording {
            return false;
        }
        let Some(state) = self.state.as_mut() else {
            return false;
        };
        state.elapsed_seconds += 1;
        self.persist();
        true
    }

    /// The location source reported a problem. Recording carries on with a
    /// stale position and a frozen speed display.
    pub fn source_error(&mut self, message: &str) {
        tracing::warn!(phase = %self.phase, error = message, "Location source error");
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> Option<&RecordingState> {
        self.state.as_ref()
    }

    pub fn filter(&self) -> &FixFilter {
        &self.filter
    }

    pub fn history(&self) -> &crate::store::ActivityHistory {
        self.finalizer.history()
    }

    pub fn total_distance_meters(&self) -> f64 {
        self.state
            .as_ref()
            .map_or(0.0, |s| s.total_distance_meters())
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.elapsed_seconds)
    }

    pub fn view(&self) -> RecordingView {
        let distance = self.total_distance_meters();
        let elapsed = self.elapsed_seconds();
        RecordingView {
            phase: self.phase,
            sport_type: self.state.as_ref().map(|s| s.sport_type),
            total_distance_meters: distance,
            elapsed_seconds: elapsed,
            current_speed_kph: self.speed.kph(),
            average_speed_kph: average_speed_kph(distance, elapsed),
            segment_count: self.state.as_ref().map_or(0, |s| s.track.segments().len()),
            point_count: self.state.as_ref().map_or(0, |s| s.track.point_count()),
            last_coordinate: self.state.as_ref().and_then(|s| s.track.last_coordinate()),
        }
    }

    fn require(&self, operation: &'static str, allowed: &[Phase]) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(RecorderError::InvalidTransition {
                operation,
                state: self.phase.as_str(),
            })
        }
    }

    /// Write the snapshot; failures never roll back the in-memory state
    fn persist(&self) {
        if let Some(state) = &self.state {
            if let Err(e) = self.persister.persist(state) {
                tracing::warn!(error = %e, "Failed to persist recording snapshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::segment::{Segment, SegmentAccumulator};
    use crate::store::{ActivityHistory, KeyValueStore, MemoryStore, SNAPSHOT_KEY};
    use chrono::Utc;
    use std::sync::Arc;

    fn origin() -> Coordinate {
        Coordinate::new(47.4736, -0.5516)
    }

    fn machine_over(store: Arc<MemoryStore>) -> RecordingStateMachine {
        let persister = SnapshotPersister::new(store.clone());
        let finalizer = ActivityFinalizer::new(ActivityHistory::new(store), persister.clone());
        RecordingStateMachine::new(FixFilter::default(), persister, finalizer, "alice")
    }

    fn fix_north(meters: f64) -> LocationFix {
        LocationFix::at(origin().offset_north(meters), Utc::now())
    }

    #[test]
    fn test_morning_run_scenario() {
        let store = Arc::new(MemoryStore::new());
        let mut machine = machine_over(store.clone());
        machine.init();
        machine.start(SportType::Run).unwrap();

        for i in 0..5 {
            machine.ingest_fix(&fix_north(10.0 * i as f64));
            assert!(machine.tick());
        }
        machine.stop().unwrap();
        let activity = machine.finalize("Morning").unwrap();

        assert!((activity.total_distance_meters - 40.0).abs() < 1e-6);
        assert_eq!(activity.total_duration_seconds, 5);
        assert!((activity.average_speed_kph - 28.8).abs() < 1e-6);
        assert_eq!(activity.name, "Morning");
        assert_eq!(activity.flattened_coordinates.len(), 5);
        assert_eq!(machine.phase(), Phase::Idle);
        assert!(!store.contains(SNAPSHOT_KEY));
    }

    #[test]
    fn test_no_ticks_counted_while_idle_or_paused() {
        let mut machine = machine_over(Arc::new(MemoryStore::new()));
        assert!(!machine.tick());
        assert_eq!(machine.elapsed_seconds(), 0);

        machine.start(SportType::Walk).unwrap();
        machine.tick();
        machine.pause().unwrap();
        for _ in 0..10 {
            assert!(!machine.tick());
        }
        assert_eq!(machine.elapsed_seconds(), 1);

        machine.resume().unwrap();
        machine.tick();
        assert_eq!(machine.elapsed_seconds(), 2);

        machine.stop().unwrap();
        assert!(!machine.tick());
        assert_eq!(machine.elapsed_seconds(), 2);
    }

    #[test]
    fn test_pause_resume_without_fixes() {
        let mut machine = machine_over(Arc::new(MemoryStore::new()));
        machine.start(SportType::Run).unwrap();
        machine.ingest_fix(&fix_north(0.0));
        machine.ingest_fix(&fix_north(10.0));
        machine.tick();
        let distance = machine.total_distance_meters();

        machine.pause().unwrap();
        machine.resume().unwrap();

        let state = machine.state().unwrap();
        assert_eq!(state.total_distance_meters(), distance);
        assert_eq!(state.elapsed_seconds, 1);
        let segments = state.track.segments();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].kind, SegmentKind::Pause);
        assert_eq!(segments[1].coordinates, vec![origin().offset_north(10.0)]);
        assert_eq!(segments[2].kind, SegmentKind::Run);
        assert_eq!(segments[2].coordinates, vec![origin().offset_north(10.0)]);
    }

    #[test]
    fn test_pause_before_any_fix_opens_empty_segments() {
        let mut machine = machine_over(Arc::new(MemoryStore::new()));
        machine.start(SportType::Run).unwrap();
        machine.pause().unwrap();
        machine.resume().unwrap();

        let segments = machine.state().unwrap().track.segments();
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| s.coordinates.is_empty()));
    }

    #[test]
    fn test_fixes_while_paused_are_not_recorded() {
        let mut machine = machine_over(Arc::new(MemoryStore::new()));
        machine.start(SportType::Run).unwrap();
        machine.ingest_fix(&fix_north(0.0));
        machine.pause().unwrap();

        let outcome = machine.ingest_fix(&fix_north(20.0).with_speed(4.0));

        assert_eq!(outcome, IngestOutcome::NotRecording);
        assert_eq!(machine.total_distance_meters(), 0.0);
        assert_eq!(machine.view().point_count, 2);
        // Display speed still follows the receiver
        assert!((machine.view().current_speed_kph - 14.4).abs() < 1e-9);
    }

    #[test]
    fn test_resume_measures_from_pause_seed() {
        let mut machine = machine_over(Arc::new(MemoryStore::new()));
        machine.start(SportType::Run).unwrap();
        machine.ingest_fix(&fix_north(0.0));
        machine.pause().unwrap();
        machine.resume().unwrap();

        let outcome = machine.ingest_fix(&fix_north(25.0));
        assert!(outcome.mutated());
        assert!((machine.total_distance_meters() - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_nan_fix_leaves_distance_untouched() {
        let mut machine = machine_over(Arc::new(MemoryStore::new()));
        machine.start(SportType::Run).unwrap();
        machine.ingest_fix(&fix_north(0.0));
        machine.ingest_fix(&fix_north(10.0));

        let bad = LocationFix::new(f64::NAN, origin().longitude, None);
        assert!(!machine.ingest_fix(&bad).mutated());

        assert!((machine.total_distance_meters() - 10.0).abs() < 1e-6);
        assert_eq!(machine.view().point_count, 2);
        assert_eq!(machine.view().last_coordinate, Some(origin().offset_north(10.0)));

        // Tracking continues from the last good point
        machine.ingest_fix(&fix_north(20.0));
        assert!((machine.total_distance_meters() - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_transitions_are_rejected_without_mutation() {
        let store = Arc::new(MemoryStore::new());
        let mut machine = machine_over(store.clone());

        assert!(matches!(
            machine.pause(),
            Err(RecorderError::InvalidTransition { operation: "pause", state: "idle" })
        ));
        assert!(machine.resume().is_err());
        assert!(machine.stop().is_err());
        assert!(machine.finalize("x").is_err());
        assert_eq!(machine.phase(), Phase::Idle);
        assert!(!store.contains(SNAPSHOT_KEY));

        machine.start(SportType::Run).unwrap();
        assert!(machine.start(SportType::Bike).is_err());
        assert!(machine.resume().is_err());
        assert_eq!(machine.state().unwrap().sport_type, SportType::Run);
        assert_eq!(machine.state().unwrap().track.segments().len(), 1);

        machine.stop().unwrap();
        assert!(machine.pause().is_err());
        assert!(machine.stop().is_err());
        assert_eq!(machine.ingest_fix(&fix_north(0.0)), IngestOutcome::NotRecording);
    }

    #[test]
    fn test_discard_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let mut machine = machine_over(store.clone());
        machine.start(SportType::Run).unwrap();
        machine.ingest_fix(&fix_north(0.0));
        assert!(store.contains(SNAPSHOT_KEY));

        machine.discard().unwrap();
        machine.discard().unwrap();

        assert_eq!(machine.phase(), Phase::Idle);
        assert!(machine.state().is_none());
        assert!(!store.contains(SNAPSHOT_KEY));
        assert!(machine.history().load().unwrap().is_empty());
    }

    #[test]
    fn test_discard_mid_recording() {
        let mut machine = machine_over(Arc::new(MemoryStore::new()));
        machine.start(SportType::Run).unwrap();
        machine.pause().unwrap();
        machine.discard().unwrap();

        assert_eq!(machine.phase(), Phase::Idle);
        machine.start(SportType::Walk).unwrap();
        assert_eq!(machine.state().unwrap().track.segments().len(), 1);
    }

    #[test]
    fn test_crash_recovery_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let start = origin();
        let first_end = start.offset_north(50.0);
        let second_end = first_end.offset_north(70.0);
        let segments = vec![
            Segment {
                kind: SegmentKind::Run,
                coordinates: vec![start, first_end],
            },
            Segment {
                kind: SegmentKind::Pause,
                coordinates: vec![first_end],
            },
            Segment {
                kind: SegmentKind::Run,
                coordinates: vec![first_end, second_end],
            },
        ];
        let state = RecordingState {
            track: SegmentAccumulator::from_parts(segments.clone(), 120.0),
            elapsed_seconds: 120,
            paused: false,
            stopped: false,
            sport_type: SportType::Run,
        };
        SnapshotPersister::new(store.clone()).persist(&state).unwrap();

        // New process
        let mut machine = machine_over(store);
        assert_eq!(machine.init(), Phase::Recording);

        let restored = machine.state().unwrap();
        assert_eq!(restored.track.segments(), segments.as_slice());
        assert_eq!(restored.total_distance_meters(), 120.0);
        assert_eq!(restored.elapsed_seconds, 120);

        // Accepting fixes immediately
        let outcome = machine.ingest_fix(&LocationFix::at(second_end.offset_north(10.0), Utc::now()));
        assert!(outcome.mutated());
        assert!((machine.total_distance_meters() - 130.0).abs() < 1e-6);
        assert!(machine.tick());
        assert_eq!(machine.elapsed_seconds(), 121);
    }

    #[test]
    fn test_recovery_into_paused() {
        let store = Arc::new(MemoryStore::new());
        {
            let mut machine = machine_over(store.clone());
            machine.start(SportType::Bike).unwrap();
            machine.ingest_fix(&fix_north(0.0));
            machine.pause().unwrap();
        }

        let mut machine = machine_over(store);
        assert_eq!(machine.init(), Phase::Paused);
        assert!(!machine.tick());
        machine.resume().unwrap();
        assert_eq!(machine.state().unwrap().sport_type, SportType::Bike);
    }

    #[test]
    fn test_recovery_after_stop_stays_stopped() {
        let store = Arc::new(MemoryStore::new());
        {
            let mut machine = machine_over(store.clone());
            machine.start(SportType::Run).unwrap();
            machine.ingest_fix(&fix_north(0.0));
            machine.ingest_fix(&fix_north(15.0));
            machine.tick();
            machine.tick();
            machine.stop().unwrap();
        }

        let mut machine = machine_over(store.clone());
        assert_eq!(machine.init(), Phase::Stopped);
        assert!(!machine.tick());
        assert_eq!(machine.elapsed_seconds(), 2);
        assert_eq!(machine.ingest_fix(&fix_north(30.0)), IngestOutcome::NotRecording);

        let activity = machine.finalize("").unwrap();
        assert!((activity.total_distance_meters - 15.0).abs() < 1e-6);
        assert_eq!(activity.total_duration_seconds, 2);
        assert!(!store.contains(SNAPSHOT_KEY));
    }

    #[test]
    fn test_inconsistent_snapshot_starts_idle() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                SNAPSHOT_KEY,
                br#"{"segments":[],"totalDistanceMeters":0.0,"elapsedSeconds":12,"paused":false,"sportType":"run","capturedAt":"2024-05-01T08:00:00Z"}"#,
            )
            .unwrap();

        let mut machine = machine_over(store);
        assert_eq!(machine.init(), Phase::Idle);
        assert!(!machine.tick());
        machine.start(SportType::Run).unwrap();
        assert!(machine.ingest_fix(&fix_north(0.0)).mutated());
    }

    #[test]
    fn test_corrupt_snapshot_starts_idle() {
        let store = Arc::new(MemoryStore::new());
        store.set(SNAPSHOT_KEY, b"\x00\x01garbage").unwrap();

        let mut machine = machine_over(store);
        assert_eq!(machine.init(), Phase::Idle);
        machine.start(SportType::Run).unwrap();
    }

    #[test]
    fn test_every_tick_is_persisted() {
        let store = Arc::new(MemoryStore::new());
        let mut machine = machine_over(store.clone());
        machine.start(SportType::Run).unwrap();
        machine.tick();
        machine.tick();

        let persister = SnapshotPersister::new(store);
        assert_eq!(persister.load_snapshot().unwrap().state.elapsed_seconds, 2);
    }
}

// src/recording/segment.rs
//! Run/pause segments and running distance

use super::filter::{Decision, FixFilter};
use crate::gps::{Coordinate, LocationFix};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Run,
    Pause,
}

/// A contiguous span of moving or paused time with its own trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    pub coordinates: Vec<Coordinate>,
}

impl Segment {
    pub fn new(kind: SegmentKind, seed: Option<Coordinate>) -> Self {
        Self {
            kind,
            coordinates: seed.into_iter().collect(),
        }
    }

    pub fn last_coordinate(&self) -> Option<&Coordinate> {
        self.coordinates.last()
    }

    /// Length of the trace in meters
    pub fn length_meters(&self) -> f64 {
        self.coordinates
            .windows(2)
            .map(|pair| pair[0].distance_to(&pair[1]))
            .sum()
    }
}

/// What happened to a fix handed to [`SegmentAccumulator::ingest`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    /// Appended to the open run segment
    Kept { delta_meters: f64 },
    /// Rejected by the filter; nothing changed
    Dropped(Decision),
    /// The open segment is a pause (or there is none); nothing recorded
    NotRecording,
}

impl IngestOutcome {
    pub fn mutated(&self) -> bool {
        matches!(self, IngestOutcome::Kept { .. })
    }
}

/// Ordered segments of one recording plus the filtered distance total.
/// The last segment is the open one; earlier segments are never touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentAccumulator {
    segments: Vec<Segment>,
    total_distance_meters: f64,
}

impl SegmentAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted parts
    pub fn from_parts(segments: Vec<Segment>, total_distance_meters: f64) -> Self {
        Self {
            segments,
            total_distance_meters: total_distance_meters.max(0.0),
        }
    }

    /// Append a new segment, optionally seeded for continuity
    pub fn open_segment(&mut self, kind: SegmentKind, seed: Option<Coordinate>) {
        self.segments.push(Segment::new(kind, seed));
    }

    /// Feed one fix into the open run segment
    pub fn ingest(&mut self, fix: &LocationFix, filter: &FixFilter) -> IngestOutcome {
        let Some(open) = self.segments.last_mut() else {
            return IngestOutcome::NotRecording;
        };
        if open.kind != SegmentKind::Run {
            return IngestOutcome::NotRecording;
        }

        let candidate = fix.coordinate();
        match filter.accept(&candidate, open.last_coordinate()) {
            Decision::Keep { delta_meters } => {
                open.coordinates.push(candidate);
                self.total_distance_meters += delta_meters;
                IngestOutcome::Kept { delta_meters }
            }
            dropped => IngestOutcome::Dropped(dropped),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn open(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn last_coordinate(&self) -> Option<Coordinate> {
        self.open().and_then(|s| s.last_coordinate()).copied()
    }

    pub fn total_distance_meters(&self) -> f64 {
        self.total_distance_meters
    }

    pub fn point_count(&self) -> usize {
        self.segments.iter().map(|s| s.coordinates.len()).sum()
    }

    /// All coordinates in segment order, then point order
    pub fn flattened(&self) -> Vec<Coordinate> {
        self.segments
            .iter()
            .flat_map(|s| s.coordinates.iter().copied())
            .collect()
    }
}

/// Display-only instantaneous speed. Held at its last value when a fix has
/// no usable speed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeedGauge {
    kph: f64,
}

impl SpeedGauge {
    pub fn current_speed_kph(&mut self, fix: &LocationFix) -> f64 {
        if let Some(kph) = fix.speed_kph() {
            self.kph = kph;
        }
        self.kph
    }

    pub fn kph(&self) -> f64 {
        self.kph
    }

    pub fn reset(&mut self) {
        self.kph = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Coordinate {
        Coordinate::new(47.4736, -0.5516)
    }

    fn fix(coordinate: Coordinate) -> LocationFix {
        LocationFix::at(coordinate, chrono::Utc::now())
    }

    #[test]
    fn test_first_point_seeds_without_distance() {
        let mut acc = SegmentAccumulator::new();
        acc.open_segment(SegmentKind::Run, None);

        let outcome = acc.ingest(&fix(origin()), &FixFilter::default());

        assert_eq!(outcome, IngestOutcome::Kept { delta_meters: 0.0 });
        assert_eq!(acc.point_count(), 1);
        assert_eq!(acc.total_distance_meters(), 0.0);
    }

    #[test]
    fn test_jitter_leaves_distance_unchanged() {
        let filter = FixFilter::default();
        let mut acc = SegmentAccumulator::new();
        acc.open_segment(SegmentKind::Run, None);
        acc.ingest(&fix(origin()), &filter);

        for step in [0.5, 1.0, 1.5, 2.0, 2.5] {
            let outcome = acc.ingest(&fix(origin().offset_north(step)), &filter);
            assert!(!outcome.mutated());
        }

        assert_eq!(acc.total_distance_meters(), 0.0);
        assert_eq!(acc.point_count(), 1);
    }

    #[test]
    fn test_jump_does_not_become_reference() {
        let filter = FixFilter::default();
        let mut acc = SegmentAccumulator::new();
        acc.open_segment(SegmentKind::Run, None);
        acc.ingest(&fix(origin()), &filter);

        let teleport = acc.ingest(&fix(origin().offset_north(500.0)), &filter);
        assert!(matches!(teleport, IngestOutcome::Dropped(_)));

        // Measured against the origin, not against the teleport
        let good = acc.ingest(&fix(origin().offset_north(20.0)), &filter);
        match good {
            IngestOutcome::Kept { delta_meters } => assert!((delta_meters - 20.0).abs() < 1e-6),
            other => panic!("expected keep, got {:?}", other),
        }
        assert_eq!(acc.last_coordinate(), Some(origin().offset_north(20.0)));
    }

    #[test]
    fn test_pause_segment_records_nothing() {
        let filter = FixFilter::default();
        let mut acc = SegmentAccumulator::new();
        acc.open_segment(SegmentKind::Run, None);
        acc.ingest(&fix(origin()), &filter);
        acc.open_segment(SegmentKind::Pause, acc.last_coordinate());

        let outcome = acc.ingest(&fix(origin().offset_north(30.0)), &filter);

        assert_eq!(outcome, IngestOutcome::NotRecording);
        assert_eq!(acc.segments()[1].coordinates, vec![origin()]);
        assert_eq!(acc.total_distance_meters(), 0.0);
    }

    #[test]
    fn test_flattening_preserves_order_and_count() {
        let filter = FixFilter::default();
        let mut acc = SegmentAccumulator::new();
        acc.open_segment(SegmentKind::Run, None);
        for i in 0..3 {
            acc.ingest(&fix(origin().offset_north(10.0 * i as f64)), &filter);
        }
        acc.open_segment(SegmentKind::Pause, acc.last_coordinate());
        acc.open_segment(SegmentKind::Run, acc.last_coordinate());
        acc.ingest(&fix(origin().offset_north(40.0)), &filter);

        let flat = acc.flattened();
        let expected: usize = acc.segments().iter().map(|s| s.coordinates.len()).sum();
        assert_eq!(flat.len(), expected);
        assert_eq!(flat.len(), 6);
        assert_eq!(flat[0], origin());
        assert_eq!(flat[5], origin().offset_north(40.0));
        assert!((acc.total_distance_meters() - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_segment_serializes_with_type_field() {
        let segment = Segment::new(SegmentKind::Pause, Some(origin()));
        let json = serde_json::to_value(&segment).unwrap();
        assert_eq!(json["type"], "pause");
        assert_eq!(json["coordinates"][0]["latitude"], 47.4736);
    }

    #[test]
    fn test_speed_gauge_holds_last_value() {
        let mut gauge = SpeedGauge::default();
        assert_eq!(gauge.current_speed_kph(&fix(origin()).with_speed(3.0)), 3.0 * 3.6);
        assert_eq!(gauge.current_speed_kph(&fix(origin())), 3.0 * 3.6);
        assert_eq!(gauge.current_speed_kph(&fix(origin()).with_speed(-1.0)), 3.0 * 3.6);
    }
}

// src/recording/mod.rs
//! Activity recording: fix filtering, segments, lifecycle, snapshots and
//! finalization

pub mod filter;
pub mod finalize;
pub mod machine;
pub mod segment;
pub mod snapshot;
pub mod state;

pub use filter::{Decision, DropReason, FixFilter};
pub use finalize::ActivityFinalizer;
pub use machine::{RecordingStateMachine, RecordingView};
pub use segment::{IngestOutcome, Segment, SegmentAccumulator, SegmentKind};
pub use snapshot::{ActivitySnapshot, SnapshotPersister};
pub use state::{Phase, RecordingState, SportType};

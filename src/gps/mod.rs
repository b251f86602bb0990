// src/gps/mod.rs
//! Location fix sources and parsing

pub mod fix;
pub mod gpsd;
pub mod nmea;
pub mod source;

pub use fix::{Coordinate, LocationFix};
pub use source::{FixSource, SourceEvent, Subscription, SubscriptionOptions};

// src/gps/fix.rs
//! Location fix and coordinate types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A single latitude/longitude pair on a recorded track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to another coordinate in meters (haversine)
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2)
            + self.latitude.to_radians().cos()
                * other.latitude.to_radians().cos()
                * (d_lon / 2.0).sin().powi(2);

        EARTH_RADIUS_M * 2.0 * a.sqrt().asin()
    }

    /// Coordinate reached by moving `meters` due north
    pub fn offset_north(&self, meters: f64) -> Coordinate {
        let d_lat = (meters / EARTH_RADIUS_M).to_degrees();
        Coordinate::new(self.latitude + d_lat, self.longitude)
    }

    /// Check that the coordinate lies within WGS84 bounds
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// One timestamped position sample delivered by a fix source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, rename = "speed")]
    pub speed_mps: Option<f64>, // m/s, as reported by the receiver
    pub timestamp: DateTime<Utc>,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, speed_mps: Option<f64>) -> Self {
        Self {
            latitude,
            longitude,
            speed_mps,
            timestamp: Utc::now(),
        }
    }

    pub fn at(coordinate: Coordinate, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            speed_mps: None,
            timestamp,
        }
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Instantaneous speed in km/h, if the receiver reported a usable one
    pub fn speed_kph(&self) -> Option<f64> {
        self.speed_mps
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(|s| s * 3.6)
    }
}

/// Format coordinate for display
pub fn format_coordinate(coord: Option<f64>) -> String {
    match coord {
        Some(val) => format!("{:>12.6}°", val),
        None => "No fix".to_string(),
    }
}

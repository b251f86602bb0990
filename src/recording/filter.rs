// src/recording/filter.rs
//! Noise and jump filtering of incoming fixes

use crate::error::{RecorderError, Result};
use crate::gps::Coordinate;

pub const DEFAULT_NOISE_THRESHOLD_M: f64 = 3.0;
pub const DEFAULT_JUMP_CAP_M: f64 = 100.0;

/// Why a fix was rejected
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DropReason {
    /// Closer to the last kept point than the noise threshold
    Noise,
    /// Further from the last kept point than the jump cap
    Jump,
    /// Not a usable position (out of range or not a number)
    Invalid,
}

/// Outcome of filtering one candidate fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Keep { delta_meters: f64 },
    Drop { reason: DropReason, distance_meters: f64 },
}

/// Stateless displacement filter. What counts as "previous" is decided by
/// the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixFilter {
    noise_threshold_meters: f64,
    jump_cap_meters: f64,
}

impl Default for FixFilter {
    fn default() -> Self {
        Self {
            noise_threshold_meters: DEFAULT_NOISE_THRESHOLD_M,
            jump_cap_meters: DEFAULT_JUMP_CAP_M,
        }
    }
}

impl FixFilter {
    pub fn new(noise_threshold_meters: f64, jump_cap_meters: f64) -> Result<Self> {
        if noise_threshold_meters.is_nan() || noise_threshold_meters < 0.0 || !jump_cap_meters.is_finite() {
            return Err(RecorderError::Config(format!(
                "Invalid filter thresholds: noise {} m, jump cap {} m",
                noise_threshold_meters, jump_cap_meters
            )));
        }
        if noise_threshold_meters > jump_cap_meters {
            return Err(RecorderError::Config(format!(
                "Noise threshold ({} m) exceeds jump cap ({} m)",
                noise_threshold_meters, jump_cap_meters
            )));
        }
        Ok(Self {
            noise_threshold_meters,
            jump_cap_meters,
        })
    }

    pub fn noise_threshold_meters(&self) -> f64 {
        self.noise_threshold_meters
    }

    pub fn jump_cap_meters(&self) -> f64 {
        self.jump_cap_meters
    }

    /// Judge `candidate` against the last kept coordinate.
    ///
    /// With no previous point any valid candidate is kept, however
    /// implausible it is.
    pub fn accept(&self, candidate: &Coordinate, previous: Option<&Coordinate>) -> Decision {
        if !candidate.is_valid() {
            return Decision::Drop {
                reason: DropReason::Invalid,
                distance_meters: 0.0,
            };
        }
        let Some(previous) = previous else {
            return Decision::Keep { delta_meters: 0.0 };
        };

        let distance = previous.distance_to(candidate);
        if !distance.is_finite() {
            Decision::Drop {
                reason: DropReason::Invalid,
                distance_meters: 0.0,
            }
        } else if distance < self.noise_threshold_meters {
            Decision::Drop {
                reason: DropReason::Noise,
                distance_meters: distance,
            }
        } else if distance > self.jump_cap_meters {
            Decision::Drop {
                reason: DropReason::Jump,
                distance_meters: distance,
            }
        } else {
            Decision::Keep {
                delta_meters: distance,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Coordinate {
        Coordinate::new(47.4736, -0.5516)
    }

    #[test]
    fn test_first_fix_always_kept() {
        let filter = FixFilter::default();
        let far_away = Coordinate::new(-33.0, 151.0);
        assert_eq!(
            filter.accept(&far_away, None),
            Decision::Keep { delta_meters: 0.0 }
        );
    }

    #[test]
    fn test_jitter_dropped() {
        let filter = FixFilter::default();
        let candidate = origin().offset_north(1.5);
        let decision = filter.accept(&candidate, Some(&origin()));
        assert!(matches!(
            decision,
            Decision::Drop {
                reason: DropReason::Noise,
                ..
            }
        ));
    }

    #[test]
    fn test_teleport_dropped() {
        let filter = FixFilter::default();
        let candidate = origin().offset_north(250.0);
        let decision = filter.accept(&candidate, Some(&origin()));
        assert!(matches!(
            decision,
            Decision::Drop {
                reason: DropReason::Jump,
                ..
            }
        ));
    }

    #[test]
    fn test_plausible_step_kept_with_delta() {
        let filter = FixFilter::default();
        let candidate = origin().offset_north(10.0);
        match filter.accept(&candidate, Some(&origin())) {
            Decision::Keep { delta_meters } => assert!((delta_meters - 10.0).abs() < 1e-6),
            other => panic!("expected keep, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_candidate_dropped() {
        let filter = FixFilter::default();
        let invalid = Decision::Drop {
            reason: DropReason::Invalid,
            distance_meters: 0.0,
        };

        let nan = Coordinate::new(f64::NAN, -0.5516);
        assert_eq!(filter.accept(&nan, Some(&origin())), invalid);
        // Not even as the first point of a segment
        assert_eq!(filter.accept(&nan, None), invalid);

        let out_of_range = Coordinate::new(91.0, 0.0);
        assert_eq!(filter.accept(&out_of_range, Some(&origin())), invalid);
        let infinite = Coordinate::new(47.0, f64::INFINITY);
        assert_eq!(filter.accept(&infinite, None), invalid);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(FixFilter::new(2.0, 100.0).is_ok());
        assert!(FixFilter::new(150.0, 100.0).is_err());
        assert!(FixFilter::new(-1.0, 100.0).is_err());
        assert!(FixFilter::new(f64::NAN, 100.0).is_err());
    }
}

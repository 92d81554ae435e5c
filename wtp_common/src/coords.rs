//! Coordinate and motion math.
//!
//! Conversion between user coordinates and encoder pulses, range checks,
//! distance and interpolation helpers shared by both controllers.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::consts::{
    R_PULSE_LIMIT, R_PULSES_PER_MM, THETA_PULSE_LIMIT, THETA_PULSES_PER_DEG, Z_PULSE_LIMIT,
    Z_PULSES_PER_MM,
};
use crate::types::{Axis, AxisCoordinates, Position};

/// Coordinate validation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateError {
    /// Value is NaN or infinite.
    #[error("{axis} coordinate is not a finite number")]
    NotFinite {
        /// Offending axis
        axis: Axis,
    },

    /// Converted pulse count exceeds the drive range.
    #[error("{axis} target {pulses} pulses exceeds ±{limit}")]
    OutOfRange {
        /// Offending axis
        axis: Axis,
        /// Requested pulse count (saturated to i64)
        pulses: i64,
        /// Absolute limit
        limit: i32,
    },

    /// Value lies outside the configured soft limits.
    #[error("{axis} coordinate {value:.3} outside soft limits [{min:.3}, {max:.3}]")]
    SoftLimit {
        /// Offending axis
        axis: Axis,
        /// Requested value
        value: f64,
        /// Lower bound
        min: f64,
        /// Upper bound
        max: f64,
    },
}

/// Pulses per user unit for an axis.
#[inline]
pub const fn pulses_per_unit(axis: Axis) -> f64 {
    match axis {
        Axis::R => R_PULSES_PER_MM,
        Axis::Theta => THETA_PULSES_PER_DEG,
        Axis::Z => Z_PULSES_PER_MM,
    }
}

/// Absolute pulse bound for an axis.
#[inline]
pub const fn pulse_limit(axis: Axis) -> i32 {
    match axis {
        Axis::R => R_PULSE_LIMIT,
        Axis::Theta => THETA_PULSE_LIMIT,
        Axis::Z => Z_PULSE_LIMIT,
    }
}

/// Convert a user coordinate to pulses, rounding to nearest.
pub fn to_pulses(axis: Axis, value: f64) -> Result<i32, CoordinateError> {
    if !value.is_finite() {
        return Err(CoordinateError::NotFinite { axis });
    }

    let scaled = (value * pulses_per_unit(axis)).round();
    let limit = pulse_limit(axis);
    if scaled.abs() > f64::from(limit) {
        return Err(CoordinateError::OutOfRange {
            axis,
            pulses: scaled.clamp(i64::MIN as f64, i64::MAX as f64) as i64,
            limit,
        });
    }

    Ok(scaled as i32)
}

/// Convert pulses back to user units.
#[inline]
pub fn from_pulses(axis: Axis, pulses: i32) -> f64 {
    f64::from(pulses) / pulses_per_unit(axis)
}

/// Convert a position and speed to a validated pulse target.
///
/// Any axis out of range invalidates the whole set.
pub fn to_axis_coordinates(
    position: &Position,
    speed_percent: u32,
) -> Result<AxisCoordinates, CoordinateError> {
    Ok(AxisCoordinates {
        r: to_pulses(Axis::R, position.r)?,
        theta: to_pulses(Axis::Theta, position.theta)?,
        z: to_pulses(Axis::Z, position.z)?,
        speed_percent,
    })
}

/// Position described by a set of per-axis pulse counts.
pub fn position_from_pulses(r: i32, theta: i32, z: i32) -> Position {
    Position {
        r: from_pulses(Axis::R, r),
        theta: from_pulses(Axis::Theta, theta),
        z: from_pulses(Axis::Z, z),
    }
}

impl AxisCoordinates {
    /// User-unit position of this pulse target.
    pub fn to_position(&self) -> Position {
        position_from_pulses(self.r, self.theta, self.z)
    }
}

/// Distance between two positions in the (R, Theta, Z) coordinate space.
///
/// Axes are treated as orthogonal; the result is only used to scale motion
/// step counts, not as a Cartesian path length.
pub fn distance(a: &Position, b: &Position) -> f64 {
    let dr = b.r - a.r;
    let dt = b.theta - a.theta;
    let dz = b.z - a.z;
    (dr * dr + dt * dt + dz * dz).sqrt()
}

/// Linear interpolation.
#[inline]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Cubic ease-in/ease-out blend of `t` in `[0, 1]`.
pub fn ease_in_out_cubic(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

/// Eased interpolation between two positions.
pub fn interpolate(from: &Position, to: &Position, t: f64) -> Position {
    let k = ease_in_out_cubic(t);
    Position {
        r: lerp(from.r, to.r, k),
        theta: lerp(from.theta, to.theta, k),
        z: lerp(from.z, to.z, k),
    }
}

/// Time to travel `delta_pulses` at `velocity` pulses/s.
///
/// A zero velocity yields `Duration::ZERO`; callers add their own margin.
pub fn travel_time(delta_pulses: i64, velocity: u32) -> Duration {
    if velocity == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(delta_pulses.unsigned_abs() as f64 / f64::from(velocity))
}

/// Per-axis min/max bounds in user units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoftLimits {
    /// Lower bound per axis
    pub min: Position,
    /// Upper bound per axis
    pub max: Position,
}

impl Default for SoftLimits {
    /// Limits equal to the drive pulse range.
    fn default() -> Self {
        let bound = |axis| from_pulses(axis, pulse_limit(axis));
        Self {
            min: Position::new(-bound(Axis::R), -bound(Axis::Theta), -bound(Axis::Z)),
            max: Position::new(bound(Axis::R), bound(Axis::Theta), bound(Axis::Z)),
        }
    }
}

impl SoftLimits {
    /// Check a position against the limits.
    pub fn check(&self, position: &Position) -> Result<(), CoordinateError> {
        for axis in Axis::ALL {
            let value = position.axis(axis);
            let (min, max) = (self.min.axis(axis), self.max.axis(axis));
            if value < min || value > max {
                return Err(CoordinateError::SoftLimit {
                    axis,
                    value,
                    min,
                    max,
                });
            }
        }
        Ok(())
    }

    /// True if `min <= max` on every axis.
    pub fn is_consistent(&self) -> bool {
        Axis::ALL
            .iter()
            .all(|&axis| self.min.axis(axis) <= self.max.axis(axis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_conversion() {
        let coords = to_axis_coordinates(&Position::new(50.0, 90.0, 10.0), 50).unwrap();
        assert_eq!(coords.r, 50_000);
        assert_eq!(coords.theta, 9_000);
        assert_eq!(coords.z, 5_000);
        assert_eq!(coords.speed_percent, 50);
    }

    #[test]
    fn test_limits_are_inclusive() {
        assert_eq!(to_pulses(Axis::R, 300.0), Ok(300_000));
        assert_eq!(to_pulses(Axis::Theta, -360.0), Ok(-36_000));
        assert_eq!(to_pulses(Axis::Z, 200.0), Ok(100_000));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = to_pulses(Axis::R, 300.01).unwrap_err();
        assert!(matches!(
            err,
            CoordinateError::OutOfRange {
                axis: Axis::R,
                limit: 300_000,
                ..
            }
        ));

        // One bad axis invalidates the set.
        let result = to_axis_coordinates(&Position::new(10.0, 400.0, 10.0), 50);
        assert!(matches!(
            result,
            Err(CoordinateError::OutOfRange {
                axis: Axis::Theta,
                ..
            })
        ));
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(matches!(
            to_pulses(Axis::Z, f64::NAN),
            Err(CoordinateError::NotFinite { axis: Axis::Z })
        ));
        assert!(to_pulses(Axis::R, f64::INFINITY).is_err());
    }

    #[test]
    fn test_round_trip_reference_point() {
        let p = Position::new(123.456, -45.67, 88.8);
        let back = to_axis_coordinates(&p, 10).unwrap().to_position();
        assert!(p.approx_eq(&back, 0.01));
    }

    #[test]
    fn test_ease_in_out_endpoints_and_symmetry() {
        assert_eq!(ease_in_out_cubic(0.0), 0.0);
        assert_eq!(ease_in_out_cubic(1.0), 1.0);
        assert!((ease_in_out_cubic(0.5) - 0.5).abs() < 1e-12);
        let a = ease_in_out_cubic(0.25);
        let b = ease_in_out_cubic(0.75);
        assert!((a + b - 1.0).abs() < 1e-12);
        // Clamped outside [0, 1]
        assert_eq!(ease_in_out_cubic(-1.0), 0.0);
        assert_eq!(ease_in_out_cubic(2.0), 1.0);
    }

    #[test]
    fn test_interpolate_hits_endpoints() {
        let a = Position::new(0.0, 0.0, 0.0);
        let b = Position::new(100.0, 180.0, 50.0);
        assert_eq!(interpolate(&a, &b, 0.0), a);
        assert_eq!(interpolate(&a, &b, 1.0), b);
        let mid = interpolate(&a, &b, 0.5);
        assert!(mid.approx_eq(&Position::new(50.0, 90.0, 25.0), 1e-9));
    }

    #[test]
    fn test_distance() {
        let a = Position::new(0.0, 0.0, 0.0);
        let b = Position::new(3.0, 0.0, 4.0);
        assert!((distance(&a, &b) - 5.0).abs() < 1e-12);
        assert_eq!(distance(&b, &b), 0.0);
    }

    #[test]
    fn test_travel_time() {
        assert_eq!(travel_time(10_000, 10_000), Duration::from_secs(1));
        assert_eq!(travel_time(-5_000, 10_000), Duration::from_millis(500));
        assert_eq!(travel_time(5_000, 0), Duration::ZERO);
    }

    #[test]
    fn test_soft_limits() {
        let limits = SoftLimits {
            min: Position::new(0.0, -180.0, 0.0),
            max: Position::new(250.0, 180.0, 150.0),
        };
        assert!(limits.is_consistent());
        assert!(limits.check(&Position::new(100.0, 0.0, 10.0)).is_ok());

        let err = limits.check(&Position::new(100.0, 0.0, -1.0)).unwrap_err();
        assert!(matches!(err, CoordinateError::SoftLimit { axis: Axis::Z, .. }));
    }

    #[test]
    fn test_default_soft_limits_match_pulse_range() {
        let limits = SoftLimits::default();
        assert_eq!(limits.max, Position::new(300.0, 360.0, 200.0));
        assert_eq!(limits.min, Position::new(-300.0, -360.0, -200.0));
    }
}

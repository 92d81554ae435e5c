//! Property tests for coordinate conversion.

use proptest::prelude::*;
use wtp_common::coords::{
    ease_in_out_cubic, interpolate, pulse_limit, to_axis_coordinates, to_pulses,
};
use wtp_common::types::{Axis, Position};

proptest! {
    /// Conversion to pulses and back stays within 0.01 unit.
    #[test]
    fn round_trip_within_tolerance(
        r in -300.0..300.0f64,
        theta in -360.0..360.0f64,
        z in -200.0..200.0f64,
    ) {
        let p = Position::new(r, theta, z);
        let back = to_axis_coordinates(&p, 50).unwrap().to_position();
        prop_assert!(p.approx_eq(&back, 0.01));
    }

    /// Every accepted value lies inside the pulse bound.
    #[test]
    fn accepted_pulses_respect_bounds(value in -1000.0..1000.0f64) {
        for axis in Axis::ALL {
            match to_pulses(axis, value) {
                Ok(pulses) => prop_assert!(pulses.abs() <= pulse_limit(axis)),
                Err(_) => {}
            }
        }
    }

    /// Values beyond the unit range are always rejected.
    #[test]
    fn beyond_range_rejected(excess in 0.01..1000.0f64, negative in any::<bool>()) {
        let value = if negative { -(300.0 + excess) } else { 300.0 + excess };
        prop_assert!(to_pulses(Axis::R, value).is_err());
    }

    /// The blend is monotonic on [0, 1].
    #[test]
    fn ease_is_monotonic(a in 0.0..1.0f64, b in 0.0..1.0f64) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(ease_in_out_cubic(lo) <= ease_in_out_cubic(hi) + 1e-12);
    }

    /// Interpolated points never leave the segment's bounding box.
    #[test]
    fn interpolation_stays_between_endpoints(
        r in -300.0..300.0f64,
        theta in -360.0..360.0f64,
        t in 0.0..1.0f64,
    ) {
        let from = Position::ORIGIN;
        let to = Position::new(r, theta, 0.0);
        let p = interpolate(&from, &to, t);
        prop_assert!(p.r >= r.min(0.0) - 1e-9 && p.r <= r.max(0.0) + 1e-9);
        prop_assert!(p.theta >= theta.min(0.0) - 1e-9 && p.theta <= theta.max(0.0) + 1e-9);
    }
}

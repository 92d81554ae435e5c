//! Synthesized motion profile.
//!
//! A move is split into `clamp(round(distance / step_distance), min, max)`
//! steps. Step `i` of `n` lies at `ease(i / n)` along the straight segment in
//! (R, Theta, Z) space, so the robot accelerates and decelerates smoothly.

use std::time::Duration;
use wtp_common::config::SimulationSettings;
use wtp_common::coords::{distance, interpolate};
use wtp_common::types::Position;

/// Largest slow-down applied at low speed.
const MAX_SLOWDOWN: f64 = 4.0;

/// Planned motion between two positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionProfile {
    /// Start position
    pub from: Position,
    /// End position
    pub to: Position,
    /// Number of interpolation steps
    pub steps: u32,
}

impl MotionProfile {
    /// Plan a move, scaling the step count with distance.
    pub fn plan(from: Position, to: Position, settings: &SimulationSettings) -> Self {
        let raw = (distance(&from, &to) / settings.step_distance).round();
        let steps = (raw as u32).clamp(settings.min_steps, settings.max_steps);
        Self { from, to, steps }
    }

    /// Plan a move with the maximum step count (used for homing).
    pub fn longest(from: Position, to: Position, settings: &SimulationSettings) -> Self {
        Self {
            from,
            to,
            steps: settings.max_steps,
        }
    }

    /// Position after step `i` (`1..=steps`). The last step is exact.
    pub fn point(&self, i: u32) -> Position {
        if i >= self.steps {
            return self.to;
        }
        interpolate(&self.from, &self.to, f64::from(i) / f64::from(self.steps))
    }

    /// Total duration at the given tick period.
    pub fn duration(&self, tick: Duration) -> Duration {
        tick * self.steps
    }
}

/// Tick period scaled by speed: `tick × clamp(100 / speed, 1, 4)`.
pub fn tick_period(tick: Duration, speed_percent: u32) -> Duration {
    let factor = (100.0 / f64::from(speed_percent.max(1))).clamp(1.0, MAX_SLOWDOWN);
    Duration::from_nanos((tick.as_nanos() as f64 * factor).round() as u64)
}

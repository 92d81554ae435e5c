//! Controller value types.
//!
//! This module defines the snapshot types exchanged between the controllers
//! and their consumers:
//! - `Position` - user coordinates (R mm, Theta deg, Z mm)
//! - `ControllerStatus` - full controller snapshot, produced per transition
//! - `AxisCoordinates` - encoder pulse targets (hardware-internal)
//! - `SensorSnapshot` / `AxisFeedback` - fieldbus sensor readback
//!
//! All of them are plain values. Every accessor hands out a copy so readers
//! never observe a half-written update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::consts::DEFAULT_SPEED_PERCENT;

/// Robot axis identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Radial extension [mm].
    R,
    /// Rotation [deg].
    Theta,
    /// Lift [mm].
    Z,
}

impl Axis {
    /// All axes in fieldbus slave order.
    pub const ALL: [Axis; 3] = [Axis::R, Axis::Theta, Axis::Z];

    /// Index into per-axis arrays.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Axis::R => 0,
            Axis::Theta => 1,
            Axis::Z => 2,
        }
    }

    /// Short display name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Axis::R => "R",
            Axis::Theta => "Theta",
            Axis::Z => "Z",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Robot position in user coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Radius [mm]
    pub r: f64,
    /// Rotation [deg]
    pub theta: f64,
    /// Height [mm]
    pub z: f64,
}

impl Position {
    /// Home / reference position.
    pub const ORIGIN: Position = Position {
        r: 0.0,
        theta: 0.0,
        z: 0.0,
    };

    /// Create a new position.
    pub const fn new(r: f64, theta: f64, z: f64) -> Self {
        Self { r, theta, z }
    }

    /// Coordinate of a single axis.
    pub const fn axis(&self, axis: Axis) -> f64 {
        match axis {
            Axis::R => self.r,
            Axis::Theta => self.theta,
            Axis::Z => self.z,
        }
    }

    /// True when every coordinate differs by at most `tolerance`.
    pub fn approx_eq(&self, other: &Position, tolerance: f64) -> bool {
        (self.r - other.r).abs() <= tolerance
            && (self.theta - other.theta).abs() <= tolerance
            && (self.z - other.z).abs() <= tolerance
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(R={:.3}, T={:.3}, Z={:.3})", self.r, self.theta, self.z)
    }
}

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControllerState {
    /// Not connected to anything.
    #[default]
    Disconnected,
    /// Connection sequence in progress.
    Connecting,
    /// Connected and at rest.
    Idle,
    /// Executing a commanded move.
    Moving,
    /// Executing a homing sequence.
    Homing,
}

/// Snapshot of a controller's externally visible state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatus {
    /// Lifecycle state
    pub state: ControllerState,
    /// Controller is connected
    pub connected: bool,
    /// A move or homing sequence is in flight
    pub moving: bool,
    /// Homing completed since connect
    pub homed: bool,
    /// Vacuum output is on
    pub vacuum_on: bool,
    /// Current position
    pub position: Position,
    /// Commanded speed [%], 1..=100
    pub speed_percent: u32,
    /// Last error text, if any
    pub last_error: Option<String>,
    /// Time this snapshot was produced
    pub timestamp: DateTime<Utc>,
}

impl Default for ControllerStatus {
    fn default() -> Self {
        Self {
            state: ControllerState::Disconnected,
            connected: false,
            moving: false,
            homed: false,
            vacuum_on: false,
            position: Position::ORIGIN,
            speed_percent: DEFAULT_SPEED_PERCENT,
            last_error: None,
            timestamp: Utc::now(),
        }
    }
}

impl ControllerStatus {
    /// Compare two snapshots ignoring the timestamp.
    pub fn same_state(&self, other: &ControllerStatus) -> bool {
        self.state == other.state
            && self.connected == other.connected
            && self.moving == other.moving
            && self.homed == other.homed
            && self.vacuum_on == other.vacuum_on
            && self.position == other.position
            && self.speed_percent == other.speed_percent
            && self.last_error == other.last_error
    }
}

/// Target position expressed in encoder pulses.
///
/// Only constructed through [`crate::coords::to_axis_coordinates`], which
/// enforces the pulse bounds, so a value of this type is always in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AxisCoordinates {
    /// R axis [pulses]
    pub r: i32,
    /// Theta axis [pulses]
    pub theta: i32,
    /// Z axis [pulses]
    pub z: i32,
    /// Commanded speed [%]
    pub speed_percent: u32,
}

impl AxisCoordinates {
    /// Pulse target for a single axis.
    pub const fn axis(&self, axis: Axis) -> i32 {
        match axis {
            Axis::R => self.r,
            Axis::Theta => self.theta,
            Axis::Z => self.z,
        }
    }
}

/// Per-axis fieldbus readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AxisFeedback {
    /// Actual position [pulses]
    pub position_pulses: i32,
    /// Actual velocity [pulses/s]
    pub speed_pulses: i32,
    /// Drive reports ready to switch on
    pub ready: bool,
    /// Drive is in operation-enabled
    pub enabled: bool,
    /// Target reached
    pub in_position: bool,
    /// Following error reported by the drive [pulses]
    pub following_error: i32,
    /// Drive fault bit set
    pub fault: bool,
}

/// Sensor readback of the hardware-backed controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSnapshot {
    /// Per-axis feedback indexed by [`Axis::index`]
    pub axes: [AxisFeedback; 3],
    /// Cabinet temperature [°C]
    pub temperature_c: f64,
    /// Vibration level [mm/s RMS]
    pub vibration: f64,
    /// Summed motor current [A]
    pub motor_current_a: f64,
    /// Emergency stop circuit is open
    pub emergency_stop: bool,
    /// Enclosure door is closed
    pub door_closed: bool,
    /// Light curtain is not interrupted
    pub light_curtain_clear: bool,
    /// Vacuum pressure [% of nominal]
    pub vacuum_pressure_pct: f64,
    /// Raw end-effector presence sensor
    pub presence_sensor: bool,
    /// Presence sensor AND sufficient vacuum pressure
    pub wafer_detected: bool,
    /// Cassette present at the load station
    pub cassette_present: bool,
    /// Load port signals ready
    pub loadport_ready: bool,
    /// Vacuum valve is open
    pub valve_open: bool,
    /// Time of the refresh that produced this snapshot
    pub refreshed_at: DateTime<Utc>,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self {
            axes: [AxisFeedback::default(); 3],
            temperature_c: 25.0,
            vibration: 0.0,
            motor_current_a: 0.0,
            emergency_stop: false,
            door_closed: true,
            light_curtain_clear: true,
            vacuum_pressure_pct: 0.0,
            presence_sensor: false,
            wafer_detected: false,
            cassette_present: false,
            loadport_ready: false,
            valve_open: false,
            refreshed_at: Utc::now(),
        }
    }
}

impl SensorSnapshot {
    /// Feedback of a single axis.
    pub fn axis(&self, axis: Axis) -> &AxisFeedback {
        &self.axes[axis.index()]
    }

    /// All drives ready and enabled without fault.
    pub fn servos_ready(&self) -> bool {
        self.axes.iter().all(|a| a.ready && a.enabled && !a.fault)
    }
}

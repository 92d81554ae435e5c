//! System-wide constants.
//!
//! Scale factors and pulse bounds are fixed by the drive configuration of the
//! robot; thresholds that are site-tunable live in [`crate::config`] and only
//! take their defaults from here.

use std::time::Duration;

/// Canonical service name (used for logging).
pub const SERVICE_NAME: &str = "wtp_hal";

// ─── Pulse Scaling ──────────────────────────────────────────────────

/// Encoder pulses per millimetre on the R (radial) axis.
pub const R_PULSES_PER_MM: f64 = 1000.0;

/// Encoder pulses per degree on the Theta (rotary) axis.
pub const THETA_PULSES_PER_DEG: f64 = 100.0;

/// Encoder pulses per millimetre on the Z (lift) axis.
pub const Z_PULSES_PER_MM: f64 = 500.0;

/// Maximum absolute R position in pulses (±300 mm).
pub const R_PULSE_LIMIT: i32 = 300_000;

/// Maximum absolute Theta position in pulses (±360°).
pub const THETA_PULSE_LIMIT: i32 = 36_000;

/// Maximum absolute Z position in pulses (±200 mm).
pub const Z_PULSE_LIMIT: i32 = 100_000;

// ─── Speed ──────────────────────────────────────────────────────────

/// Lowest accepted speed percentage.
pub const MIN_SPEED_PERCENT: u32 = 1;

/// Highest accepted speed percentage.
pub const MAX_SPEED_PERCENT: u32 = 100;

/// Speed a freshly constructed controller starts with.
pub const DEFAULT_SPEED_PERCENT: u32 = 50;

// ─── Motion Protocol ────────────────────────────────────────────────

/// Interval between position polls while a move is in flight.
pub const MOVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-axis convergence window for a commanded move [pulses].
pub const MOVE_TOLERANCE_PULSES: i32 = 50;

/// Extra time granted on top of the estimated move duration.
pub const MOVE_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Per-axis convergence window for homing [pulses].
pub const HOME_TOLERANCE_PULSES: i32 = 100;

/// Absolute homing deadline.
pub const HOME_TIMEOUT: Duration = Duration::from_secs(60);

/// How long `disconnect()` waits for the stop request to complete.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_millis(500);

// ─── Sensor Feedback ────────────────────────────────────────────────

/// Minimum spacing between two sensor refreshes.
pub const SENSOR_REFRESH_MIN_INTERVAL: Duration = Duration::from_millis(50);

/// Temperature at which a warning is raised [°C].
pub const TEMPERATURE_WARN_C: f64 = 50.0;

/// Highest temperature at which motion is still permitted [°C].
pub const TEMPERATURE_OPERATE_MAX_C: f64 = 55.0;

/// Temperature at which an over-temperature alarm is raised [°C].
pub const TEMPERATURE_ALARM_C: f64 = 60.0;

/// Following error limit per axis while moving [pulses].
pub const POSITION_ERROR_LIMIT_PULSES: i32 = 100;

/// Vacuum pressure above which a presence sensor hit counts as a wafer [%].
pub const WAFER_PRESSURE_THRESHOLD_PCT: f64 = 75.0;

/// Vacuum pressure that alone confirms a successful pick [%].
pub const PICK_CONFIRM_PRESSURE_PCT: f64 = 80.0;

/// Vacuum pressure below which a low-vacuum alarm is raised while vacuum is on [%].
pub const LOW_VACUUM_ALARM_PCT: f64 = 50.0;

// ─── Pendant Serial Defaults ────────────────────────────────────────

/// Default pendant baud rate.
pub const PENDANT_DEFAULT_BAUD: u32 = 9600;

/// Candidate baud rates tried when probing for a motion controller.
pub const MOTION_CONTROLLER_BAUD_RATES: [u32; 5] = [115_200, 57_600, 38_400, 19_200, 9600];

// ─── Discovery ──────────────────────────────────────────────────────

/// Period of the endpoint hot-plug polling loop.
pub const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Debounce applied after an attach event before re-probing.
pub const DISCOVERY_DEBOUNCE: Duration = Duration::from_secs(1);

/// Read timeout for a single probe response.
pub const PROBE_READ_TIMEOUT: Duration = Duration::from_millis(300);

/// Capacity of every broadcast event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

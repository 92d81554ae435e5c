//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load the TOML configuration of
//! the motion-control core.
//!
//! # Usage
//!
//! ```rust,no_run
//! use wtp_common::config::{ConfigLoader, ConfigError, WtpConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = WtpConfig::load(Path::new("wtp.toml"))?;
//!     config.validate()?;
//!     println!("Pendant baud: {}", config.pendant.baud_rate);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::consts::{
    DEFAULT_SPEED_PERCENT, LOW_VACUUM_ALARM_PCT, MOTION_CONTROLLER_BAUD_RATES,
    PENDANT_DEFAULT_BAUD, PICK_CONFIRM_PRESSURE_PCT, POSITION_ERROR_LIMIT_PULSES, SERVICE_NAME,
    TEMPERATURE_ALARM_C, TEMPERATURE_OPERATE_MAX_C, TEMPERATURE_WARN_C,
    WAFER_PRESSURE_THRESHOLD_PCT,
};
use crate::coords::SoftLimits;
use crate::types::Axis;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Common configuration fields.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "pendant-cell-3"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_service_name() -> String {
    SERVICE_NAME.to_string()
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Serial Framing ─────────────────────────────────────────────────

/// Serial parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Serial stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StopBits {
    /// One stop bit.
    #[default]
    #[serde(rename = "1")]
    One,
    /// Two stop bits.
    #[serde(rename = "2")]
    Two,
}

/// Framing used to open a serial endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Per-read timeout [ms]
    pub read_timeout_ms: u64,
}

impl SerialSettings {
    /// 8N1 framing at the given baud rate.
    pub const fn eight_n_one(baud_rate: u32, read_timeout_ms: u64) -> Self {
        Self {
            baud_rate,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout_ms,
        }
    }

    /// Read timeout as a `Duration`.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

// ─── Sections ───────────────────────────────────────────────────────

/// `[pendant]` section: the indicator device link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PendantSettings {
    /// Fixed endpoint; when unset the discovered pendant is used.
    pub endpoint: Option<String>,
    /// Baud rate (default 9600)
    pub baud_rate: u32,
    /// Data bits (default 8)
    pub data_bits: u8,
    /// Parity (default none)
    pub parity: Parity,
    /// Stop bits (default 1)
    pub stop_bits: StopBits,
    /// Per-read timeout [ms]
    pub read_timeout_ms: u64,
}

impl Default for PendantSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            baud_rate: PENDANT_DEFAULT_BAUD,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout_ms: 500,
        }
    }
}

impl PendantSettings {
    /// Serial framing for the pendant.
    pub fn serial(&self) -> SerialSettings {
        SerialSettings {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
            read_timeout_ms: self.read_timeout_ms,
        }
    }
}

/// USB vendor/product pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsbId {
    /// Vendor id
    pub vendor_id: u16,
    /// Product id
    pub product_id: u16,
}

/// `[discovery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Run the hot-plug polling loop
    pub monitor: bool,
    /// Polling period [ms]
    pub poll_interval_ms: u64,
    /// Debounce after attach before re-probing [ms]
    pub debounce_ms: u64,
    /// Read timeout of a single probe [ms]
    pub probe_timeout_ms: u64,
    /// Baud rates tried for the motion controller, in order
    pub motion_baud_rates: Vec<u32>,
    /// USB ids that mark pendant candidates
    pub pendant_usb_ids: Vec<UsbId>,
    /// Description substrings (case-insensitive) that mark pendant candidates
    pub pendant_description_hints: Vec<String>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            monitor: true,
            poll_interval_ms: 5000,
            debounce_ms: 1000,
            probe_timeout_ms: 300,
            motion_baud_rates: MOTION_CONTROLLER_BAUD_RATES.to_vec(),
            pendant_usb_ids: vec![
                UsbId { vendor_id: 0x0403, product_id: 0x6001 }, // FTDI FT232R
                UsbId { vendor_id: 0x0403, product_id: 0x6015 }, // FTDI FT230X
                UsbId { vendor_id: 0x067B, product_id: 0x2303 }, // Prolific PL2303
                UsbId { vendor_id: 0x1A86, product_id: 0x7523 }, // WCH CH340
                UsbId { vendor_id: 0x10C4, product_id: 0xEA60 }, // Silabs CP210x
            ],
            pendant_description_hints: vec![
                "pendant".to_string(),
                "teach".to_string(),
                "usb serial".to_string(),
                "usb-serial".to_string(),
            ],
        }
    }
}

impl DiscoverySettings {
    /// Polling period.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Attach debounce.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Probe read timeout.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Maximum axis velocities at 100 % speed [pulses/s].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisVelocities {
    /// R axis
    pub r: u32,
    /// Theta axis
    pub theta: u32,
    /// Z axis
    pub z: u32,
}

impl Default for AxisVelocities {
    fn default() -> Self {
        Self {
            r: 200_000,
            theta: 36_000,
            z: 100_000,
        }
    }
}

impl AxisVelocities {
    /// Maximum velocity of one axis.
    pub const fn axis(&self, axis: Axis) -> u32 {
        match axis {
            Axis::R => self.r,
            Axis::Theta => self.theta,
            Axis::Z => self.z,
        }
    }

    /// Velocity of one axis at `speed_percent`, at least 1 pulse/s.
    pub fn scaled(&self, axis: Axis, speed_percent: u32) -> u32 {
        let v = u64::from(self.axis(axis)) * u64::from(speed_percent) / 100;
        v.clamp(1, u64::from(u32::MAX)) as u32
    }
}

/// `[motion]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Position poll interval while moving [ms]
    pub poll_interval_ms: u64,
    /// Move convergence window [pulses]
    pub move_tolerance_pulses: i32,
    /// Margin added to the estimated move time [ms]
    pub move_timeout_margin_ms: u64,
    /// Homing convergence window [pulses]
    pub home_tolerance_pulses: i32,
    /// Homing deadline [ms]
    pub home_timeout_ms: u64,
    /// Grace period for stop during disconnect [ms]
    pub stop_grace_ms: u64,
    /// Velocities at 100 % speed
    pub max_velocity: AxisVelocities,
    /// Speed after connect [%]
    pub default_speed_percent: u32,
    /// Settle delay around vacuum toggles during pick [ms]
    pub pick_settle_ms: u64,
    /// Settle delay around vacuum toggles during place [ms]
    pub place_settle_ms: u64,
    /// Optional soft limits checked before any move
    pub soft_limits: Option<SoftLimits>,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            move_tolerance_pulses: 50,
            move_timeout_margin_ms: 5000,
            home_tolerance_pulses: 100,
            home_timeout_ms: 60_000,
            stop_grace_ms: 500,
            max_velocity: AxisVelocities::default(),
            default_speed_percent: DEFAULT_SPEED_PERCENT,
            pick_settle_ms: 500,
            place_settle_ms: 300,
            soft_limits: None,
        }
    }
}

impl MotionSettings {
    /// Poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Move timeout margin.
    pub fn move_timeout_margin(&self) -> Duration {
        Duration::from_millis(self.move_timeout_margin_ms)
    }

    /// Homing deadline.
    pub fn home_timeout(&self) -> Duration {
        Duration::from_millis(self.home_timeout_ms)
    }

    /// Stop grace period.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Pick settle delay.
    pub fn pick_settle(&self) -> Duration {
        Duration::from_millis(self.pick_settle_ms)
    }

    /// Place settle delay.
    pub fn place_settle(&self) -> Duration {
        Duration::from_millis(self.place_settle_ms)
    }
}

/// `[safety]` section. Vacuum thresholds are site-tunable heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetySettings {
    /// Over-temperature warning [°C]
    pub temperature_warn_c: f64,
    /// Over-temperature alarm [°C]
    pub temperature_alarm_c: f64,
    /// Highest temperature permitting motion [°C]
    pub temperature_operate_max_c: f64,
    /// Following error limit while moving [pulses]
    pub position_error_limit_pulses: i32,
    /// Pressure above which the presence sensor counts as wafer detected [%]
    pub wafer_pressure_threshold_pct: f64,
    /// Pressure that alone confirms a pick [%]
    pub pick_confirm_pressure_pct: f64,
    /// Pressure below which vacuum-on raises a low-vacuum alarm [%]
    pub low_vacuum_alarm_pct: f64,
    /// Minimum spacing between sensor refreshes [ms]
    pub sensor_refresh_ms: u64,
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            temperature_warn_c: TEMPERATURE_WARN_C,
            temperature_alarm_c: TEMPERATURE_ALARM_C,
            temperature_operate_max_c: TEMPERATURE_OPERATE_MAX_C,
            position_error_limit_pulses: POSITION_ERROR_LIMIT_PULSES,
            wafer_pressure_threshold_pct: WAFER_PRESSURE_THRESHOLD_PCT,
            pick_confirm_pressure_pct: PICK_CONFIRM_PRESSURE_PCT,
            low_vacuum_alarm_pct: LOW_VACUUM_ALARM_PCT,
            sensor_refresh_ms: 50,
        }
    }
}

impl SafetySettings {
    /// Sensor refresh spacing.
    pub fn sensor_refresh(&self) -> Duration {
        Duration::from_millis(self.sensor_refresh_ms)
    }
}

/// `[simulation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Status tick period at 100 % speed [ms]
    pub tick_ms: u64,
    /// Fewest interpolation steps per move
    pub min_steps: u32,
    /// Most interpolation steps per move (also used for homing)
    pub max_steps: u32,
    /// Distance covered per step before clamping [units]
    pub step_distance: f64,
    /// Simulated connection delay [ms]
    pub connect_delay_ms: u64,
    /// Whether a simulated pick finds material
    pub material_present: bool,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            tick_ms: 20,
            min_steps: 10,
            max_steps: 40,
            step_distance: 5.0,
            connect_delay_ms: 100,
            material_present: true,
        }
    }
}

impl SimulationSettings {
    /// Tick period.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Connect delay.
    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }
}

/// `[fieldbus]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldbusSettings {
    /// Registered backend name
    pub backend: String,
    /// Fixed endpoint; when unset the discovered motion controller is used.
    pub endpoint: Option<String>,
}

impl Default for FieldbusSettings {
    fn default() -> Self {
        Self {
            backend: "virtual".to_string(),
            endpoint: None,
        }
    }
}

/// Complete configuration file.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// service_name = "cell-3"
///
/// [pendant]
/// endpoint = "/dev/ttyUSB0"
///
/// [discovery]
/// poll_interval_ms = 2000
///
/// [safety]
/// wafer_pressure_threshold_pct = 70.0
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WtpConfig {
    /// Shared fields
    pub shared: SharedConfig,
    /// Pendant link
    pub pendant: PendantSettings,
    /// Discovery
    pub discovery: DiscoverySettings,
    /// Motion protocol
    pub motion: MotionSettings,
    /// Safety thresholds
    pub safety: SafetySettings,
    /// Simulation
    pub simulation: SimulationSettings,
    /// Fieldbus backend
    pub fieldbus: FieldbusSettings,
}

impl WtpConfig {
    /// Validate numeric bounds and cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let fail = |msg: String| Err(ConfigError::ValidationError(msg));

        if !(5..=8).contains(&self.pendant.data_bits) {
            return fail(format!(
                "pendant.data_bits must be 5-8, got {}",
                self.pendant.data_bits
            ));
        }
        if self.pendant.baud_rate == 0 {
            return fail("pendant.baud_rate must be > 0".to_string());
        }
        if self.discovery.motion_baud_rates.is_empty() {
            return fail("discovery.motion_baud_rates cannot be empty".to_string());
        }
        if self.discovery.poll_interval_ms == 0 {
            return fail("discovery.poll_interval_ms must be > 0".to_string());
        }
        if !(1..=100).contains(&self.motion.default_speed_percent) {
            return fail(format!(
                "motion.default_speed_percent must be 1-100, got {}",
                self.motion.default_speed_percent
            ));
        }
        if self.motion.move_tolerance_pulses <= 0 || self.motion.home_tolerance_pulses <= 0 {
            return fail("motion tolerances must be > 0".to_string());
        }
        if self.motion.poll_interval_ms == 0 {
            return fail("motion.poll_interval_ms must be > 0".to_string());
        }
        let v = &self.motion.max_velocity;
        if v.r == 0 || v.theta == 0 || v.z == 0 {
            return fail("motion.max_velocity must be > 0 on every axis".to_string());
        }
        if let Some(limits) = &self.motion.soft_limits {
            if !limits.is_consistent() {
                return fail("motion.soft_limits min exceeds max".to_string());
            }
        }
        let s = &self.safety;
        if s.sensor_refresh_ms == 0 {
            return fail("safety.sensor_refresh_ms must be > 0".to_string());
        }
        if s.temperature_warn_c > s.temperature_alarm_c {
            return fail(format!(
                "safety.temperature_warn_c ({}) exceeds temperature_alarm_c ({})",
                s.temperature_warn_c, s.temperature_alarm_c
            ));
        }
        for (name, pct) in [
            ("wafer_pressure_threshold_pct", s.wafer_pressure_threshold_pct),
            ("pick_confirm_pressure_pct", s.pick_confirm_pressure_pct),
            ("low_vacuum_alarm_pct", s.low_vacuum_alarm_pct),
        ] {
            if !(0.0..=100.0).contains(&pct) {
                return fail(format!("safety.{name} must be 0-100, got {pct}"));
            }
        }
        if self.simulation.min_steps == 0 || self.simulation.min_steps > self.simulation.max_steps
        {
            return fail("simulation.min_steps must be in 1..=max_steps".to_string());
        }
        if self.fieldbus.backend.is_empty() {
            return fail("fieldbus.backend cannot be empty".to_string());
        }
        Ok(())
    }
}

//! Prelude module for common re-exports.
//!
//! ```rust
//! use wtp_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig, WtpConfig};

// ─── Value Types ────────────────────────────────────────────────────
pub use crate::types::{
    Axis, AxisCoordinates, AxisFeedback, ControllerState, ControllerStatus, Position,
    SensorSnapshot,
};

// ─── Controller Contract ────────────────────────────────────────────
pub use crate::controller::{ControllerError, ControllerKind, MotionController};
pub use crate::events::{ControllerEvent, ControllerFault, EventHub, FaultCode};

// ─── Discovery ──────────────────────────────────────────────────────
pub use crate::device::{DetectionResult, DeviceDescriptor, DeviceType};

// ─── Safety ─────────────────────────────────────────────────────────
pub use crate::safety::{AlarmFlags, SafetyConditions, SafetyInterlock, SafetySwitch};

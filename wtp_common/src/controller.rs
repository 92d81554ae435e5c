//! Controller capability contract.
//!
//! This module defines:
//! - `MotionController` trait - the command surface every controller implements
//! - `ControllerKind` - tag distinguishing simulated from hardware-backed
//! - `ControllerError` - internal error type, mapped to [`FaultCode`]
//!
//! # Error Boundary
//!
//! Implementations run their operations internally as
//! `Result<_, ControllerError>` and convert at the trait boundary: the public
//! methods return `bool`, publish a [`ControllerEvent::Error`] and record the
//! message in [`ControllerStatus::last_error`]. Nothing propagates to the
//! caller.
//!
//! # Concurrency
//!
//! | Operation                     | Serialization                  |
//! |-------------------------------|--------------------------------|
//! | `move_to` / `home`            | at most one in flight, else `Busy` |
//! | `pick` / `place`              | at most one in flight, else `Busy` |
//! | `stop`                        | never blocked, interrupts motion |
//! | `status` / `position` / `is_safe_to_operate` | lock-free copy |
//!
//! [`ControllerEvent::Error`]: crate::events::ControllerEvent::Error

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::coords::CoordinateError;
use crate::events::{ControllerEvent, ControllerFault, FaultCode};
use crate::types::{ControllerStatus, Position};

/// Which implementation backs a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerKind {
    /// Synthesized motion, no device.
    Simulated,
    /// Fieldbus-driven motion with pendant indicator.
    HardwareBacked,
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerKind::Simulated => f.write_str("simulated"),
            ControllerKind::HardwareBacked => f.write_str("hardware"),
        }
    }
}

/// Errors raised inside controller operations.
#[derive(Debug, Clone, Error)]
pub enum ControllerError {
    /// Endpoint or device could not be opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Device did not answer the handshake
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Fieldbus transfer or initialisation error
    #[error("Fieldbus error: {0}")]
    Fieldbus(String),

    /// Command issued while disconnected
    #[error("Controller not connected")]
    NotConnected,

    /// Refused by the safety gate
    #[error("Safety check failed: {0}")]
    SafetyRejected(String),

    /// Target coordinates invalid
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(#[from] CoordinateError),

    /// Speed outside 1..=100
    #[error("Invalid speed {0}% (expected 1-100)")]
    InvalidSpeed(u32),

    /// Another position-changing operation is in flight
    #[error("Controller busy: {0} already in progress")]
    Busy(&'static str),

    /// Convergence deadline exceeded
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
        /// Time spent before giving up
        elapsed: Duration,
    },

    /// Interrupted by `stop()`
    #[error("{0} interrupted by stop")]
    Stopped(&'static str),

    /// Pick could not confirm material
    #[error("No wafer detected after pick (vacuum {pressure_pct:.1}%)")]
    NoMaterial {
        /// Measured vacuum pressure
        pressure_pct: f64,
    },

    /// Indicator or other device I/O error
    #[error("Device I/O error: {0}")]
    Device(String),
}

impl ControllerError {
    /// Fault classification of this error.
    pub fn code(&self) -> FaultCode {
        match self {
            ControllerError::ConnectionFailed(_) => FaultCode::ConnectionFailed,
            ControllerError::HandshakeFailed(_) => FaultCode::HandshakeFailed,
            ControllerError::Fieldbus(_) => FaultCode::Fieldbus,
            ControllerError::NotConnected => FaultCode::NotConnected,
            ControllerError::SafetyRejected(_) => FaultCode::SafetyRejected,
            ControllerError::InvalidCoordinates(_) => FaultCode::InvalidCoordinates,
            ControllerError::InvalidSpeed(_) => FaultCode::InvalidSpeed,
            ControllerError::Busy(_) => FaultCode::Busy,
            ControllerError::Timeout { .. } => FaultCode::Timeout,
            ControllerError::Stopped(_) => FaultCode::Stopped,
            ControllerError::NoMaterial { .. } => FaultCode::NoMaterial,
            ControllerError::Device(_) => FaultCode::Internal,
        }
    }

    /// Fault notification for this error, tagged with the failing operation.
    pub fn to_fault(&self, operation: &str) -> ControllerFault {
        ControllerFault::new(self.code(), format!("{operation} failed")).with_cause(self)
    }
}

/// Command surface shared by every controller.
///
/// Implementations must be usable through `Arc<dyn MotionController>` from
/// any number of tasks. Every `async` method returns `true` on success and
/// `false` on any failure; failures are reported through [`subscribe`] and
/// [`ControllerStatus::last_error`].
///
/// [`subscribe`]: MotionController::subscribe
#[async_trait]
pub trait MotionController: Send + Sync {
    /// Implementation tag.
    fn kind(&self) -> ControllerKind;

    /// Short implementation name for logs.
    fn name(&self) -> &'static str;

    /// Connect. Returns `true` immediately if already connected.
    async fn connect(&self) -> bool;

    /// Disconnect, stopping any motion first. Returns `true` if already
    /// disconnected, without emitting events.
    async fn disconnect(&self) -> bool;

    /// Move to an absolute position.
    async fn move_to(&self, r: f64, theta: f64, z: f64) -> bool;

    /// Move all axes to the reference position and mark the robot homed.
    async fn home(&self) -> bool;

    /// Halt motion and clear the moving flag. Never fails for "already
    /// stopped".
    async fn stop(&self) -> bool;

    /// Pick material at the current position (vacuum on + confirmation).
    async fn pick(&self) -> bool;

    /// Place material at the current position (vacuum off).
    async fn place(&self) -> bool;

    /// Switch the vacuum output.
    async fn set_vacuum(&self, on: bool) -> bool;

    /// Set commanded speed in percent; values outside 1..=100 are rejected.
    async fn set_speed(&self, percent: u32) -> bool;

    /// Current status snapshot.
    fn status(&self) -> ControllerStatus;

    /// Current position snapshot.
    fn position(&self) -> Position {
        self.status().position
    }

    /// Pure safety predicate; performs no I/O and has no side effects.
    fn is_safe_to_operate(&self) -> bool;

    /// Subscribe to status/position/error events.
    fn subscribe(&self) -> broadcast::Receiver<ControllerEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Axis;

    #[test]
    fn test_error_codes() {
        assert_eq!(ControllerError::NotConnected.code(), FaultCode::NotConnected);
        assert_eq!(ControllerError::Busy("move").code(), FaultCode::Busy);
        assert_eq!(
            ControllerError::Timeout {
                operation: "move",
                elapsed: Duration::from_secs(6)
            }
            .code(),
            FaultCode::Timeout
        );
        let coord = CoordinateError::NotFinite { axis: Axis::R };
        assert_eq!(
            ControllerError::from(coord).code(),
            FaultCode::InvalidCoordinates
        );
    }

    #[test]
    fn test_to_fault_carries_cause() {
        let fault = ControllerError::InvalidSpeed(150).to_fault("set_speed");
        assert_eq!(fault.code, FaultCode::InvalidSpeed);
        assert_eq!(fault.message, "set_speed failed");
        assert!(fault.cause.unwrap().contains("150"));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ControllerKind::Simulated.to_string(), "simulated");
        assert_eq!(ControllerKind::HardwareBacked.to_string(), "hardware");
    }
}

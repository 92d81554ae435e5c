//! Controller notifications.
//!
//! Controllers publish three kinds of events on a broadcast channel:
//! status changes, position changes and faults. Within a single operation
//! they are emitted in that order. Publishing never blocks and never fails;
//! a lagging subscriber loses the oldest events.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::trace;

use crate::consts::EVENT_CHANNEL_CAPACITY;
use crate::types::{ControllerStatus, Position};

/// Machine-readable fault classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultCode {
    /// Endpoint or device could not be opened.
    ConnectionFailed,
    /// Device opened but did not answer the handshake.
    HandshakeFailed,
    /// Fieldbus master initialisation or transfer failed.
    Fieldbus,
    /// Command issued while disconnected.
    NotConnected,
    /// Motion refused by the safety gate.
    SafetyRejected,
    /// Target coordinates invalid or out of range.
    InvalidCoordinates,
    /// Speed outside 1..=100.
    InvalidSpeed,
    /// Another position-changing operation is in flight.
    Busy,
    /// Poll-until-converged deadline exceeded.
    Timeout,
    /// Operation interrupted by `stop()`.
    Stopped,
    /// Pick could not confirm material on the end effector.
    NoMaterial,
    /// Following error beyond limit while moving.
    PositionError,
    /// Temperature above the warning threshold.
    OverTemperatureWarning,
    /// Temperature above the alarm threshold.
    OverTemperature,
    /// Emergency stop circuit open.
    EmergencyStop,
    /// Enclosure door open.
    DoorOpen,
    /// Light curtain interrupted.
    LightCurtain,
    /// Vacuum on but pressure too low.
    LowVacuum,
    /// Drive reported a fault.
    DriveFault,
    /// Anything not covered above.
    Internal,
}

impl FaultCode {
    /// True for alarms raised by the sensor-feedback loop.
    pub const fn is_sensor_alarm(self) -> bool {
        matches!(
            self,
            FaultCode::PositionError
                | FaultCode::OverTemperatureWarning
                | FaultCode::OverTemperature
                | FaultCode::EmergencyStop
                | FaultCode::DoorOpen
                | FaultCode::LightCurtain
                | FaultCode::LowVacuum
                | FaultCode::DriveFault
        )
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An error notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerFault {
    /// Classification
    pub code: FaultCode,
    /// Human readable message
    pub message: String,
    /// Underlying cause, if any
    pub cause: Option<String>,
}

impl ControllerFault {
    /// Fault without a cause.
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach a cause.
    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

impl fmt::Display for ControllerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "[{}] {} ({})", self.code, self.message, cause),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

/// Notification published by a controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControllerEvent {
    /// Status snapshot changed.
    StatusChanged {
        /// Snapshot before the transition
        old: ControllerStatus,
        /// Snapshot after the transition
        new: ControllerStatus,
    },
    /// Position changed after a completed move or homing.
    PositionChanged {
        /// Position before the operation
        old: Position,
        /// Position after the operation
        new: Position,
    },
    /// A fault or alarm occurred.
    Error(ControllerFault),
}

/// Broadcast fan-out for controller events.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<ControllerEvent>,
}

impl EventHub {
    /// Create a hub with the default channel capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// New receiver; sees events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ControllerEvent) {
        if self.tx.send(event).is_err() {
            trace!("controller event dropped: no subscribers");
        }
    }

    /// Publish a status transition.
    pub fn status_changed(&self, old: ControllerStatus, new: ControllerStatus) {
        self.emit(ControllerEvent::StatusChanged { old, new });
    }

    /// Publish a position transition.
    pub fn position_changed(&self, old: Position, new: Position) {
        self.emit(ControllerEvent::PositionChanged { old, new });
    }

    /// Publish a fault.
    pub fn fault(&self, fault: ControllerFault) {
        self.emit(ControllerEvent::Error(fault));
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let hub = EventHub::new();
        hub.fault(ControllerFault::new(FaultCode::Internal, "nobody listens"));
        assert_eq!(hub.receiver_count(), 0);
    }

    #[test]
    fn test_events_arrive_in_order() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();

        let old = ControllerStatus::default();
        let mut new = old.clone();
        new.moving = true;
        hub.status_changed(old, new);
        hub.position_changed(Position::ORIGIN, Position::new(1.0, 2.0, 3.0));
        hub.fault(ControllerFault::new(FaultCode::Timeout, "late"));

        assert!(matches!(
            rx.try_recv().unwrap(),
            ControllerEvent::StatusChanged { new, .. } if new.moving
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ControllerEvent::PositionChanged { .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ControllerEvent::Error(f) if f.code == FaultCode::Timeout
        ));
    }

    #[test]
    fn test_fault_display() {
        let f = ControllerFault::new(FaultCode::ConnectionFailed, "open failed")
            .with_cause("permission denied");
        assert_eq!(
            f.to_string(),
            "[ConnectionFailed] open failed (permission denied)"
        );
        assert!(FaultCode::LowVacuum.is_sensor_alarm());
        assert!(!FaultCode::Timeout.is_sensor_alarm());
    }
}

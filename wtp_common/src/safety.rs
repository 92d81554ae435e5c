//! Safety gating and sensor alarm evaluation.
//!
//! Defines `SafetyConditions` (7 boolean gates), the external
//! `SafetyInterlock` verdict, and `AlarmFlags` derived from a
//! [`SensorSnapshot`].

use bitflags::bitflags;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::SafetySettings;
use crate::events::FaultCode;
use crate::types::SensorSnapshot;

/// External safety system verdict (safety PLC, key switch, UI interlock).
pub trait SafetyInterlock: Send + Sync {
    /// True when the external safety system permits motion.
    fn is_safe(&self) -> bool;
}

/// Interlock backed by a flag that can be flipped at runtime.
#[derive(Debug)]
pub struct SafetySwitch {
    safe: AtomicBool,
}

impl SafetySwitch {
    /// Create a switch with the given initial verdict.
    pub const fn new(safe: bool) -> Self {
        Self {
            safe: AtomicBool::new(safe),
        }
    }

    /// Change the verdict.
    pub fn set(&self, safe: bool) {
        self.safe.store(safe, Ordering::SeqCst);
    }
}

impl Default for SafetySwitch {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SafetyInterlock for SafetySwitch {
    fn is_safe(&self) -> bool {
        self.safe.load(Ordering::SeqCst)
    }
}

/// Gate conditions for motion, pick and place.
///
/// Motion is blocked when ANY flag is `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyConditions {
    /// Controller is connected.
    pub connected: bool,
    /// Emergency stop circuit closed.
    pub estop_clear: bool,
    /// Enclosure door closed.
    pub door_closed: bool,
    /// Light curtain not interrupted.
    pub light_curtain_clear: bool,
    /// Temperature at or below the operating maximum.
    pub temperature_ok: bool,
    /// All drives ready and enabled.
    pub servo_ready: bool,
    /// External safety system permits motion.
    pub external_ok: bool,
}

impl SafetyConditions {
    /// Conditions for a controller without sensors (simulation).
    pub const fn without_sensors(connected: bool, external_ok: bool) -> Self {
        Self {
            connected,
            estop_clear: true,
            door_closed: true,
            light_curtain_clear: true,
            temperature_ok: true,
            servo_ready: true,
            external_ok,
        }
    }

    /// Conditions derived from a sensor snapshot.
    pub fn from_snapshot(
        connected: bool,
        snapshot: &SensorSnapshot,
        settings: &SafetySettings,
        external_ok: bool,
    ) -> Self {
        Self {
            connected,
            estop_clear: !snapshot.emergency_stop,
            door_closed: snapshot.door_closed,
            light_curtain_clear: snapshot.light_curtain_clear,
            temperature_ok: snapshot.temperature_c <= settings.temperature_operate_max_c,
            servo_ready: snapshot.servos_ready(),
            external_ok,
        }
    }

    /// Returns true if ALL conditions are satisfied.
    #[inline]
    pub const fn all_ok(&self) -> bool {
        self.connected
            && self.estop_clear
            && self.door_closed
            && self.light_curtain_clear
            && self.temperature_ok
            && self.servo_ready
            && self.external_ok
    }

    /// Description of the first failing condition.
    pub fn first_violation(&self) -> Option<&'static str> {
        if !self.connected {
            Some("controller not connected")
        } else if !self.estop_clear {
            Some("emergency stop active")
        } else if !self.door_closed {
            Some("door open")
        } else if !self.light_curtain_clear {
            Some("light curtain interrupted")
        } else if !self.temperature_ok {
            Some("temperature above operating limit")
        } else if !self.servo_ready {
            Some("servo not ready")
        } else if !self.external_ok {
            Some("external safety system not ready")
        } else {
            None
        }
    }
}

bitflags! {
    /// Sensor-derived alarm flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AlarmFlags: u16 {
        /// Following error beyond limit while moving.
        const POSITION_ERROR   = 0x0001;
        /// Temperature at or above the warning threshold.
        const OVER_TEMP_WARN   = 0x0002;
        /// Temperature at or above the alarm threshold.
        const OVER_TEMP        = 0x0004;
        /// Emergency stop active.
        const EMERGENCY_STOP   = 0x0008;
        /// Door open.
        const DOOR_OPEN        = 0x0010;
        /// Light curtain interrupted.
        const LIGHT_CURTAIN    = 0x0020;
        /// Vacuum on with low pressure.
        const LOW_VACUUM       = 0x0040;
        /// A drive reports a fault.
        const DRIVE_FAULT      = 0x0080;
    }
}

impl AlarmFlags {
    /// Flags that prevent motion outright.
    pub const BLOCKING_MASK: Self = Self::from_bits_truncate(
        Self::OVER_TEMP.bits()
            | Self::EMERGENCY_STOP.bits()
            | Self::DOOR_OPEN.bits()
            | Self::LIGHT_CURTAIN.bits()
            | Self::DRIVE_FAULT.bits(),
    );

    /// Evaluate a snapshot.
    pub fn evaluate(
        snapshot: &SensorSnapshot,
        moving: bool,
        vacuum_on: bool,
        settings: &SafetySettings,
    ) -> Self {
        let mut flags = AlarmFlags::empty();

        if moving
            && snapshot
                .axes
                .iter()
                .any(|a| a.following_error.abs() > settings.position_error_limit_pulses)
        {
            flags |= AlarmFlags::POSITION_ERROR;
        }
        if snapshot.temperature_c >= settings.temperature_alarm_c {
            flags |= AlarmFlags::OVER_TEMP;
        } else if snapshot.temperature_c >= settings.temperature_warn_c {
            flags |= AlarmFlags::OVER_TEMP_WARN;
        }
        if snapshot.emergency_stop {
            flags |= AlarmFlags::EMERGENCY_STOP;
        }
        if !snapshot.door_closed {
            flags |= AlarmFlags::DOOR_OPEN;
        }
        if !snapshot.light_curtain_clear {
            flags |= AlarmFlags::LIGHT_CURTAIN;
        }
        if vacuum_on && snapshot.vacuum_pressure_pct < settings.low_vacuum_alarm_pct {
            flags |= AlarmFlags::LOW_VACUUM;
        }
        if snapshot.axes.iter().any(|a| a.fault) {
            flags |= AlarmFlags::DRIVE_FAULT;
        }

        flags
    }

    /// Flags set in `self` that were clear in `previous`.
    #[inline]
    pub fn raised_since(self, previous: AlarmFlags) -> AlarmFlags {
        self.difference(previous)
    }

    /// Fault code of a single flag.
    pub fn fault_code(self) -> FaultCode {
        if self.contains(AlarmFlags::EMERGENCY_STOP) {
            FaultCode::EmergencyStop
        } else if self.contains(AlarmFlags::OVER_TEMP) {
            FaultCode::OverTemperature
        } else if self.contains(AlarmFlags::DRIVE_FAULT) {
            FaultCode::DriveFault
        } else if self.contains(AlarmFlags::LIGHT_CURTAIN) {
            FaultCode::LightCurtain
        } else if self.contains(AlarmFlags::DOOR_OPEN) {
            FaultCode::DoorOpen
        } else if self.contains(AlarmFlags::POSITION_ERROR) {
            FaultCode::PositionError
        } else if self.contains(AlarmFlags::LOW_VACUUM) {
            FaultCode::LowVacuum
        } else if self.contains(AlarmFlags::OVER_TEMP_WARN) {
            FaultCode::OverTemperatureWarning
        } else {
            FaultCode::Internal
        }
    }
}

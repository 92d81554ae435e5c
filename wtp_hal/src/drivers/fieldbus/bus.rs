//! Fieldbus master port.
//!
//! The hardware controller talks to its three servo drives and the
//! peripheral I/O module exclusively through [`FieldbusMaster`]. Process data
//! follows CiA-402 conventions:
//!
//! | Operation | Mode              | Control word                                  |
//! |-----------|-------------------|-----------------------------------------------|
//! | enable    | any               | `SWITCH_ON│ENABLE_VOLTAGE│QUICK_STOP│ENABLE_OPERATION` |
//! | move      | profile position  | enable + `NEW_SETPOINT`, target + velocity    |
//! | home      | homing            | enable + `HOMING_START`, homing method        |
//! | stop      | any               | enable with `QUICK_STOP` cleared              |

use async_trait::async_trait;
use bitflags::bitflags;
use thiserror::Error;
use wtp_common::controller::ControllerError;
use wtp_common::types::Axis;

bitflags! {
    /// CiA-402 control word (object 0x6040).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ControlWord: u16 {
        /// Switch on
        const SWITCH_ON        = 0x0001;
        /// Enable voltage
        const ENABLE_VOLTAGE   = 0x0002;
        /// Quick stop (active low: cleared = quick stop requested)
        const QUICK_STOP       = 0x0004;
        /// Enable operation
        const ENABLE_OPERATION = 0x0008;
        /// New set-point (profile position mode)
        const NEW_SETPOINT     = 0x0010;
        /// Homing operation start (homing mode, same bit as NEW_SETPOINT)
        const HOMING_START     = 0x0010;
        /// Fault reset (rising edge)
        const FAULT_RESET      = 0x0080;
        /// Halt
        const HALT             = 0x0100;
    }
}

impl ControlWord {
    /// Drive enabled and running.
    pub const ENABLE: Self = Self::from_bits_truncate(
        Self::SWITCH_ON.bits()
            | Self::ENABLE_VOLTAGE.bits()
            | Self::QUICK_STOP.bits()
            | Self::ENABLE_OPERATION.bits(),
    );

    /// Quick-stop request: enabled but with `QUICK_STOP` cleared.
    pub const QUICK_STOP_REQUEST: Self = Self::from_bits_truncate(
        Self::SWITCH_ON.bits() | Self::ENABLE_VOLTAGE.bits() | Self::ENABLE_OPERATION.bits(),
    );

    /// True if the word enables operation without a quick-stop request.
    pub fn is_enabled(self) -> bool {
        self.contains(Self::ENABLE)
    }
}

bitflags! {
    /// CiA-402 status word (object 0x6041).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusWord: u16 {
        /// Ready to switch on
        const READY_TO_SWITCH_ON = 0x0001;
        /// Switched on
        const SWITCHED_ON        = 0x0002;
        /// Operation enabled
        const OPERATION_ENABLED  = 0x0004;
        /// Fault
        const FAULT              = 0x0008;
        /// Voltage enabled
        const VOLTAGE_ENABLED    = 0x0010;
        /// Quick stop (active low)
        const QUICK_STOP         = 0x0020;
        /// Switch on disabled
        const SWITCH_ON_DISABLED = 0x0040;
        /// Warning
        const WARNING            = 0x0080;
        /// Target reached
        const TARGET_REACHED     = 0x0400;
        /// Homing attained (homing mode)
        const HOMING_ATTAINED    = 0x1000;
        /// Following error
        const FOLLOWING_ERROR    = 0x2000;
    }
}

/// Modes of operation (object 0x6060).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationMode {
    /// Profile position
    #[default]
    ProfilePosition,
    /// Homing
    Homing,
}

/// Homing method used for every axis (home switch, negative direction).
pub const HOMING_METHOD: i8 = 17;

/// Per-axis outputs (RxPDO).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisOutputs {
    /// Control word
    pub control: ControlWord,
    /// Mode of operation
    pub mode: OperationMode,
    /// Target position [pulses]
    pub target_position: i32,
    /// Profile velocity [pulses/s]
    pub profile_velocity: u32,
    /// Homing method
    pub homing_method: i8,
}

impl AxisOutputs {
    /// Enable the drive and hold `position`.
    pub fn enable(position: i32) -> Self {
        Self {
            control: ControlWord::ENABLE,
            target_position: position,
            ..Self::default()
        }
    }

    /// Profile-position move.
    pub fn move_to(target_position: i32, profile_velocity: u32) -> Self {
        Self {
            control: ControlWord::ENABLE | ControlWord::NEW_SETPOINT,
            mode: OperationMode::ProfilePosition,
            target_position,
            profile_velocity,
            homing_method: 0,
        }
    }

    /// Start homing.
    pub fn home(profile_velocity: u32) -> Self {
        Self {
            control: ControlWord::ENABLE | ControlWord::HOMING_START,
            mode: OperationMode::Homing,
            target_position: 0,
            profile_velocity,
            homing_method: HOMING_METHOD,
        }
    }

    /// Quick stop.
    pub fn quick_stop() -> Self {
        Self {
            control: ControlWord::QUICK_STOP_REQUEST,
            ..Self::default()
        }
    }
}

/// Per-axis inputs (TxPDO).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisInputs {
    /// Status word
    pub status: StatusWord,
    /// Actual position [pulses]
    pub actual_position: i32,
    /// Actual velocity [pulses/s]
    pub actual_velocity: i32,
    /// Following error [pulses]
    pub following_error: i32,
}

/// Peripheral outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeripheralOutputs {
    /// Vacuum generator on
    pub vacuum_on: bool,
    /// Vacuum valve open
    pub valve_open: bool,
}

/// Peripheral inputs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PeripheralInputs {
    /// Cabinet temperature [°C]
    pub temperature_c: f64,
    /// Vibration [mm/s RMS]
    pub vibration: f64,
    /// Summed motor current [A]
    pub motor_current_a: f64,
    /// Emergency stop circuit open
    pub emergency_stop: bool,
    /// Door closed
    pub door_closed: bool,
    /// Light curtain clear
    pub light_curtain_clear: bool,
    /// Vacuum pressure [% of nominal]
    pub vacuum_pressure_pct: f64,
    /// Raw end-effector presence sensor
    pub wafer_sensor: bool,
    /// Cassette at the load station
    pub cassette_present: bool,
    /// Load port ready
    pub loadport_ready: bool,
    /// Vacuum valve feedback
    pub valve_open: bool,
}

/// Fieldbus errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldbusError {
    /// Operation on a closed master.
    #[error("Fieldbus master not open")]
    NotOpen,

    /// Master initialisation failed.
    #[error("Fieldbus open failed: {0}")]
    Open(String),

    /// Process data exchange failed.
    #[error("Fieldbus transfer failed on {target}: {reason}")]
    Transfer {
        /// Axis or peripheral module
        target: String,
        /// Failure description
        reason: String,
    },

    /// No backend with that name.
    #[error("Unknown fieldbus backend: {0}")]
    UnknownBackend(String),
}

impl From<FieldbusError> for ControllerError {
    fn from(e: FieldbusError) -> Self {
        ControllerError::Fieldbus(e.to_string())
    }
}

/// Fieldbus master.
///
/// Implementations live behind an async mutex; each call is one transaction.
#[async_trait]
pub trait FieldbusMaster: Send {
    /// Backend name.
    fn name(&self) -> &'static str;

    /// Bring the bus up. `endpoint` is backend specific (interface, port).
    async fn open(&mut self, endpoint: Option<&str>) -> Result<(), FieldbusError>;

    /// Shut the bus down. Closing a closed master is a no-op.
    async fn close(&mut self) -> Result<(), FieldbusError>;

    /// True while open.
    fn is_open(&self) -> bool;

    /// Write one axis' outputs.
    async fn write_axis(&mut self, axis: Axis, outputs: &AxisOutputs) -> Result<(), FieldbusError>;

    /// Read one axis' inputs.
    async fn read_axis(&mut self, axis: Axis) -> Result<AxisInputs, FieldbusError>;

    /// Write peripheral outputs.
    async fn write_peripherals(&mut self, outputs: &PeripheralOutputs)
    -> Result<(), FieldbusError>;

    /// Read peripheral inputs.
    async fn read_peripherals(&mut self) -> Result<PeripheralInputs, FieldbusError>;
}

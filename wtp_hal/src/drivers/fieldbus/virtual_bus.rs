//! In-process fieldbus backend.
//!
//! `VirtualFieldbus` models three CiA-402 drives and the peripheral I/O
//! module. Drive positions advance with elapsed (tokio) time at the
//! commanded profile velocity, so the hardware controller's polling protocol
//! runs unchanged against it. A [`VirtualFieldbusHandle`] reaches into the
//! plant for fault injection.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;
use wtp_common::types::Axis;

use super::bus::{
    AxisInputs, AxisOutputs, ControlWord, FieldbusError, FieldbusMaster, OperationMode,
    PeripheralInputs, PeripheralOutputs, StatusWord,
};

/// Pressure with material held by vacuum [%].
const PRESSURE_HOLDING: f64 = 92.0;
/// Pressure with vacuum on and nothing held [%].
const PRESSURE_OPEN: f64 = 15.0;

#[derive(Debug, Clone, Copy, Default)]
struct DriveModel {
    position: f64,
    target: i32,
    velocity: u32,
    control: ControlWord,
    homing: bool,
    fault: bool,
    following_error: i32,
    actual_velocity: i32,
}

impl DriveModel {
    fn advance(&mut self, dt: f64, stalled: bool) {
        if !self.control.is_enabled() || self.fault || stalled {
            self.actual_velocity = 0;
            return;
        }
        let remaining = f64::from(self.target) - self.position;
        let step = f64::from(self.velocity) * dt;
        if remaining.abs() <= step {
            self.position = f64::from(self.target);
            self.actual_velocity = 0;
        } else {
            self.position += step.copysign(remaining);
            self.actual_velocity = (self.velocity as i32).saturating_mul(remaining.signum() as i32);
        }
    }

    fn apply(&mut self, outputs: &AxisOutputs) {
        self.control = outputs.control;
        if !outputs.control.contains(ControlWord::QUICK_STOP) {
            self.target = self.position.round() as i32;
            self.homing = false;
            return;
        }
        if outputs.control.contains(ControlWord::FAULT_RESET) {
            self.fault = false;
        }
        match outputs.mode {
            OperationMode::ProfilePosition
                if outputs.control.contains(ControlWord::NEW_SETPOINT) =>
            {
                self.target = outputs.target_position;
                self.velocity = outputs.profile_velocity;
                self.homing = false;
            }
            OperationMode::Homing if outputs.control.contains(ControlWord::HOMING_START) => {
                self.target = 0;
                self.velocity = outputs.profile_velocity;
                self.homing = true;
            }
            _ => {}
        }
    }

    fn inputs(&self) -> AxisInputs {
        let mut status = StatusWord::VOLTAGE_ENABLED;
        if self.fault {
            status |= StatusWord::FAULT;
        } else {
            status |= StatusWord::READY_TO_SWITCH_ON;
        }
        if self.control.contains(ControlWord::QUICK_STOP) {
            status |= StatusWord::QUICK_STOP;
        }
        if self.control.is_enabled() && !self.fault {
            status |= StatusWord::SWITCHED_ON | StatusWord::OPERATION_ENABLED;
        }
        let reached = (f64::from(self.target) - self.position).abs() < 1.0;
        if reached {
            status |= StatusWord::TARGET_REACHED;
            if self.homing {
                status |= StatusWord::HOMING_ATTAINED;
            }
        }
        if self.following_error != 0 {
            status |= StatusWord::FOLLOWING_ERROR;
        }
        AxisInputs {
            status,
            actual_position: self.position.round() as i32,
            actual_velocity: self.actual_velocity,
            following_error: self.following_error,
        }
    }
}

#[derive(Debug)]
struct Plant {
    drives: [DriveModel; 3],
    outputs: PeripheralOutputs,
    temperature_c: f64,
    emergency_stop: bool,
    door_closed: bool,
    light_curtain_clear: bool,
    material_present: bool,
    cassette_present: bool,
    stalled: bool,
    fail_open: bool,
    fail_transfers: bool,
    open: bool,
    last_update: Option<Instant>,
    axis_writes: usize,
    peripheral_writes: usize,
}

impl Default for Plant {
    fn default() -> Self {
        Self {
            drives: [DriveModel::default(); 3],
            outputs: PeripheralOutputs::default(),
            temperature_c: 28.0,
            emergency_stop: false,
            door_closed: true,
            light_curtain_clear: true,
            material_present: true,
            cassette_present: true,
            stalled: false,
            fail_open: false,
            fail_transfers: false,
            open: false,
            last_update: None,
            axis_writes: 0,
            peripheral_writes: 0,
        }
    }
}

impl Plant {
    fn advance(&mut self) {
        let now = Instant::now();
        let dt = self
            .last_update
            .map(|last| now.saturating_duration_since(last).as_secs_f64())
            .unwrap_or(0.0);
        self.last_update = Some(now);
        let stalled = self.stalled;
        for drive in self.drives.iter_mut() {
            drive.advance(dt, stalled);
        }
    }

    fn check(&self, target: &str) -> Result<(), FieldbusError> {
        if !self.open {
            return Err(FieldbusError::NotOpen);
        }
        if self.fail_transfers {
            return Err(FieldbusError::Transfer {
                target: target.to_string(),
                reason: "no response".to_string(),
            });
        }
        Ok(())
    }

    fn peripherals(&self) -> PeripheralInputs {
        let vacuum_pressure_pct = match (self.outputs.vacuum_on, self.material_present) {
            (false, _) => 0.0,
            (true, true) => PRESSURE_HOLDING,
            (true, false) => PRESSURE_OPEN,
        };
        let moving = self.drives.iter().filter(|d| d.actual_velocity != 0).count();
        PeripheralInputs {
            temperature_c: self.temperature_c,
            vibration: 0.2 * moving as f64,
            motor_current_a: 0.4 + 1.1 * moving as f64,
            emergency_stop: self.emergency_stop,
            door_closed: self.door_closed,
            light_curtain_clear: self.light_curtain_clear,
            vacuum_pressure_pct,
            wafer_sensor: self.material_present,
            cassette_present: self.cassette_present,
            loadport_ready: self.cassette_present,
            valve_open: self.outputs.valve_open,
        }
    }
}

/// In-process fieldbus master.
#[derive(Debug, Default)]
pub struct VirtualFieldbus {
    plant: Arc<Mutex<Plant>>,
}

impl VirtualFieldbus {
    /// Plant with drives at zero, door closed, material present.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for inspection and fault injection.
    pub fn handle(&self) -> VirtualFieldbusHandle {
        VirtualFieldbusHandle {
            plant: Arc::clone(&self.plant),
        }
    }
}

/// Factory registered as the `"virtual"` backend.
pub fn create_master() -> Box<dyn FieldbusMaster> {
    Box::new(VirtualFieldbus::new())
}

#[async_trait]
impl FieldbusMaster for VirtualFieldbus {
    fn name(&self) -> &'static str {
        "virtual"
    }

    async fn open(&mut self, endpoint: Option<&str>) -> Result<(), FieldbusError> {
        let mut plant = self.plant.lock();
        if plant.fail_open {
            return Err(FieldbusError::Open(format!(
                "no slaves found on {}",
                endpoint.unwrap_or("virtual bus")
            )));
        }
        plant.open = true;
        plant.last_update = Some(Instant::now());
        debug!(endpoint = ?endpoint, "virtual fieldbus open");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FieldbusError> {
        let mut plant = self.plant.lock();
        plant.open = false;
        for drive in plant.drives.iter_mut() {
            drive.control = ControlWord::empty();
        }
        plant.outputs = PeripheralOutputs::default();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.plant.lock().open
    }

    async fn write_axis(&mut self, axis: Axis, outputs: &AxisOutputs) -> Result<(), FieldbusError> {
        let mut plant = self.plant.lock();
        plant.check(axis.as_str())?;
        plant.advance();
        plant.drives[axis.index()].apply(outputs);
        plant.axis_writes += 1;
        Ok(())
    }

    async fn read_axis(&mut self, axis: Axis) -> Result<AxisInputs, FieldbusError> {
        let mut plant = self.plant.lock();
        plant.check(axis.as_str())?;
        plant.advance();
        Ok(plant.drives[axis.index()].inputs())
    }

    async fn write_peripherals(
        &mut self,
        outputs: &PeripheralOutputs,
    ) -> Result<(), FieldbusError> {
        let mut plant = self.plant.lock();
        plant.check("io")?;
        plant.outputs = *outputs;
        plant.peripheral_writes += 1;
        Ok(())
    }

    async fn read_peripherals(&mut self) -> Result<PeripheralInputs, FieldbusError> {
        let mut plant = self.plant.lock();
        plant.check("io")?;
        plant.advance();
        Ok(plant.peripherals())
    }
}

/// Inspection and fault-injection handle.
#[derive(Debug, Clone)]
pub struct VirtualFieldbusHandle {
    plant: Arc<Mutex<Plant>>,
}

impl VirtualFieldbusHandle {
    /// Drives ignore motion commands.
    pub fn set_stalled(&self, stalled: bool) {
        let mut plant = self.plant.lock();
        plant.advance();
        plant.stalled = stalled;
    }

    /// Next `open()` fails.
    pub fn set_fail_open(&self, fail: bool) {
        self.plant.lock().fail_open = fail;
    }

    /// Every transfer fails.
    pub fn set_fail_transfers(&self, fail: bool) {
        self.plant.lock().fail_transfers = fail;
    }

    /// Cabinet temperature.
    pub fn set_temperature(&self, celsius: f64) {
        self.plant.lock().temperature_c = celsius;
    }

    /// Emergency stop circuit.
    pub fn set_emergency_stop(&self, active: bool) {
        self.plant.lock().emergency_stop = active;
    }

    /// Enclosure door.
    pub fn set_door_closed(&self, closed: bool) {
        self.plant.lock().door_closed = closed;
    }

    /// Light curtain.
    pub fn set_light_curtain_clear(&self, clear: bool) {
        self.plant.lock().light_curtain_clear = clear;
    }

    /// Material on the end effector.
    pub fn set_material_present(&self, present: bool) {
        self.plant.lock().material_present = present;
    }

    /// Drive fault bit.
    pub fn set_drive_fault(&self, axis: Axis, fault: bool) {
        self.plant.lock().drives[axis.index()].fault = fault;
    }

    /// Reported following error.
    pub fn set_following_error(&self, axis: Axis, pulses: i32) {
        self.plant.lock().drives[axis.index()].following_error = pulses;
    }

    /// Place a drive at `pulses` and make that its target.
    pub fn set_position(&self, axis: Axis, pulses: i32) {
        let mut plant = self.plant.lock();
        let drive = &mut plant.drives[axis.index()];
        drive.position = f64::from(pulses);
        drive.target = pulses;
    }

    /// Actual drive position.
    pub fn position(&self, axis: Axis) -> i32 {
        let mut plant = self.plant.lock();
        plant.advance();
        plant.drives[axis.index()].position.round() as i32
    }

    /// Latched target.
    pub fn target(&self, axis: Axis) -> i32 {
        self.plant.lock().drives[axis.index()].target
    }

    /// Last control word written.
    pub fn control(&self, axis: Axis) -> ControlWord {
        self.plant.lock().drives[axis.index()].control
    }

    /// Last peripheral outputs written.
    pub fn peripheral_outputs(&self) -> PeripheralOutputs {
        self.plant.lock().outputs
    }

    /// Total axis and peripheral writes since creation.
    pub fn write_count(&self) -> usize {
        let plant = self.plant.lock();
        plant.axis_writes + plant.peripheral_writes
    }

    /// True while the master is open.
    pub fn is_open(&self) -> bool {
        self.plant.lock().open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_drive_follows_setpoint_at_velocity() {
        let mut bus = VirtualFieldbus::new();
        let handle = bus.handle();
        bus.open(None).await.unwrap();

        bus.write_axis(Axis::R, &AxisOutputs::enable(0)).await.unwrap();
        let inputs = bus.read_axis(Axis::R).await.unwrap();
        assert!(inputs.status.contains(StatusWord::OPERATION_ENABLED));
        assert!(inputs.status.contains(StatusWord::TARGET_REACHED));

        bus.write_axis(Axis::R, &AxisOutputs::move_to(10_000, 10_000))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let inputs = bus.read_axis(Axis::R).await.unwrap();
        assert_eq!(inputs.actual_position, 5_000);
        assert!(!inputs.status.contains(StatusWord::TARGET_REACHED));

        tokio::time::sleep(Duration::from_millis(600)).await;
        let inputs = bus.read_axis(Axis::R).await.unwrap();
        assert_eq!(inputs.actual_position, 10_000);
        assert!(inputs.status.contains(StatusWord::TARGET_REACHED));
        assert_eq!(handle.target(Axis::R), 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quick_stop_holds_position() {
        let mut bus = VirtualFieldbus::new();
        bus.open(None).await.unwrap();
        bus.write_axis(Axis::Z, &AxisOutputs::move_to(-10_000, 10_000))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        bus.write_axis(Axis::Z, &AxisOutputs::quick_stop()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let inputs = bus.read_axis(Axis::Z).await.unwrap();
        assert_eq!(inputs.actual_position, -2_000);
        assert!(!inputs.status.contains(StatusWord::OPERATION_ENABLED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_homing_attained() {
        let mut bus = VirtualFieldbus::new();
        let handle = bus.handle();
        handle.set_position(Axis::Theta, 3_000);
        bus.open(None).await.unwrap();
        bus.write_axis(Axis::Theta, &AxisOutputs::home(10_000))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let inputs = bus.read_axis(Axis::Theta).await.unwrap();
        assert_eq!(inputs.actual_position, 0);
        assert!(inputs.status.contains(StatusWord::HOMING_ATTAINED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_and_failures() {
        let mut bus = VirtualFieldbus::new();
        let handle = bus.handle();
        assert_eq!(bus.read_axis(Axis::R).await, Err(FieldbusError::NotOpen));

        handle.set_fail_open(true);
        assert!(matches!(bus.open(None).await, Err(FieldbusError::Open(_))));
        handle.set_fail_open(false);
        bus.open(Some("eth0")).await.unwrap();

        handle.set_stalled(true);
        bus.write_axis(Axis::R, &AxisOutputs::move_to(10_000, 10_000))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.position(Axis::R), 0);

        handle.set_fail_transfers(true);
        assert!(matches!(
            bus.read_peripherals().await,
            Err(FieldbusError::Transfer { .. })
        ));
    }

    #[tokio::test]
    async fn test_vacuum_pressure_model() {
        let mut bus = VirtualFieldbus::new();
        let handle = bus.handle();
        bus.open(None).await.unwrap();

        assert_eq!(bus.read_peripherals().await.unwrap().vacuum_pressure_pct, 0.0);
        bus.write_peripherals(&PeripheralOutputs {
            vacuum_on: true,
            valve_open: true,
        })
        .await
        .unwrap();
        let io = bus.read_peripherals().await.unwrap();
        assert_eq!(io.vacuum_pressure_pct, PRESSURE_HOLDING);
        assert!(io.valve_open);

        handle.set_material_present(false);
        assert_eq!(
            bus.read_peripherals().await.unwrap().vacuum_pressure_pct,
            PRESSURE_OPEN
        );
    }
}

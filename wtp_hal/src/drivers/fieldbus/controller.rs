//! Hardware-backed controller.
//!
//! Drives three CiA-402 servo axes and the peripheral module through a
//! [`FieldbusMaster`], mirrors its state on the pendant LEDs and keeps a
//! sensor snapshot fresh from a background task.
//!
//! # Sequences
//!
//! | Operation    | Steps                                                              |
//! |--------------|--------------------------------------------------------------------|
//! | `connect`    | pendant identify → open bus → enable drives → sensor refresh → loop |
//! | `move_to`    | gate → convert → setpoint → poll until converged or deadline       |
//! | `home`       | gate → homing start → poll until at zero or 60 s                   |
//! | `stop`       | quick stop on every axis → re-enable holding position             |
//! | `disconnect` | stop (bounded) → end loop → close bus → close pendant              |
//!
//! The safety gate reads the cached sensor snapshot only, so a rejected
//! command performs no device I/O.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use wtp_common::config::{MotionSettings, SafetySettings, WtpConfig};
use wtp_common::consts::{MAX_SPEED_PERCENT, MIN_SPEED_PERCENT};
use wtp_common::controller::{ControllerError, ControllerKind, MotionController};
use wtp_common::coords::{position_from_pulses, to_axis_coordinates, travel_time};
use wtp_common::events::ControllerEvent;
use wtp_common::safety::{AlarmFlags, SafetyConditions, SafetyInterlock};
use wtp_common::types::{Axis, ControllerState, ControllerStatus, Position, SensorSnapshot};

use super::bus::{AxisOutputs, FieldbusMaster, PeripheralOutputs};
use super::indicator::{IndicatorState, PendantIndicator};
use super::sensors::{SensorState, describe, read_snapshot};
use crate::drivers::state::{StatusCell, StopSignal};

/// Controller backed by a fieldbus and a pendant indicator.
pub struct HardwareController {
    shared: Arc<Shared>,
    sensor_task: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    motion: MotionSettings,
    safety: SafetySettings,
    endpoint: Option<String>,
    interlock: Arc<dyn SafetyInterlock>,
    bus: tokio::sync::Mutex<Box<dyn FieldbusMaster>>,
    indicator: PendantIndicator,
    status: StatusCell,
    sensors: SensorState,
    motion_lock: tokio::sync::Mutex<()>,
    lifecycle: tokio::sync::Mutex<()>,
    stop: StopSignal,
}

impl HardwareController {
    /// Create a disconnected controller.
    ///
    /// `endpoint` is handed to [`FieldbusMaster::open`].
    pub fn new(
        config: &WtpConfig,
        bus: Box<dyn FieldbusMaster>,
        endpoint: Option<String>,
        indicator: PendantIndicator,
        interlock: Arc<dyn SafetyInterlock>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                motion: config.motion.clone(),
                safety: config.safety.clone(),
                endpoint,
                interlock,
                bus: tokio::sync::Mutex::new(bus),
                indicator,
                status: StatusCell::new(ControllerStatus {
                    speed_percent: config.motion.default_speed_percent,
                    ..ControllerStatus::default()
                }),
                sensors: SensorState::default(),
                motion_lock: tokio::sync::Mutex::new(()),
                lifecycle: tokio::sync::Mutex::new(()),
                stop: StopSignal::default(),
            }),
            sensor_task: Mutex::new(None),
        }
    }

    /// Latest sensor snapshot.
    pub fn sensor_snapshot(&self) -> SensorSnapshot {
        self.shared.sensors.snapshot()
    }

    /// Alarm flags of the latest snapshot.
    pub fn alarms(&self) -> AlarmFlags {
        self.shared.sensors.alarms()
    }

    /// Fieldbus endpoint.
    pub fn fieldbus_endpoint(&self) -> Option<&str> {
        self.shared.endpoint.as_deref()
    }

    /// Pendant endpoint.
    pub fn pendant_endpoint(&self) -> Option<&str> {
        self.shared.indicator.endpoint()
    }

    /// Force a sensor refresh, bypassing the rate limit.
    pub async fn refresh_sensors(&self) -> bool {
        let result = self.shared.refresh_sensors(true).await;
        self.shared.report("refresh_sensors", result)
    }

    fn start_sensor_loop(&self) {
        let task = tokio::spawn(sensor_loop(
            Arc::downgrade(&self.shared),
            self.shared.safety.sensor_refresh(),
        ));
        if let Some(old) = self.sensor_task.lock().replace(task) {
            old.abort();
        }
    }

    fn stop_sensor_loop(&self) {
        if let Some(task) = self.sensor_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for HardwareController {
    fn drop(&mut self) {
        self.stop_sensor_loop();
    }
}

async fn sensor_loop(shared: Weak<Shared>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failing = false;

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if !shared.status.snapshot().connected {
            continue;
        }
        match shared.refresh_sensors(false).await {
            Ok(()) if failing => {
                info!("Sensor refresh recovered");
                failing = false;
            }
            Ok(()) => {}
            Err(e) if !failing => {
                warn!("Sensor refresh failed: {e}");
                failing = true;
            }
            Err(_) => {}
        }
    }
    debug!("Sensor loop finished");
}

impl Shared {
    fn report(&self, operation: &str, result: Result<(), ControllerError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                self.status.fail(operation, &e);
                false
            }
        }
    }

    fn ensure_connected(&self) -> Result<(), ControllerError> {
        if self.status.snapshot().connected {
            Ok(())
        } else {
            Err(ControllerError::NotConnected)
        }
    }

    fn conditions(&self) -> SafetyConditions {
        SafetyConditions::from_snapshot(
            self.status.snapshot().connected,
            &self.sensors.snapshot(),
            &self.safety,
            self.interlock.is_safe(),
        )
    }

    fn ensure_safe(&self) -> Result<(), ControllerError> {
        self.ensure_connected()?;
        match self.conditions().first_violation() {
            None => Ok(()),
            Some(reason) => Err(ControllerError::SafetyRejected(reason.to_string())),
        }
    }

    fn velocity(&self, axis: Axis, speed_percent: u32) -> u32 {
        self.motion.max_velocity.scaled(axis, speed_percent)
    }

    /// Forced refreshes skip the spacing check but still push back the next
    /// background refresh.
    async fn refresh_sensors(&self, force: bool) -> Result<(), ControllerError> {
        if !force && !self.sensors.claim(self.safety.sensor_refresh()) {
            return Ok(());
        }
        // Stored under the bus guard so snapshots land in read order.
        let (snapshot, status, transition) = {
            let mut bus = self.bus.lock().await;
            let snapshot = read_snapshot(&mut **bus, &self.safety).await?;
            let status = self.status.snapshot();
            let transition =
                self.sensors
                    .store(snapshot.clone(), status.moving, status.vacuum_on, &self.safety);
            (snapshot, status, transition)
        };

        for fault in transition.faults(&snapshot) {
            warn!(code = %fault.code, "{fault}");
            self.status.events().fault(fault);
        }

        if transition.blocking() {
            self.indicator.show(IndicatorState::Alarm).await;
        } else if transition.blocking_cleared() && status.connected {
            self.indicator
                .show(if status.moving {
                    IndicatorState::Moving
                } else {
                    IndicatorState::Ready
                })
                .await;
        }
        Ok(())
    }

    /// Indicator state for a connected controller at rest.
    async fn show_idle(&self) {
        if !self.status.snapshot().connected {
            return;
        }
        if self.sensors.alarms().intersects(AlarmFlags::BLOCKING_MASK) {
            self.indicator.show(IndicatorState::Alarm).await;
        } else {
            self.indicator.show(IndicatorState::Ready).await;
        }
    }

    async fn open_devices(&self) -> Result<(), ControllerError> {
        self.indicator.open().await?;
        {
            let mut bus = self.bus.lock().await;
            bus.open(self.endpoint.as_deref()).await?;
            for axis in Axis::ALL {
                let actual = bus.read_axis(axis).await?.actual_position;
                bus.write_axis(axis, &AxisOutputs::enable(actual)).await?;
            }
        }
        self.refresh_sensors(true).await
    }

    async fn close_devices(&self) {
        if let Err(e) = self.bus.lock().await.close().await {
            warn!("Fieldbus close failed: {e}");
        }
        self.indicator.close().await;
    }

    /// Quick stop every axis, then re-enable holding the reached position.
    async fn halt(&self) -> Result<(), ControllerError> {
        let mut bus = self.bus.lock().await;
        for axis in Axis::ALL {
            bus.write_axis(axis, &AxisOutputs::quick_stop()).await?;
        }
        for axis in Axis::ALL {
            let actual = bus.read_axis(axis).await?.actual_position;
            bus.write_axis(axis, &AxisOutputs::enable(actual)).await?;
        }
        Ok(())
    }

    async fn halt_logged(&self, operation: &'static str) {
        if let Err(e) = self.halt().await {
            warn!(operation, "Quick stop failed: {e}");
        }
    }

    /// Poll until every axis is within `tolerance` of `target`.
    ///
    /// Returns the reached pulse positions.
    async fn converge(
        &self,
        operation: &'static str,
        stop_since: u64,
        target: [i32; 3],
        tolerance: i32,
        budget: Duration,
    ) -> Result<[i32; 3], ControllerError> {
        let started = Instant::now();
        let deadline = started + budget;

        loop {
            tokio::time::sleep(self.motion.poll_interval()).await;
            self.stop.check(stop_since, operation)?;
            self.refresh_sensors(true).await?;

            let snapshot = self.sensors.snapshot();
            let actual = Axis::ALL.map(|a| snapshot.axis(a).position_pulses);
            self.status
                .update(|s| s.position = position_from_pulses(actual[0], actual[1], actual[2]));

            let blocking = self.sensors.alarms() & AlarmFlags::BLOCKING_MASK;
            if let Some(alarm) = blocking.iter().next() {
                self.halt_logged(operation).await;
                return Err(ControllerError::SafetyRejected(format!(
                    "{} during {operation}",
                    describe(alarm)
                )));
            }

            if Axis::ALL
                .iter()
                .all(|&a| (actual[a.index()] - target[a.index()]).abs() <= tolerance)
            {
                return Ok(actual);
            }

            if Instant::now() >= deadline {
                self.halt_logged(operation).await;
                return Err(ControllerError::Timeout {
                    operation,
                    elapsed: started.elapsed(),
                });
            }
        }
    }

    async fn run_move(&self, target: Position) -> Result<(), ControllerError> {
        self.ensure_safe()?;
        let speed = self.status.snapshot().speed_percent;
        let coords = to_axis_coordinates(&target, speed)?;
        if let Some(limits) = &self.motion.soft_limits {
            limits.check(&target)?;
        }

        let held = StatusCell::try_acquire(&self.motion_lock, "move")?;
        let stop_since = self.stop.current();
        let start = self.status.snapshot().position;
        let from = self.sensors.snapshot();
        let velocity = Axis::ALL.map(|a| self.velocity(a, speed));
        let estimate = Axis::ALL
            .iter()
            .map(|&a| {
                let delta = i64::from(coords.axis(a)) - i64::from(from.axis(a).position_pulses);
                travel_time(delta, velocity[a.index()])
            })
            .max()
            .unwrap_or_default();

        let _guard = self.status.begin_motion(held, ControllerState::Moving);
        self.indicator.show(IndicatorState::Moving).await;
        debug!(
            r = coords.r,
            theta = coords.theta,
            z = coords.z,
            speed,
            estimate_ms = estimate.as_millis() as u64,
            "move {start} -> {target}"
        );

        {
            let mut bus = self.bus.lock().await;
            for axis in Axis::ALL {
                let outputs = AxisOutputs::move_to(coords.axis(axis), velocity[axis.index()]);
                bus.write_axis(axis, &outputs).await?;
            }
        }

        let actual = self
            .converge(
                "move",
                stop_since,
                [coords.r, coords.theta, coords.z],
                self.motion.move_tolerance_pulses,
                estimate + self.motion.move_timeout_margin(),
            )
            .await?;

        let end = position_from_pulses(actual[0], actual[1], actual[2]);
        self.status.update(|s| {
            s.position = end;
            s.moving = false;
            s.state = ControllerState::Idle;
        });
        self.status.position_changed(start, end);
        Ok(())
    }

    async fn run_home(&self) -> Result<(), ControllerError> {
        self.ensure_safe()?;
        let held = StatusCell::try_acquire(&self.motion_lock, "home")?;
        let stop_since = self.stop.current();
        let start = self.status.snapshot().position;
        let speed = self.status.snapshot().speed_percent;

        let _guard = self.status.begin_motion(held, ControllerState::Homing);
        self.indicator.show(IndicatorState::Moving).await;
        {
            let mut bus = self.bus.lock().await;
            for axis in Axis::ALL {
                bus.write_axis(axis, &AxisOutputs::home(self.velocity(axis, speed)))
                    .await?;
            }
        }

        let actual = self
            .converge(
                "home",
                stop_since,
                [0; 3],
                self.motion.home_tolerance_pulses,
                self.motion.home_timeout(),
            )
            .await?;

        {
            let mut bus = self.bus.lock().await;
            for axis in Axis::ALL {
                bus.write_axis(axis, &AxisOutputs::enable(actual[axis.index()]))
                    .await?;
            }
        }

        self.status.update(|s| {
            s.position = Position::ORIGIN;
            s.homed = true;
            s.moving = false;
            s.state = ControllerState::Idle;
        });
        self.status.position_changed(start, Position::ORIGIN);
        info!("Homing complete");
        Ok(())
    }

    async fn apply_vacuum(&self, on: bool) -> Result<(), ControllerError> {
        self.bus
            .lock()
            .await
            .write_peripherals(&PeripheralOutputs {
                vacuum_on: on,
                valve_open: on,
            })
            .await?;
        self.status.update(|s| s.vacuum_on = on);
        Ok(())
    }

    async fn run_pick(&self) -> Result<(), ControllerError> {
        self.ensure_safe()?;
        let _held = StatusCell::try_acquire(&self.motion_lock, "pick")?;

        self.indicator.show(IndicatorState::Moving).await;
        self.apply_vacuum(true).await?;
        tokio::time::sleep(self.motion.pick_settle()).await;
        self.refresh_sensors(true).await?;

        let snapshot = self.sensors.snapshot();
        if snapshot.wafer_detected
            || snapshot.vacuum_pressure_pct > self.safety.pick_confirm_pressure_pct
        {
            debug!(pressure = snapshot.vacuum_pressure_pct, "Pick confirmed");
            Ok(())
        } else {
            self.apply_vacuum(false).await?;
            Err(ControllerError::NoMaterial {
                pressure_pct: snapshot.vacuum_pressure_pct,
            })
        }
    }

    async fn run_place(&self) -> Result<(), ControllerError> {
        self.ensure_safe()?;
        let _held = StatusCell::try_acquire(&self.motion_lock, "place")?;

        self.indicator.show(IndicatorState::Moving).await;
        tokio::time::sleep(self.motion.place_settle()).await;
        self.apply_vacuum(false).await?;
        tokio::time::sleep(self.motion.place_settle()).await;
        Ok(())
    }
}

#[async_trait]
impl MotionController for HardwareController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::HardwareBacked
    }

    fn name(&self) -> &'static str {
        "fieldbus"
    }

    async fn connect(&self) -> bool {
        let shared = &self.shared;
        let _lifecycle = shared.lifecycle.lock().await;
        if shared.status.snapshot().connected {
            return true;
        }

        shared.status.update(|s| s.state = ControllerState::Connecting);
        if let Err(e) = shared.open_devices().await {
            shared.close_devices().await;
            shared.sensors.reset();
            shared.status.update(|s| s.state = ControllerState::Disconnected);
            shared.status.fail("connect", &e);
            return false;
        }

        let snapshot = shared.sensors.snapshot();
        let position = position_from_pulses(
            snapshot.axis(Axis::R).position_pulses,
            snapshot.axis(Axis::Theta).position_pulses,
            snapshot.axis(Axis::Z).position_pulses,
        );
        shared.status.update(|s| {
            s.connected = true;
            s.state = ControllerState::Idle;
            s.position = position;
            s.last_error = None;
        });
        shared.show_idle().await;
        self.start_sensor_loop();

        info!(
            fieldbus = ?shared.endpoint,
            pendant = ?shared.indicator.endpoint(),
            "Hardware controller connected at {position}"
        );
        true
    }

    async fn disconnect(&self) -> bool {
        let shared = &self.shared;
        let _lifecycle = shared.lifecycle.lock().await;
        if !shared.status.snapshot().connected {
            return true;
        }

        shared.stop.trigger();
        match tokio::time::timeout(shared.motion.stop_grace(), shared.halt()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Stop during disconnect failed: {e}"),
            Err(_) => warn!(
                grace_ms = shared.motion.stop_grace_ms,
                "Stop did not complete within grace period"
            ),
        }
        self.stop_sensor_loop();
        shared.close_devices().await;
        shared.sensors.reset();

        shared.status.update(|s| {
            s.connected = false;
            s.moving = false;
            s.vacuum_on = false;
            s.state = ControllerState::Disconnected;
        });
        info!("Hardware controller disconnected");
        true
    }

    async fn move_to(&self, r: f64, theta: f64, z: f64) -> bool {
        let result = self.shared.run_move(Position::new(r, theta, z)).await;
        self.shared.show_idle().await;
        self.shared.report("move_to", result)
    }

    async fn home(&self) -> bool {
        let result = self.shared.run_home().await;
        self.shared.show_idle().await;
        self.shared.report("home", result)
    }

    async fn stop(&self) -> bool {
        let shared = &self.shared;
        shared.stop.trigger();
        if !shared.status.snapshot().connected {
            return true;
        }

        let result = shared.halt().await;
        shared.status.update(|s| {
            if s.moving {
                s.moving = false;
                s.state = ControllerState::Idle;
            }
        });
        shared.report("stop", result)
    }

    async fn pick(&self) -> bool {
        let result = self.shared.run_pick().await;
        self.shared.show_idle().await;
        self.shared.report("pick", result)
    }

    async fn place(&self) -> bool {
        let result = self.shared.run_place().await;
        self.shared.show_idle().await;
        self.shared.report("place", result)
    }

    async fn set_vacuum(&self, on: bool) -> bool {
        let result = match self.shared.ensure_connected() {
            Ok(()) => self.shared.apply_vacuum(on).await,
            Err(e) => Err(e),
        };
        self.shared.report("set_vacuum", result)
    }

    async fn set_speed(&self, percent: u32) -> bool {
        let result = if (MIN_SPEED_PERCENT..=MAX_SPEED_PERCENT).contains(&percent) {
            self.shared.status.update(|s| s.speed_percent = percent);
            Ok(())
        } else {
            Err(ControllerError::InvalidSpeed(percent))
        };
        self.shared.report("set_speed", result)
    }

    fn status(&self) -> ControllerStatus {
        self.shared.status.snapshot()
    }

    fn is_safe_to_operate(&self) -> bool {
        self.shared.conditions().all_ok()
    }

    fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.shared.status.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::virtual_port::VirtualPortProvider;
    use crate::drivers::fieldbus::virtual_bus::{VirtualFieldbus, VirtualFieldbusHandle};
    use wtp_common::config::SerialSettings;
    use wtp_common::events::FaultCode;
    use wtp_common::safety::SafetySwitch;

    fn controller() -> (HardwareController, VirtualFieldbusHandle) {
        let bus = VirtualFieldbus::new();
        let handle = bus.handle();
        let indicator = PendantIndicator::new(
            Arc::new(VirtualPortProvider::new()),
            None,
            SerialSettings::eight_n_one(9600, 100),
        );
        let c = HardwareController::new(
            &WtpConfig::default(),
            Box::new(bus),
            None,
            indicator,
            Arc::new(SafetySwitch::default()),
        );
        (c, handle)
    }

    fn faults(rx: &mut broadcast::Receiver<ControllerEvent>) -> Vec<FaultCode> {
        let mut codes = Vec::new();
        while let Ok(e) = rx.try_recv() {
            if let ControllerEvent::Error(f) = e {
                codes.push(f.code);
            }
        }
        codes
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_enables_drives() {
        let (c, bus) = controller();
        assert!(!c.is_safe_to_operate());
        assert!(c.connect().await);

        assert!(bus.is_open());
        for axis in Axis::ALL {
            assert!(bus.control(axis).is_enabled());
        }
        assert!(c.sensor_snapshot().servos_ready());
        assert!(c.is_safe_to_operate());
        assert_eq!(c.status().state, ControllerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_rolls_back() {
        let (c, bus) = controller();
        bus.set_fail_open(true);
        let mut rx = c.subscribe();

        assert!(!c.connect().await);
        let status = c.status();
        assert!(!status.connected);
        assert_eq!(status.state, ControllerState::Disconnected);
        assert!(status.last_error.is_some());
        assert_eq!(faults(&mut rx), vec![FaultCode::Fieldbus]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarm_raised_once_while_connected() {
        let (c, bus) = controller();
        assert!(c.connect().await);
        let mut rx = c.subscribe();

        bus.set_door_closed(false);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(faults(&mut rx), vec![FaultCode::DoorOpen]);
        assert!(c.status().connected);
        assert!(c.alarms().contains(AlarmFlags::DOOR_OPEN));
        assert!(!c.is_safe_to_operate());

        bus.set_door_closed(true);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(c.alarms().is_empty());
        assert!(c.is_safe_to_operate());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_refresh_ignores_spacing() {
        let (c, bus) = controller();
        assert!(c.connect().await);

        bus.set_door_closed(false);
        assert!(c.refresh_sensors().await);
        assert!(!c.sensor_snapshot().door_closed);
        bus.set_door_closed(true);
        assert!(c.refresh_sensors().await);
        assert!(c.sensor_snapshot().door_closed);
        assert!(c.alarms().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_keep_latest() {
        let (c, bus) = controller();
        assert!(c.connect().await);

        let (first, second) = tokio::join!(c.refresh_sensors(), async {
            bus.set_emergency_stop(true);
            c.refresh_sensors().await
        });
        assert!(first && second);
        assert!(c.sensor_snapshot().emergency_stop);
        assert!(c.alarms().contains(AlarmFlags::EMERGENCY_STOP));
    }

    #[tokio::test(start_paused = true)]
    async fn test_home_from_offset() {
        let (c, bus) = controller();
        bus.set_position(Axis::R, 20_000);
        assert!(c.connect().await);
        assert_eq!(c.position().r, 20.0);

        assert!(c.home().await);
        let status = c.status();
        assert!(status.homed);
        assert_eq!(status.position, Position::ORIGIN);
        assert!(bus.position(Axis::R).abs() <= 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pick_and_place() {
        let (c, bus) = controller();
        assert!(c.connect().await);

        assert!(c.pick().await);
        assert!(c.status().vacuum_on);
        assert!(c.sensor_snapshot().wafer_detected);
        assert!(bus.peripheral_outputs().valve_open);

        assert!(c.place().await);
        assert!(!c.status().vacuum_on);
        assert!(!bus.peripheral_outputs().vacuum_on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pick_without_material() {
        let (c, bus) = controller();
        bus.set_material_present(false);
        assert!(c.connect().await);
        let mut rx = c.subscribe();

        assert!(!c.pick().await);
        assert!(!c.status().vacuum_on);
        assert!(faults(&mut rx).contains(&FaultCode::NoMaterial));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_closes_bus() {
        let (c, bus) = controller();
        assert!(c.connect().await);
        assert!(c.disconnect().await);
        assert!(!bus.is_open());
        assert_eq!(c.status().state, ControllerState::Disconnected);
        assert!(!c.is_safe_to_operate());
    }
}

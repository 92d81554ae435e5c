//! Simulated controller implementation.
//!
//! The `SimulatedController` implements the `MotionController` trait without
//! any device. Moves are synthesized tick by tick from a [`MotionProfile`] and
//! publish the same events, in the same order, as the hardware controller.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info};
use wtp_common::config::{MotionSettings, SafetySettings, SimulationSettings, WtpConfig};
use wtp_common::consts::{MAX_SPEED_PERCENT, MIN_SPEED_PERCENT};
use wtp_common::controller::{ControllerError, ControllerKind, MotionController};
use wtp_common::coords::CoordinateError;
use wtp_common::events::ControllerEvent;
use wtp_common::safety::{SafetyConditions, SafetyInterlock, SafetySwitch};
use wtp_common::types::{Axis, ControllerState, ControllerStatus, Position};

use super::profile::{MotionProfile, tick_period};
use crate::drivers::state::{StatusCell, StopSignal};

/// Vacuum pressure reached with material on the end effector [%].
const PRESSURE_WITH_MATERIAL: f64 = 90.0;
/// Vacuum pressure reached with nothing to hold [%].
const PRESSURE_WITHOUT_MATERIAL: f64 = 10.0;

/// Controller that fabricates motion and status.
pub struct SimulatedController {
    /// Motion synthesis parameters
    settings: SimulationSettings,
    /// Pick/place settle times
    motion: MotionSettings,
    /// Pick confirmation threshold
    safety: SafetySettings,
    /// External safety verdict
    interlock: Arc<dyn SafetyInterlock>,
    /// Status snapshot and events
    status: StatusCell,
    /// Held by move/home/pick/place
    motion_lock: tokio::sync::Mutex<()>,
    /// Serializes connect/disconnect
    lifecycle: tokio::sync::Mutex<()>,
    /// Interrupts in-flight moves
    stop: StopSignal,
    /// Whether a pick finds material
    material_present: AtomicBool,
    /// Simulated vacuum pressure [%]
    pressure: Mutex<f64>,
}

impl SimulatedController {
    /// Create a disconnected controller from configuration.
    pub fn new(config: &WtpConfig) -> Self {
        Self {
            settings: config.simulation.clone(),
            motion: config.motion.clone(),
            safety: config.safety.clone(),
            interlock: Arc::new(SafetySwitch::default()),
            status: StatusCell::new(ControllerStatus {
                speed_percent: config.motion.default_speed_percent,
                ..ControllerStatus::default()
            }),
            motion_lock: tokio::sync::Mutex::new(()),
            lifecycle: tokio::sync::Mutex::new(()),
            stop: StopSignal::default(),
            material_present: AtomicBool::new(config.simulation.material_present),
            pressure: Mutex::new(0.0),
        }
    }

    /// Use an external safety verdict.
    pub fn with_interlock(mut self, interlock: Arc<dyn SafetyInterlock>) -> Self {
        self.interlock = interlock;
        self
    }

    /// Whether the next pick finds material.
    pub fn set_material_present(&self, present: bool) {
        self.material_present.store(present, Ordering::SeqCst);
    }

    /// Simulated vacuum pressure [%].
    pub fn vacuum_pressure(&self) -> f64 {
        *self.pressure.lock()
    }

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

    fn ensure_safe(&self) -> Result<(), ControllerError> {
        self.ensure_connected()?;
        let conditions = SafetyConditions::without_sensors(true, self.interlock.is_safe());
        match conditions.first_violation() {
            None => Ok(()),
            Some(reason) => Err(ControllerError::SafetyRejected(reason.to_string())),
        }
    }

    fn apply_vacuum(&self, on: bool, pressure: f64) {
        *self.pressure.lock() = pressure;
        self.status.update(|s| s.vacuum_on = on);
    }

    async fn animate(
        &self,
        profile: MotionProfile,
        stop_since: u64,
        operation: &'static str,
    ) -> Result<(), ControllerError> {
        let period = tick_period(self.settings.tick(), self.status.snapshot().speed_percent);
        debug!(
            operation,
            steps = profile.steps,
            period_ms = period.as_millis() as u64,
            expected_ms = profile.duration(period).as_millis() as u64,
            "simulating {} -> {}",
            profile.from,
            profile.to
        );

        for i in 1..=profile.steps {
            tokio::time::sleep(period).await;
            self.stop.check(stop_since, operation)?;
            let point = profile.point(i);
            self.status.update(|s| s.position = point);
        }
        Ok(())
    }

    async fn run_move(&self, target: Position) -> Result<(), ControllerError> {
        self.ensure_safe()?;
        for axis in Axis::ALL {
            if !target.axis(axis).is_finite() {
                return Err(CoordinateError::NotFinite { axis }.into());
            }
        }
        let held = StatusCell::try_acquire(&self.motion_lock, "move")?;
        let stop_since = self.stop.current();
        let _guard = self.status.begin_motion(held, ControllerState::Moving);

        let start = self.status.snapshot().position;
        let profile = MotionProfile::plan(start, target, &self.settings);
        self.animate(profile, stop_since, "move").await?;

        self.status.update(|s| {
            s.position = target;
            s.moving = false;
            s.state = ControllerState::Idle;
        });
        self.status.position_changed(start, target);
        Ok(())
    }

    async fn run_home(&self) -> Result<(), ControllerError> {
        self.ensure_safe()?;
        let held = StatusCell::try_acquire(&self.motion_lock, "home")?;
        let stop_since = self.stop.current();
        let _guard = self.status.begin_motion(held, ControllerState::Homing);

        let start = self.status.snapshot().position;
        let profile = MotionProfile::longest(start, Position::ORIGIN, &self.settings);
        self.animate(profile, stop_since, "home").await?;

        self.status.update(|s| {
            s.position = Position::ORIGIN;
            s.homed = true;
            s.moving = false;
            s.state = ControllerState::Idle;
        });
        self.status.position_changed(start, Position::ORIGIN);
        info!("Simulated homing complete");
        Ok(())
    }

    async fn run_pick(&self) -> Result<(), ControllerError> {
        self.ensure_safe()?;
        let _held = StatusCell::try_acquire(&self.motion_lock, "pick")?;

        let material = self.material_present.load(Ordering::SeqCst);
        let pressure = if material {
            PRESSURE_WITH_MATERIAL
        } else {
            PRESSURE_WITHOUT_MATERIAL
        };
        self.apply_vacuum(true, pressure);
        tokio::time::sleep(self.motion.pick_settle()).await;

        if pressure > self.safety.pick_confirm_pressure_pct {
            debug!(pressure, "Simulated pick confirmed");
            Ok(())
        } else {
            self.apply_vacuum(false, 0.0);
            Err(ControllerError::NoMaterial {
                pressure_pct: pressure,
            })
        }
    }

    async fn run_place(&self) -> Result<(), ControllerError> {
        self.ensure_safe()?;
        let _held = StatusCell::try_acquire(&self.motion_lock, "place")?;

        tokio::time::sleep(self.motion.place_settle()).await;
        self.apply_vacuum(false, 0.0);
        tokio::time::sleep(self.motion.place_settle()).await;
        Ok(())
    }
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new(&WtpConfig::default())
    }
}

#[async_trait]
impl MotionController for SimulatedController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::Simulated
    }

    fn name(&self) -> &'static str {
        "simulation"
    }

    async fn connect(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        if self.status.snapshot().connected {
            return true;
        }

        self.status.update(|s| s.state = ControllerState::Connecting);
        tokio::time::sleep(self.settings.connect_delay()).await;
        self.status.update(|s| {
            s.connected = true;
            s.state = ControllerState::Idle;
            s.last_error = None;
        });
        info!("Simulated controller connected");
        true
    }

    async fn disconnect(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.status.snapshot().connected {
            return true;
        }

        self.stop.trigger();
        *self.pressure.lock() = 0.0;
        self.status.update(|s| {
            s.connected = false;
            s.moving = false;
            s.vacuum_on = false;
            s.state = ControllerState::Disconnected;
        });
        info!("Simulated controller disconnected");
        true
    }

    async fn move_to(&self, r: f64, theta: f64, z: f64) -> bool {
        let result = self.run_move(Position::new(r, theta, z)).await;
        self.report("move_to", result)
    }

    async fn home(&self) -> bool {
        let result = self.run_home().await;
        self.report("home", result)
    }

    async fn stop(&self) -> bool {
        self.stop.trigger();
        self.status.update(|s| {
            if s.moving {
                s.moving = false;
                s.state = ControllerState::Idle;
            }
        });
        true
    }

    async fn pick(&self) -> bool {
        let result = self.run_pick().await;
        self.report("pick", result)
    }

    async fn place(&self) -> bool {
        let result = self.run_place().await;
        self.report("place", result)
    }

    async fn set_vacuum(&self, on: bool) -> bool {
        let result = self.ensure_connected().map(|()| {
            let pressure = match (on, self.material_present.load(Ordering::SeqCst)) {
                (false, _) => 0.0,
                (true, true) => PRESSURE_WITH_MATERIAL,
                (true, false) => PRESSURE_WITHOUT_MATERIAL,
            };
            self.apply_vacuum(on, pressure);
        });
        self.report("set_vacuum", result)
    }

    async fn set_speed(&self, percent: u32) -> bool {
        let result = if (MIN_SPEED_PERCENT..=MAX_SPEED_PERCENT).contains(&percent) {
            self.status.update(|s| s.speed_percent = percent);
            Ok(())
        } else {
            Err(ControllerError::InvalidSpeed(percent))
        };
        self.report("set_speed", result)
    }

    fn status(&self) -> ControllerStatus {
        self.status.snapshot()
    }

    fn is_safe_to_operate(&self) -> bool {
        SafetyConditions::without_sensors(self.status.snapshot().connected, self.interlock.is_safe())
            .all_ok()
    }

    fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.status.subscribe()
    }
}

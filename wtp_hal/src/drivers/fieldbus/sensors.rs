//! Sensor feedback.
//!
//! One refresh reads the three drives and the peripheral module, builds a
//! [`SensorSnapshot`] and re-evaluates the alarm flags. Alarms are
//! edge-triggered: only flags that were clear on the previous refresh are
//! reported.

use chrono::Utc;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use wtp_common::config::SafetySettings;
use wtp_common::events::ControllerFault;
use wtp_common::safety::AlarmFlags;
use wtp_common::types::{Axis, AxisFeedback, SensorSnapshot};

use super::bus::{AxisInputs, FieldbusError, FieldbusMaster, PeripheralInputs, StatusWord};

/// Feedback of one drive.
pub fn axis_feedback(inputs: &AxisInputs) -> AxisFeedback {
    AxisFeedback {
        position_pulses: inputs.actual_position,
        speed_pulses: inputs.actual_velocity,
        ready: inputs.status.contains(StatusWord::READY_TO_SWITCH_ON),
        enabled: inputs.status.contains(StatusWord::OPERATION_ENABLED),
        in_position: inputs.status.contains(StatusWord::TARGET_REACHED),
        following_error: inputs.following_error,
        fault: inputs.status.contains(StatusWord::FAULT),
    }
}

/// Combine drive and peripheral inputs.
pub fn build_snapshot(
    axes: [AxisInputs; 3],
    io: &PeripheralInputs,
    settings: &SafetySettings,
) -> SensorSnapshot {
    SensorSnapshot {
        axes: axes.map(|a| axis_feedback(&a)),
        temperature_c: io.temperature_c,
        vibration: io.vibration,
        motor_current_a: io.motor_current_a,
        emergency_stop: io.emergency_stop,
        door_closed: io.door_closed,
        light_curtain_clear: io.light_curtain_clear,
        vacuum_pressure_pct: io.vacuum_pressure_pct,
        presence_sensor: io.wafer_sensor,
        wafer_detected: io.wafer_sensor
            && io.vacuum_pressure_pct > settings.wafer_pressure_threshold_pct,
        cassette_present: io.cassette_present,
        loadport_ready: io.loadport_ready,
        valve_open: io.valve_open,
        refreshed_at: Utc::now(),
    }
}

/// Read every input the snapshot needs.
pub async fn read_snapshot(
    bus: &mut dyn FieldbusMaster,
    settings: &SafetySettings,
) -> Result<SensorSnapshot, FieldbusError> {
    let mut axes = [AxisInputs::default(); 3];
    for axis in Axis::ALL {
        axes[axis.index()] = bus.read_axis(axis).await?;
    }
    let io = bus.read_peripherals().await?;
    Ok(build_snapshot(axes, &io, settings))
}

/// Operator-facing text for a single alarm flag.
pub fn describe(flag: AlarmFlags) -> &'static str {
    if flag == AlarmFlags::POSITION_ERROR {
        "Following error beyond limit"
    } else if flag == AlarmFlags::OVER_TEMP_WARN {
        "Temperature above warning threshold"
    } else if flag == AlarmFlags::OVER_TEMP {
        "Over-temperature"
    } else if flag == AlarmFlags::EMERGENCY_STOP {
        "Emergency stop active"
    } else if flag == AlarmFlags::DOOR_OPEN {
        "Door open"
    } else if flag == AlarmFlags::LIGHT_CURTAIN {
        "Light curtain interrupted"
    } else if flag == AlarmFlags::LOW_VACUUM {
        "Low vacuum pressure"
    } else if flag == AlarmFlags::DRIVE_FAULT {
        "Drive fault"
    } else {
        "Sensor alarm"
    }
}

/// Alarm flags before and after a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmTransition {
    /// Flags after the previous refresh
    pub previous: AlarmFlags,
    /// Flags after this refresh
    pub current: AlarmFlags,
}

impl AlarmTransition {
    /// Newly raised flags.
    pub fn raised(&self) -> AlarmFlags {
        self.current.raised_since(self.previous)
    }

    /// One fault per newly raised flag.
    pub fn faults(&self, snapshot: &SensorSnapshot) -> Vec<ControllerFault> {
        self.raised()
            .iter()
            .map(|flag| {
                let fault = ControllerFault::new(flag.fault_code(), describe(flag));
                if flag.intersects(AlarmFlags::OVER_TEMP | AlarmFlags::OVER_TEMP_WARN) {
                    fault.with_cause(format!("{:.1} °C", snapshot.temperature_c))
                } else if flag == AlarmFlags::LOW_VACUUM {
                    fault.with_cause(format!("{:.1} %", snapshot.vacuum_pressure_pct))
                } else {
                    fault
                }
            })
            .collect()
    }

    /// A blocking alarm is active now.
    pub fn blocking(&self) -> bool {
        self.current.intersects(AlarmFlags::BLOCKING_MASK)
    }

    /// The last blocking alarm cleared with this refresh.
    pub fn blocking_cleared(&self) -> bool {
        self.previous.intersects(AlarmFlags::BLOCKING_MASK) && !self.blocking()
    }
}

#[derive(Debug, Default)]
struct Feedback {
    snapshot: SensorSnapshot,
    alarms: AlarmFlags,
    refreshed: Option<Instant>,
}

/// Latest snapshot, alarm flags and refresh bookkeeping.
#[derive(Debug, Default)]
pub struct SensorState {
    inner: Mutex<Feedback>,
}

impl SensorState {
    /// Copy of the latest snapshot.
    pub fn snapshot(&self) -> SensorSnapshot {
        self.inner.lock().snapshot.clone()
    }

    /// Alarm flags of the latest snapshot.
    pub fn alarms(&self) -> AlarmFlags {
        self.inner.lock().alarms
    }

    /// Claim a refresh slot. Returns `false` if the last refresh is more
    /// recent than `min_interval`.
    pub fn claim(&self, min_interval: Duration) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.refreshed {
            Some(last) if now.saturating_duration_since(last) < min_interval => false,
            _ => {
                inner.refreshed = Some(now);
                true
            }
        }
    }

    /// Store a snapshot and re-evaluate the alarms.
    pub fn store(
        &self,
        snapshot: SensorSnapshot,
        moving: bool,
        vacuum_on: bool,
        settings: &SafetySettings,
    ) -> AlarmTransition {
        let current = AlarmFlags::evaluate(&snapshot, moving, vacuum_on, settings);
        let mut inner = self.inner.lock();
        inner.snapshot = snapshot;
        inner.refreshed = Some(Instant::now());
        let previous = std::mem::replace(&mut inner.alarms, current);
        AlarmTransition { previous, current }
    }

    /// Forget everything (after disconnect).
    pub fn reset(&self) {
        *self.inner.lock() = Feedback::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wtp_common::events::FaultCode;

    fn enabled_axis(position: i32) -> AxisInputs {
        AxisInputs {
            status: StatusWord::READY_TO_SWITCH_ON
                | StatusWord::SWITCHED_ON
                | StatusWord::OPERATION_ENABLED
                | StatusWord::TARGET_REACHED,
            actual_position: position,
            ..AxisInputs::default()
        }
    }

    fn io() -> PeripheralInputs {
        PeripheralInputs {
            temperature_c: 30.0,
            door_closed: true,
            light_curtain_clear: true,
            ..PeripheralInputs::default()
        }
    }

    #[test]
    fn test_snapshot_mapping() {
        let settings = SafetySettings::default();
        let snap = build_snapshot(
            [enabled_axis(10), enabled_axis(20), enabled_axis(30)],
            &io(),
            &settings,
        );
        assert!(snap.servos_ready());
        assert_eq!(snap.axis(Axis::Theta).position_pulses, 20);
        assert!(snap.axis(Axis::Z).in_position);
    }

    #[test]
    fn test_wafer_detection_needs_pressure() {
        let settings = SafetySettings::default();
        let axes = [enabled_axis(0); 3];

        let mut inputs = io();
        inputs.wafer_sensor = true;
        inputs.vacuum_pressure_pct = 75.0;
        let snap = build_snapshot(axes, &inputs, &settings);
        assert!(snap.presence_sensor);
        assert!(!snap.wafer_detected);

        inputs.vacuum_pressure_pct = 75.1;
        assert!(build_snapshot(axes, &inputs, &settings).wafer_detected);
    }

    #[test]
    fn test_alarms_are_edge_triggered() {
        let settings = SafetySettings::default();
        let state = SensorState::default();
        let mut snap = build_snapshot([enabled_axis(0); 3], &io(), &settings);

        assert!(state.store(snap.clone(), false, false, &settings).raised().is_empty());

        snap.emergency_stop = true;
        let t = state.store(snap.clone(), false, false, &settings);
        assert_eq!(t.raised(), AlarmFlags::EMERGENCY_STOP);
        assert!(t.blocking());
        let faults = t.faults(&snap);
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].code, FaultCode::EmergencyStop);

        let t = state.store(snap.clone(), false, false, &settings);
        assert!(t.raised().is_empty());

        snap.emergency_stop = false;
        let t = state.store(snap, false, false, &settings);
        assert!(t.blocking_cleared());
        assert!(state.alarms().is_empty());
    }

    #[test]
    fn test_temperature_fault_carries_reading() {
        let settings = SafetySettings::default();
        let state = SensorState::default();
        let mut inputs = io();
        inputs.temperature_c = 61.0;
        let snap = build_snapshot([enabled_axis(0); 3], &inputs, &settings);

        let t = state.store(snap.clone(), false, false, &settings);
        let faults = t.faults(&snap);
        assert_eq!(faults[0].code, FaultCode::OverTemperature);
        assert_eq!(faults[0].cause.as_deref(), Some("61.0 °C"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_rate_limited() {
        let state = SensorState::default();
        let interval = Duration::from_millis(50);
        assert!(state.claim(interval));
        assert!(!state.claim(interval));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.claim(interval));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_defers_next_claim() {
        let settings = SafetySettings::default();
        let state = SensorState::default();
        let interval = Duration::from_millis(50);
        tokio::time::sleep(Duration::from_millis(30)).await;

        state.store(SensorSnapshot::default(), false, false, &settings);
        assert!(!state.claim(interval));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.claim(interval));
    }
}

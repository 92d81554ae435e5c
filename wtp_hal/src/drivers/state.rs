//! State shared by the controller implementations.
//!
//! - `StatusCell` - the status snapshot plus its event hub; every mutation
//!   publishes a `StatusChanged` with the old and new snapshot
//! - `MotionGuard` - holds the motion lock and resets the moving flag on drop
//! - `StopSignal` - generation counter that interrupts in-flight loops

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::warn;
use wtp_common::controller::ControllerError;
use wtp_common::events::{ControllerEvent, EventHub};
use wtp_common::types::{ControllerState, ControllerStatus, Position};

/// Status snapshot with change notification.
#[derive(Debug, Default)]
pub struct StatusCell {
    status: Mutex<ControllerStatus>,
    events: EventHub,
}

impl StatusCell {
    /// Cell holding `initial`.
    pub fn new(initial: ControllerStatus) -> Self {
        Self {
            status: Mutex::new(initial),
            events: EventHub::new(),
        }
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> ControllerStatus {
        self.status.lock().clone()
    }

    /// Apply `f` and publish the transition if anything changed.
    ///
    /// Returns `true` if the snapshot changed.
    pub fn update(&self, f: impl FnOnce(&mut ControllerStatus)) -> bool {
        let transition = {
            let mut status = self.status.lock();
            let old = status.clone();
            f(&mut status);
            if status.same_state(&old) {
                None
            } else {
                status.timestamp = Utc::now();
                Some((old, status.clone()))
            }
        };

        match transition {
            Some((old, new)) => {
                self.events.status_changed(old, new);
                true
            }
            None => false,
        }
    }

    /// Publish a position transition.
    pub fn position_changed(&self, old: Position, new: Position) {
        self.events.position_changed(old, new);
    }

    /// Record a failed operation: `last_error` first, then the fault event.
    pub fn fail(&self, operation: &str, error: &ControllerError) {
        warn!(operation, "{error}");
        let message = error.to_string();
        self.update(|s| s.last_error = Some(message));
        self.events.fault(error.to_fault(operation));
    }

    /// Event hub.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// New event receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Take the motion lock or fail with `Busy`.
    pub fn try_acquire<'a>(
        lock: &'a tokio::sync::Mutex<()>,
        operation: &'static str,
    ) -> Result<tokio::sync::MutexGuard<'a, ()>, ControllerError> {
        lock.try_lock().map_err(|_| ControllerError::Busy(operation))
    }

    /// Enter `state` with `moving` set. The returned guard restores Idle.
    pub fn begin_motion<'a>(
        &'a self,
        lock: tokio::sync::MutexGuard<'a, ()>,
        state: ControllerState,
    ) -> MotionGuard<'a> {
        self.update(|s| {
            s.moving = true;
            s.state = state;
        });
        MotionGuard {
            cell: self,
            _lock: lock,
        }
    }
}

/// Resets `moving` when a motion operation ends, however it ends.
pub struct MotionGuard<'a> {
    cell: &'a StatusCell,
    _lock: tokio::sync::MutexGuard<'a, ()>,
}

impl Drop for MotionGuard<'_> {
    fn drop(&mut self) {
        self.cell.update(|s| {
            if s.moving {
                s.moving = false;
                if s.connected {
                    s.state = ControllerState::Idle;
                }
            }
        });
    }
}

/// Stop request counter.
#[derive(Debug, Default)]
pub struct StopSignal {
    generation: AtomicU64,
}

impl StopSignal {
    /// Current generation; loops compare against it.
    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Interrupt every loop started before this call.
    pub fn trigger(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Fail with `Stopped` if a stop happened since `since`.
    pub fn check(&self, since: u64, operation: &'static str) -> Result<(), ControllerError> {
        if self.current() != since {
            Err(ControllerError::Stopped(operation))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wtp_common::events::FaultCode;

    #[test]
    fn test_update_emits_only_on_change() {
        let cell = StatusCell::default();
        let mut rx = cell.subscribe();

        assert!(!cell.update(|_| {}));
        assert!(rx.try_recv().is_err());

        assert!(cell.update(|s| s.vacuum_on = true));
        match rx.try_recv().unwrap() {
            ControllerEvent::StatusChanged { old, new } => {
                assert!(!old.vacuum_on);
                assert!(new.vacuum_on);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fail_orders_status_before_error() {
        let cell = StatusCell::default();
        let mut rx = cell.subscribe();

        cell.fail("move_to", &ControllerError::NotConnected);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ControllerEvent::StatusChanged { new, .. } if new.last_error.is_some()
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ControllerEvent::Error(f) if f.code == FaultCode::NotConnected
        ));
    }

    #[test]
    fn test_motion_guard_resets_on_drop() {
        let cell = StatusCell::default();
        cell.update(|s| {
            s.connected = true;
            s.state = ControllerState::Idle;
        });
        let lock = tokio::sync::Mutex::new(());

        {
            let held = StatusCell::try_acquire(&lock, "move").unwrap();
            let _guard = cell.begin_motion(held, ControllerState::Moving);
            assert!(cell.snapshot().moving);
            assert!(matches!(
                StatusCell::try_acquire(&lock, "home"),
                Err(ControllerError::Busy("home"))
            ));
        }

        let status = cell.snapshot();
        assert!(!status.moving);
        assert_eq!(status.state, ControllerState::Idle);
        assert!(StatusCell::try_acquire(&lock, "move").is_ok());
    }

    #[test]
    fn test_stop_signal() {
        let stop = StopSignal::default();
        let start = stop.current();
        assert!(stop.check(start, "move").is_ok());
        stop.trigger();
        assert!(matches!(
            stop.check(start, "move"),
            Err(ControllerError::Stopped("move"))
        ));
    }
}

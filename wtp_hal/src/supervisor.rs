//! Controller supervisor.
//!
//! Owns the one active controller and swaps it between simulated and
//! hardware-backed as devices come and go.
//!
//! # Swap Protocol
//!
//! 1. take the async swap lock (one swap at a time)
//! 2. build and connect the new controller (no slot lock held)
//! 3. lock the slot, exchange, unlock
//! 4. publish `ControllerChanged`, disconnect the old controller
//!
//! Readers calling [`ControllerSupervisor::current_controller`] only ever
//! wait for step 3.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wtp_common::config::WtpConfig;
use wtp_common::consts::EVENT_CHANNEL_CAPACITY;
use wtp_common::controller::{ControllerError, ControllerKind, MotionController};
use wtp_common::device::DetectionResult;
use wtp_common::events::{ControllerEvent, EventHub};

use crate::controller_factory::ControllerFactory;
use crate::discovery::{DeviceDiscovery, DiscoveryEvent};

/// Supervisor errors.
#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    /// The factory could not build a hardware controller.
    #[error("Hardware controller could not be built: {0}")]
    Construction(#[from] ControllerError),

    /// The hardware controller was built but did not connect.
    #[error("Hardware controller failed to connect: {0}")]
    ConnectFailed(String),

    /// `shutdown()` was called.
    #[error("Supervisor is shut down")]
    ShutDown,
}

/// Notification from the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The active controller was replaced.
    ControllerChanged {
        /// Kind before the swap
        previous: ControllerKind,
        /// Kind after the swap
        current: ControllerKind,
    },
}

/// The controller currently in charge.
#[derive(Clone)]
pub struct ActiveController {
    /// Implementation tag
    pub kind: ControllerKind,
    /// The controller
    pub controller: Arc<dyn MotionController>,
    /// Discovery result the controller was built from
    pub detection: Option<DetectionResult>,
}

struct Inner {
    config: WtpConfig,
    discovery: DeviceDiscovery,
    factory: Arc<dyn ControllerFactory>,
    active: Mutex<ActiveController>,
    swap_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SupervisorEvent>,
    controller_events: EventHub,
    relay: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

/// Selects and hot-swaps the active controller. Clones share state.
#[derive(Clone)]
pub struct ControllerSupervisor {
    inner: Arc<Inner>,
}

impl ControllerSupervisor {
    /// Supervisor holding a disconnected simulated controller until
    /// initialized.
    pub fn new(
        config: WtpConfig,
        discovery: DeviceDiscovery,
        factory: Arc<dyn ControllerFactory>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let initial = ActiveController {
            kind: ControllerKind::Simulated,
            controller: factory.create_simulated(),
            detection: None,
        };
        Self {
            inner: Arc::new(Inner {
                config,
                discovery,
                factory,
                active: Mutex::new(initial),
                swap_lock: tokio::sync::Mutex::new(()),
                events,
                controller_events: EventHub::new(),
                relay: Mutex::new(None),
                listener: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// The active controller.
    pub fn current_controller(&self) -> Arc<dyn MotionController> {
        Arc::clone(&self.inner.active.lock().controller)
    }

    /// Copy of the active slot.
    pub fn active(&self) -> ActiveController {
        self.inner.active.lock().clone()
    }

    /// True if the active controller is hardware-backed.
    pub fn is_hardware_mode(&self) -> bool {
        self.inner.active.lock().kind == ControllerKind::HardwareBacked
    }

    /// Discovery service in use.
    pub fn discovery(&self) -> &DeviceDiscovery {
        &self.inner.discovery
    }

    /// Subscribe to controller swaps.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe to the events of whichever controller is active.
    pub fn subscribe_controller_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.controller_events.subscribe()
    }

    /// Detect hardware and connect the best controller, then start hot-plug
    /// handling.
    ///
    /// Hardware that fails to build or connect falls back to simulation.
    pub async fn initialize_async(&self) -> Result<ControllerKind, SupervisorError> {
        self.ensure_running()?;
        let detection = self.inner.discovery.detect_all().await;

        let kind = {
            let _swap = self.inner.swap_lock.lock().await;
            let hardware = if detection.has_hardware() {
                match self.connect_hardware(&detection).await {
                    Ok(controller) => Some(controller),
                    Err(e) => {
                        warn!("{e}, falling back to simulation");
                        None
                    }
                }
            } else {
                info!("No hardware detected, using simulation");
                None
            };

            match hardware {
                Some(controller) => {
                    self.exchange(controller, ControllerKind::HardwareBacked, Some(detection))
                        .await
                }
                None => {
                    let current = self.current_controller();
                    if current.kind() == ControllerKind::Simulated {
                        current.connect().await;
                        self.start_relay(&current);
                    } else {
                        let simulated = self.connect_simulated().await;
                        self.exchange(simulated, ControllerKind::Simulated, None).await;
                    }
                }
            }
            self.inner.active.lock().kind
        };

        self.start_listener();
        if self.inner.config.discovery.monitor {
            self.inner.discovery.start_monitoring();
        }
        info!(%kind, "Supervisor initialized");
        Ok(kind)
    }

    /// Run [`initialize_async`](Self::initialize_async) in the background.
    pub fn initialize(&self) -> JoinHandle<Result<ControllerKind, SupervisorError>> {
        let this = self.clone();
        tokio::spawn(async move { this.initialize_async().await })
    }

    /// Re-run discovery now and switch modes if the result disagrees with
    /// the active controller.
    pub async fn refresh_hardware(&self) -> Result<ControllerKind, SupervisorError> {
        self.ensure_running()?;
        let detection = self.inner.discovery.detect_all().await;
        let _swap = self.inner.swap_lock.lock().await;

        match (detection.has_hardware(), self.is_hardware_mode()) {
            (true, false) => match self.connect_hardware(&detection).await {
                Ok(controller) => {
                    self.exchange(controller, ControllerKind::HardwareBacked, Some(detection))
                        .await
                }
                Err(e) => warn!("{e}, staying in simulation"),
            },
            (false, true) => {
                info!("Hardware gone, switching to simulation");
                let simulated = self.connect_simulated().await;
                self.exchange(simulated, ControllerKind::Simulated, None).await;
            }
            _ => debug!("Hardware refresh: no change"),
        }
        Ok(self.inner.active.lock().kind)
    }

    /// Install `controller` as-is, disconnecting the previous one.
    pub async fn replace_controller(
        &self,
        controller: Arc<dyn MotionController>,
        kind: ControllerKind,
    ) -> Result<(), SupervisorError> {
        self.ensure_running()?;
        let _swap = self.inner.swap_lock.lock().await;
        self.exchange(controller, kind, None).await;
        Ok(())
    }

    /// Stop background tasks and disconnect the active controller.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.discovery.stop_monitoring();
        if let Some(task) = self.inner.listener.lock().take() {
            task.abort();
        }

        let _swap = self.inner.swap_lock.lock().await;
        let controller = self.current_controller();
        if !controller.disconnect().await {
            warn!("Active controller did not disconnect cleanly");
        }
        if let Some(task) = self.inner.relay.lock().take() {
            task.abort();
        }
        info!("Supervisor shut down");
    }

    fn ensure_running(&self) -> Result<(), SupervisorError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            Err(SupervisorError::ShutDown)
        } else {
            Ok(())
        }
    }

    async fn connect_hardware(
        &self,
        detection: &DetectionResult,
    ) -> Result<Arc<dyn MotionController>, SupervisorError> {
        let controller = self.inner.factory.create_hardware(detection)?;
        if controller.connect().await {
            Ok(controller)
        } else {
            let reason = controller
                .status()
                .last_error
                .unwrap_or_else(|| "unknown error".to_string());
            Err(SupervisorError::ConnectFailed(reason))
        }
    }

    async fn connect_simulated(&self) -> Arc<dyn MotionController> {
        let controller = self.inner.factory.create_simulated();
        controller.connect().await;
        controller
    }

    /// Swap the slot. Caller holds the swap lock.
    async fn exchange(
        &self,
        controller: Arc<dyn MotionController>,
        kind: ControllerKind,
        detection: Option<DetectionResult>,
    ) {
        self.start_relay(&controller);
        let previous = {
            let mut active = self.inner.active.lock();
            std::mem::replace(
                &mut *active,
                ActiveController {
                    kind,
                    controller: Arc::clone(&controller),
                    detection,
                },
            )
        };

        info!(previous = %previous.kind, current = %kind, "Active controller changed");
        if self
            .inner
            .events
            .send(SupervisorEvent::ControllerChanged {
                previous: previous.kind,
                current: kind,
            })
            .is_err()
        {
            debug!("controller change not delivered: no subscribers");
        }

        if !Arc::ptr_eq(&previous.controller, &controller) && !previous.controller.disconnect().await
        {
            warn!(kind = %previous.kind, "Previous controller did not disconnect cleanly");
        }
    }

    fn start_relay(&self, controller: &Arc<dyn MotionController>) {
        let mut rx = controller.subscribe();
        let hub = self.inner.controller_events.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => hub.emit(event),
                    Err(RecvError::Lagged(missed)) => warn!(missed, "Controller event relay lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
        if let Some(old) = self.inner.relay.lock().replace(task) {
            old.abort();
        }
    }

    fn start_listener(&self) {
        let mut listener = self.inner.listener.lock();
        if listener.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let rx = self.inner.discovery.subscribe();
        *listener = Some(tokio::spawn(listen(Arc::downgrade(&self.inner), rx)));
    }

    async fn adopt_hardware(&self, detection: DetectionResult) {
        let _swap = self.inner.swap_lock.lock().await;
        if self.is_hardware_mode() || self.ensure_running().is_err() {
            return;
        }
        match self.connect_hardware(&detection).await {
            Ok(controller) => {
                self.exchange(controller, ControllerKind::HardwareBacked, Some(detection))
                    .await
            }
            Err(e) => warn!("Hot-plugged hardware unusable: {e}"),
        }
    }

    async fn release_detached(&self, detached: &[String]) {
        let _swap = self.inner.swap_lock.lock().await;
        let in_use = {
            let active = self.inner.active.lock();
            active.kind == ControllerKind::HardwareBacked
                && active.detection.as_ref().is_some_and(|d| {
                    d.hardware_endpoints()
                        .iter()
                        .any(|e| detached.iter().any(|gone| gone == e))
                })
        };
        if !in_use || self.ensure_running().is_err() {
            return;
        }

        warn!(?detached, "Hardware endpoint removed, switching to simulation");
        let simulated = self.connect_simulated().await;
        self.exchange(simulated, ControllerKind::Simulated, None).await;
    }
}

async fn listen(inner: Weak<Inner>, mut rx: broadcast::Receiver<DiscoveryEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Discovery listener lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let supervisor = ControllerSupervisor { inner };

        match event {
            DiscoveryEvent::HardwareDetected(detection) => {
                if !supervisor.is_hardware_mode() {
                    tokio::spawn(async move { supervisor.adopt_hardware(detection).await });
                }
            }
            DiscoveryEvent::EndpointsDetached(detached) => {
                supervisor.release_detached(&detached).await;
            }
            DiscoveryEvent::EndpointsAttached(_) => {}
        }
    }
    debug!("Discovery listener finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller_factory::DefaultControllerFactory;
    use crate::discovery::VirtualPortProvider;
    use std::time::Duration;

    fn supervisor(provider: &VirtualPortProvider, config: WtpConfig) -> ControllerSupervisor {
        let provider: Arc<dyn crate::discovery::PortProvider> = Arc::new(provider.clone());
        let discovery = DeviceDiscovery::new(
            Arc::clone(&provider),
            config.discovery.clone(),
            config.pendant.serial(),
        );
        let factory = Arc::new(DefaultControllerFactory::new(config.clone(), provider));
        ControllerSupervisor::new(config, discovery, factory)
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_hardware_connects_simulation() {
        let s = supervisor(&VirtualPortProvider::new(), WtpConfig::default());
        assert_eq!(s.initialize_async().await.unwrap(), ControllerKind::Simulated);
        assert!(!s.is_hardware_mode());
        assert!(s.current_controller().status().connected);
        s.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hardware_selected_when_detected() {
        let s = supervisor(&VirtualPortProvider::demo_bench(), WtpConfig::default());
        let mut rx = s.subscribe();

        assert_eq!(
            s.initialize().await.unwrap().unwrap(),
            ControllerKind::HardwareBacked
        );
        assert!(s.is_hardware_mode());
        assert_eq!(
            rx.try_recv().unwrap(),
            SupervisorEvent::ControllerChanged {
                previous: ControllerKind::Simulated,
                current: ControllerKind::HardwareBacked,
            }
        );
        s.shutdown().await;
        assert!(!s.current_controller().status().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_survives_swap() {
        let s = supervisor(&VirtualPortProvider::new(), WtpConfig::default());
        s.initialize_async().await.unwrap();
        let mut events = s.subscribe_controller_events();

        let replacement = Arc::new(crate::drivers::SimulatedController::default());
        assert!(replacement.connect().await);
        s.replace_controller(replacement.clone(), ControllerKind::Simulated)
            .await
            .unwrap();
        assert!(replacement.set_speed(80).await);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut speed_seen = false;
        while let Ok(event) = events.try_recv() {
            if let ControllerEvent::StatusChanged { new, .. } = event {
                speed_seen |= new.speed_percent == 80;
            }
        }
        assert!(speed_seen);
        s.shutdown().await;
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail() {
        let s = supervisor(&VirtualPortProvider::new(), WtpConfig::default());
        s.shutdown().await;
        assert!(matches!(
            s.refresh_hardware().await,
            Err(SupervisorError::ShutDown)
        ));
    }
}

//! Device discovery service.
//!
//! Enumerates endpoints through a [`PortProvider`], classifies them with
//! protocol handshakes and watches for hot-plug changes.
//!
//! # Monitor Loop
//!
//! ```text
//!   every poll_interval:  list names ── diff ──► EndpointsAttached / EndpointsDetached
//!                                         │
//!                               attach ───┴──► (re)arm debounce timer
//!   debounce expired:     detect_all() ──► HardwareDetected (if any hardware)
//! ```

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use wtp_common::config::{DiscoverySettings, SerialSettings};
use wtp_common::consts::EVENT_CHANNEL_CAPACITY;
use wtp_common::device::{DetectionResult, DeviceDescriptor, DeviceType};

use super::port::{PortError, PortProvider};
use super::probe::{ProbeOutcome, probe_motion_controller, probe_pendant};

/// Discovery errors.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    /// The provider could not enumerate endpoints.
    #[error("Endpoint enumeration failed: {0}")]
    Enumeration(#[from] PortError),
}

/// Notifications from the monitor loop.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// Endpoints that appeared since the previous poll.
    EndpointsAttached(Vec<String>),
    /// Endpoints that vanished since the previous poll.
    EndpointsDetached(Vec<String>),
    /// A debounced re-probe found hardware.
    HardwareDetected(DetectionResult),
}

struct Inner {
    provider: Arc<dyn PortProvider>,
    settings: DiscoverySettings,
    pendant_serial: SerialSettings,
    probe_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<DiscoveryEvent>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

/// Discovery service. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DeviceDiscovery {
    inner: Arc<Inner>,
}

impl DeviceDiscovery {
    /// Create a service. `pendant_serial` is the framing used for pendant
    /// probes.
    pub fn new(
        provider: Arc<dyn PortProvider>,
        settings: DiscoverySettings,
        pendant_serial: SerialSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                provider,
                settings,
                pendant_serial,
                probe_lock: tokio::sync::Mutex::new(()),
                events,
                monitor: Mutex::new(None),
            }),
        }
    }

    /// Port provider in use.
    pub fn provider(&self) -> Arc<dyn PortProvider> {
        Arc::clone(&self.inner.provider)
    }

    /// Enumerate endpoints without probing them.
    pub async fn list_endpoints(&self) -> Result<Vec<DeviceDescriptor>, DiscoveryError> {
        self.inner.list_endpoints().await
    }

    /// Find a pendant.
    pub async fn detect_pendant(&self) -> Option<DeviceDescriptor> {
        let endpoints = self.inner.list_or_empty().await;
        let _probe = self.inner.probe_lock.lock().await;
        self.inner
            .detect_pendant(&endpoints, &mut ScanLog::default())
            .await
    }

    /// Find a motion controller.
    pub async fn detect_motion_controller(&self) -> Option<DeviceDescriptor> {
        let endpoints = self.inner.list_or_empty().await;
        let _probe = self.inner.probe_lock.lock().await;
        self.inner
            .detect_motion_controller(&endpoints, None, &mut ScanLog::default())
            .await
    }

    /// Full scan: pendant first, then motion controller on the remaining
    /// endpoints.
    pub async fn detect_all(&self) -> DetectionResult {
        self.inner.detect_all().await
    }

    /// Subscribe to monitor events.
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.inner.events.subscribe()
    }

    /// Start the hot-plug monitor. No-op if already running.
    pub fn start_monitoring(&self) {
        let mut monitor = self.inner.monitor.lock();
        if monitor.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        info!(
            provider = self.inner.provider.name(),
            interval_ms = self.inner.settings.poll_interval_ms,
            "Starting endpoint monitor"
        );
        *monitor = Some(tokio::spawn(monitor_loop(Arc::clone(&self.inner))));
    }

    /// Stop the hot-plug monitor.
    pub fn stop_monitoring(&self) {
        if let Some(handle) = self.inner.monitor.lock().take() {
            handle.abort();
            info!("Endpoint monitor stopped");
        }
    }

    /// True while the monitor loop runs.
    pub fn is_monitoring(&self) -> bool {
        self.inner
            .monitor
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

/// Evidence about unrecognised endpoints gathered during one scan.
#[derive(Debug, Default)]
struct ScanLog {
    answered: HashSet<String>,
    unreachable: HashSet<String>,
}

impl ScanLog {
    fn record(&mut self, endpoint: &str, outcome: ProbeOutcome) {
        if outcome == ProbeOutcome::Unrecognised {
            self.answered.insert(endpoint.to_string());
        }
    }

    fn unreachable(&mut self, endpoint: &str) {
        self.unreachable.insert(endpoint.to_string());
    }

    /// Endpoints that answered something are `Generic`; silent or unprobed
    /// ones stay `Unknown`.
    fn classify(&self, mut d: DeviceDescriptor) -> DeviceDescriptor {
        if self.answered.contains(&d.endpoint) {
            d.device_type = DeviceType::Generic;
        }
        if self.unreachable.contains(&d.endpoint) {
            d.available = false;
        }
        d
    }
}

impl Inner {
    async fn list_endpoints(&self) -> Result<Vec<DeviceDescriptor>, DiscoveryError> {
        let ports = self.provider.list().await?;
        Ok(ports.iter().map(|p| p.to_descriptor()).collect())
    }

    async fn list_or_empty(&self) -> Vec<DeviceDescriptor> {
        match self.list_endpoints().await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!("{e}");
                Vec::new()
            }
        }
    }

    fn is_pendant_candidate(&self, d: &DeviceDescriptor) -> bool {
        let known_id = match (d.vendor_id, d.product_id) {
            (Some(vid), Some(pid)) => self
                .settings
                .pendant_usb_ids
                .iter()
                .any(|id| id.vendor_id == vid && id.product_id == pid),
            _ => false,
        };
        let description = d.description.to_lowercase();
        known_id
            || self
                .settings
                .pendant_description_hints
                .iter()
                .any(|hint| description.contains(&hint.to_lowercase()))
    }

    async fn detect_pendant(
        &self,
        endpoints: &[DeviceDescriptor],
        log: &mut ScanLog,
    ) -> Option<DeviceDescriptor> {
        let mut candidates: Vec<&DeviceDescriptor> = endpoints
            .iter()
            .filter(|d| self.is_pendant_candidate(d))
            .collect();
        if candidates.is_empty() {
            debug!("No pendant candidates by id or description; probing all endpoints");
            candidates = endpoints.iter().collect();
        }

        let timeout = self.settings.probe_timeout();
        for candidate in candidates {
            let mut port = match self
                .provider
                .open(&candidate.endpoint, &self.pendant_serial)
                .await
            {
                Ok(port) => port,
                Err(e) => {
                    debug!(endpoint = %candidate.endpoint, "skipping: {e}");
                    log.unreachable(&candidate.endpoint);
                    continue;
                }
            };

            let result = probe_pendant(port.as_mut(), timeout).await;
            if let Err(e) = port.close().await {
                debug!(endpoint = %candidate.endpoint, "close failed: {e}");
            }

            match result {
                Ok(ProbeOutcome::Recognised) => {
                    info!(
                        endpoint = %candidate.endpoint,
                        usb_id = ?candidate.usb_id(),
                        "Pendant detected"
                    );
                    return Some(
                        candidate.classified(DeviceType::Pendant, self.pendant_serial.baud_rate),
                    );
                }
                Ok(outcome) => {
                    debug!(endpoint = %candidate.endpoint, ?outcome, "no pendant response");
                    log.record(&candidate.endpoint, outcome);
                }
                Err(e) => debug!(endpoint = %candidate.endpoint, "pendant probe failed: {e}"),
            }
        }
        None
    }

    async fn detect_motion_controller(
        &self,
        endpoints: &[DeviceDescriptor],
        exclude: Option<&str>,
        log: &mut ScanLog,
    ) -> Option<DeviceDescriptor> {
        let timeout = self.settings.probe_timeout();
        for candidate in endpoints
            .iter()
            .filter(|d| Some(d.endpoint.as_str()) != exclude)
        {
            for &baud_rate in &self.settings.motion_baud_rates {
                let framing = SerialSettings {
                    baud_rate,
                    ..self.pendant_serial
                };
                let mut port = match self.provider.open(&candidate.endpoint, &framing).await {
                    Ok(port) => port,
                    Err(e) => {
                        debug!(endpoint = %candidate.endpoint, "skipping: {e}");
                        log.unreachable(&candidate.endpoint);
                        break;
                    }
                };

                let result = probe_motion_controller(port.as_mut(), timeout).await;
                if let Err(e) = port.close().await {
                    debug!(endpoint = %candidate.endpoint, "close failed: {e}");
                }

                match result {
                    Ok(ProbeOutcome::Recognised) => {
                        info!(endpoint = %candidate.endpoint, baud_rate, "Motion controller detected");
                        return Some(candidate.classified(DeviceType::MotionController, baud_rate));
                    }
                    Ok(outcome) => log.record(&candidate.endpoint, outcome),
                    Err(e) => {
                        debug!(endpoint = %candidate.endpoint, baud_rate, "status probe failed: {e}");
                        break;
                    }
                }
            }
        }
        None
    }

    async fn detect_all(&self) -> DetectionResult {
        let endpoints = self.list_or_empty().await;
        let _probe = self.probe_lock.lock().await;
        let mut log = ScanLog::default();

        let pendant = self.detect_pendant(&endpoints, &mut log).await;
        let motion_controller = self
            .detect_motion_controller(
                &endpoints,
                pendant.as_ref().map(|p| p.endpoint.as_str()),
                &mut log,
            )
            .await;

        let endpoints = endpoints
            .into_iter()
            .map(|d| {
                match [&pendant, &motion_controller]
                    .into_iter()
                    .flatten()
                    .find(|hit| hit.endpoint == d.endpoint)
                {
                    Some(hit) => hit.clone(),
                    None => log.classify(d),
                }
            })
            .collect();

        let result = DetectionResult {
            endpoints,
            pendant,
            motion_controller,
            detected_at: chrono::Utc::now(),
        };
        info!(
            endpoints = result.endpoints.len(),
            pendant = ?result.pendant.as_ref().map(|d| &d.endpoint),
            motion_controller = ?result.motion_controller.as_ref().map(|d| &d.endpoint),
            "Discovery finished"
        );
        result
    }

    fn emit(&self, event: DiscoveryEvent) {
        if self.events.send(event).is_err() {
            debug!("discovery event dropped: no subscribers");
        }
    }
}

async fn endpoint_names(inner: &Inner) -> Option<BTreeSet<String>> {
    match inner.provider.list().await {
        Ok(ports) => Some(ports.into_iter().map(|p| p.name).collect()),
        Err(e) => {
            warn!("Endpoint poll failed: {e}");
            None
        }
    }
}

async fn monitor_loop(inner: Arc<Inner>) {
    let mut known = endpoint_names(&inner).await.unwrap_or_default();
    let mut ticker = tokio::time::interval(inner.settings.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut reprobe_at: Option<Instant> = None;

    loop {
        let deadline = reprobe_at;
        let debounce = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ticker.tick() => {
                let Some(current) = endpoint_names(&inner).await else {
                    continue;
                };
                let attached: Vec<String> = current.difference(&known).cloned().collect();
                let detached: Vec<String> = known.difference(&current).cloned().collect();
                known = current;

                if !detached.is_empty() {
                    info!(?detached, "Endpoints detached");
                    inner.emit(DiscoveryEvent::EndpointsDetached(detached));
                }
                if !attached.is_empty() {
                    info!(?attached, "Endpoints attached");
                    inner.emit(DiscoveryEvent::EndpointsAttached(attached));
                    reprobe_at = Some(Instant::now() + inner.settings.debounce());
                }
            }
            _ = debounce => {
                reprobe_at = None;
                let result = inner.detect_all().await;
                if result.has_hardware() {
                    inner.emit(DiscoveryEvent::HardwareDetected(result));
                }
            }
        }
    }
}

//! Pendant indicator sidecar.
//!
//! The hardware controller mirrors its state on the pendant LEDs. The
//! pendant is opened and identified on connect; afterwards every update is
//! best-effort and only logged on failure.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use wtp_common::config::SerialSettings;
use wtp_common::controller::ControllerError;

use crate::discovery::port::{PortProvider, SerialPort};
use crate::discovery::probe::{ProbeOutcome, probe_pendant};
use crate::protocol::pendant::{self, LedColor, LedPosition};

/// LED slot used for the controller state.
const STATE_LED: LedPosition = LedPosition::Left1;

/// State shown on the pendant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    /// Connected, at rest
    Ready,
    /// Move or homing in flight
    Moving,
    /// Blocking alarm active
    Alarm,
    /// All LEDs off
    Off,
}

impl IndicatorState {
    fn color(self) -> LedColor {
        match self {
            IndicatorState::Ready => LedColor::Blue,
            IndicatorState::Moving => LedColor::Green,
            IndicatorState::Alarm => LedColor::Red,
            IndicatorState::Off => LedColor::Off,
        }
    }
}

/// Pendant LED and buzzer output.
pub struct PendantIndicator {
    provider: Arc<dyn PortProvider>,
    endpoint: Option<String>,
    serial: SerialSettings,
    port: tokio::sync::Mutex<Option<Box<dyn SerialPort>>>,
    shown: Mutex<Option<IndicatorState>>,
}

impl PendantIndicator {
    /// Indicator on `endpoint`. With no endpoint every call is a no-op.
    pub fn new(
        provider: Arc<dyn PortProvider>,
        endpoint: Option<String>,
        serial: SerialSettings,
    ) -> Self {
        Self {
            provider,
            endpoint,
            serial,
            port: tokio::sync::Mutex::new(None),
            shown: Mutex::new(None),
        }
    }

    /// Configured endpoint.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// True while the endpoint is held open.
    pub async fn is_open(&self) -> bool {
        self.port.lock().await.is_some()
    }

    /// Open the endpoint and run the identify handshake.
    ///
    /// # Errors
    /// `ConnectionFailed` if the endpoint cannot be opened, `HandshakeFailed`
    /// if the device does not answer like a pendant.
    pub async fn open(&self) -> Result<(), ControllerError> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            debug!("No pendant endpoint configured, indication disabled");
            return Ok(());
        };

        let mut slot = self.port.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let mut port = self
            .provider
            .open(endpoint, &self.serial)
            .await
            .map_err(|e| ControllerError::ConnectionFailed(format!("{endpoint}: {e}")))?;

        match probe_pendant(port.as_mut(), self.serial.read_timeout()).await {
            Ok(ProbeOutcome::Recognised) => {
                info!(endpoint, baud = self.serial.baud_rate, "Pendant indicator open");
                *slot = Some(port);
                *self.shown.lock() = None;
                Ok(())
            }
            Ok(_) => {
                let _ = port.close().await;
                Err(ControllerError::HandshakeFailed(format!(
                    "{endpoint}: no pendant response"
                )))
            }
            Err(e) => {
                let _ = port.close().await;
                Err(ControllerError::HandshakeFailed(format!("{endpoint}: {e}")))
            }
        }
    }

    /// Release the endpoint, switching the LEDs off first.
    pub async fn close(&self) {
        self.show(IndicatorState::Off).await;
        let mut slot = self.port.lock().await;
        if let Some(mut port) = slot.take() {
            if let Err(e) = port.close().await {
                warn!(endpoint = port.name(), "Pendant close failed: {e}");
            }
            debug!(endpoint = port.name(), "Pendant indicator closed");
        }
        *self.shown.lock() = None;
    }

    /// Set one LED.
    pub async fn set_led(&self, position: LedPosition, color: LedColor) -> Result<(), ControllerError> {
        self.send(&pendant::led_frame(position, color)).await
    }

    /// Switch the buzzer.
    pub async fn buzzer(&self, on: bool) -> Result<(), ControllerError> {
        self.send(&pendant::buzzer_frame(on)).await
    }

    /// Show a controller state. Repeats of the current state are skipped.
    pub async fn show(&self, state: IndicatorState) {
        let previous = {
            let mut shown = self.shown.lock();
            if *shown == Some(state) {
                return;
            }
            shown.replace(state)
        };

        if let Err(e) = self.apply(state, previous).await {
            warn!(?state, "Pendant indication failed: {e}");
        }
    }

    async fn apply(
        &self,
        state: IndicatorState,
        previous: Option<IndicatorState>,
    ) -> Result<(), ControllerError> {
        if state == IndicatorState::Off {
            for position in LedPosition::ALL {
                self.set_led(position, LedColor::Off).await?;
            }
        } else {
            self.set_led(STATE_LED, state.color()).await?;
        }

        match (previous, state) {
            (_, IndicatorState::Alarm) => self.buzzer(true).await,
            (Some(IndicatorState::Alarm), _) | (_, IndicatorState::Off) => self.buzzer(false).await,
            _ => Ok(()),
        }
    }

    async fn send(&self, frame: &[u8]) -> Result<(), ControllerError> {
        let mut slot = self.port.lock().await;
        match slot.as_mut() {
            Some(port) => port
                .write_all(frame)
                .await
                .map_err(|e| ControllerError::Device(format!("pendant: {e}"))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::port::PortInfo;
    use crate::discovery::virtual_port::{VirtualDevice, VirtualPortProvider};

    fn bench(device: VirtualDevice) -> VirtualPortProvider {
        let provider = VirtualPortProvider::new();
        provider.attach(PortInfo::new("COM7", "Teach Pendant"), device);
        provider
    }

    fn indicator(provider: &VirtualPortProvider, endpoint: Option<&str>) -> PendantIndicator {
        PendantIndicator::new(
            Arc::new(provider.clone()),
            endpoint.map(str::to_string),
            SerialSettings::eight_n_one(9600, 100),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_runs_identify() {
        let provider = bench(VirtualDevice::Pendant);
        let ind = indicator(&provider, Some("COM7"));
        ind.open().await.unwrap();

        assert!(ind.is_open().await);
        assert_eq!(provider.open_handles("COM7"), 1);
        assert_eq!(provider.written("COM7"), vec![pendant::identify_frame().to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_fails_handshake_and_releases() {
        let provider = bench(VirtualDevice::Silent);
        let ind = indicator(&provider, Some("COM7"));

        assert!(matches!(
            ind.open().await,
            Err(ControllerError::HandshakeFailed(_))
        ));
        assert!(!ind.is_open().await);
        assert_eq!(provider.open_handles("COM7"), 0);
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_connection_failure() {
        let provider = VirtualPortProvider::new();
        let ind = indicator(&provider, Some("COM9"));
        assert!(matches!(
            ind.open().await,
            Err(ControllerError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_indicator_is_noop() {
        let provider = VirtualPortProvider::new();
        let ind = indicator(&provider, None);
        ind.open().await.unwrap();
        ind.show(IndicatorState::Alarm).await;
        assert!(ind.set_led(LedPosition::Right3, LedColor::Yellow).await.is_ok());
        assert!(!ind.is_open().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_colors_and_buzzer() {
        let provider = bench(VirtualDevice::Pendant);
        let ind = indicator(&provider, Some("COM7"));
        ind.open().await.unwrap();

        ind.show(IndicatorState::Ready).await;
        ind.show(IndicatorState::Ready).await;
        ind.show(IndicatorState::Alarm).await;
        ind.show(IndicatorState::Ready).await;

        let frames = provider.written("COM7");
        assert_eq!(
            &frames[1..],
            &[
                pendant::led_frame(STATE_LED, LedColor::Blue).to_vec(),
                pendant::led_frame(STATE_LED, LedColor::Red).to_vec(),
                pendant::buzzer_frame(true).to_vec(),
                pendant::led_frame(STATE_LED, LedColor::Blue).to_vec(),
                pendant::buzzer_frame(false).to_vec(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_switches_off_and_releases() {
        let provider = bench(VirtualDevice::Pendant);
        let ind = indicator(&provider, Some("COM7"));
        ind.open().await.unwrap();
        ind.close().await;

        assert_eq!(provider.open_handles("COM7"), 0);
        let frames = provider.written("COM7");
        // identify, six LEDs off, buzzer off
        assert_eq!(frames.len(), 1 + 6 + 1);
        assert_eq!(frames.last().unwrap(), &pendant::buzzer_frame(false).to_vec());
    }
}

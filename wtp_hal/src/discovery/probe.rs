//! Protocol handshakes run against an open endpoint.

use std::time::Duration;
use tracing::trace;

use super::port::{PortError, SerialPort, exchange};
use crate::protocol::{motion, pendant};

/// Result of one handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The expected device answered.
    Recognised,
    /// Bytes came back, but not a known signature.
    Unrecognised,
    /// Nothing came back within the timeout.
    Silent,
}

impl ProbeOutcome {
    fn of(response: &[u8], recognised: impl Fn(&[u8]) -> bool) -> Self {
        if recognised(response) {
            ProbeOutcome::Recognised
        } else if response.is_empty() {
            ProbeOutcome::Silent
        } else {
            ProbeOutcome::Unrecognised
        }
    }
}

/// Identify handshake, with the LED-test frame as fallback when the first
/// probe gets no bytes at all.
pub async fn probe_pendant(
    port: &mut dyn SerialPort,
    timeout: Duration,
) -> Result<ProbeOutcome, PortError> {
    let response = exchange(port, &pendant::identify_frame(), timeout).await?;
    trace!(endpoint = port.name(), ?response, "identify response");
    let outcome = ProbeOutcome::of(&response, pendant::is_pendant_response);
    if outcome != ProbeOutcome::Silent {
        return Ok(outcome);
    }

    let response = exchange(port, &pendant::led_test_frame(), timeout).await?;
    trace!(endpoint = port.name(), ?response, "LED test response");
    Ok(ProbeOutcome::of(&response, pendant::is_pendant_response))
}

/// Status-query handshake.
pub async fn probe_motion_controller(
    port: &mut dyn SerialPort,
    timeout: Duration,
) -> Result<ProbeOutcome, PortError> {
    let response = exchange(port, motion::STATUS_QUERY, timeout).await?;
    trace!(endpoint = port.name(), ?response, "status response");
    Ok(ProbeOutcome::of(&response, motion::is_status_response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::port::{PortInfo, PortProvider};
    use crate::discovery::virtual_port::{VirtualDevice, VirtualPortProvider};
    use wtp_common::config::SerialSettings;

    async fn pendant_outcome(device: VirtualDevice) -> ProbeOutcome {
        let provider = VirtualPortProvider::new();
        provider.attach(PortInfo::new("COM1", ""), device);
        let mut port = provider
            .open("COM1", &SerialSettings::eight_n_one(9600, 100))
            .await
            .unwrap();
        probe_pendant(port.as_mut(), Duration::from_millis(100))
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_pendant_outcomes() {
        assert_eq!(pendant_outcome(VirtualDevice::Pendant).await, ProbeOutcome::Recognised);
        assert_eq!(
            pendant_outcome(VirtualDevice::LegacyPendant).await,
            ProbeOutcome::Recognised
        );
        assert_eq!(pendant_outcome(VirtualDevice::Chatty).await, ProbeOutcome::Unrecognised);
        assert_eq!(pendant_outcome(VirtualDevice::Silent).await, ProbeOutcome::Silent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_motion_probe_wrong_baud_is_silent() {
        let provider = VirtualPortProvider::new();
        provider.attach(
            PortInfo::new("COM2", ""),
            VirtualDevice::MotionController { baud_rate: 57_600 },
        );
        let timeout = Duration::from_millis(100);

        let mut port = provider
            .open("COM2", &SerialSettings::eight_n_one(9600, 100))
            .await
            .unwrap();
        assert_eq!(
            probe_motion_controller(port.as_mut(), timeout).await.unwrap(),
            ProbeOutcome::Silent
        );

        let mut port = provider
            .open("COM2", &SerialSettings::eight_n_one(57_600, 100))
            .await
            .unwrap();
        assert_eq!(
            probe_motion_controller(port.as_mut(), timeout).await.unwrap(),
            ProbeOutcome::Recognised
        );
    }
}

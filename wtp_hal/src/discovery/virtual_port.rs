//! In-process endpoints.
//!
//! `VirtualPortProvider` models a bench of serial devices that answer the
//! pendant and motion-controller probes. It backs the `--virtual-hardware`
//! mode of the binary and the test suites. Devices can be attached and
//! detached at runtime to exercise hot-plug handling.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use wtp_common::config::SerialSettings;

use super::port::{PortError, PortInfo, PortProvider, SerialPort};
use crate::protocol::motion::STATUS_QUERY;
use crate::protocol::pendant::{self, ACK, CMD_IDENTIFY};

/// Behaviour of a virtual endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualDevice {
    /// Acknowledges every valid pendant frame.
    Pendant,
    /// Pendant firmware that ignores identify but acknowledges LED frames.
    LegacyPendant,
    /// Answers the status query, only at its baud rate.
    MotionController {
        /// Baud rate the controller listens at
        baud_rate: u32,
    },
    /// Opens fine, never answers.
    Silent,
    /// Answers every request with a line-mode error prompt.
    Chatty,
    /// Cannot be opened (held by another process).
    Unavailable,
}

impl VirtualDevice {
    fn respond(self, baud_rate: u32, request: &[u8]) -> Vec<u8> {
        match self {
            VirtualDevice::Pendant => match pendant::decode(request) {
                Ok(_) => vec![ACK],
                Err(_) => Vec::new(),
            },
            VirtualDevice::LegacyPendant => match pendant::decode(request) {
                Ok(payload) if payload.first() != Some(&CMD_IDENTIFY) => vec![ACK],
                _ => Vec::new(),
            },
            VirtualDevice::MotionController { baud_rate: own } => {
                if own == baud_rate && request == STATUS_QUERY {
                    b"ST 0000\r".to_vec()
                } else {
                    Vec::new()
                }
            }
            VirtualDevice::Chatty => b"?\r".to_vec(),
            VirtualDevice::Silent | VirtualDevice::Unavailable => Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Endpoint {
    info: PortInfo,
    device: VirtualDevice,
}

#[derive(Debug, Default)]
struct Bench {
    endpoints: Vec<Endpoint>,
    writes: HashMap<String, Vec<Vec<u8>>>,
    open: HashMap<String, usize>,
    failing: HashSet<String>,
}

impl Bench {
    fn device(&self, name: &str) -> Option<VirtualDevice> {
        self.endpoints
            .iter()
            .find(|e| e.info.name == name)
            .map(|e| e.device)
    }

    fn release(&mut self, name: &str) {
        if let Some(count) = self.open.get_mut(name) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Provider of virtual endpoints.
#[derive(Debug, Clone, Default)]
pub struct VirtualPortProvider {
    bench: Arc<Mutex<Bench>>,
}

impl VirtualPortProvider {
    /// Empty bench.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bench with an FTDI pendant on `/dev/ttyVP0` and a motion controller
    /// at 115200 baud on `/dev/ttyVP1`.
    pub fn demo_bench() -> Self {
        let provider = Self::new();
        provider.attach(
            PortInfo::usb("/dev/ttyVP0", "Teach Pendant", 0x0403, 0x6001),
            VirtualDevice::Pendant,
        );
        provider.attach(
            PortInfo::new("/dev/ttyVP1", "Motion Controller"),
            VirtualDevice::MotionController { baud_rate: 115_200 },
        );
        provider
    }

    /// Plug in a device. Replaces an endpoint with the same name.
    pub fn attach(&self, info: PortInfo, device: VirtualDevice) {
        let mut bench = self.bench.lock();
        bench.endpoints.retain(|e| e.info.name != info.name);
        bench.endpoints.push(Endpoint { info, device });
    }

    /// Unplug a device. Returns `false` if it was not present.
    pub fn detach(&self, name: &str) -> bool {
        let mut bench = self.bench.lock();
        let before = bench.endpoints.len();
        bench.endpoints.retain(|e| e.info.name != name);
        bench.endpoints.len() != before
    }

    /// Make writes to `name` fail (or succeed again).
    pub fn set_failing(&self, name: &str, failing: bool) {
        let mut bench = self.bench.lock();
        if failing {
            bench.failing.insert(name.to_string());
        } else {
            bench.failing.remove(name);
        }
    }

    /// Every write made to `name`, oldest first.
    pub fn written(&self, name: &str) -> Vec<Vec<u8>> {
        self.bench.lock().writes.get(name).cloned().unwrap_or_default()
    }

    /// Number of currently open handles on `name`.
    pub fn open_handles(&self, name: &str) -> usize {
        self.bench.lock().open.get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PortProvider for VirtualPortProvider {
    fn name(&self) -> &'static str {
        "virtual"
    }

    async fn list(&self) -> Result<Vec<PortInfo>, PortError> {
        Ok(self
            .bench
            .lock()
            .endpoints
            .iter()
            .map(|e| e.info.clone())
            .collect())
    }

    async fn open(
        &self,
        name: &str,
        settings: &SerialSettings,
    ) -> Result<Box<dyn SerialPort>, PortError> {
        let mut bench = self.bench.lock();
        let device = bench
            .device(name)
            .ok_or_else(|| PortError::NotFound(name.to_string()))?;
        if device == VirtualDevice::Unavailable {
            return Err(PortError::Busy(name.to_string()));
        }
        *bench.open.entry(name.to_string()).or_insert(0) += 1;

        Ok(Box::new(VirtualPort {
            name: name.to_string(),
            baud_rate: settings.baud_rate,
            device,
            bench: Arc::clone(&self.bench),
            rx: VecDeque::new(),
            open: true,
        }))
    }
}

struct VirtualPort {
    name: String,
    baud_rate: u32,
    device: VirtualDevice,
    bench: Arc<Mutex<Bench>>,
    rx: VecDeque<u8>,
    open: bool,
}

#[async_trait]
impl SerialPort for VirtualPort {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), PortError> {
        if !self.open {
            return Err(PortError::Closed);
        }
        {
            let mut bench = self.bench.lock();
            if bench.device(&self.name).is_none() {
                return Err(PortError::NotFound(self.name.clone()));
            }
            if bench.failing.contains(&self.name) {
                return Err(PortError::Io(format!("{}: write failed", self.name)));
            }
            bench
                .writes
                .entry(self.name.clone())
                .or_default()
                .push(bytes.to_vec());
        }

        let response = self.device.respond(self.baud_rate, bytes);
        trace!(
            endpoint = %self.name,
            request = ?bytes,
            response = ?response,
            "virtual exchange"
        );
        self.rx.extend(response);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, PortError> {
        if !self.open {
            return Err(PortError::Closed);
        }
        if self.rx.is_empty() {
            tokio::time::sleep(timeout).await;
            return Ok(0);
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn clear_input(&mut self) -> Result<(), PortError> {
        self.rx.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PortError> {
        if self.open {
            self.open = false;
            self.bench.lock().release(&self.name);
        }
        Ok(())
    }
}

impl Drop for VirtualPort {
    fn drop(&mut self) {
        if self.open {
            self.bench.lock().release(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::port::exchange;
    use crate::protocol::pendant::{identify_frame, led_test_frame};

    fn pendant_framing() -> SerialSettings {
        SerialSettings::eight_n_one(9600, 100)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pendant_acknowledges_identify() {
        let provider = VirtualPortProvider::new();
        provider.attach(PortInfo::new("COM3", "Teach Pendant"), VirtualDevice::Pendant);

        let mut port = provider.open("COM3", &pendant_framing()).await.unwrap();
        let response = exchange(port.as_mut(), &identify_frame(), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(response, vec![ACK]);
        assert_eq!(provider.written("COM3"), vec![identify_frame().to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_legacy_pendant_ignores_identify() {
        let provider = VirtualPortProvider::new();
        provider.attach(PortInfo::new("COM4", ""), VirtualDevice::LegacyPendant);

        let mut port = provider.open("COM4", &pendant_framing()).await.unwrap();
        let timeout = Duration::from_millis(100);
        assert!(exchange(port.as_mut(), &identify_frame(), timeout).await.unwrap().is_empty());
        assert_eq!(
            exchange(port.as_mut(), &led_test_frame(), timeout).await.unwrap(),
            vec![ACK]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_motion_controller_only_at_its_baud() {
        let provider = VirtualPortProvider::new();
        provider.attach(
            PortInfo::new("/dev/ttyS1", ""),
            VirtualDevice::MotionController { baud_rate: 38_400 },
        );
        let timeout = Duration::from_millis(100);

        let mut wrong = provider
            .open("/dev/ttyS1", &SerialSettings::eight_n_one(115_200, 100))
            .await
            .unwrap();
        assert!(exchange(wrong.as_mut(), STATUS_QUERY, timeout).await.unwrap().is_empty());

        let mut right = provider
            .open("/dev/ttyS1", &SerialSettings::eight_n_one(38_400, 100))
            .await
            .unwrap();
        assert!(exchange(right.as_mut(), STATUS_QUERY, timeout)
            .await
            .unwrap()
            .starts_with(b"ST"));
    }

    #[tokio::test]
    async fn test_open_handles_tracked() {
        let provider = VirtualPortProvider::new();
        provider.attach(PortInfo::new("A", ""), VirtualDevice::Silent);
        provider.attach(PortInfo::new("B", ""), VirtualDevice::Unavailable);

        let mut port = provider.open("A", &pendant_framing()).await.unwrap();
        assert_eq!(provider.open_handles("A"), 1);
        port.close().await.unwrap();
        assert_eq!(provider.open_handles("A"), 0);

        {
            let _dropped = provider.open("A", &pendant_framing()).await.unwrap();
            assert_eq!(provider.open_handles("A"), 1);
        }
        assert_eq!(provider.open_handles("A"), 0);

        assert!(matches!(
            provider.open("B", &pendant_framing()).await,
            Err(PortError::Busy(_))
        ));
        assert!(matches!(
            provider.open("C", &pendant_framing()).await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_detach_breaks_open_port() {
        let provider = VirtualPortProvider::new();
        provider.attach(PortInfo::new("A", ""), VirtualDevice::Pendant);
        let mut port = provider.open("A", &pendant_framing()).await.unwrap();

        assert!(provider.detach("A"));
        assert!(!provider.detach("A"));
        assert!(matches!(
            port.write_all(&identify_frame()).await,
            Err(PortError::NotFound(_))
        ));
    }
}

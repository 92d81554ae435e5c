//! Serial endpoint ports.
//!
//! The discovery service and the pendant indicator only ever talk to
//! endpoints through these two traits, so the byte transport can be a real
//! serial port (`serial` feature), or an in-process virtual device.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use wtp_common::config::SerialSettings;
use wtp_common::device::DeviceDescriptor;

/// Quiet time after the last received chunk that ends a response.
const RESPONSE_SETTLE: Duration = Duration::from_millis(20);

/// Largest response collected by [`exchange`].
const MAX_RESPONSE_LEN: usize = 256;

/// Endpoint I/O errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    /// Endpoint does not exist (anymore).
    #[error("Endpoint not found: {0}")]
    NotFound(String),

    /// Endpoint is held by another process.
    #[error("Endpoint busy: {0}")]
    Busy(String),

    /// Endpoint was closed.
    #[error("Endpoint closed")]
    Closed,

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

/// An endpoint as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Endpoint identifier
    pub name: String,
    /// Description (product string, driver name)
    pub description: String,
    /// USB vendor id
    pub vendor_id: Option<u16>,
    /// USB product id
    pub product_id: Option<u16>,
}

impl PortInfo {
    /// Non-USB endpoint.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            vendor_id: None,
            product_id: None,
        }
    }

    /// USB-backed endpoint.
    pub fn usb(
        name: impl Into<String>,
        description: impl Into<String>,
        vendor_id: u16,
        product_id: u16,
    ) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
            ..Self::new(name, description)
        }
    }

    /// Descriptor before probing. Always `Unknown`; USB ids are carried
    /// over when present.
    pub fn to_descriptor(&self) -> DeviceDescriptor {
        let d = DeviceDescriptor::new(&self.name, &self.description);
        match (self.vendor_id, self.product_id) {
            (Some(vid), Some(pid)) => d.with_usb_ids(vid, pid),
            _ => d,
        }
    }
}

/// An open endpoint.
#[async_trait]
pub trait SerialPort: Send {
    /// Endpoint identifier.
    fn name(&self) -> &str;

    /// Write all bytes.
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), PortError>;

    /// Read available bytes, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` when nothing arrived in time.
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, PortError>;

    /// Discard pending input.
    async fn clear_input(&mut self) -> Result<(), PortError>;

    /// Release the endpoint. Dropping an open port also releases it.
    async fn close(&mut self) -> Result<(), PortError>;
}

/// Enumerates and opens endpoints.
#[async_trait]
pub trait PortProvider: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Endpoints currently present.
    async fn list(&self) -> Result<Vec<PortInfo>, PortError>;

    /// Open an endpoint with the given framing.
    async fn open(
        &self,
        name: &str,
        settings: &SerialSettings,
    ) -> Result<Box<dyn SerialPort>, PortError>;
}

/// Send `request` and collect the response.
///
/// Waits up to `timeout` for the first byte, then keeps reading until the
/// line has been quiet for a short settle time. An empty vector means the
/// endpoint stayed silent.
pub async fn exchange(
    port: &mut dyn SerialPort,
    request: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>, PortError> {
    port.clear_input().await?;
    port.write_all(request).await?;

    let deadline = Instant::now() + timeout;
    let mut response = Vec::new();
    let mut buf = [0u8; 64];

    loop {
        let wait = if response.is_empty() {
            deadline.saturating_duration_since(Instant::now())
        } else {
            RESPONSE_SETTLE
        };
        if wait.is_zero() {
            break;
        }

        let n = port.read(&mut buf, wait).await?;
        if n == 0 {
            break;
        }
        response.extend_from_slice(&buf[..n]);
        if response.len() >= MAX_RESPONSE_LEN {
            break;
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wtp_common::device::DeviceType;

    #[test]
    fn test_descriptor_classification() {
        let plain = PortInfo::new("/dev/ttyS0", "16550A");
        assert_eq!(plain.to_descriptor().device_type, DeviceType::Unknown);

        let usb = PortInfo::usb("/dev/ttyUSB0", "FT232R USB UART", 0x0403, 0x6001);
        let d = usb.to_descriptor();
        assert_eq!(d.device_type, DeviceType::Unknown);
        assert_eq!(d.usb_id().as_deref(), Some("0403:6001"));
    }
}

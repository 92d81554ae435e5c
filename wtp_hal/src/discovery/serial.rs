//! Real serial endpoints via `tokio-serial`.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort as _, SerialPortType, SerialStream};
use wtp_common::config::{Parity, SerialSettings, StopBits};

use super::port::{PortError, PortInfo, PortProvider, SerialPort};

/// Provider backed by the operating system's serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSerialProvider;

impl TokioSerialProvider {
    /// Create a provider.
    pub fn new() -> Self {
        Self
    }
}

fn map_error(name: &str, e: tokio_serial::Error) -> PortError {
    match e.kind {
        tokio_serial::ErrorKind::NoDevice => PortError::NotFound(name.to_string()),
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            PortError::Busy(name.to_string())
        }
        _ => PortError::Io(format!("{name}: {e}")),
    }
}

fn data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

#[async_trait]
impl PortProvider for TokioSerialProvider {
    fn name(&self) -> &'static str {
        "serial"
    }

    async fn list(&self) -> Result<Vec<PortInfo>, PortError> {
        let ports = tokio_serial::available_ports().map_err(|e| PortError::Io(e.to_string()))?;
        Ok(ports
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(usb) => {
                    let description = usb
                        .product
                        .or(usb.manufacturer)
                        .unwrap_or_else(|| "USB serial".to_string());
                    PortInfo::usb(p.port_name, description, usb.vid, usb.pid)
                }
                SerialPortType::PciPort => PortInfo::new(p.port_name, "PCI serial"),
                SerialPortType::BluetoothPort => PortInfo::new(p.port_name, "Bluetooth serial"),
                SerialPortType::Unknown => PortInfo::new(p.port_name, ""),
            })
            .collect())
    }

    async fn open(
        &self,
        name: &str,
        settings: &SerialSettings,
    ) -> Result<Box<dyn SerialPort>, PortError> {
        let builder = tokio_serial::new(name, settings.baud_rate)
            .data_bits(data_bits(settings.data_bits))
            .parity(match settings.parity {
                Parity::None => tokio_serial::Parity::None,
                Parity::Odd => tokio_serial::Parity::Odd,
                Parity::Even => tokio_serial::Parity::Even,
            })
            .stop_bits(match settings.stop_bits {
                StopBits::One => tokio_serial::StopBits::One,
                StopBits::Two => tokio_serial::StopBits::Two,
            })
            .timeout(settings.read_timeout());

        let stream = SerialStream::open(&builder).map_err(|e| map_error(name, e))?;
        Ok(Box::new(OsSerialPort {
            name: name.to_string(),
            stream: Some(stream),
        }))
    }
}

struct OsSerialPort {
    name: String,
    stream: Option<SerialStream>,
}

impl OsSerialPort {
    fn stream(&mut self) -> Result<&mut SerialStream, PortError> {
        self.stream.as_mut().ok_or(PortError::Closed)
    }
}

#[async_trait]
impl SerialPort for OsSerialPort {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), PortError> {
        let name = self.name.clone();
        let stream = self.stream()?;
        stream
            .write_all(bytes)
            .await
            .map_err(|e| PortError::Io(format!("{name}: {e}")))?;
        stream
            .flush()
            .await
            .map_err(|e| PortError::Io(format!("{name}: {e}")))
    }

    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, PortError> {
        let name = self.name.clone();
        let stream = self.stream()?;
        match tokio::time::timeout(timeout, stream.read(buf)).await {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Ok(Err(e)) => Err(PortError::Io(format!("{name}: {e}"))),
            Err(_) => Ok(0),
        }
    }

    async fn clear_input(&mut self) -> Result<(), PortError> {
        let name = self.name.clone();
        self.stream()?
            .clear(ClearBuffer::Input)
            .map_err(|e| map_error(&name, e))
    }

    async fn close(&mut self) -> Result<(), PortError> {
        self.stream.take();
        Ok(())
    }
}

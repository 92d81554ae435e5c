//! Device discovery.
//!
//! - [`port`] - `SerialPort` / `PortProvider` traits and the request/response helper
//! - [`probe`] - pendant and motion-controller handshakes
//! - [`service`] - `DeviceDiscovery`: enumeration, classification, hot-plug monitor
//! - [`virtual_port`] - in-process endpoints for bench runs and tests
//! - `serial` - operating system serial ports (feature `serial`)

pub mod port;
pub mod probe;
#[cfg(feature = "serial")]
pub mod serial;
pub mod service;
pub mod virtual_port;

pub use port::{PortError, PortInfo, PortProvider, SerialPort};
#[cfg(feature = "serial")]
pub use serial::TokioSerialProvider;
pub use service::{DeviceDiscovery, DiscoveryError, DiscoveryEvent};
pub use virtual_port::{VirtualDevice, VirtualPortProvider};

//! Hardware-backed controller and its fieldbus plumbing.
//!
//! - [`bus`] - `FieldbusMaster` port and CiA-402 process data
//! - [`virtual_bus`] - in-process drive model (`"virtual"` backend)
//! - [`registry`] - backend name → master factory
//! - [`indicator`] - pendant LED/buzzer sidecar
//! - [`sensors`] - snapshot building and edge-triggered alarms
//! - [`controller`] - `HardwareController`

pub mod bus;
pub mod controller;
pub mod indicator;
pub mod registry;
pub mod sensors;
pub mod virtual_bus;

pub use bus::{FieldbusError, FieldbusMaster};
pub use controller::HardwareController;
pub use indicator::{IndicatorState, PendantIndicator};
pub use registry::FieldbusRegistry;
pub use virtual_bus::{VirtualFieldbus, VirtualFieldbusHandle};

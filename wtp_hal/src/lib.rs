//! # WTP HAL Library
//!
//! Motion-control core of the wafer transfer robot: simulated and
//! fieldbus-backed controllers behind one contract, device discovery on
//! serial endpoints, and a supervisor that hot-swaps between them.
//!
//! # Module Structure
//!
//! - [`controller_factory`] - builds simulated and hardware controllers
//! - [`discovery`] - endpoint enumeration, probing and hot-plug monitor
//! - [`drivers`] - `SimulatedController`, `HardwareController`
//! - [`protocol`] - pendant frames and motion-controller status query
//! - [`supervisor`] - active-controller ownership and swapping
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        wtp_hal (single crate)                    │
//! │  ┌─────────────┐    ┌──────────────────┐    ┌─────────────────┐  │
//! │  │  Discovery  │───►│ ControllerSuper- │◄──►│ ControllerFac-  │  │
//! │  │  (monitor)  │    │ visor            │    │ tory            │  │
//! │  └──────┬──────┘    └────────┬─────────┘    └─────────────────┘  │
//! │         │                    │                                   │
//! │         ▼                    ▼                                   │
//! │   PortProvider     ┌────────────────────┐                        │
//! │   (serial/virtual) │ MotionController   │ (trait object)         │
//! │                    │  ├ Simulated       │                        │
//! │                    │  └ Hardware ──► FieldbusMaster + pendant    │
//! │                    └────────────────────┘                        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod controller_factory;
pub mod discovery;
pub mod drivers;
pub mod protocol;
pub mod supervisor;

pub use crate::controller_factory::{ControllerFactory, DefaultControllerFactory};
pub use crate::discovery::DeviceDiscovery;
pub use crate::drivers::{HardwareController, SimulatedController};
pub use crate::supervisor::{ActiveController, ControllerSupervisor, SupervisorError, SupervisorEvent};

//! Controller implementations.
//!
//! - [`simulation`] - `SimulatedController`, synthesized motion without a device
//! - [`fieldbus`] - `HardwareController`, fieldbus drives plus pendant indicator
//! - [`state`] - status cell, motion guard and stop signal shared by both
//!
//! # Adding a Fieldbus Backend
//!
//! 1. Implement [`fieldbus::FieldbusMaster`] for the new master
//! 2. Register a factory in [`fieldbus::FieldbusRegistry`] under a name
//! 3. Select it with `[fieldbus] backend = "<name>"`

pub mod fieldbus;
pub mod simulation;
pub mod state;

pub use fieldbus::HardwareController;
pub use simulation::SimulatedController;

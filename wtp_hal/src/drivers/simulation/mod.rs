//! Simulation controller module.
//!
//! Software-synthesized motion for development and testing without a
//! motion controller attached.

mod controller;
mod profile;

pub use controller::SimulatedController;
pub use profile::{MotionProfile, tick_period};

//! WTP Common Library
//!
//! This crate provides the shared vocabulary of the wafer teaching pendant
//! motion core: value types, coordinate conversion, the controller contract,
//! events, safety gating and configuration loading.
//!
//! # Module Structure
//!
//! - [`consts`] - Scale factors, pulse bounds and protocol timing
//! - [`types`] - Position, status and sensor snapshot types
//! - [`coords`] - Unit conversion, range checks and interpolation math
//! - [`controller`] - `MotionController` trait and `ControllerError`
//! - [`events`] - Controller events and the broadcast `EventHub`
//! - [`device`] - Discovery descriptors and results
//! - [`safety`] - Safety conditions, interlocks and alarm flags
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! wtp_common = { path = "../wtp_common" }
//! ```
//!
//! ```rust
//! use wtp_common::prelude::*;
//! use wtp_common::coords::to_axis_coordinates;
//!
//! let target = to_axis_coordinates(&Position::new(50.0, 90.0, 10.0), 50).unwrap();
//! assert_eq!(target.theta, 9_000);
//! ```

pub mod config;
pub mod consts;
pub mod controller;
pub mod coords;
pub mod device;
pub mod events;
pub mod prelude;
pub mod safety;
pub mod types;

//! Serial wire protocols.
//!
//! - [`pendant`] - STX/ETX framed pendant commands (identify, LEDs, buzzer)
//! - [`motion`] - ASCII status query used to recognise motion controllers

pub mod motion;
pub mod pendant;

pub use pendant::ProtocolError;

//! Device links for the two-tube demonstrator.
//!
//! The simulated device is always available; the serial backend is behind the
//! `hardware` feature.
pub mod error;
#[cfg(feature = "hardware")]
pub mod serial;
pub mod sim;
pub mod util;

#[cfg(feature = "hardware")]
pub use serial::{DEFAULT_BAUD, SerialLink, SerialReader, SerialWriter};
pub use sim::{SimParams, SimReader, SimWriter, SimulatedDevice};

#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Hardware control driver for the two-tube water-level demonstrator.
//!
//! All device I/O goes through the `claire_traits::LineSource` and
//! `claire_traits::CommandSink` traits, so the same controller drives the
//! serial firmware and the simulator.
//!
//! ## Architecture
//!
//! - **Protocol**: command encoding and the once-per-line classifier (`protocol`)
//! - **Line channel**: background reader and append-only line log (`channel`)
//! - **State**: typed state, freshness cache, unit conversion (`state`, `cache`, `units`)
//! - **Controller**: busy discipline, state round trips, tube operations (`controller`)
//! - **Scheduler**: one-shot countdown latches (`stopwatch`)
//! - **Control loops**: calibration sweep, level trace, rainfall experiment
//!   (`calibration`, `rainfall`), wrapped by the shutdown policy in `safety`
//!
//! Water levels are millimetres above the tube bottom; the sonar reports the
//! distance from the top (`level = max_level - distance`).

pub mod builder;
pub mod cache;
pub mod calibration;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod hw_error;
pub mod mocks;
pub mod protocol;
pub mod rainfall;
pub mod safety;
pub mod state;
pub mod stopwatch;
pub mod units;
pub mod util;

pub use builder::ControllerBuilder;
pub use cancel::CancelToken;
pub use controller::{Controller, TubeControl};
pub use error::{BuildError, DeviceError, Result};
pub use protocol::{Command, Direction};
pub use state::{DeviceState, TubeState};
pub use stopwatch::{StartOutcome, Stopwatch, WatchState};

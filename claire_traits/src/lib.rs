//! Hardware seams shared by the demonstrator crates.
//!
//! A serial link is used from two execution contexts: a background reader that
//! owns the receive half and the caller that owns the transmit half. The two
//! halves are therefore separate traits.
pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Receive half of a device link.
pub trait LineSource {
    /// Read one newline-terminated line with the terminator stripped.
    ///
    /// Returns `Ok(None)` when no complete line arrived within `timeout`.
    fn read_line(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Transmit half of a device link.
pub trait CommandSink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

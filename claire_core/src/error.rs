use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    #[error("failed to open device link: {0}")]
    OpenFailure(String),
    #[error("incompatible firmware: expected version {expected}, device reported {found:?}")]
    IncompatibleFirmware { expected: String, found: String },
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("sensor error on tube {tube}: raw distance {raw_mm} mm")]
    SensorError { tube: u8, raw_mm: f64 },
    #[error("communication timeout: no device state within {0:?}")]
    CommunicationTimeout(Duration),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("link error: {0}")]
    Link(String),
    #[error("interrupted")]
    Cancelled,
}

impl DeviceError {
    /// Errors a control loop may retry without operator intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DeviceError::SensorError { .. })
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing line source")]
    MissingSource,
    #[error("missing command sink")]
    MissingSink,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

/// Typed view of a report, if it carries a `DeviceError`.
pub fn device_error(err: &Report) -> Option<&DeviceError> {
    err.downcast_ref::<DeviceError>()
}

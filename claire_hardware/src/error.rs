use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("open serial port {port}: {reason}")]
    Open { port: String, reason: String },
    #[error("serial read timeout")]
    Timeout,
    #[error("link disconnected")]
    Disconnected,
    #[error("simulator state poisoned")]
    Poisoned,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;

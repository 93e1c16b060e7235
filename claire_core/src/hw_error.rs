//! Maps `Box<dyn Error>` from trait boundaries to typed `DeviceError`.
//!
//! The traits in `claire_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `claire_hardware::HwError` downcasting.

use crate::error::DeviceError;

/// Map a trait-boundary error to a typed `DeviceError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> DeviceError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<claire_hardware::error::HwError>() {
            return match hw {
                claire_hardware::error::HwError::Open { .. } => {
                    DeviceError::OpenFailure(hw.to_string())
                }
                other => DeviceError::Link(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("open") {
        DeviceError::OpenFailure(s)
    } else {
        DeviceError::Link(s)
    }
}

//! Emergency shutdown policy for long-running control loops.
//!
//! Any failure that escapes a loop, and any interrupt, ends in the same
//! sequence: emergency stop, a bounded wait for in-flight motion, then the
//! caller closes the link. Actuators are never left running.
use std::time::Duration;

use crate::controller::TubeControl;
use crate::error::{DeviceError, Result, device_error};

/// Send the emergency stop, then wait up to `wait` for a level move to clear.
pub fn emergency_shutdown<D: TubeControl + ?Sized>(dev: &mut D, wait: Duration) -> Result<()> {
    let stopped = dev.emergency_stop();
    if let Err(e) = &stopped {
        tracing::error!(error = %e, "emergency stop could not be sent");
    }
    match dev.wait_until_free_within(wait) {
        Ok(true) => {}
        Ok(false) => tracing::warn!(wait_ms = wait.as_millis() as u64, "device still busy after emergency stop"),
        Err(e) => tracing::warn!(error = %e, "waiting for device after emergency stop failed"),
    }
    stopped
}

/// Run `body`; on any error trigger [`emergency_shutdown`] and return the
/// original error.
pub fn supervise<D, T, F>(dev: &mut D, wait: Duration, body: F) -> Result<T>
where
    D: TubeControl + ?Sized,
    F: FnOnce(&mut D) -> Result<T>,
{
    match body(dev) {
        Ok(v) => Ok(v),
        Err(e) => {
            match device_error(&e) {
                Some(DeviceError::Cancelled) => tracing::warn!("interrupted; stopping device"),
                Some(DeviceError::SensorError { tube, .. }) => {
                    tracing::error!(tube, "sensor reading failed; stopping device")
                }
                _ => tracing::error!(error = %e, "control loop failed; stopping device"),
            }
            if let Err(stop) = emergency_shutdown(dev, wait) {
                tracing::error!(error = %stop, "emergency shutdown incomplete");
            }
            Err(e)
        }
    }
}

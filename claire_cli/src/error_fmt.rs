//! Human-readable error descriptions and structured JSON error formatting.

use crate::cli::LAST_TIMEOUTS;

/// Stable name of a device error kind, used in JSON output.
pub fn reason_name(e: &claire_core::DeviceError) -> &'static str {
    use claire_core::DeviceError::*;
    match e {
        OpenFailure(_) => "OpenFailure",
        IncompatibleFirmware { .. } => "IncompatibleFirmware",
        ProtocolViolation(_) => "ProtocolViolation",
        SensorError { .. } => "SensorError",
        CommunicationTimeout(_) => "CommunicationTimeout",
        InvalidArgument(_) => "InvalidArgument",
        Link(_) => "Link",
        Cancelled => "Interrupted",
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use claire_core::error::{BuildError, DeviceError};

    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSource | BuildError::MissingSink => {
                "What happened: The device link was not fully set up.\nLikely causes: The serial port or simulator failed to open one of its halves.\nHow to fix: Check the port path and permissions, then rerun.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/claire.toml for a sample."
            ),
        };
    }

    if let Some(de) = err.downcast_ref::<DeviceError>() {
        return match de {
            DeviceError::OpenFailure(reason) => format!(
                "What happened: Could not open the device link ({reason}).\nLikely causes: Wrong port, cable unplugged, or another program holds the port.\nHow to fix: Check device.port (or --port) and close other serial monitors."
            ),
            DeviceError::IncompatibleFirmware { expected, found } => format!(
                "What happened: The device reported firmware {found:?}, expected {expected:?}.\nLikely causes: The board was flashed with a different firmware build, or the wrong device is connected.\nHow to fix: Flash the matching firmware or set device.firmware_version."
            ),
            DeviceError::ProtocolViolation(msg) => format!(
                "What happened: Command refused ({msg}).\nLikely causes: A level move was still running.\nHow to fix: Wait for the move to finish, or run `claire stop`."
            ),
            DeviceError::SensorError { tube, raw_mm } => format!(
                "What happened: Sonar on tube {tube} returned an invalid distance ({raw_mm} mm).\nLikely causes: Water too close to the sensor, foam, or a loose sensor cable.\nHow to fix: Lower the water level below the sensor and check the wiring."
            ),
            DeviceError::CommunicationTimeout(d) => format!(
                "What happened: The device did not answer within {} ms.\nLikely causes: Board not powered, firmware still booting, or wrong baud rate.\nHow to fix: Check power and the USB cable; consider increasing timeouts.state_ms or timeouts.boot_grace_ms.",
                d.as_millis()
            ),
            DeviceError::InvalidArgument(msg) => format!(
                "What happened: Invalid argument ({msg}).\nLikely causes: Tube outside 1..=2, duty above 100, or level outside the tube.\nHow to fix: Correct the value and rerun."
            ),
            DeviceError::Link(msg) => format!(
                "What happened: The device link failed ({msg}).\nLikely causes: Cable unplugged or the board reset.\nHow to fix: Reconnect the device and rerun."
            ),
            DeviceError::Cancelled => {
                "What happened: Interrupted.\nLikely causes: Ctrl-C was pressed.\nHow to fix: Every actuator was stopped; rerun when ready.".to_string()
            }
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("read config") || lower.contains("parse config") {
        return format!(
            "What happened: Could not load the config file.\nLikely causes: Wrong --config path or TOML syntax error.\nHow to fix: Check the file. Original: {msg}"
        );
    }

    if lower.contains("must be") || lower.contains("must not") || lower.contains("must list") {
        return format!(
            "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file and try again."
        );
    }

    if lower.contains("rainfall value") || lower.contains("rainfall timeline") {
        return format!(
            "What happened: Rainfall timeline could not be read ({msg}).\nLikely causes: Wrong --data path or a non-numeric line.\nHow to fix: One non-negative number per line, one line per minute."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Map device errors to stable exit codes; everything else returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    use claire_core::DeviceError;
    match err.downcast_ref::<DeviceError>() {
        Some(DeviceError::Cancelled) => 2,
        Some(DeviceError::CommunicationTimeout(_)) => 3,
        Some(DeviceError::SensorError { .. }) => 4,
        Some(DeviceError::IncompatibleFirmware { .. }) => 5,
        Some(DeviceError::ProtocolViolation(_)) => 6,
        Some(DeviceError::OpenFailure(_) | DeviceError::Link(_)) => 7,
        Some(DeviceError::InvalidArgument(_)) => 8,
        None => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use claire_core::DeviceError;
    use serde_json::json;

    if let Some(de) = err.downcast_ref::<DeviceError>() {
        let msg = humanize(err);
        let detail_obj = match de {
            DeviceError::CommunicationTimeout(d) => Some(json!({
                "timeout_ms": d.as_millis() as u64,
                "boot_grace_ms": LAST_TIMEOUTS.get().map(|t| t.boot_grace_ms),
                "write_delay_ms": LAST_TIMEOUTS.get().map(|t| t.write_delay_ms),
            })),
            DeviceError::SensorError { tube, raw_mm } => {
                Some(json!({ "tube": tube, "raw_mm": raw_mm }))
            }
            DeviceError::IncompatibleFirmware { expected, found } => {
                Some(json!({ "expected": expected, "found": found }))
            }
            _ => None,
        };

        let obj = if let Some(d) = detail_obj {
            json!({ "reason": reason_name(de), "details": d, "message": msg })
        } else {
            json!({ "reason": reason_name(de), "message": msg })
        };
        return obj.to_string();
    }

    // Generic error JSON
    json!({ "reason": "Error", "message": humanize(err) }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use claire_core::DeviceError;
    use std::time::Duration;

    #[test]
    fn timeout_maps_to_code_and_hint() {
        let err: eyre::Report = DeviceError::CommunicationTimeout(Duration::from_secs(10)).into();
        assert_eq!(exit_code_for_error(&err), 3);
        assert!(humanize(&err).contains("10000 ms"));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "CommunicationTimeout");
        assert_eq!(v["details"]["timeout_ms"], 10_000);
    }

    #[test]
    fn untyped_errors_fall_back_to_generic() {
        let err = eyre::eyre!("disk full");
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).contains("Original: disk full"));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "Error");
    }
}

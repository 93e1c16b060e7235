//! `From`/`TryFrom` implementations bridging `claire_config` types to `claire_core` types.
use std::time::Duration;

use crate::config::{
    CalibrationCfg, ControllerCfg, LinkTimeouts, OutflowSetting, RainfallCfg, TraceCfg,
};
use crate::error::DeviceError;

// ── LinkTimeouts ─────────────────────────────────────────────────────────────

impl From<&claire_config::Timeouts> for LinkTimeouts {
    fn from(c: &claire_config::Timeouts) -> Self {
        Self {
            boot_grace: Duration::from_millis(c.boot_grace_ms),
            write_delay: Duration::from_millis(c.write_delay_ms),
            state: Duration::from_millis(c.state_ms),
            busy_poll: Duration::from_millis(c.busy_poll_ms),
            read_poll: Duration::from_millis(c.read_poll_ms),
            shutdown_wait: Duration::from_millis(c.shutdown_wait_ms),
        }
    }
}

// ── ControllerCfg ────────────────────────────────────────────────────────────

impl From<&claire_config::Config> for ControllerCfg {
    fn from(c: &claire_config::Config) -> Self {
        Self {
            firmware_version: c.device.firmware_version.clone(),
            max_level_mm: c.device.max_level_mm,
            timeouts: LinkTimeouts::from(&c.timeouts),
        }
    }
}

// ── CalibrationCfg ───────────────────────────────────────────────────────────

impl From<&claire_config::CalibrationCfg> for CalibrationCfg {
    fn from(c: &claire_config::CalibrationCfg) -> Self {
        Self {
            duty_levels: c.duty_levels.clone(),
            repeats: c.repeats,
            low_level_mm: c.low_level_mm,
            high_level_mm: c.high_level_mm,
            tubes: c.tubes.clone(),
            sensor_retry_limit: c.sensor_retry_limit,
        }
    }
}

// ── RainfallCfg ──────────────────────────────────────────────────────────────

impl From<claire_config::OutflowSetting> for OutflowSetting {
    fn from(s: claire_config::OutflowSetting) -> Self {
        match s {
            claire_config::OutflowSetting::Low => OutflowSetting::Low,
            claire_config::OutflowSetting::Medium => OutflowSetting::Medium,
            claire_config::OutflowSetting::High => OutflowSetting::High,
        }
    }
}

fn secs_f64(name: &str, secs: f64) -> Result<Duration, DeviceError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| DeviceError::InvalidArgument(format!("rainfall.{name} = {secs} s is not a valid duration")))
}

impl TryFrom<&claire_config::RainfallCfg> for RainfallCfg {
    type Error = DeviceError;

    fn try_from(c: &claire_config::RainfallCfg) -> Result<Self, Self::Error> {
        Ok(Self {
            tube: c.tube,
            duration: secs_f64("duration_min", c.duration_min * 60.0)?,
            cycle: secs_f64("cycle_s", c.cycle_s)?,
            min_on: secs_f64("min_on_s", c.min_on_s)?,
            poll: Duration::from_millis(c.poll_ms),
            height_scale: c.height_scale,
            time_scale: c.time_scale,
            rain_coefficients: c.rain_coefficients,
            outflow: c.outflow.into(),
            lead_in_minutes: c.lead_in_minutes,
            lead_in_intensity: c.lead_in_intensity,
        })
    }
}

// ── TraceCfg ─────────────────────────────────────────────────────────────────

impl From<&claire_config::TraceCfg> for TraceCfg {
    fn from(c: &claire_config::TraceCfg) -> Self {
        Self {
            samples: c.samples,
            start_level_mm: c.start_level_mm,
        }
    }
}

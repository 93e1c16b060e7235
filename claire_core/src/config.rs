//! Runtime configuration for the controller and control loops.
//!
//! These are separate from the TOML-deserialized config in `claire_config`;
//! see `conversions` for the bridge.
use std::time::Duration;

/// Link timing. Waits on device I/O always use real time.
#[derive(Debug, Clone)]
pub struct LinkTimeouts {
    /// Pause after opening the link while the firmware boots.
    pub boot_grace: Duration,
    /// Fixed delay after every command.
    pub write_delay: Duration,
    /// Max wait for a state dump (and for the boot banner).
    pub state: Duration,
    pub busy_poll: Duration,
    /// Per-read timeout of the background reader.
    pub read_poll: Duration,
    /// Bound on waiting for in-flight motion during emergency shutdown.
    pub shutdown_wait: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            boot_grace: Duration::from_secs(3),
            write_delay: Duration::from_millis(50),
            state: Duration::from_secs(10),
            busy_poll: Duration::from_millis(100),
            read_poll: Duration::from_millis(100),
            shutdown_wait: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerCfg {
    /// Version token the boot banner must report.
    pub firmware_version: String,
    pub max_level_mm: f64,
    pub timeouts: LinkTimeouts,
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            firmware_version: "v1.0".into(),
            max_level_mm: 900.0,
            timeouts: LinkTimeouts::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationCfg {
    pub duty_levels: Vec<u8>,
    pub repeats: u32,
    pub low_level_mm: f64,
    pub high_level_mm: f64,
    pub tubes: Vec<u8>,
    /// Consecutive `SensorError`s tolerated while polling one flow.
    pub sensor_retry_limit: u32,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            duty_levels: (1..=10).map(|d| d * 10).collect(),
            repeats: 5,
            low_level_mm: 250.0,
            high_level_mm: 500.0,
            tubes: vec![1, 2],
            sensor_retry_limit: 50,
        }
    }
}

/// Fixed outflow duty settings of the rainfall experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutflowSetting {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct RainfallCfg {
    pub tube: u8,
    /// Experiment length before time scaling.
    pub duration: Duration,
    pub cycle: Duration,
    /// Minimum inflow on-time per cycle; not time-scaled.
    pub min_on: Duration,
    pub poll: Duration,
    pub height_scale: f64,
    /// Speed-up factor: one timeline minute lasts `60 s / time_scale`.
    pub time_scale: f64,
    pub rain_coefficients: [f64; 2],
    pub outflow: OutflowSetting,
    pub lead_in_minutes: u32,
    pub lead_in_intensity: f64,
}

impl Default for RainfallCfg {
    fn default() -> Self {
        Self {
            tube: 1,
            duration: Duration::from_secs(600),
            cycle: Duration::from_secs(60),
            min_on: Duration::from_millis(500),
            poll: Duration::from_millis(100),
            height_scale: 2.0,
            time_scale: 1.0,
            rain_coefficients: [9.282, 8.544],
            outflow: OutflowSetting::Medium,
            lead_in_minutes: 20,
            lead_in_intensity: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TraceCfg {
    pub samples: u32,
    pub start_level_mm: f64,
}

impl Default for TraceCfg {
    fn default() -> Self {
        Self {
            samples: 200,
            start_level_mm: 500.0,
        }
    }
}

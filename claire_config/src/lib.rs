#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and data files for the demonstrator driver.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Calibration samples are written to and read from CSV with a fixed header.
//! - Rainfall timelines are plain text, one intensity per minute per line.
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Header of the calibration CSV, in column order.
pub const CALIBRATION_HEADERS: [&str; 6] = [
    "tube",
    "isInflow",
    "duration_s",
    "difference_mm",
    "rate_mm_per_s",
    "duty",
];

/// One flow-rate measurement from the calibration sweep.
///
/// Expected headers:
/// tube,isInflow,duration_s,difference_mm,rate_mm_per_s,duty
///
/// Example:
/// tube,isInflow,duration_s,difference_mm,rate_mm_per_s,duty
/// 1,true,108.4,251.3,2.318,50
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub tube: u8,
    #[serde(rename = "isInflow")]
    pub is_inflow: bool,
    pub duration_s: f64,
    pub difference_mm: f64,
    pub rate_mm_per_s: f64,
    pub duty: u8,
}

/// One row of a level trace: both tube levels at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelTraceRow {
    pub elapsed_s: f64,
    pub tube1_mm: f64,
    pub tube2_mm: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Device {
    /// Serial device path, e.g. /dev/ttyUSB0 or /dev/cu.usbserial-1420
    pub port: String,
    pub baud_rate: u32,
    /// Firmware version the boot banner must report, compared verbatim.
    pub firmware_version: String,
    /// Sonar distance that corresponds to an empty tube (mm).
    pub max_level_mm: f64,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            firmware_version: "v1.0".to_string(),
            max_level_mm: 900.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Wait after opening the port while the firmware prints its banner.
    pub boot_grace_ms: u64,
    /// Fixed delay after every command to absorb link latency.
    pub write_delay_ms: u64,
    /// Max wait for a state dump after requesting one. Also accepts "sensor_ms".
    #[serde(alias = "sensor_ms")]
    pub state_ms: u64,
    /// Poll interval while waiting for a level move to finish.
    pub busy_poll_ms: u64,
    /// Per-read timeout of the background line reader.
    pub read_poll_ms: u64,
    /// Max wait for in-flight motion to clear during emergency shutdown.
    pub shutdown_wait_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            boot_grace_ms: 3000,
            write_delay_ms: 50,
            state_ms: 10_000,
            busy_poll_ms: 100,
            read_poll_ms: 100,
            shutdown_wait_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CalibrationCfg {
    /// Duty levels (percent) to calibrate, in order.
    pub duty_levels: Vec<u8>,
    /// Repetitions per (tube, duty) combination.
    pub repeats: u32,
    /// Lower bound of the measured range; levels below cause sonar interference.
    pub low_level_mm: f64,
    pub high_level_mm: f64,
    /// Tubes to calibrate; alternating lets the outflow solenoids cool down.
    pub tubes: Vec<u8>,
    /// Consecutive failed sonar readings tolerated while polling a flow.
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

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutflowSetting {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RainfallCfg {
    pub tube: u8,
    /// Experiment length in (scaled) minutes.
    pub duration_min: f64,
    /// Length of one on/off cycle in seconds.
    pub cycle_s: f64,
    /// Inflow stays on at least this long in every cycle.
    pub min_on_s: f64,
    /// Loop iteration period.
    pub poll_ms: u64,
    pub height_scale: f64,
    pub time_scale: f64,
    /// Rain-to-duty coefficients per tube (mm/s per unit of intensity, x1000).
    pub rain_coefficients: [f64; 2],
    pub outflow: OutflowSetting,
    /// Minutes of constant light rain before the timeline data starts.
    pub lead_in_minutes: u32,
    pub lead_in_intensity: f64,
}

impl Default for RainfallCfg {
    fn default() -> Self {
        Self {
            tube: 1,
            duration_min: 10.0,
            cycle_s: 60.0,
            min_on_s: 0.5,
            poll_ms: 100,
            height_scale: 2.0,
            time_scale: 1.0,
            rain_coefficients: [9.282, 8.544],
            outflow: OutflowSetting::Medium,
            lead_in_minutes: 20,
            lead_in_intensity: 1.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TraceCfg {
    pub samples: u32,
    /// Both tubes are driven here before sampling starts.
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

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Parameters of the simulated device used when no hardware backend is built.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimCfg {
    pub speedup: f64,
    pub initial_levels_mm: [f64; 2],
    pub inflow_mm_per_s: [f64; 2],
    pub outflow_mm_per_s: [f64; 2],
    pub move_mm_per_s: f64,
    /// Firmware the simulated board reports; `device.firmware_version` when unset.
    pub firmware_version: Option<String>,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self {
            speedup: 1.0,
            initial_levels_mm: [400.0, 400.0],
            inflow_mm_per_s: [4.6, 4.3],
            outflow_mm_per_s: [3.0, 3.1],
            move_mm_per_s: 10.0,
            firmware_version: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub device: Device,
    pub timeouts: Timeouts,
    pub calibration: CalibrationCfg,
    pub rainfall: RainfallCfg,
    pub trace: TraceCfg,
    pub logging: Logging,
    pub sim: SimCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Longest rainfall run accepted (one week).
pub const MAX_RAIN_MINUTES: f64 = 7.0 * 24.0 * 60.0;
/// Longest duty cycle accepted, in seconds.
pub const MAX_CYCLE_S: f64 = 3600.0;
/// Accepted experiment speed-up factors.
pub const TIME_SCALE_RANGE: std::ops::RangeInclusive<f64> = 0.01..=1000.0;

fn valid_tube(t: u8) -> bool {
    (1..=2).contains(&t)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Device
        if self.device.port.trim().is_empty() {
            eyre::bail!("device.port must not be empty");
        }
        if self.device.baud_rate == 0 {
            eyre::bail!("device.baud_rate must be > 0");
        }
        if self.device.firmware_version.split_whitespace().count() != 1 {
            eyre::bail!("device.firmware_version must be a single token");
        }
        if !(self.device.max_level_mm.is_finite() && self.device.max_level_mm > 0.0) {
            eyre::bail!("device.max_level_mm must be > 0");
        }

        // Timeouts
        if self.timeouts.state_ms == 0 {
            eyre::bail!("timeouts.state_ms must be >= 1");
        }
        if self.timeouts.busy_poll_ms == 0 {
            eyre::bail!("timeouts.busy_poll_ms must be >= 1");
        }
        if self.timeouts.read_poll_ms == 0 {
            eyre::bail!("timeouts.read_poll_ms must be >= 1");
        }
        if self.timeouts.boot_grace_ms > 60_000 {
            eyre::bail!("timeouts.boot_grace_ms is unreasonably large (>60s)");
        }

        // Calibration
        let cal = &self.calibration;
        if cal.duty_levels.is_empty() {
            eyre::bail!("calibration.duty_levels must not be empty");
        }
        if cal.duty_levels.iter().any(|d| *d == 0 || *d > 100) {
            eyre::bail!("calibration.duty_levels must be in [1, 100]");
        }
        if cal.repeats == 0 {
            eyre::bail!("calibration.repeats must be >= 1");
        }
        if cal.sensor_retry_limit == 0 {
            eyre::bail!("calibration.sensor_retry_limit must be >= 1");
        }
        if cal.tubes.is_empty() || !cal.tubes.iter().copied().all(valid_tube) {
            eyre::bail!("calibration.tubes must list tubes 1 and/or 2");
        }
        if !(cal.low_level_mm >= 0.0 && cal.low_level_mm < cal.high_level_mm) {
            eyre::bail!("calibration.low_level_mm must be >= 0 and below high_level_mm");
        }
        if cal.high_level_mm > self.device.max_level_mm {
            eyre::bail!("calibration.high_level_mm must not exceed device.max_level_mm");
        }

        // Rainfall
        let rain = &self.rainfall;
        if !valid_tube(rain.tube) {
            eyre::bail!("rainfall.tube must be 1 or 2");
        }
        if !(rain.duration_min > 0.0 && rain.duration_min <= MAX_RAIN_MINUTES) {
            eyre::bail!("rainfall.duration_min must be in (0, {MAX_RAIN_MINUTES}]");
        }
        if !(rain.cycle_s > 0.0 && rain.cycle_s <= MAX_CYCLE_S) {
            eyre::bail!("rainfall.cycle_s must be in (0, {MAX_CYCLE_S}]");
        }
        if !(rain.min_on_s >= 0.0 && rain.min_on_s < rain.cycle_s) {
            eyre::bail!("rainfall.min_on_s must be in [0, cycle_s)");
        }
        if rain.poll_ms == 0 {
            eyre::bail!("rainfall.poll_ms must be >= 1");
        }
        if !(rain.height_scale > 0.0 && rain.height_scale.is_finite()) {
            eyre::bail!("rainfall.height_scale must be finite and > 0");
        }
        if !TIME_SCALE_RANGE.contains(&rain.time_scale) {
            eyre::bail!(
                "rainfall.time_scale must be in [{}, {}]",
                TIME_SCALE_RANGE.start(),
                TIME_SCALE_RANGE.end()
            );
        }
        if rain.rain_coefficients.iter().any(|c| !(*c >= 0.0)) {
            eyre::bail!("rainfall.rain_coefficients must be >= 0");
        }
        if f64::from(rain.lead_in_minutes) > MAX_RAIN_MINUTES {
            eyre::bail!("rainfall.lead_in_minutes must be <= {MAX_RAIN_MINUTES}");
        }
        if !(rain.lead_in_intensity >= 0.0 && rain.lead_in_intensity.is_finite()) {
            eyre::bail!("rainfall.lead_in_intensity must be >= 0");
        }

        // Trace
        if self.trace.samples == 0 {
            eyre::bail!("trace.samples must be >= 1");
        }
        if !(0.0..=self.device.max_level_mm).contains(&self.trace.start_level_mm) {
            eyre::bail!("trace.start_level_mm must be within [0, device.max_level_mm]");
        }

        // Sim
        if !(self.sim.speedup > 0.0) {
            eyre::bail!("sim.speedup must be > 0");
        }

        Ok(())
    }
}

/// Streams calibration samples to CSV, flushing after every row so a run
/// aborted halfway still leaves the completed measurements on disk.
pub struct CalibrationCsvWriter<W: Write> {
    inner: csv::Writer<W>,
}

impl CalibrationCsvWriter<std::fs::File> {
    pub fn create(path: &Path) -> eyre::Result<Self> {
        let file = std::fs::File::create(path)
            .map_err(|e| eyre::eyre!("create calibration CSV {:?}: {}", path, e))?;
        Ok(Self::new(file))
    }
}

impl<W: Write> CalibrationCsvWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: csv::WriterBuilder::new()
                .has_headers(true)
                .from_writer(writer),
        }
    }

    pub fn write(&mut self, sample: &CalibrationSample) -> eyre::Result<()> {
        self.inner
            .serialize(sample)
            .map_err(|e| eyre::eyre!("write calibration row: {e}"))?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> eyre::Result<W> {
        self.inner
            .into_inner()
            .map_err(|e| eyre::eyre!("finish calibration CSV: {}", e.error()))
    }
}

pub fn load_calibration_csv(path: &Path) -> eyre::Result<Vec<CalibrationSample>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != CALIBRATION_HEADERS {
        eyre::bail!(
            "calibration CSV must have headers '{}', got: {}",
            CALIBRATION_HEADERS.join(","),
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationSample>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    Ok(rows)
}

/// Streams level-trace rows to CSV.
pub struct LevelTraceWriter<W: Write> {
    inner: csv::Writer<W>,
}

impl LevelTraceWriter<std::fs::File> {
    pub fn create(path: &Path) -> eyre::Result<Self> {
        let file = std::fs::File::create(path)
            .map_err(|e| eyre::eyre!("create trace CSV {:?}: {}", path, e))?;
        Ok(Self::new(file))
    }
}

impl<W: Write> LevelTraceWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: csv::Writer::from_writer(writer),
        }
    }

    pub fn write(&mut self, row: &LevelTraceRow) -> eyre::Result<()> {
        self.inner
            .serialize(row)
            .map_err(|e| eyre::eyre!("write trace row: {e}"))?;
        self.inner.flush()?;
        Ok(())
    }
}

/// Parse a rainfall timeline: one non-negative intensity per line, one line
/// per minute. Blank lines are skipped.
pub fn parse_rainfall_timeline(text: &str) -> eyre::Result<Vec<f64>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let v: f64 = line
            .parse()
            .map_err(|e| eyre::eyre!("invalid rainfall value on line {}: {:?} ({e})", idx + 1, line))?;
        if !(v.is_finite() && v >= 0.0) {
            eyre::bail!("rainfall value on line {} must be >= 0, got {v}", idx + 1);
        }
        out.push(v);
    }
    Ok(out)
}

pub fn load_rainfall_timeline(path: &Path) -> eyre::Result<Vec<f64>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("open rainfall timeline {:?}: {}", path, e))?;
    parse_rainfall_timeline(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = load_toml("").expect("parse");
        assert_eq!(cfg.device.baud_rate, 115_200);
        assert_eq!(cfg.calibration.duty_levels.first(), Some(&10));
        assert_eq!(cfg.calibration.duty_levels.last(), Some(&100));
        assert_eq!(cfg.rainfall.outflow, OutflowSetting::Medium);
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn csv_writer_emits_exact_header() {
        let mut w = CalibrationCsvWriter::new(Vec::new());
        w.write(&CalibrationSample {
            tube: 2,
            is_inflow: false,
            duration_s: 10.0,
            difference_mm: -250.0,
            rate_mm_per_s: -25.0,
            duty: 30,
        })
        .unwrap();
        let text = String::from_utf8(w.into_inner().unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(CALIBRATION_HEADERS.join(",").as_str()));
        assert_eq!(lines.next(), Some("2,false,10.0,-250.0,-25.0,30"));
    }

    #[test]
    fn timeline_skips_blank_lines() {
        let v = parse_rainfall_timeline("0.5\n\n1.25\n  0\n").unwrap();
        assert_eq!(v, vec![0.5, 1.25, 0.0]);
    }
}

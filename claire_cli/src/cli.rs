//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();
/// Timeouts in effect for the current run (for JSON error details).
pub static LAST_TIMEOUTS: OnceLock<CliTimeouts> = OnceLock::new();

#[derive(Copy, Clone, Debug)]
pub struct CliTimeouts {
    pub boot_grace_ms: u64,
    pub write_delay_ms: u64,
}

#[derive(Parser, Debug)]
#[command(name = "claire", version, about = "CLAIRE water-level demonstrator CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/claire.toml")]
    pub config: PathBuf,

    /// Serial port; overrides device.port from the config
    #[arg(long, value_name = "PORT")]
    pub port: Option<String>,

    /// Log and print results as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum FlowDirection {
    /// Pump filling the tube
    Inflow,
    /// Valve draining the tube
    Outflow,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print both tube levels and actuator duties
    State,
    /// Move a tube to a water level
    SetLevel {
        /// Tube number (1 or 2)
        #[arg(long)]
        tube: u8,
        /// Target level in mm above the tube bottom
        #[arg(long = "level-mm", value_name = "MM")]
        level_mm: f64,
        /// Return as soon as the move is sent instead of waiting for it to finish
        #[arg(long, action = ArgAction::SetTrue)]
        no_wait: bool,
    },
    /// Set the duty of one pump or valve; it keeps running after exit
    Flow {
        #[arg(long)]
        tube: u8,
        #[arg(long, value_enum)]
        direction: FlowDirection,
        /// Duty in percent (0..=100)
        #[arg(long)]
        rate: u8,
    },
    /// Emergency stop: every actuator to 0 and abort any level move
    Stop,
    /// Run the flow-rate calibration sweep and write samples as CSV
    Calibrate {
        /// Output CSV (tube,isInflow,duration_s,difference_mm,rate_mm_per_s,duty)
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Replay a rainfall timeline on one tube
    Rainfall {
        /// Timeline file: one intensity per line, one line per minute
        #[arg(long, value_name = "FILE")]
        data: PathBuf,
        /// Override rainfall.tube
        #[arg(long)]
        tube: Option<u8>,
        /// Override rainfall.duration_min
        #[arg(long, value_name = "MIN")]
        duration_min: Option<f64>,
        /// Override rainfall.time_scale
        #[arg(long)]
        time_scale: Option<f64>,
    },
    /// Record both tube levels repeatedly from a known start level
    Trace {
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
        /// Override trace.samples
        #[arg(long)]
        samples: Option<u32>,
    },
    /// Stream device output until Ctrl-C
    Monitor {
        /// Also request a state dump at this interval
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,
        /// Stop after this many seconds
        #[arg(long, value_name = "SECS")]
        duration_s: Option<f64>,
    },
    /// Quick check: connect, verify firmware, read one state
    SelfCheck,
    /// Health check for operational monitoring
    Health,
}

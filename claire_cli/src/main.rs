mod cli;
mod error_fmt;
mod run;

use std::path::Path;

use clap::Parser;
use claire_core::CancelToken;
use eyre::WrapErr;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::cli::{Cli, CliTimeouts, Commands, FILE_GUARD, JSON_MODE, LAST_TIMEOUTS};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let _ = color_eyre::config::HookBuilder::default()
        .display_env_section(false)
        .install();

    if let Err(e) = try_main(cli) {
        tracing::error!(error = %e, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn try_main(cli: Cli) -> eyre::Result<()> {
    let text = std::fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("read config {}", cli.config.display()))?;
    let mut cfg: claire_config::Config = toml::from_str(&text)
        .wrap_err_with(|| format!("parse config {}", cli.config.display()))?;
    if let Some(port) = &cli.port {
        cfg.device.port = port.clone();
    }

    init_tracing(&cli, &cfg)?;
    cfg.validate()?;
    let _ = LAST_TIMEOUTS.set(CliTimeouts {
        boot_grace_ms: cfg.timeouts.boot_grace_ms,
        write_delay_ms: cfg.timeouts.write_delay_ms,
    });

    let cancel = CancelToken::new();
    {
        let trip = cancel.clone();
        ctrlc::set_handler(move || {
            trip.cancel();
        })
        .wrap_err("install Ctrl-C handler")?;
    }

    run_backend(&cli.cmd, &cfg, cancel, cli.json)
}

/// Console logs go to stderr (pretty or JSON); `[logging] file` adds a JSON-lines sink.
fn init_tracing(cli: &Cli, cfg: &claire_config::Config) -> eyre::Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .wrap_err("invalid --log-level")?;
    let console = fmt::layer().with_writer(std::io::stderr);
    let mut layers: Vec<BoxedLayer> = Vec::new();
    if cli.json {
        layers.push(console.json().with_filter(console_filter).boxed());
    } else {
        layers.push(console.with_filter(console_filter).boxed());
    }

    if let Some(file) = cfg.logging.file.as_deref() {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file must name a file, got {file:?}"))?;
        let appender = match cfg.logging.rotation.as_deref().unwrap_or("never") {
            "never" => tracing_appender::rolling::never(dir, name),
            "daily" => tracing_appender::rolling::daily(dir, name),
            "hourly" => tracing_appender::rolling::hourly(dir, name),
            other => eyre::bail!("logging.rotation must be never, daily or hourly, got {other:?}"),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let file_filter = EnvFilter::try_new(cfg.logging.level.as_deref().unwrap_or("info"))
            .wrap_err("invalid logging.level")?;
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(file_filter)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .wrap_err("init logging")
}

#[cfg(feature = "hardware")]
fn run_backend(
    cmd: &Commands,
    cfg: &claire_config::Config,
    cancel: CancelToken,
    json: bool,
) -> eyre::Result<()> {
    let link = claire_hardware::SerialLink::open(&cfg.device.port, cfg.device.baud_rate)
        .map_err(|e| claire_core::DeviceError::OpenFailure(e.to_string()))?;
    tracing::info!(port = %cfg.device.port, baud = cfg.device.baud_rate, "serial backend");
    run::execute(cmd, cfg, link, cancel, json)
}

/// Without the `hardware` feature every command runs against the simulator.
///
/// `CLAIRE_TEST_SIM_FAULT=<tube>:<reads>` makes the simulated sonar of
/// `tube` report an invalid distance on the next `reads` state dumps.
#[cfg(not(feature = "hardware"))]
fn run_backend(
    cmd: &Commands,
    cfg: &claire_config::Config,
    cancel: CancelToken,
    json: bool,
) -> eyre::Result<()> {
    use claire_hardware::{SimParams, SimulatedDevice};

    let dev = SimulatedDevice::new(SimParams {
        max_level_mm: cfg.device.max_level_mm,
        initial_levels_mm: cfg.sim.initial_levels_mm,
        inflow_mm_per_s: cfg.sim.inflow_mm_per_s,
        outflow_mm_per_s: cfg.sim.outflow_mm_per_s,
        move_mm_per_s: cfg.sim.move_mm_per_s,
        speedup: cfg.sim.speedup,
        firmware_version: cfg
            .sim
            .firmware_version
            .clone()
            .unwrap_or_else(|| cfg.device.firmware_version.clone()),
        ..SimParams::default()
    });
    if let Ok(spec) = std::env::var("CLAIRE_TEST_SIM_FAULT")
        && let Some((tube, reads)) = spec.split_once(':')
        && let (Ok(tube), Ok(reads)) = (tube.trim().parse::<u8>(), reads.trim().parse::<u32>())
    {
        dev.inject_sensor_fault(tube, reads)?;
    }
    tracing::info!(speedup = cfg.sim.speedup, "simulated backend");
    run::execute(cmd, cfg, dev.split(), cancel, json)
}

//! Command execution: config mapping, controller assembly, loop supervision.

use std::time::{Duration, Instant};

use claire_config::{
    CalibrationCsvWriter, LevelTraceWriter, TIME_SCALE_RANGE, load_rainfall_timeline,
};
use claire_core::calibration::{run_calibration, run_level_trace};
use claire_core::config::{CalibrationCfg, ControllerCfg, RainfallCfg, TraceCfg};
use claire_core::error::Result as CoreResult;
use claire_core::rainfall::{RainfallPlan, RainfallReport, run_rainfall};
use claire_core::safety::supervise;
use claire_core::{CancelToken, Controller, ControllerBuilder, DeviceState, TubeControl};
use claire_traits::clock::MonotonicClock;
use claire_traits::{CommandSink, LineSource};
use serde_json::json;

use crate::cli::{Commands, FlowDirection};

/// Connect over the given link halves, run `cmd`, then close the link.
pub fn execute<R, W>(
    cmd: &Commands,
    cfg: &claire_config::Config,
    link: (R, W),
    cancel: CancelToken,
    json: bool,
) -> CoreResult<()>
where
    R: LineSource + Send + 'static,
    W: CommandSink,
{
    let (source, sink) = link;
    let mut ctl = ControllerBuilder::new()
        .with_source(source)
        .with_sink(sink)
        .with_config(ControllerCfg::from(cfg))
        .with_cancel(cancel.clone())
        .connect()?;
    let outcome = dispatch(&mut ctl, cmd, cfg, &cancel, json);
    ctl.close();
    outcome
}

fn dispatch<W: CommandSink>(
    ctl: &mut Controller<W>,
    cmd: &Commands,
    cfg: &claire_config::Config,
    cancel: &CancelToken,
    json: bool,
) -> CoreResult<()> {
    let wait = Duration::from_millis(cfg.timeouts.shutdown_wait_ms);
    match cmd {
        Commands::State | Commands::SelfCheck => {
            let state = ctl.get_state()?;
            print_state(&state, json);
            if matches!(cmd, Commands::SelfCheck) && !json {
                println!("self-check ok");
            }
            Ok(())
        }
        Commands::SetLevel {
            tube,
            level_mm,
            no_wait,
        } => supervise(ctl, wait, |d| {
            d.set_water_level(*tube, *level_mm)?;
            if !*no_wait {
                d.wait_until_free()?;
                let state = d.get_state()?;
                print_state(&state, json);
            }
            Ok(())
        }),
        Commands::Flow {
            tube,
            direction,
            rate,
        } => {
            match direction {
                FlowDirection::Inflow => ctl.set_inflow(*tube, *rate)?,
                FlowDirection::Outflow => ctl.set_outflow(*tube, *rate)?,
            }
            tracing::info!(tube, ?direction, rate, "duty set");
            Ok(())
        }
        Commands::Stop => {
            ctl.emergency_stop()?;
            if !ctl.wait_until_free_within(wait)? {
                tracing::warn!("device still busy after emergency stop");
            }
            if !json {
                println!("stopped");
            }
            Ok(())
        }
        Commands::Calibrate { out } => {
            let cal = CalibrationCfg::from(&cfg.calibration);
            let mut writer = CalibrationCsvWriter::create(out)?;
            let started = Instant::now();
            let n = supervise(ctl, wait, |d| {
                run_calibration(d, &cal, &MonotonicClock::new(), &mut writer, cancel)
            })?;
            report(
                json,
                &json!({ "samples": n, "out": out.display().to_string(), "duration_ms": started.elapsed().as_millis() as u64 }),
                &format!("calibration complete: {n} samples written to {}", out.display()),
            );
            Ok(())
        }
        Commands::Rainfall {
            data,
            tube,
            duration_min,
            time_scale,
        } => {
            let mut rain = RainfallCfg::try_from(&cfg.rainfall)?;
            if let Some(t) = tube {
                rain.tube = *t;
            }
            if let Some(m) = duration_min {
                rain.duration = Duration::try_from_secs_f64(m * 60.0).map_err(|_| {
                    claire_core::DeviceError::InvalidArgument(format!("duration {m} min"))
                })?;
            }
            if let Some(ts) = time_scale {
                if !TIME_SCALE_RANGE.contains(ts) {
                    return Err(claire_core::DeviceError::InvalidArgument(format!(
                        "time scale {ts} outside [{}, {}]",
                        TIME_SCALE_RANGE.start(),
                        TIME_SCALE_RANGE.end()
                    ))
                    .into());
                }
                rain.time_scale = *ts;
            }
            let timeline = load_rainfall_timeline(data)?;
            let plan = RainfallPlan::new(&rain, &timeline)?;
            let r = supervise(ctl, wait, |d| {
                run_rainfall(d, &plan, &MonotonicClock::new(), cancel)
            })?;
            print_rainfall(&r, json);
            Ok(())
        }
        Commands::Trace { out, samples } => {
            let mut trace = TraceCfg::from(&cfg.trace);
            if let Some(n) = samples {
                trace.samples = *n;
            }
            let retry = cfg.calibration.sensor_retry_limit;
            let mut writer = LevelTraceWriter::create(out)?;
            let n = supervise(ctl, wait, |d| {
                run_level_trace(d, &trace, retry, &MonotonicClock::new(), &mut writer, cancel)
            })?;
            report(
                json,
                &json!({ "samples": n, "out": out.display().to_string() }),
                &format!("trace complete: {n} rows written to {}", out.display()),
            );
            Ok(())
        }
        Commands::Monitor {
            interval_ms,
            duration_s,
        } => monitor(ctl, *interval_ms, *duration_s, cancel, json),
        Commands::Health => {
            ctl.get_state()?;
            let age = ctl.heartbeat_age().map(|d| d.as_millis() as u64);
            let alive = ctl.reader_alive();
            report(
                json,
                &json!({ "status": if alive { "ok" } else { "degraded" }, "heartbeat_ms": age, "reader_alive": alive, "firmware": ctl.config().firmware_version }),
                &format!(
                    "health: {} (last line {} ms ago)",
                    if alive { "ok" } else { "degraded" },
                    age.map_or_else(|| "-".to_string(), |a| a.to_string())
                ),
            );
            Ok(())
        }
    }
}

fn monitor<W: CommandSink>(
    ctl: &mut Controller<W>,
    interval_ms: Option<u64>,
    duration_s: Option<f64>,
    cancel: &CancelToken,
    json: bool,
) -> CoreResult<()> {
    let started = Instant::now();
    let until = duration_s
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .map(|d| started + d);
    let interval = interval_ms.map(Duration::from_millis);
    let mut next_request = started;
    loop {
        if cancel.is_cancelled() || until.is_some_and(|u| Instant::now() >= u) {
            return Ok(());
        }
        if let Some(every) = interval
            && Instant::now() >= next_request
        {
            ctl.make_outdated();
            ctl.get_state()?;
            next_request = Instant::now() + every;
        }
        for line in ctl.read_available() {
            if json {
                println!("{}", json!({ "seq": line.seq, "line": &*line.text }));
            } else {
                println!("{:>6} {}", line.seq, line.text);
            }
        }
        if !ctl.reader_alive() {
            return Err(claire_core::DeviceError::Link("reader stopped".into()).into());
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn report(json: bool, value: &serde_json::Value, text: &str) {
    if json {
        println!("{value}");
    } else {
        println!("{text}");
    }
}

fn print_state(s: &DeviceState, json: bool) {
    if json {
        let tubes: Vec<_> = s
            .tubes
            .iter()
            .enumerate()
            .map(|(i, t)| {
                json!({
                    "tube": i + 1,
                    "level_mm": t.level_mm,
                    "inflow_duty": t.inflow_duty,
                    "outflow_duty": t.outflow_duty,
                })
            })
            .collect();
        println!("{}", json!({ "tubes": tubes }));
    } else {
        for (i, t) in s.tubes.iter().enumerate() {
            println!(
                "tube {}: level {:.1} mm, inflow {}%, outflow {}%",
                i + 1,
                t.level_mm,
                t.inflow_duty,
                t.outflow_duty
            );
        }
    }
}

fn print_rainfall(r: &RainfallReport, json: bool) {
    report(
        json,
        &json!({
            "elapsed_ms": r.elapsed.as_millis() as u64,
            "minutes_read": r.minutes_read,
            "inflow_switches": r.inflow_switches,
            "outflow_switches": r.outflow_switches,
        }),
        &format!(
            "rainfall complete in {:.1} s: {} minutes read, {} inflow / {} outflow switches",
            r.elapsed.as_secs_f64(),
            r.minutes_read,
            r.inflow_switches,
            r.outflow_switches
        ),
    );
}

//! Pump calibration sweeps and level traces.
//!
//! A calibration sample times how long a tube takes to rise from the low
//! to the high level at a given inflow duty (or fall back at an outflow
//! duty). Tubes alternate per duty level so the outflow solenoids cool down.
use std::io::Write;
use std::time::Instant;

use claire_config::{CalibrationCsvWriter, CalibrationSample, LevelTraceRow, LevelTraceWriter};
use claire_traits::Clock;

use crate::cancel::CancelToken;
use crate::config::{CalibrationCfg, TraceCfg};
use crate::controller::TubeControl;
use crate::error::{DeviceError, Result, device_error};
use crate::protocol::Direction;
use crate::state::DeviceState;

/// Destination of calibration samples.
pub trait SampleSink {
    fn record(&mut self, sample: &CalibrationSample) -> Result<()>;
}

impl SampleSink for Vec<CalibrationSample> {
    fn record(&mut self, sample: &CalibrationSample) -> Result<()> {
        self.push(*sample);
        Ok(())
    }
}

impl<W: Write> SampleSink for CalibrationCsvWriter<W> {
    fn record(&mut self, sample: &CalibrationSample) -> Result<()> {
        self.write(sample)
    }
}

/// Destination of level-trace rows.
pub trait TraceSink {
    fn record(&mut self, row: &LevelTraceRow) -> Result<()>;
}

impl TraceSink for Vec<LevelTraceRow> {
    fn record(&mut self, row: &LevelTraceRow) -> Result<()> {
        self.push(*row);
        Ok(())
    }
}

impl<W: Write> TraceSink for LevelTraceWriter<W> {
    fn record(&mut self, row: &LevelTraceRow) -> Result<()> {
        self.write(row)
    }
}

/// Read the state, retrying on `SensorError` up to `retry_limit` times in a row.
pub fn read_state_retrying<D: TubeControl + ?Sized>(
    dev: &mut D,
    retry_limit: u32,
    cancel: &CancelToken,
) -> Result<DeviceState> {
    let mut failures = 0;
    loop {
        cancel.check()?;
        match dev.get_state() {
            Ok(state) => return Ok(state),
            Err(e) => match device_error(&e) {
                Some(DeviceError::SensorError { tube, raw_mm }) if failures < retry_limit => {
                    failures += 1;
                    tracing::warn!(tube, raw_mm, attempt = failures, "sensor error, trying again");
                }
                _ => return Err(e),
            },
        }
    }
}

fn read_level<D: TubeControl + ?Sized>(
    dev: &mut D,
    tube: u8,
    retry_limit: u32,
    cancel: &CancelToken,
) -> Result<f64> {
    let state = read_state_retrying(dev, retry_limit, cancel)?;
    state
        .level(tube)
        .ok_or_else(|| DeviceError::InvalidArgument(format!("tube {tube} is not 1 or 2")).into())
}

fn set_flow<D: TubeControl + ?Sized>(dev: &mut D, tube: u8, dir: Direction, duty: u8) -> Result<()> {
    match dir {
        Direction::Inflow => dev.set_inflow(tube, duty),
        Direction::Outflow => dev.set_outflow(tube, duty),
    }
}

/// Time one flow from `start_level_mm` until the level crosses `end_level_mm`.
///
/// Inflow is measured when `end > start`, outflow otherwise. A tube that is
/// not on the valid side of the start level is moved there first.
#[allow(clippy::too_many_arguments)]
pub fn measure_flow<D, C>(
    dev: &mut D,
    tube: u8,
    start_level_mm: f64,
    end_level_mm: f64,
    duty: u8,
    retry_limit: u32,
    clock: &C,
    cancel: &CancelToken,
) -> Result<CalibrationSample>
where
    D: TubeControl + ?Sized,
    C: Clock,
{
    let is_inflow = start_level_mm < end_level_mm;
    let dir = if is_inflow {
        Direction::Inflow
    } else {
        Direction::Outflow
    };
    tracing::info!(tube, duty, is_inflow, "flow calibration started");

    let level = read_level(dev, tube, retry_limit, cancel)?;
    let needs_reset = if is_inflow {
        level >= start_level_mm
    } else {
        level <= start_level_mm
    };
    if needs_reset {
        dev.set_water_level(tube, start_level_mm)?;
    }
    dev.wait_until_free()?;

    let true_start = read_level(dev, tube, retry_limit, cancel)?;
    let t0: Instant = clock.now();
    set_flow(dev, tube, dir, duty)?;

    let polled = poll_until_crossed(dev, tube, end_level_mm, is_inflow, retry_limit, cancel);
    if let Err(e) = polled {
        if let Err(stop) = set_flow(dev, tube, dir, 0) {
            tracing::error!(error = %stop, "failed to stop flow after calibration error");
        }
        return Err(e);
    }
    set_flow(dev, tube, dir, 0)?;
    let duration_s = clock.secs_since(t0);

    let true_end = read_level(dev, tube, retry_limit, cancel)?;
    let difference_mm = true_end - true_start;
    let rate_mm_per_s = if duration_s > 0.0 {
        difference_mm / duration_s
    } else {
        0.0
    };
    tracing::info!(tube, duty, duration_s, difference_mm, rate_mm_per_s, "flow measured");
    Ok(CalibrationSample {
        tube,
        is_inflow,
        duration_s,
        difference_mm,
        rate_mm_per_s,
        duty,
    })
}

fn poll_until_crossed<D: TubeControl + ?Sized>(
    dev: &mut D,
    tube: u8,
    end_level_mm: f64,
    rising: bool,
    retry_limit: u32,
    cancel: &CancelToken,
) -> Result<f64> {
    loop {
        // Flow changes the level without any command, so every poll is a
        // device round trip.
        dev.make_outdated();
        let level = read_level(dev, tube, retry_limit, cancel)?;
        let crossed = if rising {
            level > end_level_mm
        } else {
            level < end_level_mm
        };
        if crossed {
            return Ok(level);
        }
    }
}

/// All repetitions of inflow and outflow for one tube at one duty level.
pub fn calibrate_tube<D, C, S>(
    dev: &mut D,
    tube: u8,
    duty: u8,
    cfg: &CalibrationCfg,
    clock: &C,
    sink: &mut S,
    cancel: &CancelToken,
) -> Result<()>
where
    D: TubeControl + ?Sized,
    C: Clock,
    S: SampleSink + ?Sized,
{
    dev.make_outdated();
    for _ in 0..cfg.repeats {
        for (from, to) in [
            (cfg.low_level_mm, cfg.high_level_mm),
            (cfg.high_level_mm, cfg.low_level_mm),
        ] {
            let sample = measure_flow(
                dev,
                tube,
                from,
                to,
                duty,
                cfg.sensor_retry_limit,
                clock,
                cancel,
            )?;
            sink.record(&sample)?;
        }
    }
    Ok(())
}

/// Full sweep: for every duty level, every configured tube. Returns the
/// number of samples recorded.
pub fn run_calibration<D, C, S>(
    dev: &mut D,
    cfg: &CalibrationCfg,
    clock: &C,
    sink: &mut S,
    cancel: &CancelToken,
) -> Result<usize>
where
    D: TubeControl + ?Sized,
    C: Clock,
    S: SampleSink + ?Sized,
{
    let mut count = 0;
    for &duty in &cfg.duty_levels {
        for &tube in &cfg.tubes {
            calibrate_tube(dev, tube, duty, cfg, clock, sink, cancel)?;
            count += 2 * cfg.repeats as usize;
        }
    }
    tracing::info!(samples = count, "calibration finished");
    Ok(count)
}

/// Drive both tubes to `level_mm`, one after the other.
pub fn reset_tubes<D: TubeControl + ?Sized>(dev: &mut D, level_mm: f64) -> Result<()> {
    for tube in 1..=2 {
        dev.set_water_level(tube, level_mm)?;
        dev.wait_until_free()?;
    }
    Ok(())
}

/// Record both tube levels repeatedly, starting from a known level.
/// Used to observe static outflow with every pump off.
pub fn run_level_trace<D, C, S>(
    dev: &mut D,
    cfg: &TraceCfg,
    retry_limit: u32,
    clock: &C,
    sink: &mut S,
    cancel: &CancelToken,
) -> Result<u32>
where
    D: TubeControl + ?Sized,
    C: Clock,
    S: TraceSink + ?Sized,
{
    reset_tubes(dev, cfg.start_level_mm)?;
    let start = clock.now();
    for _ in 0..cfg.samples {
        dev.make_outdated();
        let state = read_state_retrying(dev, retry_limit, cancel)?;
        sink.record(&LevelTraceRow {
            elapsed_s: clock.secs_since(start),
            tube1_mm: state.tubes[0].level_mm,
            tube2_mm: state.tubes[1].level_mm,
        })?;
    }
    Ok(cfg.samples)
}

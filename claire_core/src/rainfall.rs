//! Rainfall-simulation experiment loop.
//!
//! The timeline holds one rain intensity per minute. Each minute the target
//! inflow duty fraction is recomputed; inflow and outflow pumps are toggled
//! fully on/off by two stopwatches so their average duty matches the
//! fraction over one cycle. A third stopwatch paces the timeline reads.
//!
//! Whatever ends the loop (deadline, error, cancellation), every actuator is
//! zeroed exactly once and every stopwatch is stopped before returning.
use std::time::Duration;

use claire_traits::Clock;

use crate::cancel::CancelToken;
use crate::config::{OutflowSetting, RainfallCfg};
use crate::controller::TubeControl;
use crate::error::{DeviceError, Result};
use crate::protocol::Direction;
use crate::stopwatch::{Stopwatch, WatchState};
use crate::util::is_valid_tube;

const SECS_PER_MINUTE: f64 = 60.0;

/// Fraction of time the inflow pump must run for `intensity`, clamped to [0, 1].
pub fn rain_fraction(intensity: f64, per_unit: f64) -> f64 {
    (intensity * per_unit).clamp(0.0, 1.0)
}

/// Measured outflow duty, in percent of the time, per setting and tube.
pub fn outflow_percent(setting: OutflowSetting, tube: u8) -> f64 {
    match (setting, tube) {
        (OutflowSetting::Low, 1) => 0.112,
        (OutflowSetting::Low, _) => 0.118,
        (OutflowSetting::Medium, 1) => 0.187,
        (OutflowSetting::Medium, _) => 0.196,
        (OutflowSetting::High, 1) => 0.431,
        (OutflowSetting::High, _) => 0.451,
    }
}

pub fn outflow_fraction(setting: OutflowSetting, tube: u8, height_scale: f64, time_scale: f64) -> f64 {
    (outflow_percent(setting, tube) * height_scale * time_scale / 100.0).clamp(0.0, 1.0)
}

/// On/off split of one cycle with a minimum on-time pad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DutyCycle {
    pub cycle: Duration,
    pub min_on: Duration,
}

impl DutyCycle {
    /// `(cycle - min_on) * f + min_on`; zero when `f` is zero so the pump
    /// stays off for the whole cycle.
    pub fn on_duration(&self, fraction: f64) -> Duration {
        if fraction <= 0.0 {
            return Duration::ZERO;
        }
        let span = self.cycle.saturating_sub(self.min_on);
        span.mul_f64(fraction.min(1.0)) + self.min_on
    }

    pub fn off_duration(&self, fraction: f64) -> Duration {
        if fraction <= 0.0 {
            return self.cycle;
        }
        let span = self.cycle.saturating_sub(self.min_on);
        span.mul_f64((1.0 - fraction).max(0.0))
    }
}

/// Switches one actuator between 0 and 100 % duty.
#[derive(Debug)]
pub struct Toggler {
    tube: u8,
    direction: Direction,
    on: bool,
    switches: u32,
}

impl Toggler {
    pub fn new(tube: u8, direction: Direction) -> Self {
        Self {
            tube,
            direction,
            on: false,
            switches: 0,
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Advance to the next phase and re-arm `watch`. A zero-length phase is
    /// skipped so a fraction of 0 or 1 never produces a spurious pulse.
    pub fn service<D, C>(
        &mut self,
        dev: &mut D,
        watch: &Stopwatch<C>,
        on: Duration,
        off: Duration,
    ) -> Result<()>
    where
        D: TubeControl + ?Sized,
        C: Clock + Clone + Send + 'static,
    {
        let (switch_to, next) = match (self.on, on.is_zero(), off.is_zero()) {
            (true, _, true) => (None, on),
            (true, _, false) => (Some(false), off),
            (false, true, _) => (None, off),
            (false, false, _) => (Some(true), on),
        };
        if let Some(state) = switch_to {
            let duty = if state { 100 } else { 0 };
            match self.direction {
                Direction::Inflow => dev.set_inflow(self.tube, duty)?,
                Direction::Outflow => dev.set_outflow(self.tube, duty)?,
            }
            self.on = state;
            self.switches += 1;
        }
        watch.start(next);
        Ok(())
    }
}

/// Everything the loop needs, already scaled by the experiment time scale.
#[derive(Debug, Clone)]
pub struct RainfallPlan {
    pub tube: u8,
    pub duration: Duration,
    /// Time between timeline reads (one scaled minute).
    pub reading_period: Duration,
    pub inflow_cycle: DutyCycle,
    pub outflow_cycle: Duration,
    pub poll: Duration,
    /// Inflow duty fraction per unit of rain intensity.
    pub rain_fraction_per_unit: f64,
    pub outflow_fraction: f64,
    /// Per-minute intensities, lead-in included.
    pub timeline: Vec<f64>,
}

impl RainfallPlan {
    pub fn new(cfg: &RainfallCfg, data: &[f64]) -> Result<Self> {
        if !is_valid_tube(cfg.tube) {
            return Err(DeviceError::InvalidArgument(format!("tube {} is not 1 or 2", cfg.tube)).into());
        }
        if !(cfg.time_scale > 0.0 && cfg.time_scale.is_finite()) {
            return Err(DeviceError::InvalidArgument(format!(
                "time_scale {} must be finite and > 0",
                cfg.time_scale
            ))
            .into());
        }
        let ts = cfg.time_scale;
        let coefficient = cfg.rain_coefficients[usize::from(cfg.tube - 1)];
        let mut timeline = vec![cfg.lead_in_intensity; cfg.lead_in_minutes as usize];
        timeline.extend_from_slice(data);
        let inflow_pad = scaled(cfg.cycle.saturating_sub(cfg.min_on), ts, "cycle")?;
        Ok(Self {
            tube: cfg.tube,
            duration: scaled(cfg.duration, ts, "duration")?,
            reading_period: scaled(Duration::from_secs_f64(SECS_PER_MINUTE), ts, "reading period")?,
            inflow_cycle: DutyCycle {
                cycle: inflow_pad.checked_add(cfg.min_on).ok_or_else(|| {
                    DeviceError::InvalidArgument("inflow cycle overflows".into())
                })?,
                min_on: cfg.min_on,
            },
            outflow_cycle: scaled(cfg.cycle, ts, "cycle")?,
            poll: cfg.poll,
            rain_fraction_per_unit: cfg.height_scale * ts * coefficient / 1000.0,
            outflow_fraction: outflow_fraction(cfg.outflow, cfg.tube, cfg.height_scale, ts),
            timeline,
        })
    }

    /// Intensity of timeline minute `index`; 0 past the end.
    pub fn intensity_at(&self, index: usize) -> f64 {
        self.timeline.get(index).copied().unwrap_or(0.0)
    }

    pub fn fraction_at(&self, index: usize) -> f64 {
        rain_fraction(self.intensity_at(index), self.rain_fraction_per_unit)
    }
}

/// `d / time_scale`, refused when the result is not a representable duration.
fn scaled(d: Duration, time_scale: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(d.as_secs_f64() / time_scale).map_err(|_| {
        DeviceError::InvalidArgument(format!("{what} of {d:?} cannot be scaled by time_scale {time_scale}"))
            .into()
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RainfallReport {
    pub elapsed: Duration,
    pub minutes_read: u32,
    pub inflow_switches: u32,
    pub outflow_switches: u32,
}

/// Run the experiment until `plan.duration` has elapsed on `clock`.
pub fn run_rainfall<D, C>(
    dev: &mut D,
    plan: &RainfallPlan,
    clock: &C,
    cancel: &CancelToken,
) -> Result<RainfallReport>
where
    D: TubeControl + ?Sized,
    C: Clock + Clone + Send + 'static,
{
    let mut watches = [
        Stopwatch::with_state(clock.clone(), WatchState::Finished),
        Stopwatch::with_state(clock.clone(), WatchState::Finished),
        Stopwatch::with_state(clock.clone(), WatchState::Finished),
    ];
    tracing::info!(
        tube = plan.tube,
        duration_s = plan.duration.as_secs_f64(),
        minutes = plan.timeline.len(),
        "rainfall experiment started"
    );
    let outcome = rainfall_loop(dev, plan, clock, cancel, &watches);

    let zeroed = zero_all(dev);
    for w in watches.iter_mut() {
        w.stop();
    }
    match (outcome, zeroed) {
        (Ok(report), Ok(())) => {
            tracing::info!(
                elapsed_s = report.elapsed.as_secs_f64(),
                inflow_switches = report.inflow_switches,
                "rainfall experiment finished"
            );
            Ok(report)
        }
        (Ok(_), Err(e)) => Err(e),
        (Err(e), zeroed) => {
            if let Err(z) = zeroed {
                tracing::error!(error = %z, "failed to zero actuators after loop error");
            }
            Err(e)
        }
    }
}

fn rainfall_loop<D, C>(
    dev: &mut D,
    plan: &RainfallPlan,
    clock: &C,
    cancel: &CancelToken,
    [reading, inflow_watch, outflow_watch]: &[Stopwatch<C>; 3],
) -> Result<RainfallReport>
where
    D: TubeControl + ?Sized,
    C: Clock + Clone + Send + 'static,
{
    let start = clock.now();
    let finish = start + plan.duration;
    let mut inflow = Toggler::new(plan.tube, Direction::Inflow);
    let mut outflow = Toggler::new(plan.tube, Direction::Outflow);
    let mut fraction = plan.fraction_at(0);
    let mut minutes_read = 0;

    while clock.now() < finish {
        cancel.check()?;

        if reading.is_finished() {
            let elapsed = clock.now().saturating_duration_since(start);
            let index = (elapsed.as_secs_f64() / plan.reading_period.as_secs_f64()).floor() as usize;
            fraction = plan.fraction_at(index);
            minutes_read += 1;
            tracing::debug!(index, intensity = plan.intensity_at(index), fraction, "rain minute");
            reading.start(plan.reading_period);
        }

        if inflow_watch.is_finished() {
            let c = plan.inflow_cycle;
            inflow.service(dev, inflow_watch, c.on_duration(fraction), c.off_duration(fraction))?;
        }

        if outflow_watch.is_finished() {
            let cycle = plan.outflow_cycle;
            let f = plan.outflow_fraction;
            outflow.service(
                dev,
                outflow_watch,
                cycle.mul_f64(f),
                cycle.mul_f64(1.0 - f),
            )?;
        }

        clock.sleep(plan.poll);
    }

    Ok(RainfallReport {
        elapsed: clock.now().saturating_duration_since(start),
        minutes_read,
        inflow_switches: inflow.switches,
        outflow_switches: outflow.switches,
    })
}

/// Set all four actuators to 0 %. Every actuator is attempted; if any of
/// them refuses, an emergency stop follows and the first error is returned.
pub fn zero_all<D: TubeControl + ?Sized>(dev: &mut D) -> Result<()> {
    let results = [
        dev.set_outflow(1, 0),
        dev.set_outflow(2, 0),
        dev.set_inflow(1, 0),
        dev.set_inflow(2, 0),
    ];
    let zeroed = results.into_iter().collect::<Result<Vec<()>>>().map(|_| ());
    if let Err(e) = &zeroed {
        tracing::warn!(error = %e, "zeroing actuators failed; sending emergency stop");
        if let Err(stop) = dev.emergency_stop() {
            tracing::error!(error = %stop, "emergency stop after failed zeroing also failed");
        }
    }
    zeroed
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn fractions_follow_calibrated_coefficients() {
        let plan = RainfallPlan::new(&RainfallCfg::default(), &[10.0]).unwrap();
        // 20 lead-in minutes come first
        assert_eq!(plan.timeline.len(), 21);
        assert_eq!(plan.intensity_at(0), 1.0);
        assert_eq!(plan.intensity_at(20), 10.0);
        assert_eq!(plan.intensity_at(21), 0.0);
        assert!((plan.fraction_at(20) - 10.0 * 2.0 * 9.282 / 1000.0).abs() < 1e-12);
        assert!((plan.outflow_fraction - 0.187 * 2.0 / 100.0).abs() < 1e-12);
        assert_eq!(rain_fraction(1e6, 0.1), 1.0);
    }

    #[rstest]
    #[case(OutflowSetting::Low, 2, 0.118)]
    #[case(OutflowSetting::Medium, 2, 0.196)]
    #[case(OutflowSetting::High, 1, 0.431)]
    fn outflow_table(#[case] s: OutflowSetting, #[case] tube: u8, #[case] pct: f64) {
        assert_eq!(outflow_percent(s, tube), pct);
    }

    #[test]
    fn duty_cycle_pads_minimum_on_time() {
        let c = DutyCycle {
            cycle: Duration::from_secs(60),
            min_on: Duration::from_millis(500),
        };
        assert_eq!(c.on_duration(0.5), Duration::from_millis(30_250));
        assert_eq!(c.off_duration(0.5), Duration::from_millis(29_750));
        assert_eq!(c.on_duration(0.0), Duration::ZERO);
        assert_eq!(c.off_duration(0.0), Duration::from_secs(60));
        assert_eq!(c.off_duration(1.0), Duration::ZERO);
    }

    #[test]
    fn time_scale_shortens_experiment() {
        let cfg = RainfallCfg {
            time_scale: 2.0,
            ..RainfallCfg::default()
        };
        let plan = RainfallPlan::new(&cfg, &[]).unwrap();
        assert_eq!(plan.duration, Duration::from_secs(300));
        assert_eq!(plan.reading_period, Duration::from_secs(30));
        assert_eq!(plan.outflow_cycle, Duration::from_secs(30));
        assert_eq!(plan.inflow_cycle.cycle, Duration::from_millis(30_250));
    }

    #[rstest]
    #[case(1e-18)]
    #[case(0.0)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn unrepresentable_time_scale_is_refused(#[case] time_scale: f64) {
        let cfg = RainfallCfg {
            time_scale,
            ..RainfallCfg::default()
        };
        let err = RainfallPlan::new(&cfg, &[1.0]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeviceError>(),
            Some(DeviceError::InvalidArgument(_))
        ));
    }
}

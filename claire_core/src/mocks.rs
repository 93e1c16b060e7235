//! Test and helper mocks for claire_core.
//!
//! [`ScriptedTubes`] is an in-memory [`TubeControl`] with a simple flow
//! model driven by a [`Clock`]. Every call is recorded with the clock time at
//! which it happened, so loop timing can be asserted deterministically.
use std::time::{Duration, Instant};

use claire_traits::Clock;

use crate::controller::TubeControl;
use crate::error::{DeviceError, Result};
use crate::state::{DeviceState, TubeState};
use crate::util::{is_valid_tube, round1};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockCall {
    GetState,
    SetLevel { tube: u8, level_mm: f64 },
    Inflow { tube: u8, rate: u8 },
    Outflow { tube: u8, rate: u8 },
    WaitUntilFree,
    EmergencyStop,
    MakeOutdated,
}

pub struct ScriptedTubes<C: Clock> {
    clock: C,
    epoch: Instant,
    last_update: Instant,
    pub levels: [f64; 2],
    pub inflow: [u8; 2],
    pub outflow: [u8; 2],
    /// Level change per second at 100 % duty.
    pub inflow_mm_per_s: [f64; 2],
    pub outflow_mm_per_s: [f64; 2],
    pub max_level_mm: f64,
    /// Clock time consumed by one state round trip.
    pub read_cost: Duration,
    pending_move: Option<(u8, f64)>,
    sensor_faults: u32,
    /// Every read fails while a tube is above this level.
    pub blind_above_mm: Option<f64>,
    pub calls: Vec<(Duration, MockCall)>,
}

impl<C: Clock> ScriptedTubes<C> {
    pub fn new(clock: C, levels: [f64; 2]) -> Self {
        let now = clock.now();
        Self {
            clock,
            epoch: now,
            last_update: now,
            levels,
            inflow: [0; 2],
            outflow: [0; 2],
            inflow_mm_per_s: [5.0, 5.0],
            outflow_mm_per_s: [3.0, 3.0],
            max_level_mm: 900.0,
            read_cost: Duration::from_millis(500),
            pending_move: None,
            sensor_faults: 0,
            blind_above_mm: None,
            calls: Vec::new(),
        }
    }

    /// Fail the next `n` state reads with `SensorError`.
    pub fn fail_next_reads(&mut self, n: u32) {
        self.sensor_faults = n;
    }

    pub fn is_busy(&self) -> bool {
        self.pending_move.is_some()
    }

    /// Calls matching `pred`, in order.
    pub fn calls_matching(&self, pred: impl Fn(&MockCall) -> bool) -> Vec<(Duration, MockCall)> {
        self.calls.iter().copied().filter(|(_, c)| pred(c)).collect()
    }

    fn record(&mut self, call: MockCall) {
        self.update();
        let at = self.clock.now().saturating_duration_since(self.epoch);
        self.calls.push((at, call));
    }

    fn update(&mut self) {
        let now = self.clock.now();
        let dt = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        for i in 0..2 {
            let rise = self.inflow_mm_per_s[i] * f64::from(self.inflow[i]) / 100.0;
            let drop = self.outflow_mm_per_s[i] * f64::from(self.outflow[i]) / 100.0;
            self.levels[i] = (self.levels[i] + (rise - drop) * dt).clamp(0.0, self.max_level_mm);
        }
    }

    fn check_duty(&self, tube: u8, rate: u8) -> Result<usize> {
        if !is_valid_tube(tube) || rate > 100 {
            return Err(DeviceError::InvalidArgument(format!("tube {tube} rate {rate}")).into());
        }
        if self.is_busy() {
            return Err(DeviceError::ProtocolViolation("duty change while busy".into()).into());
        }
        Ok(usize::from(tube - 1))
    }
}

impl<C: Clock> TubeControl for ScriptedTubes<C> {
    fn get_state(&mut self) -> Result<DeviceState> {
        self.clock.sleep(self.read_cost);
        self.record(MockCall::GetState);
        let blind = self
            .blind_above_mm
            .is_some_and(|max| self.levels.iter().any(|l| *l > max));
        if blind || self.sensor_faults > 0 {
            self.sensor_faults = self.sensor_faults.saturating_sub(1);
            return Err(DeviceError::SensorError {
                tube: 1,
                raw_mm: -1.0,
            }
            .into());
        }
        let tube = |i: usize| TubeState {
            level_mm: round1(self.levels[i]),
            inflow_duty: f64::from(self.inflow[i]),
            outflow_duty: f64::from(self.outflow[i]),
        };
        Ok(DeviceState {
            tubes: [tube(0), tube(1)],
            aux: Default::default(),
        })
    }

    fn set_water_level(&mut self, tube: u8, level_mm: f64) -> Result<()> {
        self.record(MockCall::SetLevel { tube, level_mm });
        if !is_valid_tube(tube) {
            return Err(DeviceError::InvalidArgument(format!("tube {tube}")).into());
        }
        if self.is_busy() {
            return Err(DeviceError::ProtocolViolation("move while busy".into()).into());
        }
        self.pending_move = Some((tube, level_mm));
        Ok(())
    }

    fn set_inflow(&mut self, tube: u8, rate: u8) -> Result<()> {
        self.record(MockCall::Inflow { tube, rate });
        let i = self.check_duty(tube, rate)?;
        self.inflow[i] = rate;
        Ok(())
    }

    fn set_outflow(&mut self, tube: u8, rate: u8) -> Result<()> {
        self.record(MockCall::Outflow { tube, rate });
        let i = self.check_duty(tube, rate)?;
        self.outflow[i] = rate;
        Ok(())
    }

    fn wait_until_free(&mut self) -> Result<()> {
        self.record(MockCall::WaitUntilFree);
        if let Some((tube, level)) = self.pending_move.take() {
            self.levels[usize::from(tube - 1)] = level;
        }
        Ok(())
    }

    fn wait_until_free_within(&mut self, _timeout: Duration) -> Result<bool> {
        self.wait_until_free().map(|_| true)
    }

    fn emergency_stop(&mut self) -> Result<()> {
        self.record(MockCall::EmergencyStop);
        self.inflow = [0; 2];
        self.outflow = [0; 2];
        self.pending_move = None;
        Ok(())
    }

    fn make_outdated(&mut self) {
        self.record(MockCall::MakeOutdated);
    }
}

//! Simulated demonstrator speaking the serial wire protocol.
//!
//! The model keeps two tubes with a water level each, driven by duty-scaled
//! in/outflow rates. Level-set commands move a tube at a fixed rate and print
//! `Finished` when the target is reached. Physics advances lazily on every
//! read/write from the elapsed wall-clock time, scaled by `speedup`.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use claire_traits::{CommandSink, LineSource};

use crate::error::{HwError, Result};
use crate::util::poll_until;

pub const TUBE_COUNT: usize = 2;

const LINE_POLL: Duration = Duration::from_millis(2);

#[derive(Debug, Clone)]
pub struct SimParams {
    /// Product name printed in the boot banner (three words).
    pub product: String,
    pub firmware_version: String,
    pub max_level_mm: f64,
    pub initial_levels_mm: [f64; TUBE_COUNT],
    /// Level rise per second at 100% inflow duty.
    pub inflow_mm_per_s: [f64; TUBE_COUNT],
    /// Level drop per second at 100% outflow duty.
    pub outflow_mm_per_s: [f64; TUBE_COUNT],
    /// Speed of an asynchronous level move.
    pub move_mm_per_s: f64,
    /// Simulated seconds per wall-clock second.
    pub speedup: f64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            product: "CLAIRE water demonstrator".to_string(),
            firmware_version: "v1.0".to_string(),
            max_level_mm: 900.0,
            initial_levels_mm: [400.0, 400.0],
            inflow_mm_per_s: [4.6, 4.3],
            outflow_mm_per_s: [3.0, 3.1],
            move_mm_per_s: 10.0,
            speedup: 1.0,
        }
    }
}

#[derive(Debug, Default)]
struct Tube {
    level: f64,
    inflow: u8,
    outflow: u8,
    target: Option<f64>,
    faulty_reads: u32,
}

#[derive(Debug)]
struct SimInner {
    tubes: [Tube; TUBE_COUNT],
    last_tick: Instant,
    outbox: VecDeque<String>,
    received: Vec<String>,
}

/// Shared handle to a simulated device. Cloning shares the same device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    params: Arc<SimParams>,
    inner: Arc<Mutex<SimInner>>,
}

impl SimulatedDevice {
    pub fn new(params: SimParams) -> Self {
        let tubes = [0, 1].map(|i| Tube {
            level: params.initial_levels_mm[i].clamp(0.0, params.max_level_mm),
            ..Tube::default()
        });
        let mut outbox = VecDeque::new();
        outbox.push_back(format!(
            "Initialising {} {}",
            params.product, params.firmware_version
        ));
        outbox.push_back("Sonar sensors ready".to_string());
        Self {
            params: Arc::new(params),
            inner: Arc::new(Mutex::new(SimInner {
                tubes,
                last_tick: Instant::now(),
                outbox,
                received: Vec::new(),
            })),
        }
    }

    /// Receive and transmit halves sharing this device.
    pub fn split(&self) -> (SimReader, SimWriter) {
        (
            SimReader {
                device: self.clone(),
            },
            SimWriter {
                device: self.clone(),
            },
        )
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    /// Current water level of `tube` (1 or 2) in millimetres.
    pub fn level(&self, tube: u8) -> Result<f64> {
        let mut g = self.lock()?;
        self.tick(&mut g);
        Ok(g.tubes[tube_index(tube)].level)
    }

    pub fn set_level(&self, tube: u8, level_mm: f64) -> Result<()> {
        let mut g = self.lock()?;
        self.tick(&mut g);
        g.tubes[tube_index(tube)].level = level_mm.clamp(0.0, self.params.max_level_mm);
        Ok(())
    }

    /// Report a negative distance for `tube` on the next `reads` state dumps.
    pub fn inject_sensor_fault(&self, tube: u8, reads: u32) -> Result<()> {
        let mut g = self.lock()?;
        g.tubes[tube_index(tube)].faulty_reads = reads;
        Ok(())
    }

    /// Queue an arbitrary line as if the firmware printed it.
    pub fn push_line(&self, line: &str) -> Result<()> {
        self.lock()?.outbox.push_back(line.to_string());
        Ok(())
    }

    /// Every command received so far, without the `;` terminator.
    pub fn received(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.received.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimInner>> {
        self.inner.lock().map_err(|_| HwError::Poisoned)
    }

    fn tick(&self, g: &mut SimInner) {
        let now = Instant::now();
        let dt = now.saturating_duration_since(g.last_tick).as_secs_f64() * self.params.speedup;
        g.last_tick = now;
        let p = &self.params;
        let mut finished = 0;
        for (i, tube) in g.tubes.iter_mut().enumerate() {
            if let Some(target) = tube.target {
                let step = p.move_mm_per_s * dt;
                let delta = target - tube.level;
                if delta.abs() <= step {
                    tube.level = target;
                    tube.target = None;
                    finished += 1;
                } else {
                    tube.level += step.copysign(delta);
                }
            } else {
                let rise = p.inflow_mm_per_s[i] * f64::from(tube.inflow) / 100.0;
                let drop = p.outflow_mm_per_s[i] * f64::from(tube.outflow) / 100.0;
                tube.level += (rise - drop) * dt;
            }
            tube.level = tube.level.clamp(0.0, p.max_level_mm);
        }
        for _ in 0..finished {
            g.outbox.push_back("Finished".to_string());
        }
    }

    fn state_line(&self, g: &mut SimInner) -> String {
        let max = self.params.max_level_mm;
        let distances = [0, 1].map(|i| {
            let tube = &mut g.tubes[i];
            if tube.faulty_reads > 0 {
                tube.faulty_reads -= 1;
                -1.0
            } else {
                max - tube.level
            }
        });
        format!(
            "{{\"Tube0_water_mm\": {:.2}, \"Tube1_water_mm\": {:.2}, \"Tube0_inflow_duty\": {},\"Tube0_outflow_duty\": {},\"Tube1_inflow_duty\": {},\"Tube1_outflow_duty\": {},\"Stream_inflow_duty\": 0,\"Stream_outflow_duty\": 0}}",
            distances[0],
            distances[1],
            g.tubes[0].inflow,
            g.tubes[0].outflow,
            g.tubes[1].inflow,
            g.tubes[1].outflow,
        )
    }

    fn apply(&self, g: &mut SimInner, cmd: &str) {
        g.received.push(cmd.to_string());
        let parts: Vec<&str> = cmd.split_whitespace().collect();
        match parts.as_slice() {
            ["1"] => {
                let line = self.state_line(g);
                g.outbox.push_back(line);
            }
            ["3"] => {
                g.outbox.push_back("Emergency stop".to_string());
                let mut moving = 0;
                for tube in g.tubes.iter_mut() {
                    tube.inflow = 0;
                    tube.outflow = 0;
                    if tube.target.take().is_some() {
                        moving += 1;
                    }
                }
                for _ in 0..moving {
                    g.outbox.push_back("Finished".to_string());
                }
            }
            ["4", actuator, percent] => {
                match (actuator.parse::<u8>(), percent.parse::<u8>()) {
                    (Ok(a @ 1..=4), Ok(p @ 0..=100)) => {
                        let tube = &mut g.tubes[usize::from((a - 1) / 2)];
                        if a % 2 == 1 {
                            tube.inflow = p;
                        } else {
                            tube.outflow = p;
                        }
                        g.outbox.push_back(format!("Actuator {a} duty {p}%"));
                    }
                    _ => g.outbox.push_back(format!("Invalid duty command: {cmd}")),
                }
            }
            ["5", tube, distance] => match (tube.parse::<u8>(), distance.parse::<f64>()) {
                (Ok(t @ 1..=2), Ok(d)) => {
                    let max = self.params.max_level_mm;
                    let target = (max - d).clamp(0.0, max);
                    g.tubes[tube_index(t)].target = Some(target);
                    g.outbox.push_back(format!("Moving tube {t} to {d} mm"));
                }
                _ => g.outbox.push_back(format!("Invalid level command: {cmd}")),
            },
            _ => g.outbox.push_back(format!("Unknown command: {cmd}")),
        }
    }
}

fn tube_index(tube: u8) -> usize {
    usize::from(tube.clamp(1, TUBE_COUNT as u8) - 1)
}

/// Receive half of a [`SimulatedDevice`].
pub struct SimReader {
    device: SimulatedDevice,
}

impl LineSource for SimReader {
    fn read_line(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
        let dev = &self.device;
        let res = poll_until(
            || {
                let mut g = dev.lock()?;
                dev.tick(&mut g);
                Ok(g.outbox.pop_front())
            },
            timeout,
            LINE_POLL,
        );
        match res {
            Ok(line) => Ok(Some(line)),
            Err(HwError::Timeout) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }
}

/// Transmit half of a [`SimulatedDevice`].
pub struct SimWriter {
    device: SimulatedDevice,
}

impl CommandSink for SimWriter {
    fn send(&mut self, bytes: &[u8]) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let dev = &self.device;
        let mut g = dev.lock()?;
        dev.tick(&mut g);
        let text = String::from_utf8_lossy(bytes);
        for cmd in text.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            dev.apply(&mut g, cmd);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn drain(reader: &mut SimReader) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = reader.read_line(Duration::from_millis(5)).unwrap() {
            out.push(line);
        }
        out
    }

    #[test]
    fn prints_banner_first() {
        let dev = SimulatedDevice::new(SimParams::default());
        let (mut rx, _tx) = dev.split();
        let first = rx.read_line(Duration::from_millis(10)).unwrap();
        assert_eq!(
            first.as_deref(),
            Some("Initialising CLAIRE water demonstrator v1.0")
        );
    }

    #[test]
    fn state_dump_reports_raw_distance() {
        let dev = SimulatedDevice::new(SimParams::default());
        let (mut rx, mut tx) = dev.split();
        drain(&mut rx);
        tx.send(b"4 3 40;1;").unwrap();
        let lines = drain(&mut rx);
        let state = lines.iter().find(|l| l.starts_with('{')).unwrap();
        assert!(state.contains("\"Tube0_water_mm\": 500.00"));
        assert!(state.contains("\"Tube1_inflow_duty\": 40"));
    }

    #[test]
    fn level_move_prints_finished() {
        let params = SimParams {
            move_mm_per_s: 10_000.0,
            ..SimParams::default()
        };
        let dev = SimulatedDevice::new(params);
        let (mut rx, mut tx) = dev.split();
        drain(&mut rx);
        tx.send(b"5 2 300;").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let lines = drain(&mut rx);
        assert!(lines.iter().any(|l| l == "Finished"), "{lines:?}");
        assert!((dev.level(2).unwrap() - 600.0).abs() < 1e-9);
    }

    #[test]
    fn emergency_stop_zeroes_duties() {
        let dev = SimulatedDevice::new(SimParams::default());
        let (mut rx, mut tx) = dev.split();
        tx.send(b"4 1 100;4 4 100;3;1;").unwrap();
        let lines = drain(&mut rx);
        let state = lines.iter().find(|l| l.starts_with('{')).unwrap();
        assert!(state.contains("\"Tube0_inflow_duty\": 0"));
        assert!(state.contains("\"Tube1_outflow_duty\": 0"));
        assert_eq!(
            dev.received().unwrap(),
            vec!["4 1 100", "4 4 100", "3", "1"]
        );
    }

    #[test]
    fn sensor_fault_reports_negative_distance_once() {
        let dev = SimulatedDevice::new(SimParams::default());
        let (mut rx, mut tx) = dev.split();
        dev.inject_sensor_fault(1, 1).unwrap();
        tx.send(b"1;1;").unwrap();
        let states: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter(|l| l.starts_with('{'))
            .collect();
        assert!(states[0].contains("\"Tube0_water_mm\": -1.00"));
        assert!(!states[1].contains("-1.00"));
    }

    #[rstest]
    #[case(b"4 1 55;", "Actuator 1 duty 55%")]
    #[case(b"4 4 0;", "Actuator 4 duty 0%")]
    #[case(b"4 5 10;", "Invalid duty command: 4 5 10")]
    #[case(b"4 2 101;", "Invalid duty command: 4 2 101")]
    #[case(b"5 1 250;", "Moving tube 1 to 250 mm")]
    #[case(b"5 3 100;", "Invalid level command: 5 3 100")]
    #[case(b"7;", "Unknown command: 7")]
    fn acknowledges_each_command(#[case] cmd: &[u8], #[case] ack: &str) {
        let dev = SimulatedDevice::new(SimParams::default());
        let (mut rx, mut tx) = dev.split();
        drain(&mut rx);
        tx.send(cmd).unwrap();
        assert_eq!(drain(&mut rx).first().map(String::as_str), Some(ack));
    }
}

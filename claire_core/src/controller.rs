//! Device controller: command discipline, cached state, unit conversion.
//!
//! One controller owns one link for the lifetime of an experiment run. It is
//! constructed explicitly (see [`crate::builder::ControllerBuilder`]) and
//! handed to the control loops by `&mut`.
use std::time::{Duration, Instant};

use claire_traits::{CommandSink, LineSource};

use crate::cache::StateCache;
use crate::cancel::CancelToken;
use crate::channel::{LineChannel, LineLog, RawLine};
use crate::config::ControllerCfg;
use crate::error::{DeviceError, Result};
use crate::protocol::{Banner, Command, Direction, actuator_index};
use crate::state::DeviceState;
use crate::units::LevelUnits;
use crate::util::is_valid_tube;

/// Upper bound on a single blocking wait, so cancellation stays responsive.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Operations the control loops need from a device.
pub trait TubeControl {
    /// Current state; from the cache when fresh, otherwise a device round trip.
    fn get_state(&mut self) -> Result<DeviceState>;
    /// Start an asynchronous move of `tube` to `level_mm`.
    fn set_water_level(&mut self, tube: u8, level_mm: f64) -> Result<()>;
    fn set_inflow(&mut self, tube: u8, rate: u8) -> Result<()>;
    fn set_outflow(&mut self, tube: u8, rate: u8) -> Result<()>;
    /// Block until no level move is in flight. Honours cancellation.
    fn wait_until_free(&mut self) -> Result<()>;
    /// Like `wait_until_free` but bounded and deaf to cancellation.
    /// Returns whether the device became free.
    fn wait_until_free_within(&mut self, timeout: Duration) -> Result<bool>;
    fn emergency_stop(&mut self) -> Result<()>;
    fn make_outdated(&mut self);
}

pub struct Controller<W: CommandSink> {
    channel: LineChannel<W>,
    cache: StateCache,
    units: LevelUnits,
    cfg: ControllerCfg,
    cancel: CancelToken,
}

impl<W: CommandSink> Controller<W> {
    /// Start the reader, wait out the boot grace period and verify the
    /// firmware banner. No command is sent before the banner checks out.
    pub fn connect<R: LineSource + Send + 'static>(
        source: R,
        sink: W,
        cfg: ControllerCfg,
        cancel: CancelToken,
    ) -> Result<Self> {
        let channel = LineChannel::spawn(source, sink, cfg.timeouts.read_poll);
        let ctl = Self {
            channel,
            cache: StateCache::new(),
            units: LevelUnits::new(cfg.max_level_mm),
            cfg,
            cancel,
        };
        ctl.sleep_cancellable(ctl.cfg.timeouts.boot_grace)?;
        let banner = ctl.check_version()?;
        tracing::info!(
            product = %banner.product,
            version = %banner.version,
            "device connected"
        );
        Ok(ctl)
    }

    /// The first line on the link must be the boot banner carrying exactly
    /// the expected firmware version.
    pub fn check_version(&self) -> Result<Banner> {
        let deadline = Instant::now() + self.cfg.timeouts.state;
        let first = loop {
            if let Some(line) = self.channel.log().first() {
                break line;
            }
            if let Some(fault) = self.channel.fault() {
                return Err(DeviceError::Link(fault).into());
            }
            if Instant::now() >= deadline {
                return Err(DeviceError::CommunicationTimeout(self.cfg.timeouts.state).into());
            }
            self.cancel.check()?;
            std::thread::sleep(Duration::from_millis(10));
        };
        let expected = &self.cfg.firmware_version;
        match Banner::parse(&first.text) {
            Some(b) if &b.version == expected => Ok(b),
            Some(b) => Err(DeviceError::IncompatibleFirmware {
                expected: expected.clone(),
                found: b.version,
            }
            .into()),
            None => Err(DeviceError::IncompatibleFirmware {
                expected: expected.clone(),
                found: first.text.to_string(),
            }
            .into()),
        }
    }

    /// Send one command, enforcing the busy discipline.
    pub fn write(&mut self, cmd: &Command) -> Result<()> {
        if cmd.is_mutating() && self.channel.is_busy() {
            return Err(DeviceError::ProtocolViolation(format!(
                "`{cmd}` issued while a level move is in progress"
            ))
            .into());
        }
        if cmd.is_async() {
            self.channel.set_busy(true);
        }
        if cmd.invalidates_state() {
            self.cache.make_outdated();
        }
        if let Err(e) = self.channel.send(cmd.encode().as_bytes()) {
            if cmd.is_async() {
                self.channel.set_busy(false);
            }
            return Err(e.into());
        }
        tracing::debug!(command = %cmd, "command sent");
        std::thread::sleep(self.cfg.timeouts.write_delay);
        Ok(())
    }

    /// Newest state dump in the log at or after `index`, converted.
    pub fn last_state_since(&self, index: usize) -> Result<Option<DeviceState>> {
        match self.channel.log().get_last_state_since(index) {
            Some((_, raw)) => Ok(Some(DeviceState::from_raw(&raw, &self.units)?)),
            None => Ok(None),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.channel.is_busy()
    }

    /// Lines received since the previous call.
    pub fn read_available(&mut self) -> Vec<RawLine> {
        self.channel.read_available()
    }

    pub fn log(&self) -> &LineLog {
        self.channel.log()
    }

    pub fn heartbeat_age(&self) -> Option<Duration> {
        self.channel.heartbeat_age()
    }

    pub fn reader_alive(&self) -> bool {
        self.channel.reader_alive()
    }

    pub fn units(&self) -> &LevelUnits {
        &self.units
    }

    pub fn config(&self) -> &ControllerCfg {
        &self.cfg
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Stop the reader and release the link.
    pub fn close(self) {
        tracing::info!("closing device link");
        self.channel.close();
    }

    fn set_duty(&mut self, tube: u8, direction: Direction, rate: u8) -> Result<()> {
        check_tube(tube)?;
        if rate > 100 {
            return Err(
                DeviceError::InvalidArgument(format!("duty {rate} outside [0, 100]")).into(),
            );
        }
        self.write(&Command::SetDuty {
            actuator: actuator_index(tube, direction),
            percent: rate,
        })
    }

    fn sleep_cancellable(&self, total: Duration) -> Result<()> {
        let deadline = Instant::now() + total;
        loop {
            self.cancel.check()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            std::thread::sleep(remaining.min(WAIT_SLICE));
        }
    }

    fn link_fault(&self) -> Option<DeviceError> {
        self.channel.fault().map(DeviceError::Link)
    }
}

fn check_tube(tube: u8) -> Result<()> {
    if is_valid_tube(tube) {
        Ok(())
    } else {
        Err(DeviceError::InvalidArgument(format!("tube {tube} is not 1 or 2")).into())
    }
}

impl<W: CommandSink> TubeControl for Controller<W> {
    fn get_state(&mut self) -> Result<DeviceState> {
        if let Some(state) = self.cache.fresh() {
            return Ok(state.clone());
        }
        let since = self.channel.log().len();
        self.write(&Command::RequestState)?;
        let window = self.cfg.timeouts.state;
        let deadline = Instant::now() + window;
        let event = loop {
            self.cancel.check()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DeviceError::CommunicationTimeout(window).into());
            }
            if let Some(ev) = self.channel.next_state_since(since, remaining.min(WAIT_SLICE)) {
                break ev;
            }
            if let Some(fault) = self.link_fault() {
                return Err(fault.into());
            }
        };
        let state = DeviceState::from_raw(&event.raw, &self.units)?;
        self.cache.store(state.clone(), event.seq);
        Ok(state)
    }

    fn set_water_level(&mut self, tube: u8, level_mm: f64) -> Result<()> {
        check_tube(tube)?;
        if !self.units.level_in_range(level_mm) {
            return Err(DeviceError::InvalidArgument(format!(
                "level {level_mm} mm outside [0, {}]",
                self.units.max_level_mm
            ))
            .into());
        }
        let distance_mm = self.units.level_to_distance(level_mm);
        tracing::info!(tube, level_mm, distance_mm, "moving tube");
        self.write(&Command::MoveTo { tube, distance_mm })
    }

    fn set_inflow(&mut self, tube: u8, rate: u8) -> Result<()> {
        self.set_duty(tube, Direction::Inflow, rate)
    }

    fn set_outflow(&mut self, tube: u8, rate: u8) -> Result<()> {
        self.set_duty(tube, Direction::Outflow, rate)
    }

    fn wait_until_free(&mut self) -> Result<()> {
        while self.channel.is_busy() {
            self.cancel.check()?;
            if let Some(fault) = self.link_fault() {
                return Err(fault.into());
            }
            std::thread::sleep(self.cfg.timeouts.busy_poll);
        }
        Ok(())
    }

    fn wait_until_free_within(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        while self.channel.is_busy() {
            if Instant::now() >= deadline || self.link_fault().is_some() {
                return Ok(false);
            }
            std::thread::sleep(self.cfg.timeouts.busy_poll);
        }
        Ok(true)
    }

    fn emergency_stop(&mut self) -> Result<()> {
        tracing::warn!("emergency stop");
        self.write(&Command::EmergencyStop)
    }

    fn make_outdated(&mut self) {
        self.cache.make_outdated();
    }
}

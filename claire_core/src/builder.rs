//! Builder for a connected [`Controller`].
//!
//! Collects the link halves, runtime config and cancellation token, validates
//! them, then connects (boot grace + banner check).
use claire_traits::{CommandSink, LineSource};

use crate::cancel::CancelToken;
use crate::config::ControllerCfg;
use crate::controller::Controller;
use crate::error::{BuildError, Result};

pub struct ControllerBuilder<R, W> {
    source: Option<R>,
    sink: Option<W>,
    cfg: Option<ControllerCfg>,
    cancel: Option<CancelToken>,
}

impl<R, W> Default for ControllerBuilder<R, W> {
    fn default() -> Self {
        Self {
            source: None,
            sink: None,
            cfg: None,
            cancel: None,
        }
    }
}

impl<R, W> ControllerBuilder<R, W>
where
    R: LineSource + Send + 'static,
    W: CommandSink,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: R) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_sink(mut self, sink: W) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_config(mut self, cfg: ControllerCfg) -> Self {
        self.cfg = Some(cfg);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Validate, then open the session with the device.
    pub fn connect(self) -> Result<Controller<W>> {
        let source = self
            .source
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSource))?;
        let sink = self
            .sink
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSink))?;
        let cfg = self.cfg.unwrap_or_default();
        validate(&cfg)?;
        Controller::connect(source, sink, cfg, self.cancel.unwrap_or_default())
    }
}

fn validate(cfg: &ControllerCfg) -> Result<()> {
    if !(cfg.max_level_mm.is_finite() && cfg.max_level_mm > 0.0) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "max_level_mm must be > 0",
        )));
    }
    if cfg.firmware_version.split_whitespace().count() != 1 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "firmware_version must be a single token",
        )));
    }
    if cfg.timeouts.state.is_zero() {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "state timeout must be > 0",
        )));
    }
    if cfg.timeouts.busy_poll.is_zero() || cfg.timeouts.read_poll.is_zero() {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "poll intervals must be > 0",
        )));
    }
    Ok(())
}

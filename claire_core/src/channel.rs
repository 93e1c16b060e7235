//! Line channel: background reader over the device link.
//!
//! A dedicated thread owns the receive half, appends every line to an
//! append-only [`LineLog`] and classifies it once. State dumps are published
//! as [`StateEvent`]s; the `Finished` sentinel clears the shared busy flag.
//! The transmit half stays with the caller so reading never blocks commands.
//!
//! The reader thread is joined by [`LineChannel::close`] (or on drop) before
//! the transmit half is released, so no read happens on a closed link.
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use claire_traits::{CommandSink, LineSource};
use crossbeam_channel as xch;

use crate::error::DeviceError;
use crate::hw_error::map_hw_error;
use crate::protocol::{LineKind, RawState, classify, try_parse_state};

/// One received line with its position in the log.
#[derive(Debug, Clone)]
pub struct RawLine {
    pub seq: usize,
    pub text: Arc<str>,
    pub received_at: Instant,
}

/// Append-only log of received lines.
///
/// Single producer (the reader thread), many readers. The atomic length is
/// published after the push, so readers only index lines that are complete.
#[derive(Debug, Default)]
pub struct LineLog {
    lines: RwLock<Vec<RawLine>>,
    len: AtomicUsize,
}

impl LineLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line and return its sequence number.
    pub fn append(&self, text: &str) -> usize {
        let mut lines = self.lines.write().unwrap_or_else(PoisonError::into_inner);
        let seq = lines.len();
        lines.push(RawLine {
            seq,
            text: Arc::from(text),
            received_at: Instant::now(),
        });
        self.len.store(seq + 1, Ordering::Release);
        seq
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, seq: usize) -> Option<RawLine> {
        if seq >= self.len() {
            return None;
        }
        let lines = self.lines.read().unwrap_or_else(PoisonError::into_inner);
        lines.get(seq).cloned()
    }

    pub fn first(&self) -> Option<RawLine> {
        self.get(0)
    }

    /// Lines with `seq >= index`, oldest first.
    pub fn since(&self, index: usize) -> Vec<RawLine> {
        let end = self.len();
        if index >= end {
            return Vec::new();
        }
        let lines = self.lines.read().unwrap_or_else(PoisonError::into_inner);
        lines[index..end].to_vec()
    }

    /// Newest line at or after `index` that parses as a state dump.
    ///
    /// Scans backward from the tail and stops at `index`.
    pub fn get_last_state_since(&self, index: usize) -> Option<(usize, RawState)> {
        let end = self.len();
        let lines = self.lines.read().unwrap_or_else(PoisonError::into_inner);
        lines[index.min(end)..end]
            .iter()
            .rev()
            .find_map(|l| try_parse_state(&l.text).map(|s| (l.seq, s)))
    }
}

/// A state dump recognised by the reader.
#[derive(Debug, Clone)]
pub struct StateEvent {
    pub seq: usize,
    pub raw: RawState,
}

pub struct LineChannel<W: CommandSink> {
    sink: Option<W>,
    log: Arc<LineLog>,
    events: xch::Receiver<StateEvent>,
    busy: Arc<AtomicBool>,
    /// Milliseconds since `epoch` of the last received line, plus one; 0 = never.
    last_line: Arc<AtomicU64>,
    epoch: Instant,
    fault: Arc<Mutex<Option<String>>>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
    cursor: usize,
}

impl<W: CommandSink> LineChannel<W> {
    /// Start the reader thread on `source`. `poll` bounds each blocking read
    /// and therefore the shutdown latency.
    pub fn spawn<R: LineSource + Send + 'static>(mut source: R, sink: W, poll: Duration) -> Self {
        let (tx, rx) = xch::unbounded();
        let log = Arc::new(LineLog::new());
        let busy = Arc::new(AtomicBool::new(false));
        let last_line = Arc::new(AtomicU64::new(0));
        let fault = Arc::new(Mutex::new(None));
        let shutdown = Arc::new(AtomicBool::new(false));
        let epoch = Instant::now();

        let (log_t, busy_t, last_t, fault_t, shutdown_t) = (
            log.clone(),
            busy.clone(),
            last_line.clone(),
            fault.clone(),
            shutdown.clone(),
        );
        let join_handle = std::thread::spawn(move || {
            while !shutdown_t.load(Ordering::Relaxed) {
                let line = match source.read_line(poll) {
                    Ok(Some(line)) => line,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::error!(error = %e, "device link read failed; reader stopping");
                        *fault_t.lock().unwrap_or_else(PoisonError::into_inner) =
                            Some(e.to_string());
                        break;
                    }
                };
                let seq = log_t.append(&line);
                let ms = epoch.elapsed().as_millis().min(u128::from(u64::MAX - 1)) as u64;
                last_t.store(ms + 1, Ordering::Relaxed);
                tracing::debug!(target: "device", seq, "{line}");
                match classify(&line) {
                    LineKind::Finished => {
                        busy_t.store(false, Ordering::SeqCst);
                        tracing::trace!(seq, "device finished move");
                    }
                    LineKind::State(raw) => {
                        if tx.send(StateEvent { seq, raw }).is_err() {
                            tracing::debug!("state consumer disconnected, exiting reader");
                            break;
                        }
                    }
                    LineKind::Banner(b) => {
                        tracing::info!(product = %b.product, version = %b.version, "device banner");
                    }
                    LineKind::Text => {}
                }
            }
            tracing::trace!("line reader exiting cleanly");
        });

        Self {
            sink: Some(sink),
            log,
            events: rx,
            busy,
            last_line,
            epoch,
            fault,
            shutdown,
            join_handle: Some(join_handle),
            cursor: 0,
        }
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| DeviceError::Link("link closed".into()))?;
        sink.send(bytes).map_err(|e| map_hw_error(&*e))
    }

    /// Lines received since the previous call. Never blocks.
    pub fn read_available(&mut self) -> Vec<RawLine> {
        let lines = self.log.since(self.cursor);
        self.cursor += lines.len();
        lines
    }

    pub fn log(&self) -> &LineLog {
        &self.log
    }

    /// Next state event with `seq >= since`, waiting up to `timeout`.
    /// Older events are discarded.
    pub fn next_state_since(&self, since: usize, timeout: Duration) -> Option<StateEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(ev) if ev.seq >= since => return Some(ev),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    /// Time since the last received line, `None` before the first one.
    pub fn heartbeat_age(&self) -> Option<Duration> {
        match self.last_line.load(Ordering::Relaxed) {
            0 => None,
            v => {
                let at = Duration::from_millis(v - 1);
                Some(self.epoch.elapsed().saturating_sub(at))
            }
        }
    }

    /// Read error that stopped the reader, if any.
    pub fn fault(&self) -> Option<String> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reader_alive(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop the reader, join it, then release the transmit half.
    pub fn close(mut self) {
        self.stop_reader();
        self.sink.take();
    }

    fn stop_reader(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("line reader joined"),
                Err(e) => tracing::warn!(?e, "line reader panicked during shutdown"),
            }
        }
    }
}

impl<W: CommandSink> Drop for LineChannel<W> {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

//! Last known device state and its freshness.
use crate::state::DeviceState;

#[derive(Debug, Clone, PartialEq)]
pub struct StateCacheEntry {
    pub state: DeviceState,
    /// Sequence number of the log line the state came from.
    pub seq: usize,
    pub outdated: bool,
}

/// Owned by the caller's context; the reader thread never touches it.
#[derive(Debug, Default)]
pub struct StateCache {
    entry: Option<StateCacheEntry>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached state if it was received after the last mutating command.
    pub fn fresh(&self) -> Option<&DeviceState> {
        self.entry
            .as_ref()
            .filter(|e| !e.outdated)
            .map(|e| &e.state)
    }

    pub fn store(&mut self, state: DeviceState, seq: usize) {
        self.entry = Some(StateCacheEntry {
            state,
            seq,
            outdated: false,
        });
    }

    pub fn make_outdated(&mut self) {
        if let Some(e) = self.entry.as_mut() {
            e.outdated = true;
        }
    }

    /// True when the next read must go to the device.
    pub fn is_outdated(&self) -> bool {
        self.entry.as_ref().is_none_or(|e| e.outdated)
    }

    /// Last stored entry regardless of freshness.
    pub fn last(&self) -> Option<&StateCacheEntry> {
        self.entry.as_ref()
    }
}

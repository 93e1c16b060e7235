//! Reader thread lifecycle: no leaked threads, no reads after close.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use claire_core::channel::LineChannel;
use claire_hardware::sim::{SimParams, SimulatedDevice};
use claire_traits::{CommandSink, LineSource};

type BoxErr = Box<dyn std::error::Error + Send + Sync>;

/// Counts reads and fails the test if one happens after the link closed.
struct Watched {
    reads: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl LineSource for Watched {
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, BoxErr> {
        assert!(!self.closed.load(Ordering::SeqCst), "read on closed link");
        self.reads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(timeout);
        Ok(Some("tick".into()))
    }
}

/// Marks the link closed when the transmit half is released.
struct ClosingSink(Arc<AtomicBool>);

impl CommandSink for ClosingSink {
    fn send(&mut self, _bytes: &[u8]) -> Result<(), BoxErr> {
        Ok(())
    }
}

impl Drop for ClosingSink {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[test]
fn close_joins_reader_before_releasing_link() {
    let reads = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    let source = Watched {
        reads: reads.clone(),
        closed: closed.clone(),
    };
    let ch = LineChannel::spawn(source, ClosingSink(closed.clone()), Duration::from_millis(5));
    std::thread::sleep(Duration::from_millis(50));
    assert!(ch.reader_alive());
    ch.close();
    assert!(closed.load(Ordering::SeqCst));
    let after = reads.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(reads.load(Ordering::SeqCst), after);
}

#[test]
fn reader_exits_on_drop() {
    let dev = SimulatedDevice::new(SimParams::default());
    let (rx, tx) = dev.split();
    let ch = LineChannel::spawn(rx, tx, Duration::from_millis(10));
    std::thread::sleep(Duration::from_millis(30));
    drop(ch);
    // passes if drop completes without hanging
}

#[test]
fn many_channels_dont_leak_threads() {
    for _ in 0..10 {
        let dev = SimulatedDevice::new(SimParams::default());
        let (rx, tx) = dev.split();
        let mut ch = LineChannel::spawn(rx, tx, Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(10));
        let _ = ch.read_available();
        ch.close();
    }
}

#[test]
fn state_events_are_published_once_per_dump() {
    let dev = SimulatedDevice::new(SimParams::default());
    let (rx, tx) = dev.split();
    let mut ch = LineChannel::spawn(rx, tx, Duration::from_millis(5));
    let since = ch.log().len();
    ch.send(b"1;").unwrap();
    let ev = ch
        .next_state_since(since, Duration::from_secs(2))
        .expect("state event");
    assert_eq!(ev.raw.distance_mm, [500.0, 500.0]);
    assert!(ch.next_state_since(since, Duration::from_millis(50)).is_none());
    ch.close();
}

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

use claire_hardware::error::HwError;
use claire_hardware::util::poll_until;

#[test]
fn poll_until_success_path() {
    let ready = Arc::new(AtomicBool::new(false));
    let ready_bg = ready.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(3));
        ready_bg.store(true, Ordering::Relaxed);
    });

    let res = poll_until(
        || Ok(ready.load(Ordering::Relaxed).then_some(7u8)),
        Duration::from_millis(200),
        Duration::from_micros(200),
    );
    assert_eq!(res.ok(), Some(7));
}

#[test]
fn poll_until_timeout_path() {
    let err = poll_until(
        || Ok(None::<()>),
        Duration::from_millis(5),
        Duration::from_micros(200),
    )
    .expect_err("expected timeout error");

    match err {
        HwError::Timeout => {}
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn poll_until_propagates_errors() {
    let err = poll_until(
        || Err::<Option<()>, _>(HwError::Disconnected),
        Duration::from_millis(50),
        Duration::from_millis(1),
    )
    .expect_err("expected error");
    assert!(matches!(err, HwError::Disconnected));
}

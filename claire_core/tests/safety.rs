use std::time::Duration;

use claire_core::mocks::{MockCall, ScriptedTubes};
use claire_core::safety::{emergency_shutdown, supervise};
use claire_core::{DeviceError, TubeControl};
use claire_traits::clock::test_clock::ManualClock;

fn rig() -> ScriptedTubes<ManualClock> {
    ScriptedTubes::new(ManualClock::new(), [400.0, 400.0])
}

fn calls(dev: &ScriptedTubes<ManualClock>) -> Vec<MockCall> {
    dev.calls.iter().map(|(_, c)| *c).collect()
}

#[test]
fn failing_body_triggers_stop_and_keeps_its_error() {
    let mut dev = rig();
    let err = supervise(&mut dev, Duration::from_secs(1), |d| -> claire_core::Result<()> {
        d.set_inflow(1, 100)?;
        Err(DeviceError::SensorError {
            tube: 2,
            raw_mm: -3.0,
        }
        .into())
    })
    .unwrap_err();
    assert_eq!(
        err.downcast_ref::<DeviceError>(),
        Some(&DeviceError::SensorError {
            tube: 2,
            raw_mm: -3.0
        })
    );
    assert_eq!(
        calls(&dev),
        vec![
            MockCall::Inflow { tube: 1, rate: 100 },
            MockCall::EmergencyStop,
            MockCall::WaitUntilFree,
        ]
    );
    assert_eq!(dev.inflow, [0, 0]);
}

#[test]
fn successful_body_sends_no_stop() {
    let mut dev = rig();
    let level = supervise(&mut dev, Duration::from_secs(1), |d| {
        d.get_state().map(|s| s.level(1))
    })
    .unwrap();
    assert_eq!(level, Some(400.0));
    assert_eq!(calls(&dev), vec![MockCall::GetState]);
}

#[test]
fn interrupt_clears_pending_move() {
    let mut dev = rig();
    let err = supervise(&mut dev, Duration::from_secs(1), |d| -> claire_core::Result<()> {
        d.set_water_level(2, 700.0)?;
        Err(DeviceError::Cancelled.into())
    })
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DeviceError>(),
        Some(DeviceError::Cancelled)
    ));
    assert!(!dev.is_busy());
    // the aborted move never lands
    assert_eq!(dev.levels[1], 400.0);
}

#[test]
fn shutdown_stops_before_waiting() {
    let mut dev = rig();
    emergency_shutdown(&mut dev, Duration::from_millis(10)).unwrap();
    assert_eq!(
        calls(&dev),
        vec![MockCall::EmergencyStop, MockCall::WaitUntilFree]
    );
}

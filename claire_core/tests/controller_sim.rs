//! Controller against the simulated demonstrator: boot check, cache
//! freshness, busy discipline and sensor failures over the real wire format.
use std::time::Duration;

use claire_core::config::{ControllerCfg, LinkTimeouts};
use claire_core::{CancelToken, Controller, ControllerBuilder, DeviceError, TubeControl};
use claire_hardware::sim::{SimParams, SimWriter, SimulatedDevice};

fn fast_cfg() -> ControllerCfg {
    ControllerCfg {
        firmware_version: "v1.0".into(),
        max_level_mm: 900.0,
        timeouts: LinkTimeouts {
            boot_grace: Duration::ZERO,
            write_delay: Duration::ZERO,
            state: Duration::from_secs(2),
            busy_poll: Duration::from_millis(5),
            read_poll: Duration::from_millis(10),
            shutdown_wait: Duration::from_secs(1),
        },
    }
}

fn connect(dev: &SimulatedDevice) -> Controller<SimWriter> {
    let (rx, tx) = dev.split();
    ControllerBuilder::new()
        .with_source(rx)
        .with_sink(tx)
        .with_config(fast_cfg())
        .connect()
        .unwrap()
}

fn state_requests(dev: &SimulatedDevice) -> usize {
    dev.received().unwrap().iter().filter(|c| *c == "1").count()
}

fn device_err(e: &eyre::Report) -> &DeviceError {
    e.downcast_ref::<DeviceError>().expect("typed device error")
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn reads_levels_from_raw_distances() {
    let dev = SimulatedDevice::new(SimParams {
        initial_levels_mm: [400.0, 650.0],
        ..SimParams::default()
    });
    let mut ctl = connect(&dev);
    let s = ctl.get_state().unwrap();
    assert_eq!(s.level(1), Some(400.0));
    assert_eq!(s.level(2), Some(650.0));
    assert_eq!(s.channel("Stream_inflow_duty"), Some(0.0));
    ctl.close();
}

#[test]
fn fresh_cache_is_served_without_io() {
    let dev = SimulatedDevice::new(SimParams::default());
    let mut ctl = connect(&dev);
    ctl.get_state().unwrap();
    ctl.get_state().unwrap();
    assert_eq!(state_requests(&dev), 1);

    ctl.set_inflow(2, 40).unwrap();
    let s = ctl.get_state().unwrap();
    assert_eq!(state_requests(&dev), 2);
    assert_eq!(s.tube(2).unwrap().inflow_duty, 40.0);

    ctl.set_outflow(1, 10).unwrap();
    ctl.get_state().unwrap();
    ctl.make_outdated();
    ctl.get_state().unwrap();
    assert_eq!(state_requests(&dev), 4);
}

#[test]
fn duty_commands_use_actuator_layout() {
    let dev = SimulatedDevice::new(SimParams::default());
    let mut ctl = connect(&dev);
    ctl.set_inflow(1, 100).unwrap();
    ctl.set_outflow(1, 0).unwrap();
    ctl.set_inflow(2, 25).unwrap();
    ctl.set_outflow(2, 50).unwrap();
    assert_eq!(
        dev.received().unwrap(),
        vec!["4 1 100", "4 2 0", "4 3 25", "4 4 50"]
    );
}

#[test]
fn invalid_arguments_are_rejected_before_sending() {
    let dev = SimulatedDevice::new(SimParams::default());
    let mut ctl = connect(&dev);
    for err in [
        ctl.set_inflow(3, 10).unwrap_err(),
        ctl.set_outflow(1, 101).unwrap_err(),
        ctl.set_water_level(0, 100.0).unwrap_err(),
        ctl.set_water_level(1, 901.0).unwrap_err(),
        ctl.set_water_level(1, -1.0).unwrap_err(),
    ] {
        assert!(matches!(device_err(&err), DeviceError::InvalidArgument(_)));
    }
    assert!(dev.received().unwrap().is_empty());
}

#[test]
fn level_move_sets_busy_until_finished() {
    let dev = SimulatedDevice::new(SimParams {
        move_mm_per_s: 1.0,
        ..SimParams::default()
    });
    let mut ctl = connect(&dev);
    ctl.set_water_level(1, 650.0).unwrap();
    assert_eq!(dev.received().unwrap(), vec!["5 1 250"]);
    assert!(ctl.is_busy());

    let err = ctl.set_inflow(1, 50).unwrap_err();
    assert!(matches!(device_err(&err), DeviceError::ProtocolViolation(_)));
    let err = ctl.set_water_level(2, 300.0).unwrap_err();
    assert!(matches!(device_err(&err), DeviceError::ProtocolViolation(_)));
    // refused commands never reach the device
    assert_eq!(dev.received().unwrap(), vec!["5 1 250"]);

    // state requests stay allowed while moving; the move left the cache
    // outdated, so the first read is a round trip and the second is cached
    ctl.get_state().unwrap();
    assert_eq!(state_requests(&dev), 1);
    ctl.get_state().unwrap();
    assert_eq!(state_requests(&dev), 1);
    assert!(ctl.is_busy());

    dev.push_line("Finished moving tube 1").unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert!(ctl.is_busy(), "substring must not clear busy");

    dev.push_line("Finished").unwrap();
    assert!(wait_for(|| !ctl.is_busy()));
    // completion alone does not invalidate the cache
    ctl.get_state().unwrap();
    assert_eq!(state_requests(&dev), 1);
    ctl.set_inflow(1, 50).unwrap();
}

#[test]
fn level_move_invalidates_fresh_state() {
    let dev = SimulatedDevice::new(SimParams {
        move_mm_per_s: 2_000.0,
        ..SimParams::default()
    });
    let mut ctl = connect(&dev);
    ctl.get_state().unwrap();
    ctl.get_state().unwrap();
    assert_eq!(state_requests(&dev), 1);

    ctl.set_water_level(2, 500.0).unwrap();
    ctl.wait_until_free().unwrap();
    let state = ctl.get_state().unwrap();
    assert_eq!(state_requests(&dev), 2);
    assert!((state.level(2).unwrap() - 500.0).abs() < 0.11);
}

#[test]
fn wait_until_free_returns_after_move_completes() {
    let dev = SimulatedDevice::new(SimParams {
        move_mm_per_s: 2_000.0,
        ..SimParams::default()
    });
    let mut ctl = connect(&dev);
    ctl.set_water_level(2, 500.0).unwrap();
    ctl.wait_until_free().unwrap();
    assert!(!ctl.is_busy());
    let s = ctl.get_state().unwrap();
    assert_eq!(s.level(2), Some(500.0));
}

#[test]
fn emergency_stop_is_deliverable_while_busy() {
    let dev = SimulatedDevice::new(SimParams {
        move_mm_per_s: 0.5,
        ..SimParams::default()
    });
    let mut ctl = connect(&dev);
    ctl.set_water_level(1, 800.0).unwrap();
    ctl.emergency_stop().unwrap();
    assert!(ctl.wait_until_free_within(Duration::from_secs(2)).unwrap());
    assert_eq!(dev.received().unwrap(), vec!["5 1 100", "3"]);
}

#[test]
fn sensor_error_propagates_and_is_not_cached() {
    let dev = SimulatedDevice::new(SimParams::default());
    let mut ctl = connect(&dev);
    dev.inject_sensor_fault(2, 1).unwrap();
    let err = ctl.get_state().unwrap_err();
    assert!(matches!(
        device_err(&err),
        DeviceError::SensorError { tube: 2, .. }
    ));
    let s = ctl.get_state().unwrap();
    assert_eq!(s.level(2), Some(400.0));
    assert_eq!(state_requests(&dev), 2);
}

#[test]
fn wrong_firmware_fails_before_any_command() {
    let dev = SimulatedDevice::new(SimParams {
        firmware_version: "v0.9".into(),
        ..SimParams::default()
    });
    let (rx, tx) = dev.split();
    let err = Controller::connect(rx, tx, fast_cfg(), CancelToken::new())
        .err()
        .expect("connect must fail");
    match device_err(&err) {
        DeviceError::IncompatibleFirmware { expected, found } => {
            assert_eq!(expected, "v1.0");
            assert_eq!(found, "v0.9");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(dev.received().unwrap().is_empty());
}

#[test]
fn log_keeps_every_line_in_order() {
    let dev = SimulatedDevice::new(SimParams::default());
    let mut ctl = connect(&dev);
    ctl.get_state().unwrap();
    let lines = ctl.read_available();
    assert_eq!(
        &*lines[0].text,
        "Initialising CLAIRE water demonstrator v1.0"
    );
    assert!(lines.windows(2).all(|w| w[0].seq + 1 == w[1].seq));
    assert!(ctl.read_available().is_empty());
    let last = ctl.last_state_since(0).unwrap().unwrap();
    assert_eq!(last.level(1), Some(400.0));
    assert!(ctl.heartbeat_age().is_some());
}

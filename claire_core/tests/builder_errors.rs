use std::time::Duration;

use claire_core::ControllerBuilder;
use claire_core::config::{ControllerCfg, LinkTimeouts};
use claire_core::error::BuildError;
use claire_hardware::sim::{SimParams, SimReader, SimWriter, SimulatedDevice};
use rstest::rstest;

type Builder = ControllerBuilder<SimReader, SimWriter>;

#[rstest]
fn builder_missing_source_yields_typed_build_error() {
    let dev = SimulatedDevice::new(SimParams::default());
    let (_rx, tx) = dev.split();
    let err = Builder::new()
        .with_sink(tx)
        .connect()
        .err()
        .expect("should fail with MissingSource");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingSource) => {}
        other => panic!("expected MissingSource, got: {other:?}"),
    }
}

#[rstest]
fn builder_missing_sink_yields_typed_build_error() {
    let dev = SimulatedDevice::new(SimParams::default());
    let (rx, _tx) = dev.split();
    let err = Builder::new()
        .with_source(rx)
        .connect()
        .err()
        .expect("should fail with MissingSink");

    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingSink)
    ));
}

#[rstest]
#[case::zero_max_level(ControllerCfg { max_level_mm: 0.0, ..ControllerCfg::default() })]
#[case::two_token_version(ControllerCfg { firmware_version: "v 1".into(), ..ControllerCfg::default() })]
#[case::zero_state_timeout(ControllerCfg {
    timeouts: LinkTimeouts { state: Duration::ZERO, ..LinkTimeouts::default() },
    ..ControllerCfg::default()
})]
fn builder_rejects_invalid_config(#[case] cfg: ControllerCfg) {
    let dev = SimulatedDevice::new(SimParams::default());
    let (rx, tx) = dev.split();
    let err = Builder::new()
        .with_source(rx)
        .with_sink(tx)
        .with_config(cfg)
        .connect()
        .err()
        .expect("invalid config must be rejected");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(_))
    ));
    assert!(dev.received().unwrap().is_empty());
}

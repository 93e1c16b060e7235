#![no_main]
use claire_core::protocol::{LineKind, classify, try_parse_state};
use claire_core::state::DeviceState;
use claire_core::units::LevelUnits;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|line: &str| {
    let kind = classify(line);
    if let LineKind::State(raw) = &kind {
        // whatever classify accepts, the direct parser accepts too
        assert!(try_parse_state(line.trim()).is_some());
        // conversion may reject the distances but must not panic
        let _ = DeviceState::from_raw(raw, &LevelUnits::new(900.0));
    }
});

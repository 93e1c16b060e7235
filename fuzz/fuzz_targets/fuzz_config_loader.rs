#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse errors and validation errors are fine; panics are not.
    if let Ok(cfg) = toml::from_str::<claire_config::Config>(data) {
        let _ = cfg.validate();
    }
    let _ = claire_config::parse_rainfall_timeline(data);
});

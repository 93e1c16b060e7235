use std::fs;
use std::path::PathBuf;

/// Config for the simulated backend: no boot grace, fast moves.
pub const SIM_CONFIG: &str = r#"
[device]
firmware_version = "v1.0"
max_level_mm = 900.0

[timeouts]
boot_grace_ms = 0
write_delay_ms = 0
state_ms = 2000
busy_poll_ms = 5
read_poll_ms = 10
shutdown_wait_ms = 1000

[sim]
# 50x faster physics so flows finish in well under a second
speedup = 50.0
move_mm_per_s = 10.0
initial_levels_mm = [400.0, 650.0]

[calibration]
duty_levels = [100]
repeats = 1
tubes = [1]
low_level_mm = 390.0
high_level_mm = 410.0

[rainfall]
tube = 1
duration_min = 1.0
time_scale = 60.0
cycle_s = 60.0
min_on_s = 0.0
poll_ms = 10
lead_in_minutes = 0

[trace]
samples = 3
start_level_mm = 500.0
"#;

pub fn write_config(dir: &tempfile::TempDir, extra: &str) -> PathBuf {
    let path = dir.path().join("claire.toml");
    fs::write(&path, format!("{SIM_CONFIG}\n{extra}")).unwrap();
    path
}

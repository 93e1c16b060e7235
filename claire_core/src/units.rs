//! Conversion between sonar distances and water levels.
//!
//! The sonar sits above the tube and reports the distance to the water
//! surface, so `level = max_level - distance`.
use crate::error::DeviceError;
use crate::util::round1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelUnits {
    pub max_level_mm: f64,
}

impl LevelUnits {
    pub fn new(max_level_mm: f64) -> Self {
        Self { max_level_mm }
    }

    /// Raw distance to water level, rounded to 0.1 mm.
    ///
    /// A negative distance is how the firmware reports a failed echo and is
    /// surfaced as `SensorError`. Distances past the tube bottom clamp to 0.
    pub fn distance_to_level(&self, tube: u8, distance_mm: f64) -> Result<f64, DeviceError> {
        if distance_mm < 0.0 || distance_mm.is_nan() {
            return Err(DeviceError::SensorError {
                tube,
                raw_mm: distance_mm,
            });
        }
        Ok(round1((self.max_level_mm - distance_mm).max(0.0)))
    }

    /// Water level to the distance the firmware expects in a move command.
    pub fn level_to_distance(&self, level_mm: f64) -> f64 {
        round1(self.max_level_mm - level_mm)
    }

    pub fn level_in_range(&self, level_mm: f64) -> bool {
        (0.0..=self.max_level_mm).contains(&level_mm)
    }
}

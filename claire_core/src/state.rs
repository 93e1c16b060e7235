//! Typed device state in physical units.
use std::collections::BTreeMap;

use crate::error::DeviceError;
use crate::protocol::{FieldValue, RawState};
use crate::units::LevelUnits;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TubeState {
    /// Water level in millimetres, never negative.
    pub level_mm: f64,
    /// Inflow duty in percent.
    pub inflow_duty: f64,
    /// Outflow duty in percent.
    pub outflow_duty: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceState {
    pub tubes: [TubeState; 2],
    pub aux: BTreeMap<String, FieldValue>,
}

impl DeviceState {
    /// Convert a raw dump; fails with `SensorError` on a negative distance.
    pub fn from_raw(raw: &RawState, units: &LevelUnits) -> Result<Self, DeviceError> {
        let mut tubes = [TubeState::default(); 2];
        for (i, tube) in tubes.iter_mut().enumerate() {
            let number = i as u8 + 1;
            *tube = TubeState {
                level_mm: units.distance_to_level(number, raw.distance_mm[i])?,
                inflow_duty: raw.inflow_duty[i],
                outflow_duty: raw.outflow_duty[i],
            };
        }
        Ok(Self {
            tubes,
            aux: raw.aux.clone(),
        })
    }

    /// State of tube 1 or 2.
    pub fn tube(&self, tube: u8) -> Option<&TubeState> {
        match tube {
            1 | 2 => self.tubes.get(usize::from(tube - 1)),
            _ => None,
        }
    }

    pub fn level(&self, tube: u8) -> Option<f64> {
        self.tube(tube).map(|t| t.level_mm)
    }

    /// Numeric auxiliary channel by name, e.g. `Stream_inflow_duty`.
    pub fn channel(&self, name: &str) -> Option<f64> {
        self.aux.get(name).and_then(FieldValue::as_f64)
    }
}

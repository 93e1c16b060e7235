//! Small numeric helpers shared by the controller and loops.

/// Round to one decimal place (0.1 mm resolution of the level readout).
#[inline]
pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Valid tube numbers are 1 and 2.
#[inline]
pub fn is_valid_tube(tube: u8) -> bool {
    (1..=2).contains(&tube)
}

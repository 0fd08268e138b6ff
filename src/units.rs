//! Distance ↔ delay conversion for optical delay lines.
//!
//! Delay-line positions are configured in millimetres; time-domain traces are
//! usually plotted in picoseconds. The conversion is the single linear constant
//! `c` expressed in mm/ps.

/// Speed of light in mm/ps (~0.3 mm/ps).
pub const SPEED_OF_LIGHT_MM_PER_PS: f64 = 299_792_458e3 / 1e12;

/// Convert an optical path length in mm to a delay in ps.
pub fn mm_to_ps(distance_mm: f64) -> f64 {
    distance_mm / SPEED_OF_LIGHT_MM_PER_PS
}

/// Convert a delay in ps to an optical path length in mm.
pub fn ps_to_mm(delay_ps: f64) -> f64 {
    delay_ps * SPEED_OF_LIGHT_MM_PER_PS
}

//! Rounding raw readings to what the instrument display would show.

use crate::models::{MeasurementRange, Resolution};

/// Full scale used for a value under the configured range.
///
/// Autoranging picks the smallest fixed range covering the magnitude, falling
/// back to the largest range when the value is over every full scale.
pub fn effective_range(range: MeasurementRange, value: f64) -> f64 {
    if let Some(fs) = range.full_scale() {
        return fs;
    }
    let magnitude = value.abs();
    MeasurementRange::FIXED
        .iter()
        .filter_map(|r| r.full_scale())
        .find(|fs| magnitude <= *fs)
        .unwrap_or(1000.0)
}

/// Decimal places shown at the given resolution on the given full scale.
///
/// A 6.5 digit meter shows `10.00000` on the 10 range and `1.000000` on the
/// 1 range: the half digit is the leading overrange digit.
pub fn decimals(resolution: Resolution, full_scale: f64) -> u32 {
    // Nudge so exact powers of ten never land just below the integer.
    let magnitude = (full_scale.log10() + 1e-9).floor() as i64;
    let places = i64::from(resolution.full_digits()) - magnitude;
    places.max(0) as u32
}

/// Round a raw reading to the display resolution.
pub fn quantize(value: f64, range: MeasurementRange, resolution: Resolution) -> (f64, f64) {
    let full_scale = effective_range(range, value);
    let factor = 10f64.powi(decimals(resolution, full_scale) as i32);
    ((value * factor).round() / factor, full_scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_range_auto() {
        assert_eq!(effective_range(MeasurementRange::Auto, 0.05), 0.1);
        assert_eq!(effective_range(MeasurementRange::Auto, 4.2), 10.0);
        assert_eq!(effective_range(MeasurementRange::Auto, -0.7), 1.0);
        assert_eq!(effective_range(MeasurementRange::Auto, 5000.0), 1000.0);
        assert_eq!(effective_range(MeasurementRange::Fixed100, 4.2), 100.0);
    }

    #[test]
    fn test_decimals_follow_display() {
        assert_eq!(decimals(Resolution::Digits6_5, 10.0), 5);
        assert_eq!(decimals(Resolution::Digits6_5, 1.0), 6);
        assert_eq!(decimals(Resolution::Digits6_5, 0.1), 7);
        assert_eq!(decimals(Resolution::Digits4_5, 1000.0), 1);
        assert_eq!(decimals(Resolution::Digits7_5, 100.0), 5);
    }

    #[test]
    fn test_quantize_rounds() {
        let (value, fs) = quantize(
            3.14159265,
            MeasurementRange::Fixed10,
            Resolution::Digits4_5,
        );
        assert_eq!(fs, 10.0);
        assert!((value - 3.142).abs() < 1e-12);

        let (value, fs) = quantize(0.0123456789, MeasurementRange::Auto, Resolution::Digits5_5);
        assert_eq!(fs, 0.1);
        assert!((value - 0.012346).abs() < 1e-12);
    }
}

//! Soil-moisture ADC calibration
//!
//! Capacitive probes read high when dry and low when wet. The two calibration
//! points map linearly onto 0..100 %.

use serde::{Deserialize, Serialize};

/// Largest value a 10-bit ADC channel reports
pub const ADC_MAX: u16 = 1023;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoilCalibration {
    /// Raw reading in dry air
    #[serde(default = "default_dry_value")]
    pub dry_value: u16,
    /// Raw reading submerged in water
    #[serde(default = "default_wet_value")]
    pub wet_value: u16,
}

fn default_dry_value() -> u16 {
    ADC_MAX
}

fn default_wet_value() -> u16 {
    300
}

impl Default for SoilCalibration {
    fn default() -> Self {
        Self {
            dry_value: default_dry_value(),
            wet_value: default_wet_value(),
        }
    }
}

impl SoilCalibration {
    /// Convert a raw ADC value to moisture percent, clamped to 0..=100.
    /// A degenerate calibration (dry == wet) reports 50 %.
    pub fn raw_to_percent(&self, raw: u16) -> f64 {
        if self.dry_value == self.wet_value {
            return 50.0;
        }
        let dry = f64::from(self.dry_value);
        let wet = f64::from(self.wet_value);
        let percent = (dry - f64::from(raw)) / (dry - wet) * 100.0;
        percent.clamp(0.0, 100.0)
    }

    /// Inverse of [`raw_to_percent`](Self::raw_to_percent), rounded to the nearest ADC step
    pub fn percent_to_raw(&self, percent: f64) -> u16 {
        let dry = f64::from(self.dry_value);
        let wet = f64::from(self.wet_value);
        let raw = dry - (percent.clamp(0.0, 100.0) / 100.0) * (dry - wet);
        raw.round().clamp(0.0, f64::from(ADC_MAX)) as u16
    }

    pub fn is_raw_in_range(raw: u16) -> bool {
        raw <= ADC_MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_endpoints() {
        let cal = SoilCalibration::default();
        assert_eq!(cal.raw_to_percent(1023), 0.0);
        assert_eq!(cal.raw_to_percent(300), 100.0);
    }

    #[test]
    fn test_calibration_clamps_outside_points() {
        let cal = SoilCalibration::default();
        assert_eq!(cal.raw_to_percent(100), 100.0);

        let cal = SoilCalibration {
            dry_value: 900,
            wet_value: 300,
        };
        assert_eq!(cal.raw_to_percent(1000), 0.0);
    }

    #[test]
    fn test_degenerate_calibration_reports_midpoint() {
        let cal = SoilCalibration {
            dry_value: 500,
            wet_value: 500,
        };
        assert_eq!(cal.raw_to_percent(123), 50.0);
    }

    #[test]
    fn test_percent_to_raw_inverts_within_one_step() {
        let cal = SoilCalibration::default();
        let raw = cal.percent_to_raw(45.0);
        let back = cal.raw_to_percent(raw);
        assert!((back - 45.0).abs() < 0.2, "got {back}");
    }
}

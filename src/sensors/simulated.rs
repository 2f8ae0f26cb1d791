//! Simulated reading source for running without hardware

use super::calibration::SoilCalibration;
use super::{MetricKind, Reading, ReadingSource};
use crate::config::SimulationSection;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Generates uniformly distributed readings within configured ranges
pub struct SimulatedSource {
    temperature_range: (f64, f64),
    humidity_range: (f64, f64),
    soil_moisture_range: (f64, f64),
    failure_rate: f64,
    calibration: SoilCalibration,
    rng: StdRng,
}

impl SimulatedSource {
    pub fn new(settings: &SimulationSection, calibration: SoilCalibration) -> Self {
        Self::with_rng(settings, calibration, StdRng::from_entropy())
    }

    /// Deterministic source for tests and reproducible demos
    pub fn with_seed(settings: &SimulationSection, calibration: SoilCalibration, seed: u64) -> Self {
        Self::with_rng(settings, calibration, StdRng::seed_from_u64(seed))
    }

    fn with_rng(settings: &SimulationSection, calibration: SoilCalibration, rng: StdRng) -> Self {
        Self {
            temperature_range: settings.temperature_range.into(),
            humidity_range: settings.humidity_range.into(),
            soil_moisture_range: settings.soil_moisture_range.into(),
            failure_rate: settings.failure_rate,
            calibration,
            rng,
        }
    }

    fn sample_range(&mut self, (low, high): (f64, f64)) -> f64 {
        let value = if low < high {
            self.rng.gen_range(low..=high)
        } else {
            low
        };
        round_tenths(value)
    }

    /// Soil values go through the ADC calibration round trip, the same
    /// quantization a real probe reading would see.
    fn sample_soil(&mut self) -> f64 {
        let target = self.sample_range(self.soil_moisture_range);
        let raw = self.calibration.percent_to_raw(target);
        debug!(raw, target, "simulated soil ADC value");
        round_tenths(self.calibration.raw_to_percent(raw))
    }
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl ReadingSource for SimulatedSource {
    fn metrics(&self) -> Vec<MetricKind> {
        MetricKind::ALL.to_vec()
    }

    fn read(&mut self, metric: MetricKind) -> Reading {
        if self.failure_rate > 0.0 && self.rng.gen_bool(self.failure_rate.min(1.0)) {
            return Reading::failed(metric, "simulated read failure");
        }

        let value = match metric {
            MetricKind::Temperature => self.sample_range(self.temperature_range),
            MetricKind::Humidity => self.sample_range(self.humidity_range),
            MetricKind::SoilMoisture => self.sample_soil(),
        };
        Reading::new(metric, value)
    }

    fn sensor_names(&self) -> Vec<String> {
        vec!["dht22".to_string(), "soil_moisture".to_string()]
    }
}

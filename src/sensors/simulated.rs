//! Simulated sensor for bench runs without hardware.

use super::SampledSensor;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::RangeInclusive;

/// Produces readings scattered around a baseline, occasionally dropping one.
pub struct SimulatedSensor {
    baseline: f64,
    noise: f64,
    /// Probability in [0, 1] that a sample yields no value.
    dropout: f64,
    range: RangeInclusive<f64>,
    rng: StdRng,
}

impl SimulatedSensor {
    /// Non-finite noise and dropout are treated as zero.
    pub fn new(baseline: f64, noise: f64, dropout: f64) -> Self {
        let finite_or_zero = |v: f64| if v.is_finite() { v } else { 0.0 };
        Self {
            baseline,
            noise: finite_or_zero(noise).abs(),
            dropout: finite_or_zero(dropout).clamp(0.0, 1.0),
            range: f64::MIN..=f64::MAX,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_range(mut self, range: RangeInclusive<f64>) -> Self {
        self.range = range;
        self
    }
}

#[async_trait]
impl SampledSensor for SimulatedSensor {
    async fn sample(&mut self) -> Option<f64> {
        if self.dropout > 0.0 && self.rng.gen_bool(self.dropout) {
            return None;
        }
        if self.noise > 0.0 {
            Some(self.baseline + self.rng.gen_range(-self.noise..=self.noise))
        } else {
            Some(self.baseline)
        }
    }

    fn valid_range(&self) -> RangeInclusive<f64> {
        self.range.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noiseless_sensor_returns_baseline() {
        let mut sensor = SimulatedSensor::new(21.5, 0.0, 0.0);
        for _ in 0..5 {
            assert_eq!(sensor.sample().await, Some(21.5));
        }
    }

    #[tokio::test]
    async fn test_noise_stays_within_bounds() {
        let mut sensor = SimulatedSensor::new(50.0, 2.0, 0.0);
        for _ in 0..100 {
            let value = sensor.sample().await.unwrap();
            assert!((48.0..=52.0).contains(&value));
        }
    }

    #[tokio::test]
    async fn test_non_finite_parameters_do_not_panic() {
        let mut sensor = SimulatedSensor::new(20.0, f64::INFINITY, f64::NAN);
        assert_eq!(sensor.sample().await, Some(20.0));

        let mut sensor = SimulatedSensor::new(20.0, f64::NAN, f64::INFINITY);
        assert_eq!(sensor.sample().await, Some(20.0));
    }

    #[tokio::test]
    async fn test_full_dropout_never_yields() {
        let mut sensor = SimulatedSensor::new(50.0, 2.0, 1.0);
        for _ in 0..10 {
            assert_eq!(sensor.sample().await, None);
        }
    }
}

//! Sensor backed by a numeric attribute file.
//!
//! Covers the Linux sysfs interfaces exposed by kernel drivers, e.g. the
//! w1 `temperature` attribute (millidegrees) or IIO `in_humidityrelative_input`.

use super::SampledSensor;
use async_trait::async_trait;
use log::debug;
use std::ops::RangeInclusive;
use std::path::PathBuf;

pub struct FileSensor {
    path: PathBuf,
    scale: f64,
    range: RangeInclusive<f64>,
}

impl FileSensor {
    pub fn new(path: impl Into<PathBuf>, scale: f64) -> Self {
        Self {
            path: path.into(),
            scale,
            range: f64::MIN..=f64::MAX,
        }
    }

    pub fn with_range(mut self, range: RangeInclusive<f64>) -> Self {
        self.range = range;
        self
    }
}

#[async_trait]
impl SampledSensor for FileSensor {
    async fn sample(&mut self) -> Option<f64> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Failed to read {}: {}", self.path.display(), e);
                return None;
            }
        };
        match raw.trim().parse::<f64>() {
            Ok(value) => Some(value * self.scale),
            Err(e) => {
                debug!("Unparseable reading in {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn valid_range(&self) -> RangeInclusive<f64> {
        self.range.clone()
    }
}

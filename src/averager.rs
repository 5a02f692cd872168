//! Multi-sample averaging.
//!
//! Averages always divide by the configured sample count. A sample that is
//! missing, non-finite or outside the sensor's valid range contributes zero
//! to the sum but still counts in the divisor, so sensor dropout pulls the
//! average towards zero instead of being reported as "no data".

use crate::sensors::SampledSensor;
use log::debug;
use std::time::Duration;

/// Take `count` readings from `sensor`, sleeping `spacing` between
/// consecutive reads, and return their zero-filled mean.
///
/// The result is always finite. `count == 0` yields `0.0`.
pub async fn sample_average<S>(sensor: &mut S, count: usize, spacing: Duration) -> f64
where
    S: SampledSensor + ?Sized,
{
    if count == 0 {
        return 0.0;
    }

    let range = sensor.valid_range();
    let mut sum = 0.0;
    let mut invalid = 0usize;

    for i in 0..count {
        if i > 0 && !spacing.is_zero() {
            tokio::time::sleep(spacing).await;
        }
        match sensor.sample().await {
            Some(value) if value.is_finite() && range.contains(&value) => sum += value,
            other => {
                debug!("[Telemetry] Sample {}/{} invalid: {:?}", i + 1, count, other);
                invalid += 1;
            }
        }
    }

    if invalid > 0 {
        debug!(
            "[Telemetry] {} of {} samples invalid, counted as zero",
            invalid, count
        );
    }

    let mean = sum / count as f64;
    if mean.is_finite() { mean } else { 0.0 }
}

/// Encode a reading for transport: fixed point, two fractional digits.
pub fn format_reading(value: f64) -> String {
    let formatted = format!("{:.2}", value);
    // Values that round to zero from below would otherwise print as "-0.00".
    if formatted == "-0.00" {
        "0.00".to_string()
    } else {
        formatted
    }
}

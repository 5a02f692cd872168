//! Sample sources for the telemetry loop.
//!
//! Driver access stays behind [`SampledSensor`]: the loop only asks for one
//! sample at a time and gets a number or nothing back. Host adapters are
//! provided for sysfs-style attribute files and for simulated bench runs.

mod file;
mod simulated;

pub use file::FileSensor;
pub use simulated::SimulatedSensor;

use crate::channel::{Channel, GroupId};
use crate::config::{SamplingConfig, SensorSource, SensorsConfig};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use std::ops::RangeInclusive;
use std::time::Duration;
use strum::IntoEnumIterator;

/// One physical reading source.
#[async_trait]
pub trait SampledSensor: Send {
    /// Take one reading. `None` means the driver produced no value.
    async fn sample(&mut self) -> Option<f64>;

    /// Readings outside this range are invalid.
    fn valid_range(&self) -> RangeInclusive<f64> {
        f64::MIN..=f64::MAX
    }
}

#[async_trait]
impl SampledSensor for Box<dyn SampledSensor> {
    async fn sample(&mut self) -> Option<f64> {
        (**self).sample().await
    }

    fn valid_range(&self) -> RangeInclusive<f64> {
        (**self).valid_range()
    }
}

/// A sensor bound to the channel it feeds.
pub struct ChannelSensor {
    pub channel: Channel,
    pub sensor: Box<dyn SampledSensor>,
}

/// A logical sensor unit and its sampling parameters.
///
/// Channels are sampled in the order they were added.
pub struct SensorGroup {
    id: GroupId,
    samples: usize,
    spacing: Duration,
    channels: Vec<ChannelSensor>,
}

impl SensorGroup {
    pub fn new(id: GroupId, samples: usize, spacing: Duration) -> Self {
        Self {
            id,
            samples,
            spacing,
            channels: Vec::new(),
        }
    }

    /// Attach a sensor for one of this group's channels.
    pub fn with_channel(
        mut self,
        channel: Channel,
        sensor: impl SampledSensor + 'static,
    ) -> Result<Self> {
        if channel.group() != self.id {
            return Err(AgentError::InvalidConfig(format!(
                "channel {} does not belong to group {}",
                channel, self.id
            )));
        }
        if self.channels.iter().any(|c| c.channel == channel) {
            return Err(AgentError::InvalidConfig(format!(
                "channel {} attached twice",
                channel
            )));
        }
        self.channels.push(ChannelSensor {
            channel,
            sensor: Box::new(sensor),
        });
        Ok(self)
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut ChannelSensor> {
        self.channels.iter_mut()
    }
}

/// Build the host adapter for one channel.
pub fn sensor_for(channel: Channel, source: &SensorSource) -> Box<dyn SampledSensor> {
    let range = channel.valid_range();
    match source {
        SensorSource::Simulated {
            baseline,
            noise,
            dropout,
        } => Box::new(SimulatedSensor::new(*baseline, *noise, *dropout).with_range(range)),
        SensorSource::File { path, scale } => {
            Box::new(FileSensor::new(path.clone(), *scale).with_range(range))
        }
    }
}

/// Build every sensor group from configuration, in sampling order.
pub fn build_groups(sampling: &SamplingConfig, sensors: &SensorsConfig) -> Result<Vec<SensorGroup>> {
    let mut groups = Vec::new();
    for id in GroupId::iter() {
        let spacing_ms = match id {
            GroupId::Ultrasonic => sampling.ultrasonic_spacing_ms,
            GroupId::DhtSite1 | GroupId::DhtSite2 => sampling.dht_spacing_ms,
            GroupId::OneWire => sampling.probe_spacing_ms,
        };
        let mut group = SensorGroup::new(id, sampling.samples, Duration::from_millis(spacing_ms));
        for channel in Channel::iter().filter(|c| c.group() == id) {
            group = group.with_channel(channel, sensor_for(channel, sensors.source(channel)))?;
        }
        log::debug!(
            "[Telemetry] Group {} with {} channel(s), {} samples every {}ms",
            id,
            group.channels.len(),
            group.samples,
            spacing_ms
        );
        groups.push(group);
    }
    Ok(groups)
}

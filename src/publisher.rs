use crate::averager::format_reading;
use crate::channel::{Channel, TopicScheme};
use crate::error::Result;
use crate::session::{NetworkLink, SessionManager, Transport};
use log::debug;

/// One averaged reading ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub topic: String,
    pub value: String,
}

/// Publishes averaged readings on their channel topics.
pub struct TelemetryPublisher {
    topics: TopicScheme,
}

impl TelemetryPublisher {
    pub fn new(topics: TopicScheme) -> Self {
        Self { topics }
    }

    pub fn measurement(&self, channel: Channel, value: f64) -> Measurement {
        Measurement {
            topic: self.topics.topic(channel),
            value: format_reading(value),
        }
    }

    /// Publish one reading. Failures are returned to the caller unretried.
    pub async fn publish_measurement<T: Transport, L: NetworkLink>(
        &self,
        session: &mut SessionManager<T, L>,
        channel: Channel,
        value: f64,
    ) -> Result<Measurement> {
        let measurement = self.measurement(channel, value);
        session
            .publish(&measurement.topic, measurement.value.as_bytes())
            .await?;
        debug!(
            "[Telemetry] Published {} = {} on {}",
            channel, measurement.value, measurement.topic
        );
        Ok(measurement)
    }
}

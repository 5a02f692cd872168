//! The control loop.
//!
//! Every iteration runs in a fixed order: session check, inbound commands,
//! then each sensor group in declared order. Nothing runs concurrently; all
//! waits are awaited inline on the one task driving the loop.

use crate::actuator::Actuator;
use crate::averager::sample_average;
use crate::command::CommandDispatcher;
use crate::config::SamplingConfig;
use crate::publisher::TelemetryPublisher;
use crate::sensors::SensorGroup;
use crate::session::{NetworkLink, SessionManager, Transport};
use log::{debug, info, warn};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Wait after each sensor group.
    pub group: Duration,
    /// Extra wait at the end of every iteration.
    pub cycle: Duration,
}

impl From<&SamplingConfig> for Pacing {
    fn from(config: &SamplingConfig) -> Self {
        Self {
            group: Duration::from_millis(config.group_pacing_ms),
            cycle: Duration::from_millis(config.cycle_pacing_ms),
        }
    }
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationReport {
    pub commands: usize,
    pub published: usize,
    pub skipped: usize,
}

pub struct TelemetryLoop<T, L, A> {
    phase: LoopPhase,
    session: SessionManager<T, L>,
    dispatcher: CommandDispatcher<A>,
    publisher: TelemetryPublisher,
    groups: Vec<SensorGroup>,
    pacing: Pacing,
}

impl<T: Transport, L: NetworkLink, A: Actuator> TelemetryLoop<T, L, A> {
    /// Groups are sampled in [`GroupId`](crate::channel::GroupId) order
    /// regardless of the order given here.
    pub fn new(
        session: SessionManager<T, L>,
        dispatcher: CommandDispatcher<A>,
        publisher: TelemetryPublisher,
        mut groups: Vec<SensorGroup>,
        pacing: Pacing,
    ) -> Self {
        groups.sort_by_key(|g| g.id());
        Self {
            phase: LoopPhase::Idle,
            session,
            dispatcher,
            publisher,
            groups,
            pacing,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn session(&self) -> &SessionManager<T, L> {
        &self.session
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<A> {
        &self.dispatcher
    }

    /// Run forever.
    pub async fn run(&mut self) {
        loop {
            self.run_iteration().await;
        }
    }

    /// Run exactly one iteration.
    pub async fn run_iteration(&mut self) -> IterationReport {
        if self.phase == LoopPhase::Idle {
            info!("[Telemetry] Starting telemetry loop");
            self.phase = LoopPhase::Running;
        }

        let mut report = IterationReport::default();

        self.session.ensure_connected().await;
        report.commands = self.session.pump_inbound(&mut self.dispatcher).await;

        for group in &mut self.groups {
            let samples = group.samples();
            let spacing = group.spacing();
            let group_id = group.id();

            for entry in group.channels_mut() {
                let value = sample_average(&mut entry.sensor, samples, spacing).await;
                match self
                    .publisher
                    .publish_measurement(&mut self.session, entry.channel, value)
                    .await
                {
                    Ok(measurement) => {
                        info!(
                            "[Telemetry] Average {}: {}",
                            entry.channel, measurement.value
                        );
                        report.published += 1;
                    }
                    Err(e) => {
                        warn!(
                            "[Telemetry] Skipped {} ({}): {}",
                            entry.channel, group_id, e
                        );
                        report.skipped += 1;
                    }
                }
            }

            tokio::time::sleep(self.pacing.group).await;
        }

        tokio::time::sleep(self.pacing.cycle).await;
        debug!("[Telemetry] Iteration done: {:?}", report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::ActuatorState;
    use crate::channel::{Channel, GroupId, TopicScheme};
    use crate::session::{InboundMessage, SessionState, SessionTiming};
    use crate::testing::{FakeLink, FakeTransport, RecordingActuator, ScriptedSensor, params};
    use tokio::time::Instant;

    type TestLoop = TelemetryLoop<FakeTransport, FakeLink, RecordingActuator>;

    fn topics() -> TopicScheme {
        TopicScheme::new("EIE_SEDE1", "EIE_SEDE2")
    }

    fn pacing() -> Pacing {
        Pacing {
            group: Duration::from_millis(50),
            cycle: Duration::from_millis(200),
        }
    }

    fn steady(value: f64) -> ScriptedSensor {
        ScriptedSensor::repeating(Some(value))
    }

    fn groups() -> Vec<SensorGroup> {
        let spacing = Duration::from_millis(50);
        vec![
            // Deliberately out of order; the loop sorts them.
            SensorGroup::new(GroupId::OneWire, 10, Duration::ZERO)
                .with_channel(Channel::ProbeTemperature, steady(22.0))
                .unwrap(),
            SensorGroup::new(GroupId::Ultrasonic, 10, spacing)
                .with_channel(
                    Channel::Distance,
                    ScriptedSensor::new([
                        Some(20.0),
                        None,
                        Some(22.0),
                        None,
                        Some(21.0),
                        None,
                        None,
                        None,
                        None,
                        None,
                    ]),
                )
                .unwrap(),
            SensorGroup::new(GroupId::DhtSite1, 10, spacing)
                .with_channel(Channel::Site1Temperature, steady(24.0))
                .unwrap()
                .with_channel(Channel::Site1Humidity, steady(55.0))
                .unwrap(),
            SensorGroup::new(GroupId::DhtSite2, 10, spacing)
                .with_channel(Channel::Site2Temperature, steady(23.0))
                .unwrap()
                .with_channel(Channel::Site2Humidity, steady(60.5))
                .unwrap(),
        ]
    }

    fn telemetry(transport: FakeTransport) -> TestLoop {
        let session = SessionManager::new(
            transport,
            FakeLink::joined_after(0),
            params(),
            SessionTiming {
                join_poll: Duration::from_millis(500),
                reconnect_delay: Duration::from_secs(5),
                write_timeout: Duration::from_secs(5),
            },
            topics(),
        );
        let dispatcher = CommandDispatcher::new(
            topics().command_topic(),
            Duration::from_secs(5),
            RecordingActuator::default(),
        );
        TelemetryLoop::new(
            session,
            dispatcher,
            TelemetryPublisher::new(topics()),
            groups(),
            pacing(),
        )
    }

    fn measurements(telemetry: &TestLoop) -> Vec<(String, String)> {
        telemetry
            .session()
            .transport()
            .published
            .iter()
            .skip(8) // announcements
            .map(|p| (p.topic.clone(), p.payload.clone()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_iteration_enters_running() {
        let mut telemetry = telemetry(FakeTransport::default());
        assert_eq!(telemetry.phase(), LoopPhase::Idle);

        telemetry.run_iteration().await;
        assert_eq!(telemetry.phase(), LoopPhase::Running);
        assert_eq!(telemetry.session().state(), SessionState::SessionReady);
    }

    #[tokio::test(start_paused = true)]
    async fn test_iteration_publishes_every_channel_in_order() {
        let mut telemetry = telemetry(FakeTransport::default());
        let report = telemetry.run_iteration().await;

        assert_eq!(
            report,
            IterationReport {
                commands: 0,
                published: 6,
                skipped: 0
            }
        );
        let expected = [
            ("EIE_SEDE1_http/numeric", "6.30"),
            ("EIE_SEDE1_http/temp", "24.00"),
            ("EIE_SEDE1_http/humidity", "55.00"),
            ("EIE_SEDE2_http/temp", "23.00"),
            ("EIE_SEDE2_http/humidity", "60.50"),
            ("EIE_SEDE1_modbus/1/holding/0", "22.00"),
        ];
        let expected: Vec<(String, String)> = expected
            .iter()
            .map(|(t, v)| (t.to_string(), v.to_string()))
            .collect();
        assert_eq!(measurements(&telemetry), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_iteration_timing() {
        let mut telemetry = telemetry(FakeTransport::default());
        let start = Instant::now();
        telemetry.run_iteration().await;

        // 5 spaced channels x 9 gaps x 50ms, 4 x 50ms group pacing, 200ms cycle pacing
        let expected = Duration::from_millis(5 * 9 * 50 + 4 * 50 + 200);
        assert_eq!(start.elapsed(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_are_processed_before_sampling() {
        let mut transport = FakeTransport::default();
        transport.queue_tick(vec![InboundMessage::new("EIE_SEDE1_modbus/1/coil/0", "false")]);
        transport.queue_tick(vec![InboundMessage::new("EIE_SEDE1_modbus/1/coil/0", "true")]);
        let mut telemetry = telemetry(transport);

        let start = Instant::now();
        let report = telemetry.run_iteration().await;
        assert_eq!(report.commands, 1);

        let transport = telemetry.session().transport();
        let first_measurement = &transport.published[8];
        let (state, applied_at) = telemetry.dispatcher().actuator().applied[0];
        assert_eq!(state, ActuatorState::Inactive);
        assert_eq!(applied_at - start, Duration::from_secs(5));
        assert!(first_measurement.at >= applied_at);

        let report = telemetry.run_iteration().await;
        assert_eq!(report.commands, 1);
        assert_eq!(telemetry.dispatcher().state(), ActuatorState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_skips_rest_and_next_iteration_reconnects() {
        let mut transport = FakeTransport::default();
        // Eight announcements succeed, then the first measurement fails
        transport.fail_publish_at = Some(8);
        let mut telemetry = telemetry(transport);

        let report = telemetry.run_iteration().await;
        assert_eq!(report.published, 0);
        assert_eq!(report.skipped, 6);
        assert_eq!(
            telemetry.session().state(),
            SessionState::SessionHandshaking
        );
        // Only the failed attempt reached the transport
        assert_eq!(telemetry.session().transport().publish_attempts, 9);

        let report = telemetry.run_iteration().await;
        assert_eq!(report.published, 6);
        assert_eq!(telemetry.session().transport().connect_calls, 2);
        assert_eq!(telemetry.session().link().join_calls, 1);
    }
}

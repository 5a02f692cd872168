//! Inbound actuator commands.
//!
//! The command topic carries exactly two literal payloads, `true` and
//! `false`. Everything else is logged and dropped without touching the
//! actuator.

use crate::actuator::{Actuator, ActuatorState};
use crate::session::InboundMessage;
use log::{info, warn};
use std::time::Duration;

/// What a delivered message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Activated,
    /// Applied after the hold delay elapsed.
    Deactivated,
    Ignored,
}

/// Owns the actuator state and applies recognized commands to it.
pub struct CommandDispatcher<A> {
    command_topic: String,
    /// Synchronous hold before an inactive command is applied.
    hold: Duration,
    state: ActuatorState,
    actuator: A,
}

impl<A: Actuator> CommandDispatcher<A> {
    pub fn new(command_topic: impl Into<String>, hold: Duration, actuator: A) -> Self {
        Self {
            command_topic: command_topic.into(),
            hold,
            state: ActuatorState::Inactive,
            actuator,
        }
    }

    pub fn state(&self) -> ActuatorState {
        self.state
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Handle one delivered message.
    ///
    /// A `false` command awaits the full hold before it returns; the caller
    /// dispatches nothing else in the meantime.
    pub async fn handle(&mut self, message: &InboundMessage) -> CommandOutcome {
        info!(
            "[Command] Message on {}: {}",
            message.topic,
            String::from_utf8_lossy(&message.payload)
        );

        if message.topic != self.command_topic {
            warn!("[Command] Not a command topic, ignoring");
            return CommandOutcome::Ignored;
        }

        match std::str::from_utf8(&message.payload) {
            Ok("true") => {
                self.set(ActuatorState::Active);
                info!("[Command] Actuator active");
                CommandOutcome::Activated
            }
            Ok("false") => {
                tokio::time::sleep(self.hold).await;
                self.set(ActuatorState::Inactive);
                info!("[Command] Actuator inactive after {:?} hold", self.hold);
                CommandOutcome::Deactivated
            }
            Ok(_) => {
                warn!("[Command] Unrecognized payload (neither 'true' nor 'false')");
                CommandOutcome::Ignored
            }
            Err(e) => {
                warn!("[Command] Payload is not UTF-8: {}", e);
                CommandOutcome::Ignored
            }
        }
    }

    fn set(&mut self, state: ActuatorState) {
        self.state = state;
        self.actuator.apply(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingActuator;
    use tokio::time::Instant;

    const TOPIC: &str = "EIE_SEDE1_modbus/1/coil/0";
    const HOLD: Duration = Duration::from_secs(5);

    fn dispatcher() -> CommandDispatcher<RecordingActuator> {
        CommandDispatcher::new(TOPIC, HOLD, RecordingActuator::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_true_activates_without_delay() {
        let mut dispatcher = dispatcher();
        let start = Instant::now();

        let outcome = dispatcher.handle(&InboundMessage::new(TOPIC, "true")).await;

        assert_eq!(outcome, CommandOutcome::Activated);
        assert_eq!(dispatcher.state(), ActuatorState::Active);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(dispatcher.actuator().applied.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_false_applies_after_hold() {
        let mut dispatcher = dispatcher();
        dispatcher.handle(&InboundMessage::new(TOPIC, "true")).await;

        let start = Instant::now();
        let outcome = dispatcher.handle(&InboundMessage::new(TOPIC, "false")).await;

        assert_eq!(outcome, CommandOutcome::Deactivated);
        assert_eq!(dispatcher.state(), ActuatorState::Inactive);
        assert_eq!(start.elapsed(), HOLD);

        let (state, at) = dispatcher.actuator().applied[1];
        assert_eq!(state, ActuatorState::Inactive);
        assert_eq!(at - start, HOLD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_payloads_are_ignored() {
        let mut dispatcher = dispatcher();
        dispatcher.handle(&InboundMessage::new(TOPIC, "true")).await;

        for payload in ["1", "", "TRUE", "true ", "False", "{\"state\":true}"] {
            let start = Instant::now();
            let outcome = dispatcher.handle(&InboundMessage::new(TOPIC, payload)).await;
            assert_eq!(outcome, CommandOutcome::Ignored, "{payload:?}");
            assert_eq!(start.elapsed(), Duration::ZERO);
        }

        assert_eq!(dispatcher.state(), ActuatorState::Active);
        assert_eq!(dispatcher.actuator().applied.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_utf8_is_ignored() {
        let mut dispatcher = dispatcher();
        let outcome = dispatcher
            .handle(&InboundMessage::new(TOPIC, vec![0x74, 0xff, 0x75]))
            .await;
        assert_eq!(outcome, CommandOutcome::Ignored);
        assert!(dispatcher.actuator().applied.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_topics_are_ignored() {
        let mut dispatcher = dispatcher();
        let outcome = dispatcher
            .handle(&InboundMessage::new("EIE_SEDE2_modbus/1/coil/0", "true"))
            .await;
        assert_eq!(outcome, CommandOutcome::Ignored);
        assert_eq!(dispatcher.state(), ActuatorState::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_is_bounded_to_delivered_length() {
        let mut dispatcher = dispatcher();
        let mut payload = b"true".to_vec();
        payload.push(0);
        let outcome = dispatcher.handle(&InboundMessage::new(TOPIC, payload)).await;
        assert_eq!(outcome, CommandOutcome::Ignored);
    }
}

//! Actuator state and the driver seam it is pushed through.
//!
//! The command dispatcher owns the authoritative [`ActuatorState`] and pushes
//! every change to an [`Actuator`]. [`SharedActuator`] is the host-side
//! driver: it holds the last applied state where a device-level driver (or
//! anything else holding a clone) can read it.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ActuatorState {
    Active,
    #[default]
    Inactive,
}

impl ActuatorState {
    pub fn is_active(self) -> bool {
        self == ActuatorState::Active
    }
}

/// Device-level actuator driver.
pub trait Actuator: Send {
    fn apply(&mut self, state: ActuatorState);
}

type ChangeHook = Box<dyn Fn(ActuatorState) + Send + Sync>;

/// Thread-safe actuator state readable from outside the telemetry loop.
///
/// The version is incremented each time the applied state changes.
///
/// # Example
/// ```ignore
/// let led = SharedActuator::new();
/// led.on_change(|state| log::info!("LED is now {}", state));
///
/// let dispatcher = CommandDispatcher::new(topic, hold, led.clone());
/// // elsewhere
/// if led.get().is_active() { /* drive the pin high */ }
/// ```
#[derive(Clone, Default)]
pub struct SharedActuator {
    active: Arc<AtomicBool>,
    version: Arc<AtomicU32>,
    hook: Arc<RwLock<Option<ChangeHook>>>,
}

impl SharedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ActuatorState {
        if self.active.load(Ordering::SeqCst) {
            ActuatorState::Active
        } else {
            ActuatorState::Inactive
        }
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    /// Register a callback invoked on every state change.
    pub fn on_change(&self, hook: impl Fn(ActuatorState) + Send + Sync + 'static) {
        *self.hook.write() = Some(Box::new(hook));
    }
}

impl Actuator for SharedActuator {
    fn apply(&mut self, state: ActuatorState) {
        let old = self.active.swap(state.is_active(), Ordering::SeqCst);
        if old != state.is_active() {
            self.version.fetch_add(1, Ordering::SeqCst);
            if let Some(hook) = self.hook.read().as_ref() {
                hook(state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let actuator = SharedActuator::new();
        assert_eq!(actuator.get(), ActuatorState::Inactive);
        assert_eq!(actuator.version(), 0);
    }

    #[test]
    fn test_apply_increments_version_on_change() {
        let mut actuator = SharedActuator::new();
        let reader = actuator.clone();

        actuator.apply(ActuatorState::Active);
        assert_eq!(reader.get(), ActuatorState::Active);
        assert_eq!(reader.version(), 1);

        // Same state doesn't increment
        actuator.apply(ActuatorState::Active);
        assert_eq!(reader.version(), 1);

        actuator.apply(ActuatorState::Inactive);
        assert_eq!(reader.get(), ActuatorState::Inactive);
        assert_eq!(reader.version(), 2);
    }

    #[test]
    fn test_hook_sees_changes_only() {
        let mut actuator = SharedActuator::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        actuator.on_change(move |state| sink.lock().push(state));

        actuator.apply(ActuatorState::Active);
        actuator.apply(ActuatorState::Active);
        actuator.apply(ActuatorState::Inactive);

        assert_eq!(
            *seen.lock(),
            vec![ActuatorState::Active, ActuatorState::Inactive]
        );
    }
}

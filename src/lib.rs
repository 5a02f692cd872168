//! Remote telemetry agent library.
//!
//! Samples a fixed set of environmental sensors, averages each channel,
//! and publishes the readings to an MQTT broker over TLS while listening
//! for actuator commands on a single command topic.

pub mod actuator;
pub mod averager;
pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod instance_lock;
pub mod publisher;
pub mod sensors;
pub mod session;
pub mod telemetry;

#[cfg(test)]
mod testing;

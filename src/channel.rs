//! Measurement channels and the broker topic scheme.
//!
//! A [`Channel`] is one published measurement point: a sensor group paired
//! with the kind of quantity it measures. The set is closed, so the mapping
//! from channel to topic is total and never depends on the value published.

use serde::Serialize;
use std::ops::RangeInclusive;
use strum::{Display, EnumIter};

/// Logical sensor units, in the order the telemetry loop samples them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum GroupId {
    /// Ultrasonic distance sensor at site 1.
    Ultrasonic,
    /// Humidity/temperature pair at site 1.
    DhtSite1,
    /// Humidity/temperature pair at site 2.
    DhtSite2,
    /// Single-wire temperature probe at site 1.
    OneWire,
}

/// Physical quantity measured by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum MeasurementKind {
    Distance,
    Temperature,
    Humidity,
}

/// A published (group, kind) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Channel {
    Distance,
    Site1Temperature,
    Site1Humidity,
    Site2Temperature,
    Site2Humidity,
    ProbeTemperature,
}

impl Channel {
    pub fn group(self) -> GroupId {
        match self {
            Channel::Distance => GroupId::Ultrasonic,
            Channel::Site1Temperature | Channel::Site1Humidity => GroupId::DhtSite1,
            Channel::Site2Temperature | Channel::Site2Humidity => GroupId::DhtSite2,
            Channel::ProbeTemperature => GroupId::OneWire,
        }
    }

    pub fn kind(self) -> MeasurementKind {
        match self {
            Channel::Distance => MeasurementKind::Distance,
            Channel::Site1Temperature | Channel::Site2Temperature | Channel::ProbeTemperature => {
                MeasurementKind::Temperature
            }
            Channel::Site1Humidity | Channel::Site2Humidity => MeasurementKind::Humidity,
        }
    }

    /// Plausible readings for the hardware behind this channel.
    ///
    /// Anything outside is treated as an invalid sample. The probe range
    /// excludes the -127 °C value the one-wire driver reports for a
    /// disconnected device.
    pub fn valid_range(self) -> RangeInclusive<f64> {
        match self {
            // cm, ultrasonic ranger
            Channel::Distance => 2.0..=400.0,
            // °C, DHT21/AM2301
            Channel::Site1Temperature | Channel::Site2Temperature => -40.0..=80.0,
            // %RH
            Channel::Site1Humidity | Channel::Site2Humidity => 0.0..=100.0,
            // °C, DS18B20
            Channel::ProbeTemperature => -55.0..=125.0,
        }
    }
}

/// A fixed message published after every successful (re)connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub topic: String,
    pub payload: String,
}

/// Example JSON document published as part of the announcement set.
///
/// Field order is the wire order.
#[derive(Serialize)]
struct ExampleDocument<'a> {
    texto: &'a str,
    numero: f64,
    entero: i64,
    boolean: u8,
}

const GREETING: &str = "Hola desde ESP32!";

/// Site-addressed topic naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    site1: String,
    site2: String,
}

impl TopicScheme {
    pub fn new(site1: impl Into<String>, site2: impl Into<String>) -> Self {
        Self {
            site1: site1.into(),
            site2: site2.into(),
        }
    }

    /// Topic a channel's averaged value is published on.
    pub fn topic(&self, channel: Channel) -> String {
        match channel {
            Channel::Distance => format!("{}_http/numeric", self.site1),
            Channel::Site1Temperature => format!("{}_http/temp", self.site1),
            Channel::Site1Humidity => format!("{}_http/humidity", self.site1),
            Channel::Site2Temperature => format!("{}_http/temp", self.site2),
            Channel::Site2Humidity => format!("{}_http/humidity", self.site2),
            Channel::ProbeTemperature => format!("{}_modbus/1/holding/0", self.site1),
        }
    }

    /// Topic the actuator command is received on.
    pub fn command_topic(&self) -> String {
        format!("{}_modbus/1/coil/0", self.site1)
    }

    /// The connectivity self-test set, in publish order.
    pub fn announcements(&self) -> Vec<Announcement> {
        let s1 = &self.site1;
        let s2 = &self.site2;
        let mut out = vec![
            Announcement::new(format!("{s1}_http/alphanumeric"), GREETING),
            Announcement::new(format!("{s2}_http/numeric"), "123.45"),
            Announcement::new(format!("{s2}_http/int"), "123"),
            Announcement::new(format!("{s2}_http/boolean"), "true"),
        ];

        let document = ExampleDocument {
            texto: "Aja, texto en JSON",
            numero: 123.45,
            entero: 12,
            boolean: 1,
        };
        match serde_json::to_string(&document) {
            Ok(json) => out.push(Announcement::new(format!("{s2}_http/ejemploJSON"), json)),
            Err(e) => log::warn!("[Session] Failed to encode JSON announcement: {}", e),
        }

        out.extend([
            Announcement::new(format!("{s2}_modbus/1/string/8"), GREETING),
            Announcement::new(format!("{s2}_modbus/1/holding/0"), "123.45"),
            Announcement::new(format!("{s2}_modbus/1/input/0"), "123"),
        ]);
        out
    }
}

impl Announcement {
    fn new(topic: String, payload: impl Into<String>) -> Self {
        Self {
            topic,
            payload: payload.into(),
        }
    }
}

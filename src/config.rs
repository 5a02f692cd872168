use crate::channel::Channel;
use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use strum::IntoEnumIterator;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in content.lines().filter_map(parse_dotenv_line) {
        // Env vars already set take precedence
        if std::env::var(key).is_err() {
            // SAFETY: called from main before the runtime spawns any worker
            unsafe { std::env::set_var(key, value) };
        }
    }
}

/// Split one `.env` line into key and value. Comments and blank lines yield `None`.
fn parse_dotenv_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();

    // Skip empty lines and comments
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let mut value = value.trim();
    if key.is_empty() {
        return None;
    }

    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        value = &value[1..value.len() - 1];
    }

    Some((key, value))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub session: SessionConfig,
    pub sites: SiteConfig,
    pub sampling: SamplingConfig,
    pub command: CommandConfig,
    pub sensors: SensorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// PEM file with the certificate authorities the broker is validated against.
    pub ca_bundle: PathBuf,
    pub keep_alive_secs: u64,
}

/// Connectivity timing. Every retry is a fixed delay, not a backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Restrict the network link check to one interface (e.g. "wlan0").
    pub interface: Option<String>,
    pub join_poll_ms: u64,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// How long one inbound pump waits for transport events.
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub site1: String,
    pub site2: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Reads per average. Also the divisor of every average.
    pub samples: usize,
    pub ultrasonic_spacing_ms: u64,
    pub dht_spacing_ms: u64,
    pub probe_spacing_ms: u64,
    pub group_pacing_ms: u64,
    pub cycle_pacing_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Synchronous hold before an inactive command takes effect.
    pub hold_ms: u64,
}

/// Where each channel reads its samples from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorsConfig {
    pub distance: SensorSource,
    pub site1_temperature: SensorSource,
    pub site1_humidity: SensorSource,
    pub site2_temperature: SensorSource,
    pub site2_humidity: SensorSource,
    pub probe_temperature: SensorSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorSource {
    /// Generated readings around a baseline.
    Simulated {
        baseline: f64,
        noise: f64,
        dropout: f64,
    },
    /// A number read from a file (sysfs w1/IIO attribute), multiplied by `scale`.
    File { path: PathBuf, scale: f64 },
}

impl SensorSource {
    /// Reject parameters a sensor cannot sample with.
    pub fn check(&self) -> Result<()> {
        let invalid = |what: &str| {
            Err(AgentError::InvalidConfig(format!(
                "invalid sensor source {self:?}: {what}"
            )))
        };
        match self {
            SensorSource::Simulated {
                baseline,
                noise,
                dropout,
            } => {
                if !baseline.is_finite() {
                    return invalid("baseline must be finite");
                }
                if !noise.is_finite() || *noise < 0.0 {
                    return invalid("noise must be finite and non-negative");
                }
                if !(0.0..=1.0).contains(dropout) {
                    return invalid("dropout must be within 0..=1");
                }
            }
            SensorSource::File { scale, .. } => {
                if !scale.is_finite() {
                    return invalid("scale must be finite");
                }
            }
        }
        Ok(())
    }
}

impl FromStr for SensorSource {
    type Err = AgentError;

    /// Parses `sim:<baseline>[:<noise>[:<dropout>]]` or `file:<path>[:<scale>]`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || AgentError::InvalidConfig(format!("invalid sensor source: {s}"));

        if let Some(rest) = s.strip_prefix("sim:") {
            let mut parts = rest.split(':').map(|p| p.trim().parse::<f64>());
            let baseline = parts.next().and_then(|p| p.ok()).ok_or_else(invalid)?;
            let noise = match parts.next() {
                Some(p) => p.map_err(|_| invalid())?,
                None => 0.0,
            };
            let dropout = match parts.next() {
                Some(p) => p.map_err(|_| invalid())?,
                None => 0.0,
            };
            if parts.next().is_some() {
                return Err(invalid());
            }
            let source = SensorSource::Simulated {
                baseline,
                noise,
                dropout,
            };
            source.check()?;
            return Ok(source);
        }

        if let Some(rest) = s.strip_prefix("file:") {
            if rest.is_empty() {
                return Err(invalid());
            }
            let (path, scale) = match rest.rsplit_once(':') {
                Some((path, scale)) if !path.is_empty() => match scale.parse::<f64>() {
                    Ok(scale) => (path, scale),
                    Err(_) => (rest, 1.0),
                },
                _ => (rest, 1.0),
            };
            let source = SensorSource::File {
                path: PathBuf::from(path),
                scale,
            };
            source.check()?;
            return Ok(source);
        }

        Err(invalid())
    }
}

impl SensorsConfig {
    pub fn source(&self, channel: Channel) -> &SensorSource {
        match channel {
            Channel::Distance => &self.distance,
            Channel::Site1Temperature => &self.site1_temperature,
            Channel::Site1Humidity => &self.site1_humidity,
            Channel::Site2Temperature => &self.site2_temperature,
            Channel::Site2Humidity => &self.site2_humidity,
            Channel::ProbeTemperature => &self.probe_temperature,
        }
    }

    fn source_mut(&mut self, channel: Channel) -> &mut SensorSource {
        match channel {
            Channel::Distance => &mut self.distance,
            Channel::Site1Temperature => &mut self.site1_temperature,
            Channel::Site1Humidity => &mut self.site1_humidity,
            Channel::Site2Temperature => &mut self.site2_temperature,
            Channel::Site2Humidity => &mut self.site2_humidity,
            Channel::ProbeTemperature => &mut self.probe_temperature,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let sim = |baseline, noise, dropout| SensorSource::Simulated {
            baseline,
            noise,
            dropout,
        };

        Self {
            mqtt: MqttConfig {
                broker_host: "localhost".to_string(),
                broker_port: 8883,
                client_id: "ESP32Client".to_string(),
                username: None,
                password: None,
                ca_bundle: PathBuf::from("/etc/ssl/certs/ca-certificates.crt"),
                keep_alive_secs: 1500,
            },
            session: SessionConfig {
                interface: None,
                join_poll_ms: 500,
                reconnect_delay_ms: 5000,
                connect_timeout_ms: 10_000,
                write_timeout_ms: 5000,
                tick_ms: 50,
            },
            sites: SiteConfig {
                site1: "EIE_SEDE1".to_string(),
                site2: "EIE_SEDE2".to_string(),
            },
            sampling: SamplingConfig {
                samples: 10,
                ultrasonic_spacing_ms: 50,
                dht_spacing_ms: 50,
                probe_spacing_ms: 0,
                group_pacing_ms: 50,
                cycle_pacing_ms: 200,
            },
            command: CommandConfig { hold_ms: 5000 },
            sensors: SensorsConfig {
                distance: sim(120.0, 2.0, 0.05),
                site1_temperature: sim(24.0, 0.5, 0.1),
                site1_humidity: sim(55.0, 2.0, 0.1),
                site2_temperature: sim(23.0, 0.5, 0.1),
                site2_humidity: sim(60.0, 2.0, 0.1),
                probe_temperature: sim(22.0, 0.2, 0.0),
            },
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Ignoring {}: cannot parse {:?}", key, raw);
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // MQTT configuration
        if let Ok(host) = std::env::var("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = host;
        }
        if let Some(port) = env_parse("MQTT_BROKER_PORT") {
            config.mqtt.broker_port = port;
        }
        if let Ok(client_id) = std::env::var("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        if let Ok(path) = std::env::var("MQTT_CA_BUNDLE") {
            config.mqtt.ca_bundle = PathBuf::from(path);
        }
        if let Some(secs) = env_parse("MQTT_KEEP_ALIVE_SECS") {
            config.mqtt.keep_alive_secs = secs;
        }

        // Session timing
        if let Ok(interface) = std::env::var("NETWORK_INTERFACE") {
            config.session.interface = Some(interface);
        }
        if let Some(ms) = env_parse("SESSION_JOIN_POLL_MS") {
            config.session.join_poll_ms = ms;
        }
        if let Some(ms) = env_parse("SESSION_RECONNECT_DELAY_MS") {
            config.session.reconnect_delay_ms = ms;
        }
        if let Some(ms) = env_parse("SESSION_CONNECT_TIMEOUT_MS") {
            config.session.connect_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("SESSION_WRITE_TIMEOUT_MS") {
            config.session.write_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("SESSION_TICK_MS") {
            config.session.tick_ms = ms;
        }

        // Topic prefixes
        if let Ok(site) = std::env::var("SITE1_PREFIX") {
            config.sites.site1 = site;
        }
        if let Ok(site) = std::env::var("SITE2_PREFIX") {
            config.sites.site2 = site;
        }

        // Sampling and command handling
        if let Some(n) = env_parse("SAMPLE_COUNT") {
            config.sampling.samples = n;
        }
        if let Some(ms) = env_parse("GROUP_PACING_MS") {
            config.sampling.group_pacing_ms = ms;
        }
        if let Some(ms) = env_parse("CYCLE_PACING_MS") {
            config.sampling.cycle_pacing_ms = ms;
        }
        if let Some(ms) = env_parse("COMMAND_HOLD_MS") {
            config.command.hold_ms = ms;
        }

        // Per-channel sensor sources, e.g. SENSOR_PROBE_TEMPERATURE=file:/sys/...:0.001
        for channel in Channel::iter() {
            let key = format!("SENSOR_{}", channel.to_string().to_uppercase());
            if let Some(source) = env_parse(&key) {
                *config.sensors.source_mut(channel) = source;
            }
        }

        config
    }

    /// Reject values the session or sampler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.broker_host.trim().is_empty() {
            return Err(AgentError::InvalidConfig("broker host is empty".into()));
        }
        if self.mqtt.client_id.trim().is_empty() {
            return Err(AgentError::InvalidConfig("client id is empty".into()));
        }
        if self.mqtt.keep_alive_secs == 0 {
            return Err(AgentError::InvalidConfig(
                "keep-alive must be at least one second".into(),
            ));
        }
        if self.sampling.samples == 0 {
            return Err(AgentError::InvalidConfig(
                "sample count must be at least one".into(),
            ));
        }
        if self.session.write_timeout_ms == 0 || self.session.connect_timeout_ms == 0 {
            return Err(AgentError::InvalidConfig("timeouts must be non-zero".into()));
        }
        for channel in Channel::iter() {
            self.sensors.source(channel).check()?;
        }
        if let (Some(_), None) | (None, Some(_)) = (&self.mqtt.username, &self.mqtt.password) {
            log::warn!("Only one of MQTT_USERNAME/MQTT_PASSWORD is set; connecting anonymously");
        }
        Ok(())
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl SessionConfig {
    pub fn join_poll(&self) -> Duration {
        Duration::from_millis(self.join_poll_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl CommandConfig {
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
}

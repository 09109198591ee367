//! Service configuration.
//!
//! Every setting comes from a `FLEETSYNC_*` environment variable; unset or
//! blank variables keep their defaults. [`Config::from_lookup`] takes the
//! variable source as a function so tests never touch the process
//! environment.

use std::time::Duration;

use chrono::TimeDelta;

use fleetsync_catalog::DEFAULT_PAGE_SIZE;
use fleetsync_core::observability::LogFormat;
use fleetsync_core::{Error, Result};
use fleetsync_warden::WardenConfig;

/// MQTT connection settings shared by every broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    /// `host:port` endpoints; every publish and subscribe goes to all of them.
    pub brokers: Vec<String>,
    /// Client id prefix; each broker connection appends its index.
    pub client_id: String,
    /// Username and password.
    pub credentials: Option<(String, String)>,
    /// Shared subscription group, if replicas split the inbound traffic.
    pub share_group: Option<String>,
}

/// Service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Port of the health and metrics endpoints.
    pub http_port: u16,
    /// Log output format.
    pub log_format: LogFormat,
    /// Broker settings.
    pub mqtt: MqttSettings,
    /// Reconciliation engine settings.
    pub warden: WardenConfig,
    /// Period of the re-sync pass.
    pub resync_interval: Duration,
    /// Records per catalog page.
    pub page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            log_format: LogFormat::Pretty,
            mqtt: MqttSettings {
                brokers: Vec::new(),
                client_id: "fleetsync".to_string(),
                credentials: None,
                share_group: None,
            },
            warden: WardenConfig::default(),
            resync_interval: Duration::from_secs(600),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a variable does not parse or the
    /// result is inconsistent.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a variable does not parse or the
    /// result is inconsistent.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env(&lookup);
        let mut config = Self::default();

        if let Some(port) = env.u16("FLEETSYNC_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(format) = env.string("FLEETSYNC_LOG_FORMAT") {
            config.log_format = LogFormat::from_name(&format);
        }

        if let Some(brokers) = env.string("FLEETSYNC_MQTT_BROKERS") {
            config.mqtt.brokers = parse_list(&brokers);
        }
        if let Some(client_id) = env.string("FLEETSYNC_MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        config.mqtt.credentials = match (
            env.string("FLEETSYNC_MQTT_USER"),
            env.string("FLEETSYNC_MQTT_PASSWORD"),
        ) {
            (Some(user), Some(password)) => Some((user, password)),
            (None, None) => None,
            _ => {
                return Err(Error::Configuration(
                    "FLEETSYNC_MQTT_USER and FLEETSYNC_MQTT_PASSWORD must be set together".into(),
                ));
            }
        };
        config.mqtt.share_group = env.string("FLEETSYNC_SHARED_SUBSCRIPTION_GROUP");

        if let Some(secs) = env.u64("FLEETSYNC_WARDEN_INTERVAL_SECS")? {
            config.warden.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env.u64("FLEETSYNC_WARDEN_AGE_GATE_SECS")? {
            let secs = i64::try_from(secs).map_err(|_| {
                Error::Configuration("FLEETSYNC_WARDEN_AGE_GATE_SECS is too large".into())
            })?;
            config.warden.age_gate = TimeDelta::try_seconds(secs).ok_or_else(|| {
                Error::Configuration("FLEETSYNC_WARDEN_AGE_GATE_SECS is too large".into())
            })?;
        }
        if let Some(enabled) = env.bool("FLEETSYNC_WARDEN_RUN_DB_LOOP")? {
            config.warden.run_db_loop = enabled;
        }
        if let Some(enabled) = env.bool("FLEETSYNC_WARDEN_RUN_PROCESS_LOOP")? {
            config.warden.run_process_loop = enabled;
        }
        if let Some(secs) = env.u64("FLEETSYNC_RESYNC_INTERVAL_SECS")? {
            config.resync_interval = Duration::from_secs(secs);
        }
        if let Some(size) = env.usize("FLEETSYNC_PAGE_SIZE")? {
            config.page_size = size;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks settings that cannot be validated one variable at a time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.brokers.is_empty() {
            return Err(Error::Configuration(
                "FLEETSYNC_MQTT_BROKERS must list at least one host:port".into(),
            ));
        }
        if self.resync_interval.is_zero() {
            return Err(Error::Configuration(
                "FLEETSYNC_RESYNC_INTERVAL_SECS must be positive".into(),
            ));
        }
        if self.page_size == 0 {
            return Err(Error::Configuration("FLEETSYNC_PAGE_SIZE must be positive".into()));
        }
        Ok(())
    }
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn u16(&self, name: &str) -> Result<Option<u16>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u16>()
            .map(Some)
            .map_err(|e| Error::Configuration(format!("{name} must be a u16: {e}")))
    }

    fn u64(&self, name: &str) -> Result<Option<u64>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<u64>()
            .map(Some)
            .map_err(|e| Error::Configuration(format!("{name} must be a u64: {e}")))
    }

    fn usize(&self, name: &str) -> Result<Option<usize>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<usize>()
            .map(Some)
            .map_err(|e| Error::Configuration(format!("{name} must be a usize: {e}")))
    }

    fn bool(&self, name: &str) -> Result<Option<bool>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        parse_bool(name, &v).map(Some)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::Configuration(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

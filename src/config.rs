//! Typed runtime configuration.
//!
//! The provisioning layer writes a JSON document at install time; it is
//! parsed and validated once at startup and never mutated afterwards. All
//! runtime state (retry counters, cached readings) lives in the components
//! themselves, not here.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("publisher.{0} is required and must not be empty")]
    MissingField(&'static str),
    #[error("sensor.max_retries must be at least 1")]
    NoRetryBudget,
    #[error("sensor.poll_interval must be at least 1 second")]
    PollIntervalTooShort,
    #[error(
        "retry budget of {max_retries} x {retry_delay_ms} ms would overrun \
         the {poll_interval} s poll interval"
    )]
    RetryBudgetOverrun {
        max_retries: u32,
        retry_delay_ms: u64,
        poll_interval: u64,
    },
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    from_str(&raw)
}

pub fn from_str(config_raw: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(config_raw)?;
    config.validate()?;
    Ok(config)
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub sensor: SensorConfig,
    pub publisher: PublisherConfig,
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (&self.publisher.host, "host"),
            (&self.publisher.token, "token"),
            (&self.publisher.bucket, "bucket"),
            (&self.publisher.org, "org"),
        ];
        for (value, field) in required {
            if value.is_empty() {
                return Err(ConfigError::MissingField(field));
            }
        }

        if self.sensor.max_retries == 0 {
            return Err(ConfigError::NoRetryBudget);
        }
        if self.sensor.poll_interval == 0 {
            return Err(ConfigError::PollIntervalTooShort);
        }
        // A poll cycle blocks its task for up to max_retries x retry_delay,
        // which must fit inside the poll interval or ticks get skipped.
        let budget_ms = u64::from(self.sensor.max_retries) * self.sensor.retry_delay_ms;
        if budget_ms >= self.sensor.poll_interval * 1000 {
            return Err(ConfigError::RetryBudgetOverrun {
                max_retries: self.sensor.max_retries,
                retry_delay_ms: self.sensor.retry_delay_ms,
                poll_interval: self.sensor.poll_interval,
            });
        }

        Ok(())
    }

    pub fn log_summary(&self) {
        let sensor = &self.sensor;
        log::info!(
            "Senseair sensor: bus {}, address 0x{:02X}, channel '{}', poll every {} s",
            sensor.bus,
            sensor.address,
            sensor.channel,
            sensor.poll_interval
        );
        if sensor.abc_interval == 0 {
            log::info!("  ABC calibration: disabled");
        } else {
            log::info!("  ABC calibration: every {} s", sensor.abc_interval);
        }
        log::info!(
            "  retries: up to {} attempts, {} ms apart",
            sensor.max_retries,
            sensor.retry_delay_ms
        );

        let publisher = &self.publisher;
        let scheme = if publisher.use_ssl { "https" } else { "http" };
        log::info!(
            "InfluxDB publisher: {}://{}:{}, org '{}', bucket '{}'",
            scheme,
            publisher.host,
            publisher.port,
            publisher.org,
            publisher.bucket
        );
        log::info!(
            "  timestamp unit: {}, update interval: {}, send device id: {}",
            publisher.timestamp_unit.precision(),
            publisher.update_interval,
            publisher.send_device_id
        );
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    /// I2C bus device path.
    #[serde(default = "default_bus")]
    pub bus: String,
    /// Seven-bit device address on the bus.
    #[serde(default = "default_address")]
    pub address: u8,
    /// Name under which the sensor's readings are published.
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Poll cadence in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// ABC recalibration interval in seconds; 0 disables ABC entirely.
    #[serde(default = "default_abc_interval")]
    pub abc_interval: u32,
    /// Wait between failed measurement attempts within one poll cycle.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Total measurement attempts per poll cycle.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            bus: default_bus(),
            address: default_address(),
            channel: default_channel(),
            poll_interval: default_poll_interval(),
            abc_interval: default_abc_interval(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_bus() -> String {
    "/dev/i2c-1".to_string()
}

fn default_address() -> u8 {
    0x68
}

fn default_channel() -> String {
    "co2".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_abc_interval() -> u32 {
    // 24h, the sensor's own factory cadence
    86_400
}

fn default_retry_delay_ms() -> u64 {
    200
}

fn default_max_retries() -> u32 {
    5
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublisherConfig {
    pub host: String,
    pub token: String,
    pub bucket: String,
    pub org: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_use_ssl")]
    pub use_ssl: bool,
    #[serde(default)]
    pub timestamp_unit: TimestampUnit,
    #[serde(default = "default_update_interval")]
    pub update_interval: PublishSchedule,
    /// Tag every line with the node's hardware identity.
    #[serde(default = "default_send_device_id")]
    pub send_device_id: bool,
    /// Per-channel measurement name overrides; a channel without an entry is
    /// published under its own name.
    #[serde(default)]
    pub measurement_names: BTreeMap<String, String>,
    /// Per-channel field name overrides; the default field name is `value`.
    #[serde(default)]
    pub field_names: BTreeMap<String, String>,
    /// Tags applied to every line.
    #[serde(default)]
    pub global_tags: BTreeMap<String, String>,
    /// Tags applied only to one channel's lines; win over global tags on
    /// key collisions.
    #[serde(default)]
    pub channel_tags: BTreeMap<String, BTreeMap<String, String>>,
}

fn default_port() -> u16 {
    8086
}

fn default_use_ssl() -> bool {
    true
}

fn default_update_interval() -> PublishSchedule {
    PublishSchedule::Periodic(Duration::from_secs(60))
}

fn default_send_device_id() -> bool {
    true
}

/// Publish cadence. `Never` keeps the publisher entirely inert: the
/// scheduler never arms a publish task, rather than checking a sentinel on
/// every cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishSchedule {
    Periodic(Duration),
    Never,
}

impl<'de> Deserialize<'de> for PublishSchedule {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Keyword(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(0) => Err(de::Error::custom(
                "update_interval must be at least 1 second (or \"never\")",
            )),
            Raw::Seconds(secs) => Ok(PublishSchedule::Periodic(Duration::from_secs(secs))),
            Raw::Keyword(kw) if kw == "never" => Ok(PublishSchedule::Never),
            Raw::Keyword(kw) => Err(de::Error::custom(format!(
                "unrecognized update_interval {kw:?}; expected seconds or \"never\""
            ))),
        }
    }
}

impl fmt::Display for PublishSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishSchedule::Periodic(interval) => write!(f, "{} s", interval.as_secs()),
            PublishSchedule::Never => f.write_str("never"),
        }
    }
}

/// Unit the clock's epoch value is scaled to when formatting timestamps.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum TimestampUnit {
    #[default]
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "ms")]
    Milliseconds,
    #[serde(rename = "us")]
    Microseconds,
    #[serde(rename = "ns")]
    Nanoseconds,
}

impl TimestampUnit {
    /// Scale an epoch value in seconds to this unit.
    pub fn scale(self, epoch_seconds: i64) -> i64 {
        match self {
            TimestampUnit::Seconds => epoch_seconds,
            TimestampUnit::Milliseconds => epoch_seconds * 1_000,
            TimestampUnit::Microseconds => epoch_seconds * 1_000_000,
            TimestampUnit::Nanoseconds => epoch_seconds * 1_000_000_000,
        }
    }

    /// Value of the `precision` query parameter on the write endpoint.
    pub fn precision(self) -> &'static str {
        match self {
            TimestampUnit::Seconds => "s",
            TimestampUnit::Milliseconds => "ms",
            TimestampUnit::Microseconds => "us",
            TimestampUnit::Nanoseconds => "ns",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config_json() -> serde_json::Value {
        serde_json::json!({
            "sensor": {
                "bus": "/dev/i2c-1",
                "address": 0x68,
                "channel": "co2",
                "poll_interval": 60,
                "abc_interval": 86400,
                "retry_delay_ms": 200,
                "max_retries": 5
            },
            "publisher": {
                "host": "influx.example.com",
                "token": "s3cret",
                "bucket": "home",
                "org": "iot",
                "port": 8086,
                "use_ssl": false,
                "timestamp_unit": "ms",
                "update_interval": 30,
                "send_device_id": true,
                "measurement_names": {"co2": "office_co2"},
                "field_names": {"co2": "ppm"},
                "global_tags": {"site": "home"},
                "channel_tags": {"co2": {"room": "office"}}
            }
        })
    }

    #[test]
    fn parses_full_config() {
        let config = from_str(&sample_config_json().to_string()).unwrap();

        assert_eq!(config.sensor.address, 0x68);
        assert_eq!(config.sensor.abc_interval, 86_400);
        assert_eq!(config.publisher.timestamp_unit, TimestampUnit::Milliseconds);
        assert_eq!(
            config.publisher.update_interval,
            PublishSchedule::Periodic(Duration::from_secs(30))
        );
        assert_eq!(
            config.publisher.measurement_names["co2"],
            "office_co2".to_string()
        );
        assert_eq!(config.publisher.channel_tags["co2"]["room"], "office");
    }

    #[test]
    fn sensor_section_is_optional() {
        let raw = serde_json::json!({
            "publisher": {"host": "h", "token": "t", "bucket": "b", "org": "o"}
        });
        let config = from_str(&raw.to_string()).unwrap();

        assert_eq!(config.sensor.address, 0x68);
        assert_eq!(config.sensor.poll_interval, 60);
        assert_eq!(config.sensor.channel, "co2");
        assert_eq!(config.publisher.port, 8086);
        assert!(config.publisher.use_ssl);
        assert_eq!(config.publisher.timestamp_unit, TimestampUnit::Seconds);
    }

    #[test]
    fn never_keyword_disables_publishing() {
        let mut raw = sample_config_json();
        raw["publisher"]["update_interval"] = serde_json::json!("never");

        let config = from_str(&raw.to_string()).unwrap();
        assert_eq!(config.publisher.update_interval, PublishSchedule::Never);
    }

    #[test]
    fn zero_update_interval_is_rejected() {
        let mut raw = sample_config_json();
        raw["publisher"]["update_interval"] = serde_json::json!(0);

        assert!(matches!(
            from_str(&raw.to_string()),
            Err(ConfigError::ParseJson(_))
        ));
    }

    #[test]
    fn unknown_update_interval_keyword_is_rejected() {
        let mut raw = sample_config_json();
        raw["publisher"]["update_interval"] = serde_json::json!("sometimes");

        assert!(matches!(
            from_str(&raw.to_string()),
            Err(ConfigError::ParseJson(_))
        ));
    }

    #[test]
    fn empty_host_is_rejected() {
        let mut raw = sample_config_json();
        raw["publisher"]["host"] = serde_json::json!("");

        assert!(matches!(
            from_str(&raw.to_string()),
            Err(ConfigError::MissingField("host"))
        ));
    }

    #[test]
    fn zero_max_retries_is_rejected() {
        let mut raw = sample_config_json();
        raw["sensor"]["max_retries"] = serde_json::json!(0);

        assert!(matches!(
            from_str(&raw.to_string()),
            Err(ConfigError::NoRetryBudget)
        ));
    }

    #[test]
    fn retry_budget_must_fit_in_poll_interval() {
        let mut raw = sample_config_json();
        // 10 x 700 ms = 7 s of worst-case blocking against a 5 s interval
        raw["sensor"]["poll_interval"] = serde_json::json!(5);
        raw["sensor"]["retry_delay_ms"] = serde_json::json!(700);
        raw["sensor"]["max_retries"] = serde_json::json!(10);

        assert!(matches!(
            from_str(&raw.to_string()),
            Err(ConfigError::RetryBudgetOverrun { .. })
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut raw = sample_config_json();
        raw["publisher"]["bukcet"] = serde_json::json!("typo");

        assert!(matches!(
            from_str(&raw.to_string()),
            Err(ConfigError::ParseJson(_))
        ));
    }

    #[test]
    fn timestamp_unit_scaling() {
        assert_eq!(TimestampUnit::Seconds.scale(1_700_000_000), 1_700_000_000);
        assert_eq!(
            TimestampUnit::Milliseconds.scale(1_700_000_000),
            1_700_000_000_000
        );
        assert_eq!(
            TimestampUnit::Microseconds.scale(1_700_000_000),
            1_700_000_000_000_000
        );
        assert_eq!(
            TimestampUnit::Nanoseconds.scale(1_700_000_000),
            1_700_000_000_000_000_000
        );
    }
}

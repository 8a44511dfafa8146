use log::{debug, info};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, TelemetryError};

const DEFAULT_MQTT_PORT: u16 = 8883;
const DEFAULT_TOPIC: &str = "sensor/readings";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
const DEFAULT_DEVICE_ID: i64 = 1;
const DEFAULT_SAMPLE_INTERVAL_SECS: u64 = 2;
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 2;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
// One day; anything longer is a misconfiguration
const MAX_RECONNECT_DELAY_SECS: u64 = 86_400;
const DEFAULT_DHT_IIO_DEVICE: &str = "/sys/bus/iio/devices/iio:device0";
const DEFAULT_LDR_IIO_DEVICE: &str = "/sys/bus/iio/devices/iio:device1";

/// Everything the session needs to reach the broker
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub wifi_ssid: Option<String>,
    pub link_interface: Option<String>,
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub topic: String,
    /// PEM contents of the root certificate, validated when the session installs it
    pub trust_anchor: Vec<u8>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorBackendKind {
    Iio,
    Simulated,
}

/// Sysfs devices bound to the sensor pins by the board's device tree
#[derive(Debug, Clone)]
pub struct SensorPins {
    pub dht_device: PathBuf,
    pub ldr_device: PathBuf,
    pub ldr_channel: u8,
    pub ldr_raw_max: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffPolicy {
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

/// Ordering knobs for a sampling tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickPolicy {
    /// Read sensors for the log even when the session is not ready
    pub read_when_offline: bool,
    /// Stop reading at the first failed sensor
    pub sensor_fail_fast: bool,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub connection: ConnectionConfig,
    pub device_id: i64,
    pub sample_interval: Duration,
    pub backoff: BackoffPolicy,
    pub sensor_backend: SensorBackendKind,
    pub sensor_pins: SensorPins,
    pub tick_policy: TickPolicy,
}

impl AgentConfig {
    pub fn new() -> Result<Self> {
        // Load environment variables
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup (environment, map in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &str| {
            get(key).ok_or_else(|| {
                TelemetryError::Config(format!("{} environment variable not set", key))
            })
        };

        let device_id = parse_or(&get, "DEVICE_ID", DEFAULT_DEVICE_ID)?;

        let ca_path = required("MQTT_CA_CERT")?;
        let trust_anchor = fs::read(&ca_path).map_err(|e| {
            TelemetryError::Config(format!("cannot read MQTT_CA_CERT '{}': {}", ca_path, e))
        })?;
        debug!("Loaded {} bytes of trust anchor from {}", trust_anchor.len(), ca_path);

        let connection = ConnectionConfig {
            wifi_ssid: get("WIFI_SSID"),
            link_interface: get("LINK_INTERFACE"),
            broker_host: required("MQTT_BROKER")?,
            broker_port: parse_or(&get, "MQTT_PORT", DEFAULT_MQTT_PORT)?,
            client_id: get("MQTT_CLIENT_ID").unwrap_or_else(|| format!("envoy-{}", device_id)),
            username: required("MQTT_USERNAME")?,
            password: get("MQTT_PASSWORD").unwrap_or_default(),
            topic: get("MQTT_TOPIC").unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            trust_anchor,
            keep_alive: Duration::from_secs(parse_or(
                &get,
                "MQTT_KEEP_ALIVE_SECS",
                DEFAULT_KEEP_ALIVE_SECS,
            )?),
            connect_timeout: Duration::from_secs(parse_or(
                &get,
                "CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?),
        };

        if connection.connect_timeout.is_zero() {
            return Err(TelemetryError::Config(
                "CONNECT_TIMEOUT_SECS must be greater than zero".into(),
            ));
        }

        let sample_interval_secs: u64 =
            parse_or(&get, "SAMPLE_INTERVAL_SECS", DEFAULT_SAMPLE_INTERVAL_SECS)?;
        if sample_interval_secs == 0 {
            return Err(TelemetryError::Config(
                "SAMPLE_INTERVAL_SECS must be greater than zero".into(),
            ));
        }

        let base_secs = parse_or(&get, "RECONNECT_DELAY_SECS", DEFAULT_RECONNECT_DELAY_SECS)?;
        check_delay("RECONNECT_DELAY_SECS", base_secs)?;
        let base = Duration::from_secs(base_secs);
        let backoff = match parse_opt::<u64, _>(&get, "RECONNECT_MAX_DELAY_SECS")? {
            Some(max) => {
                check_delay("RECONNECT_MAX_DELAY_SECS", max)?;
                BackoffPolicy::Exponential {
                    base,
                    max: Duration::from_secs(max).max(base),
                }
            }
            None => BackoffPolicy::Fixed(base),
        };

        let sensor_backend = match get("SENSOR_BACKEND").as_deref() {
            None | Some("iio") => SensorBackendKind::Iio,
            Some("simulated") => SensorBackendKind::Simulated,
            Some(other) => {
                return Err(TelemetryError::Config(format!(
                    "unknown SENSOR_BACKEND '{}', expected 'iio' or 'simulated'",
                    other
                )))
            }
        };

        let sensor_pins = SensorPins {
            dht_device: get("DHT_IIO_DEVICE")
                .unwrap_or_else(|| DEFAULT_DHT_IIO_DEVICE.to_string())
                .into(),
            ldr_device: get("LDR_IIO_DEVICE")
                .unwrap_or_else(|| DEFAULT_LDR_IIO_DEVICE.to_string())
                .into(),
            ldr_channel: parse_or(&get, "LDR_ADC_CHANNEL", 0)?,
            ldr_raw_max: parse_opt(&get, "LDR_RAW_MAX")?,
        };

        let tick_policy = TickPolicy {
            read_when_offline: parse_bool(&get, "TICK_READ_WHEN_OFFLINE")?,
            sensor_fail_fast: parse_bool(&get, "SENSOR_FAIL_FAST")?,
        };

        info!(
            "Configuration loaded: device {} -> {}:{} topic '{}', every {}s",
            device_id,
            connection.broker_host,
            connection.broker_port,
            connection.topic,
            sample_interval_secs
        );

        Ok(AgentConfig {
            connection,
            device_id,
            sample_interval: Duration::from_secs(sample_interval_secs),
            backoff,
            sensor_backend,
            sensor_pins,
            tick_policy,
        })
    }
}

fn check_delay(key: &str, secs: u64) -> Result<()> {
    if secs > MAX_RECONNECT_DELAY_SECS {
        return Err(TelemetryError::Config(format!(
            "{} must be at most {} seconds, got {}",
            key, MAX_RECONNECT_DELAY_SECS, secs
        )));
    }
    Ok(())
}

fn parse_opt<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| TelemetryError::Config(format!("invalid {} '{}': {}", key, raw, e))),
        None => Ok(None),
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(get, key)?.unwrap_or(default))
}

fn parse_bool<G>(get: &G, key: &str) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("0") | Some("false") | Some("no") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some(other) => Err(TelemetryError::Config(format!(
            "invalid {} '{}', expected true or false",
            key, other
        ))),
    }
}

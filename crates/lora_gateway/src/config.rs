use common::{BrokerSettings, RadioPins, RadioSettings};
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gateway configuration, read once from `GATEWAY_*` environment
/// variables at startup. Every value has a default; the defaults match
/// the reference deployment (US915 SX127x module, local Mosquitto).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // MQTT broker configuration
    #[serde(default = "default_broker_host")]
    pub broker_host: String,

    #[serde(default = "default_broker_port")]
    pub broker_port: u16,

    /// Broker username; empty means anonymous access
    #[serde(default)]
    pub broker_username: String,

    /// Broker password; empty means anonymous access
    #[serde(default)]
    pub broker_password: String,

    #[serde(default)]
    pub broker_use_tls: bool,

    #[serde(default = "default_broker_keepalive_secs")]
    pub broker_keepalive_secs: u64,

    /// First topic segment for all sensor data and control topics
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// MQTT client id, also used as the gateway id in record metadata
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// QoS for sensor data publishes (0, 1 or 2)
    #[serde(default = "default_publish_qos")]
    pub publish_qos: u8,

    /// How long a publish waits for the broker acknowledgment
    #[serde(default = "default_publish_ack_timeout_secs")]
    pub publish_ack_timeout_secs: u64,

    /// Fixed delay between broker reconnect attempts
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,

    // Radio configuration
    /// Radio driver: "sx127x" (requires the sx127x build feature) or
    /// "none" (no radio hardware, broker path only)
    #[serde(default = "default_radio_driver")]
    pub radio_driver: String,

    #[serde(default = "default_radio_frequency_mhz")]
    pub radio_frequency_mhz: f64,

    /// Transmit power, dBm
    #[serde(default = "default_radio_tx_power")]
    pub radio_tx_power: i32,

    #[serde(default = "default_radio_spreading_factor")]
    pub radio_spreading_factor: u8,

    #[serde(default = "default_radio_bandwidth_hz")]
    pub radio_bandwidth_hz: u32,

    /// Coding rate denominator (4/x), 5-8
    #[serde(default = "default_radio_coding_rate")]
    pub radio_coding_rate: u8,

    // GPIO pin assignments (BCM numbering)
    #[serde(default = "default_radio_cs_pin")]
    pub radio_cs_pin: u8,

    #[serde(default = "default_radio_rst_pin")]
    pub radio_rst_pin: u8,

    #[serde(default = "default_radio_irq_pin")]
    pub radio_irq_pin: u8,

    /// Receive loop poll interval
    #[serde(default = "default_radio_poll_interval_ms")]
    pub radio_poll_interval_ms: u64,

    /// Bounded wait for the receive loop to stop on shutdown
    #[serde(default = "default_radio_stop_timeout_secs")]
    pub radio_stop_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_broker_keepalive_secs() -> u64 {
    60
}

fn default_topic_prefix() -> String {
    "sensors".to_string()
}

fn default_client_id() -> String {
    "rpi-gateway".to_string()
}

fn default_publish_qos() -> u8 {
    1
}

fn default_publish_ack_timeout_secs() -> u64 {
    10
}

fn default_reconnect_backoff_secs() -> u64 {
    5
}

fn default_radio_driver() -> String {
    "sx127x".to_string()
}

fn default_radio_frequency_mhz() -> f64 {
    915.0
}

fn default_radio_tx_power() -> i32 {
    17
}

fn default_radio_spreading_factor() -> u8 {
    7
}

fn default_radio_bandwidth_hz() -> u32 {
    125_000
}

fn default_radio_coding_rate() -> u8 {
    5
}

fn default_radio_cs_pin() -> u8 {
    25
}

fn default_radio_rst_pin() -> u8 {
    17
}

fn default_radio_irq_pin() -> u8 {
    26
}

fn default_radio_poll_interval_ms() -> u64 {
    100
}

fn default_radio_stop_timeout_secs() -> u64 {
    2
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("GATEWAY"))
            .build()?
            .try_deserialize()
    }

    pub fn radio_settings(&self) -> RadioSettings {
        RadioSettings {
            frequency_mhz: self.radio_frequency_mhz,
            tx_power: self.radio_tx_power,
            spreading_factor: self.radio_spreading_factor,
            bandwidth_hz: self.radio_bandwidth_hz,
            coding_rate: self.radio_coding_rate,
            pins: RadioPins {
                chip_select: self.radio_cs_pin,
                reset: self.radio_rst_pin,
                irq: self.radio_irq_pin,
            },
        }
    }

    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            host: self.broker_host.clone(),
            port: self.broker_port,
            username: non_empty(&self.broker_username),
            password: non_empty(&self.broker_password),
            use_tls: self.broker_use_tls,
            topic_prefix: self.topic_prefix.clone(),
            client_id: self.client_id.clone(),
            keepalive_secs: self.broker_keepalive_secs,
            publish_qos: self.publish_qos,
            ack_timeout_secs: self.publish_ack_timeout_secs,
            reconnect_backoff_secs: self.reconnect_backoff_secs,
        }
    }

    pub fn radio_poll_interval(&self) -> Duration {
        Duration::from_millis(self.radio_poll_interval_ms)
    }

    pub fn radio_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.radio_stop_timeout_secs)
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

use crate::domain::{GatewayError, GatewayResult};
use std::time::Duration;

/// GPIO pin assignments for the radio module.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioPins {
    pub chip_select: u8,
    pub reset: u8,
    pub irq: u8,
}

/// Immutable radio parameters, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioSettings {
    pub frequency_mhz: f64,
    pub tx_power: i32,
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    pub coding_rate: u8,
    pub pins: RadioPins,
}

impl RadioSettings {
    pub fn validate(&self) -> GatewayResult<()> {
        if self.frequency_mhz <= 0.0 {
            return Err(GatewayError::Configuration(format!(
                "radio frequency must be positive, got {} MHz",
                self.frequency_mhz
            )));
        }
        if !(6..=12).contains(&self.spreading_factor) {
            return Err(GatewayError::Configuration(format!(
                "spreading factor must be 6-12, got {}",
                self.spreading_factor
            )));
        }
        if !(5..=8).contains(&self.coding_rate) {
            return Err(GatewayError::Configuration(format!(
                "coding rate denominator must be 5-8, got {}",
                self.coding_rate
            )));
        }
        if self.bandwidth_hz == 0 {
            return Err(GatewayError::Configuration(
                "radio bandwidth must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Carrier frequency as the whole-MHz value the SX127x driver
    /// takes. Fractional settings are rounded, not truncated.
    pub fn frequency_mhz_rounded(&self) -> i64 {
        self.frequency_mhz.round() as i64
    }
}

/// Immutable broker parameters, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub topic_prefix: String,
    pub client_id: String,
    pub keepalive_secs: u64,
    /// QoS level for sensor data publishes (0, 1 or 2).
    pub publish_qos: u8,
    pub ack_timeout_secs: u64,
    pub reconnect_backoff_secs: u64,
}

impl BrokerSettings {
    pub fn validate(&self) -> GatewayResult<()> {
        if self.host.is_empty() {
            return Err(GatewayError::Configuration(
                "broker host must not be empty".to_string(),
            ));
        }
        if self.client_id.is_empty() {
            return Err(GatewayError::Configuration(
                "broker client id must not be empty".to_string(),
            ));
        }
        if self.topic_prefix.is_empty()
            || self.topic_prefix.contains(['+', '#'])
        {
            return Err(GatewayError::Configuration(format!(
                "topic prefix '{}' must be non-empty and free of MQTT wildcards",
                self.topic_prefix
            )));
        }
        if self.publish_qos > 2 {
            return Err(GatewayError::Configuration(format!(
                "publish QoS must be 0, 1 or 2, got {}",
                self.publish_qos
            )));
        }
        if self.use_tls && (self.username.is_none() || self.password.is_none()) {
            return Err(GatewayError::Configuration(
                "TLS is enabled but broker credentials are missing".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_radio_settings() -> RadioSettings {
        RadioSettings {
            frequency_mhz: 915.0,
            tx_power: 17,
            spreading_factor: 7,
            bandwidth_hz: 125_000,
            coding_rate: 5,
            pins: RadioPins {
                chip_select: 25,
                reset: 17,
                irq: 26,
            },
        }
    }

    fn valid_broker_settings() -> BrokerSettings {
        BrokerSettings {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            use_tls: false,
            topic_prefix: "sensors".to_string(),
            client_id: "rpi-gateway".to_string(),
            keepalive_secs: 60,
            publish_qos: 1,
            ack_timeout_secs: 10,
            reconnect_backoff_secs: 5,
        }
    }

    #[test]
    fn test_valid_radio_settings() {
        assert!(valid_radio_settings().validate().is_ok());
    }

    #[test]
    fn test_radio_frequency_conversion_rounds() {
        assert_eq!(valid_radio_settings().frequency_mhz_rounded(), 915);

        let mut settings = valid_radio_settings();
        settings.frequency_mhz = 915.5;
        assert_eq!(settings.frequency_mhz_rounded(), 916);
    }

    #[test]
    fn test_radio_rejects_bad_spreading_factor() {
        let mut settings = valid_radio_settings();
        settings.spreading_factor = 13;
        assert!(matches!(
            settings.validate(),
            Err(GatewayError::Configuration(_))
        ));
    }

    #[test]
    fn test_radio_rejects_bad_coding_rate() {
        let mut settings = valid_radio_settings();
        settings.coding_rate = 4;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_valid_broker_settings() {
        assert!(valid_broker_settings().validate().is_ok());
    }

    #[test]
    fn test_broker_rejects_tls_without_credentials() {
        let mut settings = valid_broker_settings();
        settings.use_tls = true;
        assert!(matches!(
            settings.validate(),
            Err(GatewayError::Configuration(_))
        ));

        settings.username = Some("gateway".to_string());
        settings.password = Some("secret".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_broker_rejects_wildcard_prefix() {
        let mut settings = valid_broker_settings();
        settings.topic_prefix = "sensors/#".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_broker_rejects_invalid_qos() {
        let mut settings = valid_broker_settings();
        settings.publish_qos = 3;
        assert!(settings.validate().is_err());
    }
}

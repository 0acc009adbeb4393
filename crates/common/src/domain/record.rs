use crate::domain::GatewayResult;
use serde_json::{Map, Value};

/// Signal quality and provenance attached to every published record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMetadata {
    pub rssi: i16,
    pub snr: f32,
    pub gateway_id: String,
}

/// The canonical in-flight message: a validated sensor payload plus
/// the metadata added by the gateway.
///
/// Invariant: `device_id` is non-empty and `timestamp` is always set.
/// A record lives for exactly one publish attempt; there is no retry
/// queue.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRecord {
    pub device_id: String,
    /// Sensor fields from the source payload, minus the keys the
    /// gateway owns (`device_id`, `timestamp`, `metadata`).
    pub fields: Map<String, Value>,
    /// Unix seconds.
    pub timestamp: i64,
    pub metadata: RecordMetadata,
}

impl SensorRecord {
    /// Flat JSON object published to the broker: the original sensor
    /// fields plus `device_id`, `timestamp` and the `metadata` block.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("device_id".to_string(), Value::String(self.device_id.clone()));
        map.insert("timestamp".to_string(), Value::from(self.timestamp));
        map.insert(
            "metadata".to_string(),
            serde_json::json!({
                "rssi": self.metadata.rssi,
                "snr": self.metadata.snr,
                "gateway_id": self.metadata.gateway_id,
            }),
        );
        Value::Object(map)
    }

    /// Wire payload. serde_json keeps object keys sorted, so the same
    /// record always serializes to the same bytes.
    pub fn to_payload(&self) -> GatewayResult<String> {
        Ok(serde_json::to_string(&self.to_value())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> SensorRecord {
        let mut fields = Map::new();
        fields.insert("temp".to_string(), Value::from(72.3));
        SensorRecord {
            device_id: "S1".to_string(),
            fields,
            timestamp: 1_700_000_000,
            metadata: RecordMetadata {
                rssi: -42,
                snr: 9.5,
                gateway_id: "rpi-gateway".to_string(),
            },
        }
    }

    #[test]
    fn test_to_value_contains_all_sections() {
        let value = sample_record().to_value();
        assert_eq!(value["device_id"], "S1");
        assert_eq!(value["temp"], 72.3);
        assert_eq!(value["timestamp"], 1_700_000_000);
        assert_eq!(value["metadata"]["rssi"], -42);
        assert_eq!(value["metadata"]["snr"], 9.5);
        assert_eq!(value["metadata"]["gateway_id"], "rpi-gateway");
    }

    #[test]
    fn test_to_payload_is_deterministic() {
        let record = sample_record();
        let first = record.to_payload().unwrap();
        let second = record.to_payload().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_gateway_owned_keys_win_over_fields() {
        let mut record = sample_record();
        record
            .fields
            .insert("metadata".to_string(), Value::String("stale".to_string()));
        let value = record.to_value();
        assert_eq!(value["metadata"]["gateway_id"], "rpi-gateway");
    }
}

use common::{Clock, GatewayError, GatewayResult, RadioFrame, RecordMetadata, SensorRecord};
use serde_json::Value;
use tracing::debug;

/// Validate a raw radio payload and build the publishable record.
///
/// The payload is decoded as UTF-8 with invalid-byte substitution and
/// parsed as a JSON object. `device_id` is required; `timestamp` is
/// taken from the payload when it is an integer and assigned from the
/// clock otherwise. The gateway's `metadata` block replaces any
/// metadata the device sent.
///
/// Pure apart from the injected clock: the same frame and clock always
/// produce the same record.
pub fn enrich(
    frame: &RadioFrame,
    gateway_id: &str,
    clock: &dyn Clock,
) -> GatewayResult<SensorRecord> {
    let text = String::from_utf8_lossy(&frame.payload);
    let parsed: Value = serde_json::from_str(&text)
        .map_err(|e| GatewayError::PayloadParse(e.to_string()))?;

    let Value::Object(mut fields) = parsed else {
        return Err(GatewayError::PayloadParse(
            "payload is not a JSON object".to_string(),
        ));
    };

    let device_id = match fields.remove("device_id") {
        Some(Value::String(id)) if id.is_empty() => {
            return Err(GatewayError::InvalidField("device_id", "must be non-empty"));
        }
        Some(Value::String(id)) if id.contains(['/', '+', '#']) => {
            return Err(GatewayError::InvalidField(
                "device_id",
                "must not contain MQTT topic separators or wildcards",
            ));
        }
        Some(Value::String(id)) => id,
        Some(_) => return Err(GatewayError::InvalidField("device_id", "must be a string")),
        None => return Err(GatewayError::MissingField("device_id")),
    };

    let timestamp = match fields.remove("timestamp") {
        Some(value) => match value.as_i64() {
            Some(ts) => ts,
            None => {
                debug!(
                    device_id = %device_id,
                    timestamp = %value,
                    "replacing non-integer timestamp with gateway time"
                );
                clock.now_unix()
            }
        },
        None => clock.now_unix(),
    };

    // The gateway owns the metadata block; anything the device sent
    // under that key is discarded.
    fields.remove("metadata");

    Ok(SensorRecord {
        device_id,
        fields,
        timestamp,
        metadata: RecordMetadata {
            rssi: frame.rssi,
            snr: frame.snr,
            gateway_id: gateway_id.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::FixedClock;

    const NOW: i64 = 1_700_000_000;

    fn frame(payload: &[u8]) -> RadioFrame {
        RadioFrame {
            payload: payload.to_vec(),
            rssi: -42,
            snr: 9.5,
        }
    }

    fn enrich_frame(payload: &[u8]) -> GatewayResult<SensorRecord> {
        enrich(&frame(payload), "rpi-gateway", &FixedClock(NOW))
    }

    #[test]
    fn test_valid_payload_produces_record() {
        let record = enrich_frame(br#"{"device_id":"S1","temp":72.3}"#).unwrap();

        assert_eq!(record.device_id, "S1");
        assert_eq!(record.fields["temp"], 72.3);
        assert_eq!(record.timestamp, NOW);
        assert_eq!(record.metadata.rssi, -42);
        assert_eq!(record.metadata.snr, 9.5);
        assert_eq!(record.metadata.gateway_id, "rpi-gateway");
    }

    #[test]
    fn test_spec_scenario_payload() {
        let record = enrich_frame(br#"{"device_id":"S1","temp":72.3}"#).unwrap();
        let value = record.to_value();

        assert_eq!(value["device_id"], "S1");
        assert_eq!(value["temp"], 72.3);
        assert_eq!(value["timestamp"], NOW);
        assert_eq!(value["metadata"]["rssi"], -42);
        assert_eq!(value["metadata"]["snr"], 9.5);
        assert_eq!(value["metadata"]["gateway_id"], "rpi-gateway");
    }

    #[test]
    fn test_missing_device_id_rejected() {
        let err = enrich_frame(br#"{"temp":72.3}"#).unwrap_err();
        assert!(matches!(err, GatewayError::MissingField("device_id")));
    }

    #[test]
    fn test_empty_device_id_rejected() {
        let err = enrich_frame(br#"{"device_id":""}"#).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidField("device_id", _)));
    }

    #[test]
    fn test_non_string_device_id_rejected() {
        let err = enrich_frame(br#"{"device_id":17}"#).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidField("device_id", _)));
    }

    #[test]
    fn test_device_id_with_topic_characters_rejected() {
        for payload in [
            br#"{"device_id":"a/b"}"#.as_slice(),
            br#"{"device_id":"a+b"}"#.as_slice(),
            br#"{"device_id":"a#b"}"#.as_slice(),
        ] {
            let err = enrich_frame(payload).unwrap_err();
            assert!(matches!(err, GatewayError::InvalidField("device_id", _)));
        }
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = enrich_frame(b"{not json").unwrap_err();
        assert!(matches!(err, GatewayError::PayloadParse(_)));
        assert!(err.is_validation());
    }

    #[test]
    fn test_non_object_json_rejected() {
        let err = enrich_frame(br#"["device_id","S1"]"#).unwrap_err();
        assert!(matches!(err, GatewayError::PayloadParse(_)));
    }

    #[test]
    fn test_non_utf8_bytes_do_not_panic() {
        // Invalid bytes are substituted, then parsing fails cleanly
        let err = enrich_frame(&[0xff, 0xfe, 0x7b]).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_existing_timestamp_preserved() {
        let record = enrich_frame(br#"{"device_id":"S1","timestamp":1600000000}"#).unwrap();
        assert_eq!(record.timestamp, 1_600_000_000);
    }

    #[test]
    fn test_missing_timestamp_assigned_from_clock() {
        let record = enrich_frame(br#"{"device_id":"S1"}"#).unwrap();
        assert_eq!(record.timestamp, NOW);
    }

    #[test]
    fn test_non_integer_timestamp_replaced() {
        let record = enrich_frame(br#"{"device_id":"S1","timestamp":"yesterday"}"#).unwrap();
        assert_eq!(record.timestamp, NOW);
    }

    #[test]
    fn test_device_metadata_overwritten() {
        let record =
            enrich_frame(br#"{"device_id":"S1","metadata":{"rssi":0,"forged":true}}"#).unwrap();
        assert!(!record.fields.contains_key("metadata"));
        assert_eq!(record.metadata.rssi, -42);

        let value = record.to_value();
        assert_eq!(value["metadata"]["gateway_id"], "rpi-gateway");
        assert!(value["metadata"].get("forged").is_none());
    }

    #[test]
    fn test_enrichment_is_idempotent() {
        let payload = br#"{"device_id":"S1","temp":72.3,"hum":40}"#;
        let first = enrich_frame(payload).unwrap();
        let second = enrich_frame(payload).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.to_payload().unwrap(),
            second.to_payload().unwrap()
        );
    }
}

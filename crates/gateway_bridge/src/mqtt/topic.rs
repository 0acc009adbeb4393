/// Topic a device's enriched records are published to.
pub fn data_topic(prefix: &str, device_id: &str) -> String {
    format!("{prefix}/{device_id}/data")
}

/// Topic the gateway subscribes to for commands directed at itself.
/// Message semantics are owned by the cloud side, not the gateway.
pub fn control_topic(prefix: &str, client_id: &str) -> String {
    format!("{prefix}/gateway/{client_id}/control")
}

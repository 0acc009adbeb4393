use common::{GatewayError, GatewayResult, RadioFrame, RadioSettings, RadioTransceiver};
use tracing::warn;

/// Radio stand-in for deployments without LoRa hardware (driver
/// `none`): never yields frames and rejects transmissions. Lets the
/// broker path run on development machines.
#[derive(Debug, Default)]
pub struct NullTransceiver;

impl NullTransceiver {
    pub fn new() -> Self {
        Self
    }
}

impl RadioTransceiver for NullTransceiver {
    fn configure(&mut self, _settings: &RadioSettings) -> GatewayResult<()> {
        warn!("radio driver 'none' selected, no frames will be received");
        Ok(())
    }

    fn available(&mut self) -> bool {
        false
    }

    fn receive(&mut self) -> GatewayResult<RadioFrame> {
        Err(GatewayError::Radio(
            "no radio hardware configured".to_string(),
        ))
    }

    fn send(&mut self, _data: &[u8]) -> GatewayResult<()> {
        Err(GatewayError::Radio(
            "no radio hardware configured".to_string(),
        ))
    }
}

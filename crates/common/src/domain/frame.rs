use crate::domain::{GatewayResult, RadioSettings};

/// A single frame received over the radio, together with the signal
/// quality readings reported by the driver. Created per reception
/// event and consumed immediately; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioFrame {
    pub payload: Vec<u8>,
    /// Received signal strength, dBm.
    pub rssi: i16,
    /// Signal-to-noise ratio, dB.
    pub snr: f32,
}

/// Hardware-facing radio driver abstraction.
///
/// Implementations own the physical or simulated radio session. All
/// methods are synchronous; the receive loop polls `available` at a
/// fixed interval and calls `receive` only when a frame is ready.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait RadioTransceiver: Send {
    /// Apply modulation parameters and bring the radio up. A failure
    /// here is a fatal configuration error for the gateway.
    fn configure(&mut self, settings: &RadioSettings) -> GatewayResult<()>;

    /// Whether a decoded frame is ready to be read.
    fn available(&mut self) -> bool;

    /// Read the pending frame. Only called after `available` returned
    /// true; drivers may still fail on CRC or read errors.
    fn receive(&mut self) -> GatewayResult<RadioFrame>;

    /// Attempt one transmission.
    fn send(&mut self, data: &[u8]) -> GatewayResult<()>;
}

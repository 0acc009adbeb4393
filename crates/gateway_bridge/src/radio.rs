mod null;
mod transport;

#[cfg(feature = "sx127x")]
mod sx127x;

pub use null::NullTransceiver;
pub use transport::RadioTransport;

#[cfg(feature = "sx127x")]
pub use sx127x::Sx127xTransceiver;

mod domain;
mod telemetry;

pub use domain::*;
pub use telemetry::*;

// Re-export mocks when the testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockFrameSink;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockRadioTransceiver;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockRecordPublisher;

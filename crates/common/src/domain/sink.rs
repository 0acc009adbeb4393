use crate::domain::{GatewayResult, RadioFrame, SensorRecord};
use async_trait::async_trait;

/// Consumer of decoded radio frames.
///
/// The radio receive loop invokes this inline on its own task, so the
/// handler's latency directly throttles radio receive throughput.
/// Implementations must never panic on malformed input; per-message
/// failures are logged and the frame is dropped.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn handle_frame(&self, frame: RadioFrame);
}

/// Publisher of enriched sensor records to the broker.
///
/// Implementations serialize the record and wait for the transport's
/// delivery acknowledgment before resolving. A failed publish drops
/// the record; there is no retry queue.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RecordPublisher: Send + Sync {
    async fn publish_record(&self, topic: &str, record: &SensorRecord) -> GatewayResult<()>;
}

use crate::domain::enrich;
use crate::mqtt::data_topic;
use async_trait::async_trait;
use common::{Clock, FrameSink, RadioFrame, RecordPublisher};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument, Span};

/// The enrich-then-publish pipeline between the radio receive loop and
/// the broker transport.
///
/// Runs inline on the receive loop's task: while a publish is waiting
/// for the broker acknowledgment, no further frames are read and
/// frames arriving in that window are dropped at the driver buffer.
pub struct BridgePipeline {
    gateway_id: String,
    topic_prefix: String,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn RecordPublisher>,
}

impl BridgePipeline {
    pub fn new(
        gateway_id: impl Into<String>,
        topic_prefix: impl Into<String>,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn RecordPublisher>,
    ) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            topic_prefix: topic_prefix.into(),
            clock,
            publisher,
        }
    }
}

#[async_trait]
impl FrameSink for BridgePipeline {
    async fn handle_frame(&self, frame: RadioFrame) {
        // Each frame gets its own root span, independent of the
        // receive loop's span.
        let span = info_span!(
            parent: Span::none(),
            "radio_frame",
            rssi = frame.rssi,
            snr = frame.snr,
            payload_size = frame.payload.len(),
            device_id = tracing::field::Empty,
        );

        async {
            let record = match enrich(&frame, &self.gateway_id, self.clock.as_ref()) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "dropping frame that failed validation");
                    return;
                }
            };

            Span::current().record("device_id", record.device_id.as_str());

            let topic = data_topic(&self.topic_prefix, &record.device_id);
            match self.publisher.publish_record(&topic, &record).await {
                Ok(()) => {
                    info!(device_id = %record.device_id, topic = %topic, "published sensor record");
                }
                Err(e) => {
                    error!(
                        device_id = %record.device_id,
                        topic = %topic,
                        error = %e,
                        "failed to publish sensor record, dropping"
                    );
                }
            }
        }
        .instrument(span)
        .await
    }
}

use common::{FrameSink, GatewayError, GatewayResult, RadioSettings, RadioTransceiver};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type SharedTransceiver = Arc<Mutex<Box<dyn RadioTransceiver>>>;

/// Radio transport: owns the transceiver and the receive loop task.
///
/// The loop polls the driver at a fixed interval and hands each frame
/// to the sink inline, so sink latency (enrichment, broker ack wait)
/// throttles radio throughput. Frames arriving while the sink is busy
/// stay in the driver buffer or are lost there; the gateway keeps no
/// queue of its own.
pub struct RadioTransport {
    transceiver: SharedTransceiver,
    poll_interval: Duration,
    stop_timeout: Duration,
    receive_task: Option<(CancellationToken, JoinHandle<()>)>,
}

impl RadioTransport {
    /// Configure the radio. A driver failure here is fatal for the
    /// gateway; there is no degraded mode without the radio.
    pub fn new(
        mut transceiver: Box<dyn RadioTransceiver>,
        settings: &RadioSettings,
        poll_interval: Duration,
        stop_timeout: Duration,
    ) -> GatewayResult<Self> {
        settings.validate()?;
        transceiver.configure(settings).map_err(|e| {
            GatewayError::Configuration(format!("failed to configure radio: {e}"))
        })?;

        info!(
            frequency_mhz = settings.frequency_mhz,
            spreading_factor = settings.spreading_factor,
            bandwidth_hz = settings.bandwidth_hz,
            coding_rate = settings.coding_rate,
            "radio configured"
        );

        Ok(Self {
            transceiver: Arc::new(Mutex::new(transceiver)),
            poll_interval,
            stop_timeout,
            receive_task: None,
        })
    }

    /// Spawn the receive loop. Calling this while a loop is already
    /// running is a no-op with a warning.
    pub fn start_receiving(&mut self, sink: Arc<dyn FrameSink>) {
        if let Some((_, handle)) = &self.receive_task {
            if !handle.is_finished() {
                warn!("radio receive loop is already running");
                return;
            }
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(receive_loop(
            Arc::clone(&self.transceiver),
            sink,
            token.clone(),
            self.poll_interval,
        ));
        self.receive_task = Some((token, handle));
        info!("radio receive loop started");
    }

    /// Signal the receive loop to stop and wait up to the bounded
    /// timeout for it to exit. On timeout the caller proceeds anyway;
    /// the stop is best-effort, not a guaranteed termination.
    pub async fn stop_receiving(&mut self) {
        let Some((token, handle)) = self.receive_task.take() else {
            debug!("radio receive loop is not running");
            return;
        };

        token.cancel();
        match tokio::time::timeout(self.stop_timeout, handle).await {
            Ok(Ok(())) => info!("radio receive loop stopped"),
            Ok(Err(e)) => error!(error = %e, "radio receive loop panicked"),
            Err(_) => warn!(
                timeout = ?self.stop_timeout,
                "radio receive loop did not stop within timeout, proceeding"
            ),
        }
    }

    /// One transmission attempt. Failures are logged, never raised.
    pub async fn send(&self, data: &[u8]) -> bool {
        let mut transceiver = self.transceiver.lock().await;
        match transceiver.send(data) {
            Ok(()) => {
                debug!(bytes = data.len(), "sent radio frame");
                true
            }
            Err(e) => {
                error!(error = %e, "failed to send radio frame");
                false
            }
        }
    }
}

async fn receive_loop(
    transceiver: SharedTransceiver,
    sink: Arc<dyn FrameSink>,
    token: CancellationToken,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("radio receive loop cancelled");
                break;
            }
            _ = ticker.tick() => {
                let frame = {
                    let mut radio = transceiver.lock().await;
                    if !radio.available() {
                        None
                    } else {
                        match radio.receive() {
                            Ok(frame) => Some(frame),
                            Err(e) => {
                                warn!(error = %e, "failed to read frame from radio");
                                None
                            }
                        }
                    }
                };

                if let Some(frame) = frame {
                    debug!(
                        rssi = frame.rssi,
                        snr = frame.snr,
                        payload_size = frame.payload.len(),
                        "received radio frame"
                    );
                    // Inline hand-off: the loop does not poll again
                    // until the sink is done with this frame.
                    sink.handle_frame(frame).await;
                }
            }
        }
    }
}

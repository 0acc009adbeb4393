use crate::mqtt::{control_topic, ReconnectPolicy};
use anyhow::anyhow;
use async_trait::async_trait;
use common::{BrokerSettings, GatewayError, GatewayResult, RecordPublisher, SensorRecord};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Broker connection lifecycle, owned by the transport task and
/// published over a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct PublishRequest {
    topic: String,
    payload: String,
    qos: QoS,
    retain: bool,
    done: oneshot::Sender<bool>,
}

/// Handle for publishing through the broker transport.
///
/// `publish` resolves only after the broker acknowledged the message
/// (QoS 1/2) or the ack timeout elapsed, so callers see one message in
/// flight at a time.
#[derive(Clone)]
pub struct MqttPublisher {
    tx: mpsc::Sender<PublishRequest>,
    qos: QoS,
}

impl MqttPublisher {
    /// One publish attempt. Returns false on any failure (transport
    /// down, broker rejected, ack timeout) after logging the cause.
    pub async fn publish(&self, topic: &str, payload: String, qos: QoS, retain: bool) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        let request = PublishRequest {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
            done: done_tx,
        };

        if self.tx.send(request).await.is_err() {
            error!(topic = %topic, "broker transport is not running, dropping publish");
            return false;
        }

        match done_rx.await {
            Ok(acked) => acked,
            Err(_) => {
                error!(topic = %topic, "broker transport dropped publish before completion");
                false
            }
        }
    }
}

#[async_trait]
impl RecordPublisher for MqttPublisher {
    async fn publish_record(&self, topic: &str, record: &SensorRecord) -> GatewayResult<()> {
        let payload = record.to_payload()?;
        if self.publish(topic, payload, self.qos, false).await {
            Ok(())
        } else {
            Err(GatewayError::Transport(format!(
                "publish to '{topic}' failed"
            )))
        }
    }
}

/// MQTT broker transport: owns the rumqttc session and event loop.
///
/// The outer loop in `run` is the reconnection policy; each iteration
/// is one broker session. Sessions end cleanly on shutdown or with an
/// error on any connection failure, after which the transport waits a
/// fixed backoff and connects again, indefinitely.
pub struct MqttBrokerTransport {
    settings: BrokerSettings,
    publish_rx: mpsc::Receiver<PublishRequest>,
    state_tx: watch::Sender<ConnectionState>,
    policy: ReconnectPolicy,
}

impl MqttBrokerTransport {
    pub fn new(
        settings: BrokerSettings,
    ) -> GatewayResult<(Self, MqttPublisher, watch::Receiver<ConnectionState>)> {
        settings.validate()?;
        let qos = qos_from_u8(settings.publish_qos)?;

        // Capacity 1: the pipeline publishes one record at a time
        let (publish_tx, publish_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let policy = ReconnectPolicy::new(settings.reconnect_backoff());

        let transport = Self {
            settings,
            publish_rx,
            state_tx,
            policy,
        };
        let publisher = MqttPublisher {
            tx: publish_tx,
            qos,
        };
        Ok((transport, publisher, state_rx))
    }

    #[allow(clippy::type_complexity)]
    pub fn into_runner_process(
        self,
    ) -> Box<
        dyn FnOnce(
                CancellationToken,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
            > + Send,
    > {
        Box::new(move |token| Box::pin(self.run(token)))
    }

    #[instrument(
        name = "broker_transport",
        skip_all,
        fields(
            host = %self.settings.host,
            port = self.settings.port,
            client_id = %self.settings.client_id,
        )
    )]
    pub async fn run(self, shutdown_token: CancellationToken) -> anyhow::Result<()> {
        let Self {
            settings,
            mut publish_rx,
            state_tx,
            mut policy,
        } = self;

        info!("starting broker transport");

        loop {
            if shutdown_token.is_cancelled() {
                break;
            }

            state_tx.send_replace(ConnectionState::Connecting);
            match run_session(
                &settings,
                &mut publish_rx,
                &state_tx,
                &mut policy,
                &shutdown_token,
            )
            .await
            {
                Ok(()) => {
                    debug!("broker session ended cleanly");
                    break;
                }
                Err(e) => {
                    state_tx.send_replace(ConnectionState::Disconnected);
                    let delay = policy.on_failure();
                    error!(
                        error = %format!("{e:#}"),
                        consecutive_failures = policy.consecutive_failures(),
                        backoff = ?delay,
                        "broker session failed, reconnecting after backoff"
                    );
                    tokio::select! {
                        _ = shutdown_token.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        state_tx.send_replace(ConnectionState::Disconnected);
        info!("broker transport stopped");
        Ok(())
    }
}

/// One broker session: connect, serve publish requests and broker
/// events until shutdown (Ok) or a connection failure (Err).
async fn run_session(
    settings: &BrokerSettings,
    publish_rx: &mut mpsc::Receiver<PublishRequest>,
    state_tx: &watch::Sender<ConnectionState>,
    policy: &mut ReconnectPolicy,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(Duration::from_secs(settings.keepalive_secs));
    options.set_clean_session(true);
    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        options.set_credentials(username, password);
    }
    if settings.use_tls {
        options.set_transport(Transport::tls_with_default_config());
    }

    let (client, mut eventloop) = AsyncClient::new(options, 16);
    // Acknowledgments still owed to publishes that already timed out;
    // the pkid space resets with each clean session.
    let mut stale_acks: u32 = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("shutdown signal received, disconnecting from broker");
                let _ = client.disconnect().await;
                return Ok(());
            }
            request = publish_rx.recv() => {
                match request {
                    Some(request) => {
                        execute_publish(settings, &client, &mut eventloop, state_tx, policy, &mut stale_acks, request).await?;
                    }
                    None => {
                        debug!("publish channel closed, disconnecting from broker");
                        let _ = client.disconnect().await;
                        return Ok(());
                    }
                }
            }
            event = eventloop.poll() => {
                let event = event.map_err(|e| anyhow!("MQTT event loop error: {e}"))?;
                handle_event(settings, &client, state_tx, policy, &mut stale_acks, event).await?;
            }
        }
    }
}

/// True when an incoming PubAck/PubComp settles the current publish.
///
/// Publishes are issued one at a time and the broker acknowledges them
/// in order, so the acks still owed to timed-out publishes arrive
/// first and must be discarded before an ack can be credited to the
/// publish in flight.
fn ack_settles_publish(stale_acks: &mut u32) -> bool {
    if *stale_acks > 0 {
        *stale_acks -= 1;
        false
    } else {
        true
    }
}

/// Issue one publish and wait for the broker's acknowledgment.
///
/// The pipeline keeps a single message in flight, so the next ack not
/// owed to a timed-out publish belongs to this one. The ack wait is
/// bounded by the configured timeout to avoid stalling the radio loop
/// indefinitely while the broker is unresponsive.
async fn execute_publish(
    settings: &BrokerSettings,
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    state_tx: &watch::Sender<ConnectionState>,
    policy: &mut ReconnectPolicy,
    stale_acks: &mut u32,
    request: PublishRequest,
) -> anyhow::Result<()> {
    let PublishRequest {
        topic,
        payload,
        qos,
        retain,
        done,
    } = request;

    debug!(topic = %topic, qos = ?qos, payload_size = payload.len(), "issuing publish");
    if let Err(e) = client.publish(topic.as_str(), qos, retain, payload).await {
        let _ = done.send(false);
        return Err(anyhow!("failed to queue publish: {e}"));
    }

    if qos == QoS::AtMostOnce {
        // Fire and forget; nothing to wait for
        let _ = done.send(true);
        return Ok(());
    }

    let deadline = Instant::now() + settings.ack_timeout();
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                warn!(
                    topic = %topic,
                    timeout = ?settings.ack_timeout(),
                    "publish acknowledgment timed out"
                );
                // The broker still owes this ack; it must not settle
                // the next publish.
                *stale_acks = stale_acks.saturating_add(1);
                let _ = done.send(false);
                return Ok(());
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::PubAck(_)))
                    | Ok(Event::Incoming(Packet::PubComp(_))) => {
                        if ack_settles_publish(stale_acks) {
                            debug!(topic = %topic, "publish acknowledged");
                            let _ = done.send(true);
                            return Ok(());
                        }
                        debug!(
                            topic = %topic,
                            remaining_stale = *stale_acks,
                            "discarded acknowledgment of a timed-out publish"
                        );
                    }
                    Ok(other) => {
                        handle_event(settings, client, state_tx, policy, stale_acks, other).await?;
                    }
                    Err(e) => {
                        let _ = done.send(false);
                        return Err(anyhow!("MQTT event loop error while awaiting ack: {e}"));
                    }
                }
            }
        }
    }
}

async fn handle_event(
    settings: &BrokerSettings,
    client: &AsyncClient,
    state_tx: &watch::Sender<ConnectionState>,
    policy: &mut ReconnectPolicy,
    stale_acks: &mut u32,
    event: Event,
) -> anyhow::Result<()> {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => {
            info!("connected to MQTT broker");
            state_tx.send_replace(ConnectionState::Connected);
            policy.on_connected();

            // Connect-before-subscribe ordering: the control
            // subscription is issued only once the broker accepted us.
            let topic = control_topic(&settings.topic_prefix, &settings.client_id);
            client
                .subscribe(topic.as_str(), QoS::AtLeastOnce)
                .await
                .map_err(|e| anyhow!("failed to subscribe to control topic: {e}"))?;
            info!(topic = %topic, "subscribed to control topic");
        }
        Event::Incoming(Packet::SubAck(_)) => {
            debug!("control subscription acknowledged");
        }
        Event::Incoming(Packet::Publish(publish)) => {
            // Only the control topic is subscribed; command semantics
            // belong to the cloud side.
            info!(
                topic = %publish.topic,
                payload = %String::from_utf8_lossy(&publish.payload),
                "received control message"
            );
        }
        Event::Incoming(Packet::PubAck(ack)) => {
            if ack_settles_publish(stale_acks) {
                debug!(pkid = ack.pkid, "publish acknowledgment with no publish in flight");
            } else {
                debug!(pkid = ack.pkid, "discarded acknowledgment of a timed-out publish");
            }
        }
        Event::Incoming(Packet::PubComp(comp)) => {
            if ack_settles_publish(stale_acks) {
                debug!(pkid = comp.pkid, "publish completion with no publish in flight");
            } else {
                debug!(pkid = comp.pkid, "discarded acknowledgment of a timed-out publish");
            }
        }
        Event::Incoming(Packet::Disconnect) => {
            return Err(anyhow!("broker requested disconnect"));
        }
        _ => {}
    }
    Ok(())
}

/// Logs broker connection transitions as a single stream, for field
/// debugging from journal output. Runs until cancelled or until the
/// transport is gone.
pub async fn log_connection_transitions(
    mut state_rx: watch::Receiver<ConnectionState>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    debug!("connection state channel closed");
                    break;
                }
                let state = *state_rx.borrow_and_update();
                info!(state = ?state, "broker connection state changed");
            }
        }
    }
}

fn qos_from_u8(qos: u8) -> GatewayResult<QoS> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(GatewayError::Configuration(format!(
            "publish QoS must be 0, 1 or 2, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::RecordMetadata;

    fn test_settings() -> BrokerSettings {
        BrokerSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: None,
            password: None,
            use_tls: false,
            topic_prefix: "sensors".to_string(),
            client_id: "test-gateway".to_string(),
            keepalive_secs: 60,
            publish_qos: 1,
            ack_timeout_secs: 1,
            reconnect_backoff_secs: 1,
        }
    }

    fn sample_record() -> SensorRecord {
        SensorRecord {
            device_id: "S1".to_string(),
            fields: serde_json::Map::new(),
            timestamp: 1_700_000_000,
            metadata: RecordMetadata {
                rssi: -42,
                snr: 9.5,
                gateway_id: "test-gateway".to_string(),
            },
        }
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_from_u8(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2).unwrap(), QoS::ExactlyOnce);
        assert!(qos_from_u8(3).is_err());
    }

    #[test]
    fn test_acks_for_timed_out_publishes_are_discarded() {
        let mut stale_acks = 0;
        assert!(ack_settles_publish(&mut stale_acks));

        // Two publishes timed out; their late acks must not settle
        // the publish that follows them.
        stale_acks = 2;
        assert!(!ack_settles_publish(&mut stale_acks));
        assert!(!ack_settles_publish(&mut stale_acks));
        assert!(ack_settles_publish(&mut stale_acks));
        assert_eq!(stale_acks, 0);
    }

    #[test]
    fn test_new_validates_settings() {
        let mut settings = test_settings();
        settings.use_tls = true; // no credentials
        assert!(matches!(
            MqttBrokerTransport::new(settings),
            Err(GatewayError::Configuration(_))
        ));
    }

    #[test]
    fn test_initial_state_is_disconnected() {
        let (_transport, _publisher, state_rx) =
            MqttBrokerTransport::new(test_settings()).unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_publisher_fails_when_transport_gone() {
        let (transport, publisher, _state_rx) =
            MqttBrokerTransport::new(test_settings()).unwrap();
        drop(transport);

        assert!(
            !publisher
                .publish("sensors/S1/data", "{}".to_string(), QoS::AtLeastOnce, false)
                .await
        );

        let err = publisher
            .publish_record("sensors/S1/data", &sample_record())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }

    #[tokio::test]
    async fn test_publisher_resolves_from_transport_response() {
        let (tx, mut rx) = mpsc::channel::<PublishRequest>(1);
        let publisher = MqttPublisher {
            tx,
            qos: QoS::AtLeastOnce,
        };

        // Fake transport task: ack the first publish, reject the second
        let responder = tokio::spawn(async move {
            let first = rx.recv().await.expect("first request");
            assert_eq!(first.topic, "sensors/S1/data");
            let _ = first.done.send(true);

            let second = rx.recv().await.expect("second request");
            let _ = second.done.send(false);
        });

        assert!(
            publisher
                .publish_record("sensors/S1/data", &sample_record())
                .await
                .is_ok()
        );
        let err = publisher
            .publish_record("sensors/S1/data", &sample_record())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));

        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_monitor_stops_when_transport_gone() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let token = CancellationToken::new();
        let handle = tokio::spawn(log_connection_transitions(state_rx, token));

        state_tx.send_replace(ConnectionState::Connecting);
        drop(state_tx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor did not stop after the channel closed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_connection_monitor_stops_on_cancellation() {
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let token = CancellationToken::new();
        let handle = tokio::spawn(log_connection_transitions(state_rx, token.clone()));

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor did not stop after cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_exits_cleanly_when_cancelled_before_connect() {
        let (transport, _publisher, _state_rx) =
            MqttBrokerTransport::new(test_settings()).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), transport.run(token))
            .await
            .expect("run did not return after cancellation");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_failed_sessions_retry_until_cancelled() {
        // Port 1 refuses connections, so every session fails and the
        // fixed-backoff retry loop spins until shutdown.
        let mut settings = test_settings();
        settings.reconnect_backoff_secs = 0;
        let (transport, _publisher, state_rx) = MqttBrokerTransport::new(settings).unwrap();

        let token = CancellationToken::new();
        let handle = tokio::spawn(transport.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!handle.is_finished(), "transport gave up on reconnects");

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run did not stop after cancellation")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(*state_rx.borrow(), ConnectionState::Disconnected);
    }
}

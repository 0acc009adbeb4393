mod config;

use common::{init_telemetry, GatewayError, GatewayResult, RadioTransceiver, SystemClock, TelemetryConfig};
use config::ServiceConfig;
use gateway_bridge::{BridgePipeline, MqttBrokerTransport, NullTransceiver, RadioTransport};
use gateway_runner::Runner;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&TelemetryConfig {
        log_level: config.log_level.clone(),
    }) {
        eprintln!("Failed to initialize telemetry: {e}");
        std::process::exit(1);
    }

    info!(
        broker = %format!("{}:{}", config.broker_host, config.broker_port),
        client_id = %config.client_id,
        radio_driver = %config.radio_driver,
        "starting LoRa gateway"
    );

    // Construction failures are fatal: the gateway has no partial mode
    // with only one transport up.
    let transceiver = match build_transceiver(&config) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "failed to select radio driver");
            std::process::exit(1);
        }
    };

    let mut radio = match RadioTransport::new(
        transceiver,
        &config.radio_settings(),
        config.radio_poll_interval(),
        config.radio_stop_timeout(),
    ) {
        Ok(radio) => radio,
        Err(e) => {
            error!(error = %e, "failed to initialize radio transport");
            std::process::exit(1);
        }
    };

    let (broker, publisher, connection_state) =
        match MqttBrokerTransport::new(config.broker_settings()) {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, "failed to initialize broker transport");
                std::process::exit(1);
            }
        };

    let pipeline = Arc::new(BridgePipeline::new(
        config.client_id.clone(),
        config.topic_prefix.clone(),
        Arc::new(SystemClock),
        Arc::new(publisher),
    ));

    info!("gateway initialized, running until SIGINT/SIGTERM");

    Runner::new()
        .with_boxed_process("broker_transport", broker.into_runner_process())
        .with_named_process("connection_monitor", move |token| async move {
            gateway_bridge::log_connection_transitions(connection_state, token).await;
            Ok(())
        })
        .with_named_process("radio_pipeline", move |token| async move {
            radio.start_receiving(pipeline);
            token.cancelled().await;
            radio.stop_receiving().await;
            Ok(())
        })
        .with_closer(|| async {
            info!("gateway shutdown complete");
            Ok(())
        })
        .run()
        .await;
}

fn build_transceiver(config: &ServiceConfig) -> GatewayResult<Box<dyn RadioTransceiver>> {
    match config.radio_driver.as_str() {
        #[cfg(feature = "sx127x")]
        "sx127x" => Ok(Box::new(gateway_bridge::Sx127xTransceiver::new())),
        #[cfg(not(feature = "sx127x"))]
        "sx127x" => Err(GatewayError::Configuration(
            "radio driver 'sx127x' requires a build with the sx127x feature".to_string(),
        )),
        "none" => Ok(Box::new(NullTransceiver::new())),
        other => Err(GatewayError::Configuration(format!(
            "unknown radio driver '{other}'"
        ))),
    }
}

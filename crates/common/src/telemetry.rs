use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Default log level when RUST_LOG is not set
    /// (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Initialize structured JSON logging.
///
/// RUST_LOG takes precedence over the configured level. Spans are
/// included in log output so per-message fields (device_id, topic)
/// appear on every line emitted inside a message span.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_span_list(true)
        .with_current_span(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

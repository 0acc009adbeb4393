use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Startup-time misconfiguration. Always fatal; the process exits
    /// non-zero instead of running in a degraded mode.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Payload could not be parsed as a JSON object. Per-message; the
    /// frame is dropped and the receive loop continues.
    #[error("Failed to parse payload: {0}")]
    PayloadParse(String),

    /// Payload is missing a required field. Per-message.
    #[error("Payload missing required field: {0}")]
    MissingField(&'static str),

    /// Payload field is present but unusable. Per-message.
    #[error("Payload field '{0}' is invalid: {1}")]
    InvalidField(&'static str, &'static str),

    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Radio driver failure on a single send/receive attempt.
    #[error("Radio transport error: {0}")]
    Radio(String),

    /// Broker publish failure. The message is not retried.
    #[error("Broker transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    /// True for per-message validation failures that drop the message
    /// without affecting the gateway lifecycle.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GatewayError::PayloadParse(_)
                | GatewayError::MissingField(_)
                | GatewayError::InvalidField(_, _)
        )
    }
}

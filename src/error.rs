use thiserror::Error;

use crate::models::SensorFault;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("link association failed: {0}")]
    LinkFailure(String),

    #[error("secure handshake failed: {0}")]
    SecureHandshakeFailure(String),

    /// Malformed or empty trust anchor; not recoverable by retrying
    #[error("invalid trust anchor: {0}")]
    TrustAnchor(String),

    #[error("broker authentication failed: {0}")]
    BrokerAuthFailure(String),

    #[error("sensor fault: {0}")]
    SensorFault(SensorFault),

    #[error("payload invalid: {0}")]
    PayloadInvalid(&'static str),

    #[error("publish rejected: {0}")]
    PublishRejected(String),

    #[error("session is not connected to the broker")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, TelemetryError>;

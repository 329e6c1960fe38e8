//! MQTT channel error types.

use ds_protocol::ShadowError;
use thiserror::Error;

/// Errors that can occur during MQTT operations.
#[derive(Debug, Error)]
pub enum MqttError {
    /// Missing or malformed credential material, detected before connecting.
    #[error("{0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("{0}")]
    Other(String),
}

/// Convenience alias for MQTT results.
pub type MqttResult<T> = Result<T, MqttError>;

impl From<MqttError> for ShadowError {
    fn from(err: MqttError) -> Self {
        match err {
            MqttError::Config(msg) => ShadowError::Config(msg),
            MqttError::Tls(msg) => ShadowError::Config(format!("TLS: {msg}")),
            other => ShadowError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_stay_config_errors() {
        let err: ShadowError = MqttError::Config("no key given".into()).into();
        assert!(matches!(err, ShadowError::Config(ref m) if m == "no key given"));

        let err: ShadowError = MqttError::Tls("bad pem".into()).into();
        assert!(matches!(err, ShadowError::Config(_)));
    }

    #[test]
    fn network_errors_become_transport_errors() {
        let err: ShadowError = MqttError::Connection("refused".into()).into();
        assert!(matches!(err, ShadowError::Transport(ref m) if m.contains("refused")));
    }
}

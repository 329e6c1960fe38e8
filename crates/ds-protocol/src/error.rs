//! Error taxonomy shared by the shadow client and the MQTT bridge.

use thiserror::Error;

/// Errors surfaced by shadow operations, regardless of transport.
#[derive(Debug, Error)]
pub enum ShadowError {
    /// The caller's own credentials are missing, invalid or expired.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// A token was requested for a device the caller cannot access.
    #[error("scope denied: {0}")]
    ScopeDenied(String),

    /// Malformed patch document or key path.
    #[error("validation error: {0}")]
    Validation(String),

    /// No shadow exists yet for the device.
    #[error("not found: {0}")]
    NotFound(String),

    /// Required transport credential material is missing or unusable.
    #[error("config error: {0}")]
    Config(String),

    /// Connection, handshake or stream failure. Fatal to the session.
    #[error("transport error: {0}")]
    Transport(String),

    /// The selected transport does not offer this operation.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ShadowError {
    /// True for errors detected before any network round trip.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Config(_))
    }
}

/// Convenience alias for shadow results.
pub type ShadowResult<T> = Result<T, ShadowError>;

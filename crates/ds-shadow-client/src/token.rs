//! Token scoper: exchange device ids for a bearer token scoped to them.

use async_trait::async_trait;

use ds_protocol::{
    AccessLevel, DeviceToken, ShadowError, ShadowResult, TokenRequest, TokenResponse,
};

use crate::config::ClientConfig;
use crate::http::HttpApi;

/// Issues device-scoped tokens.
///
/// Enables swapping the platform's token endpoint for a fake in tests.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Request a token covering exactly `device_ids` at `level`.
    ///
    /// Fails with `AuthFailure` when the caller's own credential is bad and
    /// `ScopeDenied` when any requested device is out of reach.
    async fn issue(&self, device_ids: &[String], level: AccessLevel) -> ShadowResult<DeviceToken>;
}

/// Token issuer backed by the platform's `/devices/token` endpoint.
pub struct HttpTokenIssuer {
    api: HttpApi,
    credential: Option<String>,
}

impl HttpTokenIssuer {
    pub fn new(config: &ClientConfig) -> ShadowResult<Self> {
        Ok(Self {
            api: HttpApi::new(config)?,
            credential: config.token.clone(),
        })
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn issue(&self, device_ids: &[String], level: AccessLevel) -> ShadowResult<DeviceToken> {
        if device_ids.is_empty() {
            return Err(ShadowError::Validation(
                "at least one device id is required".into(),
            ));
        }
        let credential = self
            .credential
            .as_deref()
            .ok_or_else(|| ShadowError::AuthFailure("no account credential configured".into()))?;

        let request = TokenRequest::new(device_ids, level);
        let response: TokenResponse = self
            .api
            .post_json("/devices/token", &format!("Bearer {credential}"), &request)
            .await?;

        tracing::debug!(devices = device_ids.len(), level = ?level, "device token issued");
        Ok(DeviceToken::new(response.token, device_ids.to_vec(), level))
    }
}

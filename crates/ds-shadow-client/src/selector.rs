//! Transport selection and per-invocation sessions.
//!
//! A `Session` is built once per invocation from explicit inputs and owns
//! its token and connection; nothing is read from process-wide state after
//! construction. MQTT is only ever used when asked for by name.

use ds_mqtt_channel::{MqttBridge, MqttSettings};
use ds_protocol::{
    AccessLevel, DeviceToken, Document, KeyPath, Shadow, ShadowResult, StateKey, StreamRequest,
};

use crate::config::ClientConfig;
use crate::rpc::RpcShadowClient;
use crate::token::{HttpTokenIssuer, TokenIssuer};
use crate::transport::{MqttTransport, ShadowEvents, ShadowTransport};

/// Which transport a session should use.
#[derive(Debug, Clone)]
pub enum TransportChoice {
    /// The primary request/response and streaming transport.
    Rpc,
    /// The MQTT bridge with its own connection settings.
    Mqtt(MqttSettings),
}

/// Everything an invocation says about the session it wants.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Devices named by the caller.
    pub devices: Vec<String>,
    /// A token supplied literally; skips token issuance.
    pub token: Option<String>,
    /// Ask for post rights when issuing a token.
    pub allow_post: bool,
    pub transport: TransportChoice,
}

impl SessionRequest {
    pub fn rpc(devices: Vec<String>) -> Self {
        Self {
            devices,
            token: None,
            allow_post: false,
            transport: TransportChoice::Rpc,
        }
    }

    /// Lowest access level that covers this request.
    pub fn access_level(&self) -> AccessLevel {
        if self.allow_post {
            AccessLevel::Mgmt
        } else {
            AccessLevel::None
        }
    }
}

/// Builds sessions from requests.
pub struct TransportSelector<I: TokenIssuer = HttpTokenIssuer> {
    config: ClientConfig,
    issuer: I,
}

impl TransportSelector<HttpTokenIssuer> {
    pub fn new(config: ClientConfig) -> ShadowResult<Self> {
        let issuer = HttpTokenIssuer::new(&config)?;
        Ok(Self { config, issuer })
    }
}

impl<I: TokenIssuer> TransportSelector<I> {
    pub fn with_issuer(config: ClientConfig, issuer: I) -> Self {
        Self { config, issuer }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The supplied token, or a freshly issued one scoped to the request's
    /// devices.
    pub async fn scoped_token(&self, request: &SessionRequest) -> ShadowResult<DeviceToken> {
        match request.token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => Ok(DeviceToken::supplied(token, request.devices.clone())),
            None => {
                self.issuer
                    .issue(&request.devices, request.access_level())
                    .await
            }
        }
    }

    /// Build a session on the requested transport.
    ///
    /// A failure here is final: there is no fallback to the other transport.
    pub async fn open(&self, request: SessionRequest) -> ShadowResult<Session> {
        match &request.transport {
            TransportChoice::Rpc => {
                let token = self.scoped_token(&request).await?;
                let client = RpcShadowClient::new(&self.config, token)?;
                tracing::info!(devices = request.devices.len(), "opened RPC shadow session");
                Ok(Session::new(Box::new(client), request.devices))
            }
            TransportChoice::Mqtt(settings) => {
                let bridge = MqttBridge::connect(settings, self.config.host()).await?;
                tracing::info!("opened MQTT shadow session");
                Ok(Session::new(
                    Box::new(MqttTransport::new(bridge)),
                    request.devices,
                ))
            }
        }
    }
}

/// One caller's connection to the shadow service.
pub struct Session {
    transport: Box<dyn ShadowTransport>,
    devices: Vec<String>,
}

impl Session {
    pub fn new(transport: Box<dyn ShadowTransport>, devices: Vec<String>) -> Self {
        Self { transport, devices }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Devices this session was opened for.
    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Read the session's devices.
    pub async fn get(&self) -> ShadowResult<Vec<Shadow>> {
        self.transport.get(&self.devices).await
    }

    pub async fn get_devices(&self, device_ids: &[String]) -> ShadowResult<Vec<Shadow>> {
        self.transport.get(device_ids).await
    }

    pub async fn patch(
        &self,
        device_id: &str,
        key: StateKey,
        document: Document,
    ) -> ShadowResult<Shadow> {
        self.transport.patch(device_id, key, document).await
    }

    pub async fn remove(&self, device_id: &str, key: StateKey, path: &KeyPath) -> ShadowResult<Shadow> {
        self.transport.remove(device_id, key, path).await
    }

    pub async fn stream(&self, request: StreamRequest) -> ShadowResult<ShadowEvents> {
        self.transport.stream(request).await
    }

    /// Release the connection. Dropping the session does the same, less
    /// gracefully.
    pub async fn close(self) -> ShadowResult<()> {
        self.transport.close().await
    }
}

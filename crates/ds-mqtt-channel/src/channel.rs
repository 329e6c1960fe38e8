//! MQTT channel: async client for the device state broker.
//!
//! Wraps `rumqttc::AsyncClient` behind the `Channel` trait so the bridge
//! can be driven by a mock in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS, Transport};

use crate::config::{BrokerEndpoint, Credentials, MqttSettings};
use crate::error::{MqttError, MqttResult};
use crate::tls;

// ── Channel trait ─────────────────────────────────────────────

/// Abstraction for MQTT message publishing and subscribing.
///
/// Enables mocking in tests without a real MQTT broker.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Publish a raw payload to a topic.
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()>;

    /// Subscribe to a topic filter.
    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()>;

    /// Ask the broker to close the connection.
    async fn disconnect(&self) -> MqttResult<()>;
}

// ── MqttChannel ───────────────────────────────────────────────

/// MQTT channel backed by `rumqttc`.
///
/// The `EventLoop` is returned separately from `new()`; nothing reaches the
/// network until it is polled.
pub struct MqttChannel {
    client: AsyncClient,
}

impl MqttChannel {
    /// Build the client for a resolved endpoint.
    ///
    /// Reads TLS material in certificate mode, so a bad path fails here,
    /// still before any socket is opened.
    pub fn new(endpoint: &BrokerEndpoint, settings: &MqttSettings) -> MqttResult<(Self, EventLoop)> {
        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(settings.keepalive_secs.into()));

        match &endpoint.credentials {
            Credentials::Tls { cert, key, ca } => {
                options.set_transport(tls::load_tls_transport(cert, key, ca)?);
            }
            Credentials::Basic { username, password } => {
                options.set_transport(Transport::Tcp);
                options.set_credentials(username, password);
            }
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        Ok((Self { client }, eventloop))
    }
}

#[async_trait]
impl Channel for MqttChannel {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| MqttError::Publish(e.to_string()))
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        self.client
            .subscribe(filter, qos)
            .await
            .map_err(|e| MqttError::Subscribe(e.to_string()))
    }

    async fn disconnect(&self) -> MqttResult<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| MqttError::Connection(e.to_string()))
    }
}

#[async_trait]
impl<C: Channel> Channel for Arc<C> {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        (**self).publish(topic, payload, qos).await
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        (**self).subscribe(filter, qos).await
    }

    async fn disconnect(&self) -> MqttResult<()> {
        (**self).disconnect().await
    }
}

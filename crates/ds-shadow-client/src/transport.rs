//! The capability set shared by both transports.
//!
//! Callers hold a `Box<dyn ShadowTransport>` and never branch on which
//! transport is behind it. Operations a transport cannot offer fail with
//! `Unsupported`.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::Mutex;

use ds_mqtt_channel::{Channel, MqttBridge, MqttChannel};
use ds_protocol::{
    Document, KeyPath, Shadow, ShadowError, ShadowPatch, ShadowResult, State, StateKey,
    StreamRequest, document,
};

use crate::rpc::RpcShadowClient;

/// A live sequence of shadows; terminates after yielding its final error.
pub type ShadowEvents = BoxStream<'static, ShadowResult<Shadow>>;

/// Read, patch, remove and stream shadows, independent of transport.
#[async_trait]
pub trait ShadowTransport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn get(&self, device_ids: &[String]) -> ShadowResult<Vec<Shadow>>;

    async fn patch(&self, device_id: &str, key: StateKey, document: Document)
    -> ShadowResult<Shadow>;

    async fn remove(&self, device_id: &str, key: StateKey, path: &KeyPath) -> ShadowResult<Shadow>;

    async fn stream(&self, request: StreamRequest) -> ShadowResult<ShadowEvents>;

    /// Release the underlying connection.
    async fn close(&self) -> ShadowResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ShadowTransport for RpcShadowClient {
    fn name(&self) -> &'static str {
        "rpc"
    }

    async fn get(&self, device_ids: &[String]) -> ShadowResult<Vec<Shadow>> {
        RpcShadowClient::get(self, device_ids).await
    }

    async fn patch(
        &self,
        device_id: &str,
        key: StateKey,
        document: Document,
    ) -> ShadowResult<Shadow> {
        RpcShadowClient::patch(self, device_id, key, document).await
    }

    async fn remove(&self, device_id: &str, key: StateKey, path: &KeyPath) -> ShadowResult<Shadow> {
        RpcShadowClient::remove(self, device_id, key, path).await
    }

    async fn stream(&self, request: StreamRequest) -> ShadowResult<ShadowEvents> {
        Ok(RpcShadowClient::stream(self, request).await?.boxed())
    }
}

/// Shadow transport over the MQTT bridge.
///
/// Offers the two operations the broker carries: reported patches are
/// published as reported deltas, and the stream yields desired deltas.
pub struct MqttTransport<C: Channel = MqttChannel> {
    bridge: Mutex<Option<MqttBridge<C>>>,
}

impl<C: Channel + 'static> MqttTransport<C> {
    pub fn new(bridge: MqttBridge<C>) -> Self {
        Self {
            bridge: Mutex::new(Some(bridge)),
        }
    }
}

fn closed() -> ShadowError {
    ShadowError::Transport("MQTT bridge already closed".into())
}

#[async_trait]
impl<C: Channel + 'static> ShadowTransport for MqttTransport<C> {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn get(&self, _device_ids: &[String]) -> ShadowResult<Vec<Shadow>> {
        Err(ShadowError::Unsupported(
            "get is not available over MQTT".into(),
        ))
    }

    async fn patch(
        &self,
        device_id: &str,
        key: StateKey,
        document: Document,
    ) -> ShadowResult<Shadow> {
        let patch = ShadowPatch::new(device_id, key, document)?;
        if key != StateKey::Reported {
            return Err(ShadowError::Unsupported(
                "only reported state can be published over MQTT".into(),
            ));
        }

        let payload = serde_json::to_string(&patch.document)
            .map_err(|e| ShadowError::Validation(e.to_string()))?;
        let guard = self.bridge.lock().await;
        let bridge = guard.as_ref().ok_or_else(closed)?;
        bridge.publish_reported_delta(device_id, &payload).await?;

        // The broker does not echo state back; hand over what was queued.
        Ok(patch.to_shadow())
    }

    async fn remove(&self, _device_id: &str, _key: StateKey, _path: &KeyPath) -> ShadowResult<Shadow> {
        Err(ShadowError::Unsupported(
            "remove is not available over MQTT".into(),
        ))
    }

    async fn stream(&self, request: StreamRequest) -> ShadowResult<ShadowEvents> {
        if request.sync {
            return Err(ShadowError::Unsupported(
                "sync on connect is not available over MQTT".into(),
            ));
        }
        let mut guard = self.bridge.lock().await;
        let bridge = guard.as_mut().ok_or_else(closed)?;
        let deltas = bridge.subscribe_desired_delta().await?;

        let events = deltas.filter_map(|item| async move {
            match item {
                Ok(message) => match document::parse_patch(&message.payload) {
                    Ok(data) => Some(Ok(Shadow {
                        device: message.device_id,
                        reported: None,
                        desired: Some(State::new(data)),
                    })),
                    Err(e) => {
                        tracing::warn!(
                            device_id = %message.device_id,
                            error = %e,
                            "skipping desired delta that is not a JSON object"
                        );
                        None
                    }
                },
                Err(e) => Some(Err(ShadowError::from(e))),
            }
        });
        Ok(events.boxed())
    }

    async fn close(&self) -> ShadowResult<()> {
        match self.bridge.lock().await.take() {
            Some(bridge) => Ok(bridge.disconnect().await?),
            None => Ok(()),
        }
    }
}

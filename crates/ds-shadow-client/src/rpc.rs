//! Shadow client over the primary (RPC) transport.

use ds_protocol::{
    DeviceToken, Document, GetRequest, GetResponse, KeyPath, RemoveRequest, Shadow, ShadowError,
    ShadowPatch, ShadowResult, StateKey, StreamRequest,
};

use crate::config::ClientConfig;
use crate::http::HttpApi;
use crate::stream::ShadowStream;

/// Reads, writes and streams shadows with a device-scoped token.
pub struct RpcShadowClient {
    api: HttpApi,
    token: DeviceToken,
}

impl RpcShadowClient {
    pub fn new(config: &ClientConfig, token: DeviceToken) -> ShadowResult<Self> {
        Ok(Self {
            api: HttpApi::new(config)?,
            token,
        })
    }

    pub fn token(&self) -> &DeviceToken {
        &self.token
    }

    /// Batch read. Never fails per device: a device without a shadow comes
    /// back with both facets absent, in the position it was asked for.
    pub async fn get(&self, device_ids: &[String]) -> ShadowResult<Vec<Shadow>> {
        let request = GetRequest {
            pool: device_ids.to_vec(),
        };
        let response: GetResponse = match self
            .api
            .post_json("/shadows/get", &self.token.bearer(), &request)
            .await
        {
            Ok(response) => response,
            Err(ShadowError::NotFound(detail)) => {
                tracing::debug!(detail = %detail, "no shadows recorded yet");
                GetResponse::default()
            }
            Err(e) => return Err(e),
        };

        if device_ids.is_empty() {
            return Ok(response.shadows);
        }
        Ok(align(device_ids, response.shadows))
    }

    /// Deep-merge `document` into one facet. Malformed documents are
    /// rejected before any request is sent.
    pub async fn patch(
        &self,
        device_id: &str,
        key: StateKey,
        document: Document,
    ) -> ShadowResult<Shadow> {
        let patch = ShadowPatch::new(device_id, key, document)?;
        let shadow: Shadow = self
            .api
            .post_json("/shadows/patch", &self.token.bearer(), &patch.to_shadow())
            .await?;
        tracing::info!(device_id = %device_id, state_key = %key, "shadow patched");
        Ok(shadow)
    }

    /// Delete the key at `path` from one facet.
    pub async fn remove(&self, device_id: &str, key: StateKey, path: &KeyPath) -> ShadowResult<Shadow> {
        let request = RemoveRequest {
            device: device_id.to_string(),
            state_key: key,
            key: path.to_string(),
        };
        let shadow: Shadow = self
            .api
            .post_json("/shadows/remove", &self.token.bearer(), &request)
            .await?;
        tracing::info!(device_id = %device_id, state_key = %key, path = %path, "shadow key removed");
        Ok(shadow)
    }

    /// Open a stream of shadows for every device the token can see.
    ///
    /// Returns once the channel is established; with `sync` the current
    /// shadows come first. Deltas are computed locally, so the upstream is
    /// always asked for full documents. A delta stream without `sync` is
    /// seeded from a read taken after the channel is up, so its first item
    /// carries only what changed.
    pub async fn stream(&self, request: StreamRequest) -> ShadowResult<ShadowStream> {
        let upstream = StreamRequest {
            only_delta: false,
            sync: request.sync,
        };
        let response = self
            .api
            .open_stream("/shadows/stream", &self.token.bearer(), &upstream)
            .await?;
        let mut stream = ShadowStream::from_response(response, request.only_delta);

        if request.only_delta && !request.sync {
            let known = self.get(self.token.devices()).await?;
            tracing::debug!(devices = known.len(), "delta stream seeded");
            stream.seed(known);
        }

        tracing::info!(
            only_delta = request.only_delta,
            sync = request.sync,
            "shadow stream established"
        );
        Ok(stream)
    }
}

/// Order results as requested, filling gaps with absent shadows.
fn align(device_ids: &[String], mut shadows: Vec<Shadow>) -> Vec<Shadow> {
    device_ids
        .iter()
        .map(|id| match shadows.iter().position(|s| &s.device == id) {
            Some(i) => shadows.swap_remove(i),
            None => Shadow::absent(id),
        })
        .collect()
}

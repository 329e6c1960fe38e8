//! Shared harness for end-to-end tests.
//!
//! Serves a `MockShadowService` over HTTP with the same contract the real
//! platform speaks, so the production `RpcShadowClient`, `HttpTokenIssuer`
//! and `TransportSelector` run unmodified against it.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::{mpsc, watch};

use ds_mqtt_channel::{MockChannel, MqttBridge, MqttResult};
use ds_protocol::{
    AccessLevel, GetRequest, GetResponse, KeyPath, RemoveRequest, Shadow, ShadowError, ShadowPatch,
    StateKey, StreamRequest, TokenRequest, TokenResponse,
};
use ds_shadow_client::{
    ClientConfig, MockShadowService, MqttTransport, Session, SessionRequest, TransportSelector,
};

/// The caller's own account credential accepted by `/devices/token`.
pub const ACCOUNT_TOKEN: &str = "account-secret";

/// A device nobody may request a token for.
pub const FOREIGN_DEVICE: &str = "someone-elses-device";

/// A token the platform issued: which devices, at what level.
#[derive(Debug, Clone)]
pub struct Grant {
    pub devices: HashSet<String>,
    pub level: AccessLevel,
    pub post: bool,
}

/// Platform state behind the HTTP routes.
pub struct Platform {
    pub shadows: MockShadowService,
    grants: Mutex<HashMap<String, Grant>>,
    shutdown: watch::Sender<bool>,
}

impl Platform {
    fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shadows: MockShadowService::new(),
            grants: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn grants(&self) -> Vec<Grant> {
        self.grants.lock().unwrap().values().cloned().collect()
    }

    fn grant_for(&self, headers: &HeaderMap) -> Result<Grant, HarnessError> {
        let token = bearer(headers).ok_or(HarnessError::Unauthorized)?;
        self.grants
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or(HarnessError::Unauthorized)
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Errors returned by the harness routes.
#[derive(Debug)]
enum HarnessError {
    Unauthorized,
    Forbidden(String),
    Shadow(ShadowError),
}

impl From<ShadowError> for HarnessError {
    fn from(err: ShadowError) -> Self {
        Self::Shadow(err)
    }
}

impl IntoResponse for HarnessError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid token".to_string()),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Self::Shadow(e @ ShadowError::Validation(_)) => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::Shadow(e @ ShadowError::NotFound(_)) => (StatusCode::NOT_FOUND, e.to_string()),
            Self::Shadow(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        let body = json!({"error": message, "status": status.as_u16()});
        (status, axum::Json(body)).into_response()
    }
}

type Shared = Arc<Platform>;

async fn issue_token(
    State(platform): State<Shared>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<TokenRequest>,
) -> Result<axum::Json<TokenResponse>, HarnessError> {
    if bearer(&headers) != Some(ACCOUNT_TOKEN) {
        return Err(HarnessError::Unauthorized);
    }
    if request.devices.contains_key(FOREIGN_DEVICE) {
        return Err(HarnessError::Forbidden(format!(
            "no access to {FOREIGN_DEVICE}"
        )));
    }

    let level = request
        .devices
        .values()
        .copied()
        .max()
        .unwrap_or_default();
    let mut grants = platform.grants.lock().unwrap();
    let token = format!("device-token-{}", grants.len() + 1);
    grants.insert(
        token.clone(),
        Grant {
            devices: request.devices.keys().cloned().collect(),
            level,
            post: request.post,
        },
    );
    Ok(axum::Json(TokenResponse { token }))
}

async fn get_shadows(
    State(platform): State<Shared>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<GetRequest>,
) -> Result<axum::Json<GetResponse>, HarnessError> {
    let grant = platform.grant_for(&headers)?;
    if let Some(id) = request.pool.iter().find(|id| !grant.devices.contains(*id)) {
        return Err(HarnessError::Forbidden(format!("{id} is outside the token")));
    }
    // Only devices with a record come back; the client fills the gaps.
    let shadows = platform
        .shadows
        .read(&request.pool)
        .into_iter()
        .filter(|s| !s.is_absent())
        .collect();
    Ok(axum::Json(GetResponse { shadows }))
}

async fn patch_shadow(
    State(platform): State<Shared>,
    headers: HeaderMap,
    axum::Json(shadow): axum::Json<Shadow>,
) -> Result<axum::Json<Shadow>, HarnessError> {
    let grant = platform.grant_for(&headers)?;
    if !grant.devices.contains(&shadow.device) {
        return Err(HarnessError::Forbidden(format!(
            "{} is outside the token",
            shadow.device
        )));
    }
    let (key, state) = match (shadow.reported, shadow.desired) {
        (Some(state), None) => (StateKey::Reported, state),
        (None, Some(state)) => (StateKey::Desired, state),
        _ => {
            return Err(ShadowError::Validation("patch exactly one state".into()).into());
        }
    };
    let patch = ShadowPatch::new(shadow.device, key, state.data)?;
    Ok(axum::Json(platform.shadows.apply_patch(&patch)))
}

async fn remove_key(
    State(platform): State<Shared>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<RemoveRequest>,
) -> Result<axum::Json<Shadow>, HarnessError> {
    let grant = platform.grant_for(&headers)?;
    if !grant.devices.contains(&request.device) {
        return Err(HarnessError::Forbidden(format!(
            "{} is outside the token",
            request.device
        )));
    }
    let path: KeyPath = request.key.parse()?;
    let (shadow, _found) = platform
        .shadows
        .apply_remove(&request.device, request.state_key, &path);
    Ok(axum::Json(shadow))
}

async fn stream_shadows(
    State(platform): State<Shared>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<StreamRequest>,
) -> Result<Response, HarnessError> {
    let grant = platform.grant_for(&headers)?;
    let mut shutdown = platform.shutdown.subscribe();

    let lines = platform
        .shadows
        .subscribe(request)
        .filter(move |item| {
            let visible = match item {
                Ok(shadow) => grant.devices.contains(&shadow.device),
                Err(_) => true,
            };
            async move { visible }
        })
        .map(|item| match item {
            Ok(shadow) => serde_json::to_string(&shadow)
                .map(|line| line + "\n")
                .map_err(std::io::Error::other),
            Err(e) => Err(std::io::Error::other(e.to_string())),
        })
        .take_until(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        });

    Ok(Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(lines))
        .map_err(|e| ShadowError::Transport(e.to_string()))?)
}

fn build_router(platform: Shared) -> Router {
    Router::new()
        .route("/devices/token", post(issue_token))
        .route("/shadows/get", post(get_shadows))
        .route("/shadows/patch", post(patch_shadow))
        .route("/shadows/remove", post(remove_key))
        .route("/shadows/stream", post(stream_shadows))
        .with_state(platform)
}

/// A platform served on a local port.
pub struct TestPlatform {
    pub platform: Shared,
    pub addr: SocketAddr,
}

impl TestPlatform {
    pub async fn start() -> Self {
        let platform = Arc::new(Platform::new());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(platform.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self { platform, addr }
    }

    /// Client config pointing at this platform with a valid account.
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            api_host: self.addr.to_string(),
            insecure: true,
            token: Some(ACCOUNT_TOKEN.into()),
            ..ClientConfig::default()
        }
    }

    pub fn selector(&self) -> TransportSelector {
        TransportSelector::new(self.config()).unwrap()
    }

    /// Open an RPC session for `devices` with a freshly issued token.
    pub async fn session(&self, devices: &[&str]) -> Session {
        self.selector()
            .open(SessionRequest::rpc(ids(devices)))
            .await
            .unwrap()
    }

    /// End every open stream from the server side.
    pub fn hang_up_streams(&self) {
        let _ = self.platform.shutdown.send(true);
    }
}

/// An MQTT session over a mock channel, plus the inbox feeding it.
pub struct MqttHarness {
    pub channel: Arc<MockChannel>,
    pub inbox: mpsc::Sender<MqttResult<rumqttc::Publish>>,
    pub session: Session,
}

impl MqttHarness {
    pub fn new(devices: &[&str]) -> Self {
        let channel = Arc::new(MockChannel::new());
        let (inbox, rx) = mpsc::channel(16);
        let bridge = MqttBridge::with_channel(channel.clone(), rx);
        let session = Session::new(Box::new(MqttTransport::new(bridge)), ids(devices));
        Self {
            channel,
            inbox,
            session,
        }
    }

    /// Deliver a desired delta as if the broker had forwarded it.
    pub async fn deliver_desired(&self, device_id: &str, payload: &str) {
        let topic = ds_protocol::topics::desired_delta(device_id);
        let publish =
            rumqttc::Publish::new(topic, rumqttc::QoS::AtLeastOnce, payload.as_bytes());
        self.inbox.send(Ok(publish)).await.unwrap();
    }
}

pub fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

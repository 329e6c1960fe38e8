//! MQTT connection settings and the authentication-mode policy.
//!
//! Exactly one mode is active per connection. Basic credentials win over
//! certificate paths when both are given. Every check here runs before any
//! socket is opened.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{MqttError, MqttResult};

/// Default port for mutual-TLS connections.
pub const TLS_PORT: u16 = 8883;
/// Default port for plaintext basic-auth connections.
pub const PLAIN_PORT: u16 = 1883;
/// CA bundle used when certificate mode is given no explicit CA.
pub const SYSTEM_CA_BUNDLE: &str = "/etc/ssl/certs/ca-certificates.crt";

/// How the bridge authenticates to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthMode {
    /// Mutual TLS with a client certificate and private key (PEM).
    Certificate {
        #[serde(default)]
        cert_path: Option<PathBuf>,
        #[serde(default)]
        key_path: Option<PathBuf>,
        #[serde(default)]
        ca_path: Option<PathBuf>,
    },
    /// Username and password, given as `login:pass`.
    Basic { credentials: String },
}

impl AuthMode {
    /// Pick the mode from command-line style inputs.
    pub fn select(
        basic: Option<String>,
        cert_path: Option<PathBuf>,
        key_path: Option<PathBuf>,
        ca_path: Option<PathBuf>,
    ) -> Self {
        match basic.filter(|b| !b.is_empty()) {
            Some(credentials) => Self::Basic { credentials },
            None => Self::Certificate {
                cert_path,
                key_path,
                ca_path,
            },
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Certificate { .. } => TLS_PORT,
            Self::Basic { .. } => PLAIN_PORT,
        }
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            Self::Certificate { .. } => Scheme::Mqtts,
            Self::Basic { .. } => Scheme::Mqtt,
        }
    }

    /// Validate the credential material without touching the network.
    pub fn resolve(&self) -> MqttResult<Credentials> {
        match self {
            Self::Certificate {
                cert_path,
                key_path,
                ca_path,
            } => {
                let cert = non_empty(cert_path)
                    .ok_or_else(|| MqttError::Config("no certificate given".into()))?;
                let key =
                    non_empty(key_path).ok_or_else(|| MqttError::Config("no key given".into()))?;
                let ca = non_empty(ca_path).unwrap_or_else(|| PathBuf::from(SYSTEM_CA_BUNDLE));
                Ok(Credentials::Tls { cert, key, ca })
            }
            Self::Basic { credentials } => {
                let (username, password) = credentials.split_once(':').ok_or_else(|| {
                    MqttError::Config("basic auth must be given as login:pass".into())
                })?;
                if username.is_empty() {
                    return Err(MqttError::Config("basic auth login is empty".into()));
                }
                Ok(Credentials::Basic {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
        }
    }
}

fn non_empty(path: &Option<PathBuf>) -> Option<PathBuf> {
    path.as_ref()
        .filter(|p| !p.as_os_str().is_empty())
        .cloned()
}

/// URI scheme matching the authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Mqtt,
    Mqtts,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mqtt => f.write_str("mqtt"),
            Self::Mqtts => f.write_str("mqtts"),
        }
    }
}

/// Validated credential material.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Tls {
        cert: PathBuf,
        key: PathBuf,
        ca: PathBuf,
    },
    Basic {
        username: String,
        password: String,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tls { cert, key, ca } => f
                .debug_struct("Tls")
                .field("cert", cert)
                .field("key", key)
                .field("ca", ca)
                .finish(),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// MQTT connection settings, loadable from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttSettings {
    /// Broker hostname. Derived from the API host when unset.
    #[serde(default)]
    pub broker_host: Option<String>,
    /// Broker port. Defaults by authentication mode when unset.
    #[serde(default)]
    pub broker_port: Option<u16>,
    /// MQTT client ID.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,
    /// How long `connect` waits for the broker's CONNACK.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    pub auth: AuthMode,
}

fn default_client_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| format!("dshadow-cli-{}", std::process::id()))
}

fn default_keepalive() -> u16 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

impl MqttSettings {
    pub fn new(auth: AuthMode) -> Self {
        Self {
            broker_host: None,
            broker_port: None,
            client_id: default_client_id(),
            keepalive_secs: default_keepalive(),
            connect_timeout_secs: default_connect_timeout(),
            auth,
        }
    }

    /// Resolve the concrete endpoint. Fails with `Config` before any I/O.
    pub fn resolve(&self, api_host: &str) -> MqttResult<BrokerEndpoint> {
        let credentials = self.auth.resolve()?;
        let host = match self.broker_host.as_deref().filter(|h| !h.is_empty()) {
            Some(host) => host.to_string(),
            None => derive_broker_host(api_host),
        };
        if host.is_empty() {
            return Err(MqttError::Config(
                "no broker host given and none could be derived".into(),
            ));
        }

        Ok(BrokerEndpoint {
            host,
            port: self.broker_port.unwrap_or_else(|| self.auth.default_port()),
            scheme: self.auth.scheme(),
            credentials,
        })
    }
}

/// Turn the platform API host into the broker host: drop any port and
/// swap the first `api.` for `mqtt.`.
pub fn derive_broker_host(api_host: &str) -> String {
    let host = api_host.split(':').next().unwrap_or_default();
    host.replacen("api.", "mqtt.", 1)
}

/// A fully resolved broker address with validated credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
    pub credentials: Credentials,
}

impl BrokerEndpoint {
    pub fn uri(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

//! Client configuration, loadable from TOML or environment.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use ds_protocol::{ShadowError, ShadowResult};

/// Connection settings for the platform API.
#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    /// `host:port` of the platform API, or a full `http(s)://` URL.
    #[serde(default = "default_api_host")]
    pub api_host: String,
    /// Talk plain HTTP instead of HTTPS.
    #[serde(default)]
    pub insecure: bool,
    /// The caller's own account credential. Only used to request device
    /// tokens.
    #[serde(default)]
    pub token: Option<String>,
    /// Timeout for bounded request/response calls.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// TCP/TLS connect timeout. Also applies to streams.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_api_host() -> String {
    "localhost:8000".into()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_host: default_api_host(),
            insecure: false,
            token: None,
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_host", &self.api_host)
            .field("insecure", &self.insecure)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl ClientConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: impl AsRef<Path>) -> ShadowResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ShadowError::Config(format!("failed to read '{}': {e}", path.display()))
        })?;
        toml::from_str(&contents)
            .map_err(|e| ShadowError::Config(format!("invalid config '{}': {e}", path.display())))
    }

    /// Defaults overridden by `DSHADOW_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Apply `DSHADOW_API`, `DSHADOW_TOKEN` and `DSHADOW_INSECURE` on top of
    /// this config.
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = lookup("DSHADOW_API").filter(|v| !v.is_empty()) {
            self.api_host = host;
        }
        if let Some(token) = lookup("DSHADOW_TOKEN").filter(|v| !v.is_empty()) {
            self.token = Some(token);
        }
        if let Some(flag) = lookup("DSHADOW_INSECURE") {
            self.insecure = flag.eq_ignore_ascii_case("true") || flag == "1";
        }
        self
    }

    /// Base URL for HTTP requests, without a trailing slash.
    pub fn base_url(&self) -> String {
        let host = self.api_host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else if self.insecure {
            format!("http://{host}")
        } else {
            format!("https://{host}")
        }
    }

    /// The API host with any URL scheme and path stripped, e.g.
    /// `api.example.com:8000`.
    pub fn host(&self) -> &str {
        let host = self
            .api_host
            .split_once("://")
            .map_or(self.api_host.as_str(), |(_, rest)| rest);
        host.split('/').next().unwrap_or(host)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

//! Device-scoped bearer tokens.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Access level granted over a device, lowest first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessLevel {
    /// No elevated access; only scopes which devices may be addressed.
    #[default]
    None,
    Read,
    Mgmt,
    Admin,
}

impl AccessLevel {
    /// Whether a token at this level may post device state.
    pub fn allows_post(self) -> bool {
        self >= Self::Mgmt
    }
}

/// Request body for issuing a device token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRequest {
    pub devices: BTreeMap<String, AccessLevel>,
    #[serde(default)]
    pub post: bool,
}

impl TokenRequest {
    pub fn new(device_ids: &[String], level: AccessLevel) -> Self {
        Self {
            devices: device_ids.iter().map(|id| (id.clone(), level)).collect(),
            post: level.allows_post(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// A bearer token scoped to a set of devices.
///
/// Opaque to this crate: no structure is checked locally. Lives for one
/// session and is never written anywhere by the client.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceToken {
    token: String,
    devices: Vec<String>,
    level: AccessLevel,
}

impl DeviceToken {
    pub fn new(token: impl Into<String>, devices: Vec<String>, level: AccessLevel) -> Self {
        Self {
            token: token.into(),
            devices,
            level,
        }
    }

    /// Wrap a token supplied literally by the caller.
    pub fn supplied(token: impl Into<String>, devices: Vec<String>) -> Self {
        Self::new(token, devices, AccessLevel::None)
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    pub fn level(&self) -> AccessLevel {
        self.level
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    pub fn into_string(self) -> String {
        self.token
    }
}

impl fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceToken")
            .field("token", &"<redacted>")
            .field("devices", &self.devices)
            .field("level", &self.level)
            .finish()
    }
}

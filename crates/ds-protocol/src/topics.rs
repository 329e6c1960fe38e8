//! MQTT topic builders and parsers for the device state hierarchy.
//!
//! Topic structure:
//! ```text
//! devices/{device_id}/state/desired/delta
//! devices/{device_id}/state/reported/delta
//! ```

use crate::shadow::StateKey;

const PREFIX: &str = "devices";

// ─── Per-device topics ───

pub fn desired_delta(device_id: &str) -> String {
    state_delta(device_id, StateKey::Desired)
}

pub fn reported_delta(device_id: &str) -> String {
    state_delta(device_id, StateKey::Reported)
}

pub fn state_delta(device_id: &str, key: StateKey) -> String {
    format!("{PREFIX}/{device_id}/state/{key}/delta")
}

// ─── Subscription patterns (with MQTT wildcards) ───

/// Desired deltas for every device the connection may see.
pub fn all_desired_deltas() -> String {
    format!("{PREFIX}/+/state/desired/delta")
}

/// Reported deltas for every device the connection may see.
pub fn all_reported_deltas() -> String {
    format!("{PREFIX}/+/state/reported/delta")
}

// ─── Topic parsing ───

/// Parsed state topic components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub device_id: String,
    pub key: StateKey,
}

/// Parse a concrete `devices/{id}/state/{key}/delta` topic.
/// Returns `None` for anything else, including wildcard filters.
pub fn parse_topic(topic: &str) -> Option<ParsedTopic> {
    let parts: Vec<&str> = topic.split('/').collect();

    let [PREFIX, device_id, "state", key, "delta"] = parts.as_slice() else {
        return None;
    };
    if device_id.is_empty() || *device_id == "+" || *device_id == "#" {
        return None;
    }

    Some(ParsedTopic {
        device_id: device_id.to_string(),
        key: key.parse().ok()?,
    })
}

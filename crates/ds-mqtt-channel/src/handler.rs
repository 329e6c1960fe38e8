//! Incoming message classification for the MQTT event loop.
//!
//! Turns raw publishes into typed variants so the bridge can route them
//! without matching topic strings itself.

use rumqttc::Publish;
use serde::Serialize;

use ds_protocol::StateKey;
use ds_protocol::topics;

/// A state delta received from the broker, payload untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaMessage {
    pub device_id: String,
    pub payload: String,
}

/// A classified incoming MQTT message.
#[derive(Debug, PartialEq, Eq)]
pub enum IncomingMessage {
    /// A controller changed a device's desired state.
    DesiredDelta(DeltaMessage),
    /// A device (or a simulation of one) reported state.
    ReportedDelta(DeltaMessage),
    /// Unrecognized topic.
    Unknown { topic: String, payload: Vec<u8> },
}

/// Classify a raw MQTT publish into a typed message.
pub fn classify(publish: &Publish) -> IncomingMessage {
    let Some(parsed) = topics::parse_topic(&publish.topic) else {
        return IncomingMessage::Unknown {
            topic: publish.topic.clone(),
            payload: publish.payload.to_vec(),
        };
    };

    let message = DeltaMessage {
        device_id: parsed.device_id,
        payload: String::from_utf8_lossy(&publish.payload).into_owned(),
    };
    match parsed.key {
        StateKey::Desired => IncomingMessage::DesiredDelta(message),
        StateKey::Reported => IncomingMessage::ReportedDelta(message),
    }
}

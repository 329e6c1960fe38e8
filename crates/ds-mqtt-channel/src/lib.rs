//! MQTT bridge for device shadow deltas.
//!
//! - `Channel` trait for publish/subscribe (mockable in tests)
//! - `MqttChannel` over mutual TLS or basic auth
//! - `MqttBridge` with the desired-delta subscription and reported-delta publish
//! - `MockChannel` for testing without a broker

pub mod bridge;
pub mod channel;
pub mod config;
pub mod error;
pub mod handler;
pub mod mock;
pub mod tls;

pub use bridge::{DesiredDeltas, MqttBridge};
pub use channel::{Channel, MqttChannel};
pub use config::{AuthMode, BrokerEndpoint, MqttSettings};
pub use error::{MqttError, MqttResult};
pub use handler::{DeltaMessage, IncomingMessage, classify};
pub use mock::MockChannel;

//! Device shadow client.
//!
//! - `TokenIssuer` / `HttpTokenIssuer` for device-scoped tokens
//! - `RpcShadowClient` for get/patch/remove/stream over the primary transport
//! - `ShadowTransport`, implemented by the RPC client and the MQTT bridge
//! - `TransportSelector` and `Session` for per-invocation wiring
//! - `MockShadowService` and `MockTokenIssuer` for tests

pub mod config;
mod http;
pub mod mock;
pub mod rpc;
pub mod selector;
pub mod stream;
pub mod token;
pub mod transport;

pub use config::ClientConfig;
pub use mock::{MockShadowService, MockTokenIssuer};
pub use rpc::RpcShadowClient;
pub use selector::{Session, SessionRequest, TransportChoice, TransportSelector};
pub use stream::ShadowStream;
pub use token::{HttpTokenIssuer, TokenIssuer};
pub use transport::{MqttTransport, ShadowEvents, ShadowTransport};

//! Shared types for device shadow synchronization.
//!
//! Everything here is pure data and pure functions: the shadow model with
//! its merge/remove semantics, per-subscriber delta tracking, scoped token
//! types, MQTT topic names, and the error taxonomy used by every transport.

pub mod delta;
pub mod document;
pub mod error;
pub mod shadow;
pub mod token;
pub mod topics;

pub use delta::DeltaTracker;
pub use document::{Document, KeyPath};
pub use error::{ShadowError, ShadowResult};
pub use shadow::*;
pub use token::*;

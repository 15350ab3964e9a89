//! devrelay server — the message relay core.
//!
//! The relay owns the connection registry, classifies every inbound frame,
//! and routes it to its destination(s). It implements `RelayHandler` so the
//! transport layer can drive it.

pub mod registry;
pub mod relay;

pub use registry::{ConnectionRecord, ConnectionRegistry};
pub use relay::Relay;

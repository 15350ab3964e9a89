//! devrelay protocol types.
//!
//! Every frame exchanged through the relay is a single JSON object tagged with
//! a fixed protocol version. This crate is the single source of truth for the
//! wire message, the connection identity format, the built-in server method
//! names, and the error kinds the relay reports.

pub mod codec;
pub mod error;
pub mod identity;
pub mod message;
pub mod methods;

pub use codec::{Classified, classify, parse};
pub use error::{RelayError, Violation};
pub use identity::ConnectionId;
pub use message::{ForwardedId, Message, PROTOCOL_VERSION};
pub use methods::ServerMethods;

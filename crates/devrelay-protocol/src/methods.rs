//! Built-in server method names.
//!
//! A request whose `target` is [`ServerMethods::TARGET`] is answered by the
//! relay itself instead of being forwarded to a peer.

/// Method names the relay answers on its own.
pub struct ServerMethods;

impl ServerMethods {
    /// The reserved target naming the relay.
    pub const TARGET: &str = "server";

    /// Returns the caller's own identity.
    pub const GET_ID: &str = "getid";

    /// Returns every other peer's identity mapped to its connect-time query parameters.
    pub const GET_PEERS: &str = "getpeers";
}

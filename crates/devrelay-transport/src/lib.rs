//! devrelay transport layer
//!
//! Serves the relay over axum. The transport layer handles:
//! - HTTP upgrade to WebSocket on the message path
//! - Per-connection outbound channels and connection state
//! - The host-facing control surface (`RelayControl`)
//! - The editor-launch and status HTTP endpoints
//!
//! Routing decisions live behind the `RelayHandler` trait so the transport
//! never inspects message contents.

pub mod connection;
pub mod editor;
pub mod server;

pub use connection::{ConnectionHandle, ConnectionState, SendError};
pub use editor::{EditorError, EditorLauncher, ProcessEditorLauncher, StackFrame};
pub use server::{
    RelayControl, RelayHandler, TransportConfig, TransportError, TransportServer, attach,
};

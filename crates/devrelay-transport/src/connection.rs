//! Connection handle and state tracking.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

/// Lifecycle of one connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgraded but not yet registered with the relay.
    Connecting,
    /// Registered; frames are routed and outbound sends are accepted.
    Open,
    /// Closed or errored; nothing is routed to or from it anymore.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("connection is {0:?}")]
    NotOpen(ConnectionState),
    #[error("outbound channel closed")]
    ChannelClosed,
}

/// Outbound side of a connection, shared between the registry and the socket task.
///
/// Sending pushes the encoded frame onto an unbounded channel that the
/// connection's socket task drains, so a send never waits on the network.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<String>,
    state: Arc<Mutex<ConnectionState>>,
    connected_at: Instant,
}

impl ConnectionHandle {
    /// Create a handle in the `Connecting` state together with the receiver
    /// its socket task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            tx,
            state: Arc::new(Mutex::new(ConnectionState::Connecting)),
            connected_at: Instant::now(),
        };
        (handle, rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// `Connecting` → `Open`. Returns false if the handle was not connecting.
    pub fn mark_open(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Open;
            true
        } else {
            false
        }
    }

    /// Move to `Closed`. Returns true only on the first call.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        let was_closed = *state == ConnectionState::Closed;
        *state = ConnectionState::Closed;
        !was_closed
    }

    pub fn send(&self, text: String) -> Result<(), SendError> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(SendError::NotOpen(state));
        }
        self.tx.send(text).map_err(|_| SendError::ChannelClosed)
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

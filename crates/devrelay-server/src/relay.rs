//! Relay core — routes each inbound message by its shape.
//!
//! Every message is handled to completion (parse, classify, route, send)
//! while holding the registry lock, so routing decisions never observe a
//! half-applied connect or disconnect.
//!
//! Requests forwarded to a peer get their id rewritten to
//! `{requestId, clientId}`; the peer echoes that id back on its response, which
//! is all the relay needs to find the requester again. No table of pending
//! requests is kept.

use std::sync::atomic::{AtomicU64, Ordering};

use devrelay_protocol::{
    Classified, ConnectionId, ForwardedId, Message, RelayError, ServerMethods, Violation, classify,
    parse,
};
use devrelay_transport::{ConnectionHandle, RelayHandler};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::registry::ConnectionRegistry;

/// The message relay.
#[derive(Debug, Default)]
pub struct Relay {
    registry: Mutex<ConnectionRegistry>,
    next_seq: AtomicU64,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next identity, register the connection, and open it.
    pub fn accept(&self, handle: ConnectionHandle, request_url: &str) -> ConnectionId {
        let mut registry = self.registry.lock();
        let id = ConnectionId::new(self.next_seq.fetch_add(1, Ordering::Relaxed));
        if registry.register(id, handle.clone(), request_url) {
            handle.mark_open();
        } else {
            error!(client = %id, "Identity already registered; connection left unopened");
        }
        id
    }

    /// Unregister and close a connection. Returns false if it was already gone.
    pub fn release(&self, id: ConnectionId) -> bool {
        let Some(record) = self.registry.lock().unregister(id) else {
            return false;
        };
        record.handle().close();
        debug!(client = %id, "Connection released");
        true
    }

    /// Handle one inbound frame from `from`.
    pub fn handle_frame(&self, from: ConnectionId, payload: &str, is_binary: bool) {
        let message = match parse(payload, is_binary) {
            Ok(message) => message,
            Err(violation) => {
                error!(client = %from, "Received message not matching protocol: {violation}");
                return;
            }
        };

        let registry = self.registry.lock();
        if !registry.contains(from) {
            debug!(client = %from, "Ignoring message from unregistered connection");
            return;
        }

        let reply_id = message.id.clone();
        let diagnostic = message.diagnostic();
        let shape = classify(message);
        debug!(client = %from, kind = shape.kind(), "Routing message");

        if let Err(e) = route(&registry, from, shape) {
            report_failure(&registry, from, reply_id, &diagnostic, e);
        }
    }

    /// Broadcast as the relay itself; no connection is excluded.
    pub fn server_broadcast(&self, method: &str, params: Option<Value>) {
        fan_out(&self.registry.lock(), None, method, params);
    }

    pub fn connection_count(&self) -> usize {
        self.registry.lock().len()
    }
}

impl RelayHandler for Relay {
    fn connect(&self, handle: ConnectionHandle, request_url: &str) -> ConnectionId {
        self.accept(handle, request_url)
    }

    fn frame(&self, from: ConnectionId, payload: &str, is_binary: bool) {
        self.handle_frame(from, payload, is_binary);
    }

    fn disconnect(&self, id: ConnectionId) {
        self.release(id);
    }

    fn broadcast(&self, method: &str, params: Option<Value>) {
        self.server_broadcast(method, params);
    }

    fn connection_count(&self) -> usize {
        Relay::connection_count(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Routing
// ─────────────────────────────────────────────────────────────────────────────

fn route(registry: &ConnectionRegistry, from: ConnectionId, shape: Classified) -> Result<(), RelayError> {
    match shape {
        Classified::Broadcast { method, params } => {
            fan_out(registry, Some(from), &method, params);
            Ok(())
        }
        Classified::Request { id, method, target, .. } if target == ServerMethods::TARGET => {
            let result = call_server_method(registry, from, &method)?;
            deliver(registry, &from.to_string(), &Message::reply(id, result))
        }
        Classified::Request {
            id,
            method,
            target,
            params,
        } => {
            let id = id.map(|request_id| ForwardedId::new(request_id, from));
            deliver(registry, &target, &Message::forwarded_request(method, params, id))
        }
        Classified::Response { id, result, error } => {
            let ForwardedId {
                request_id,
                client_id,
            } = id;
            deliver(registry, &client_id, &Message::response(request_id, result, error))
        }
        Classified::Invalid => Err(Violation::UnmatchedShape.into()),
    }
}

fn call_server_method(
    registry: &ConnectionRegistry,
    caller: ConnectionId,
    method: &str,
) -> Result<Value, RelayError> {
    match method {
        ServerMethods::GET_ID => Ok(Value::String(caller.to_string())),
        ServerMethods::GET_PEERS => Ok(Value::Object(
            registry
                .snapshot()
                .filter(|(id, _)| **id != caller)
                .map(|(id, record)| (id.to_string(), record.query_params()))
                .collect(),
        )),
        other => Err(RelayError::UnknownMethod(other.to_string())),
    }
}

/// Send to every registered connection except `sender`. Failures are logged
/// per peer and never stop delivery to the rest.
fn fan_out(
    registry: &ConnectionRegistry,
    sender: Option<ConnectionId>,
    method: &str,
    params: Option<Value>,
) {
    if registry.is_empty() {
        warn!("No apps connected. Sending \"{method}\" to all connected clients failed.");
        return;
    }

    let text = match Message::broadcast(method, params).to_text() {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode broadcast \"{method}\": {e}");
            return;
        }
    };

    for (id, record) in registry.snapshot() {
        if Some(*id) == sender {
            continue;
        }
        if let Err(e) = record.handle().send(text.clone()) {
            error!(client = %id, "Failed to send broadcast to client: {e}");
        }
    }
}

fn deliver(registry: &ConnectionRegistry, target: &str, message: &Message) -> Result<(), RelayError> {
    let handle = registry.lookup(target)?;
    let text = message.to_text()?;
    handle
        .send(text)
        .map_err(|e| RelayError::DeliverySendFailure {
            target: target.to_string(),
            reason: e.to_string(),
        })
}

/// Echo a routing failure back to the sender when the message had an id;
/// otherwise there is no way to address a reply, so only log it.
fn report_failure(
    registry: &ConnectionRegistry,
    from: ConnectionId,
    reply_id: Option<Value>,
    diagnostic: &Value,
    error: RelayError,
) {
    let Some(id) = reply_id else {
        error!(client = %from, message = %diagnostic, "Handling message failed: {error}");
        return;
    };

    if error.is_protocol_violation() {
        error!(client = %from, message = %diagnostic, "Received message not matching protocol: {error}");
    } else {
        debug!(client = %from, "Replying with error: {error}");
    }
    let reply = Message::error_reply(Some(id), error.to_string());
    if let Err(send_error) = deliver(registry, &from.to_string(), &reply) {
        error!(
            client = %from,
            message = %diagnostic,
            "Failed to reply with error: {error} (due to: {send_error})"
        );
    }
}

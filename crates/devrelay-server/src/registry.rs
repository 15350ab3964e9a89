//! ConnectionRegistry — live connections keyed by identity.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use devrelay_protocol::{ConnectionId, RelayError};
use devrelay_transport::ConnectionHandle;
use serde_json::{Map, Value};

/// One registered connection.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    handle: ConnectionHandle,
    /// Path and query of the upgrade request, kept for `getpeers`.
    request_url: String,
}

impl ConnectionRecord {
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn request_url(&self) -> &str {
        &self.request_url
    }

    /// Query parameters of the upgrade request as a JSON object. A key seen
    /// once maps to its value; a repeated key maps to an array of its values.
    pub fn query_params(&self) -> Value {
        let query = self
            .request_url
            .split_once('?')
            .map_or("", |(_, query)| query);

        let mut params = Map::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = Value::String(value.into_owned());
            match params.get_mut(key.as_ref()) {
                Some(Value::Array(values)) => values.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    params.insert(key.into_owned(), value);
                }
            }
        }
        Value::Object(params)
    }
}

/// Maps each connection identity to its record.
///
/// Identities are allocated in increasing order, so iterating the map in key
/// order is also insertion order.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: BTreeMap<ConnectionId, ConnectionRecord>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Returns false (leaving the existing entry alone)
    /// if `id` is already registered.
    pub fn register(
        &mut self,
        id: ConnectionId,
        handle: ConnectionHandle,
        request_url: impl Into<String>,
    ) -> bool {
        match self.entries.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(ConnectionRecord {
                    handle,
                    request_url: request_url.into(),
                });
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Resolve an identity as it appears on the wire.
    pub fn lookup(&self, identity: &str) -> Result<&ConnectionHandle, RelayError> {
        identity
            .parse::<ConnectionId>()
            .ok()
            .and_then(|id| self.entries.get(&id))
            .map(ConnectionRecord::handle)
            .ok_or_else(|| RelayError::unresolved(identity))
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionRecord> {
        self.entries.get(&id)
    }

    /// Remove a connection. Safe to call more than once; later calls return `None`.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<ConnectionRecord> {
        self.entries.remove(&id)
    }

    /// All entries in acceptance order.
    pub fn snapshot(&self) -> impl Iterator<Item = (&ConnectionId, &ConnectionRecord)> {
        self.entries.iter()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(url: &str) -> ConnectionRecord {
        let (handle, _rx) = ConnectionHandle::new();
        ConnectionRecord {
            handle,
            request_url: url.into(),
        }
    }

    #[test]
    fn query_params_single_values() {
        let params = record("/message?role=debugger&name=Chrome%20DevTools").query_params();
        assert_eq!(params, json!({"role": "debugger", "name": "Chrome DevTools"}));
    }

    #[test]
    fn query_params_repeated_key_becomes_array() {
        let params = record("/message?tag=a&tag=b&tag=c").query_params();
        assert_eq!(params, json!({"tag": ["a", "b", "c"]}));
    }

    #[test]
    fn query_params_empty_without_query() {
        assert_eq!(record("/message").query_params(), json!({}));
        assert_eq!(record("/message?").query_params(), json!({}));
    }

    #[test]
    fn register_rejects_duplicate_identity() {
        let mut registry = ConnectionRegistry::new();
        let (first, _rx1) = ConnectionHandle::new();
        let (second, _rx2) = ConnectionHandle::new();
        let id = ConnectionId::new(0);

        assert!(registry.register(id, first, "/message?first"));
        assert!(!registry.register(id, second, "/message?second"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(id).unwrap().request_url(), "/message?first");
    }

    #[test]
    fn lookup_unknown_identity_fails() {
        let registry = ConnectionRegistry::new();
        let err = registry.lookup("client#3").unwrap_err();
        assert!(matches!(err, RelayError::UnresolvedTarget(ref id) if id == "client#3"));
        assert!(registry.lookup("not-an-identity").is_err());
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::new();
        let id = ConnectionId::new(5);
        registry.register(id, handle, "/message");

        assert!(registry.unregister(id).is_some());
        assert!(registry.unregister(id).is_none());
        assert!(!registry.contains(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_in_acceptance_order() {
        let mut registry = ConnectionRegistry::new();
        for seq in [2, 0, 11, 1] {
            let (handle, _rx) = ConnectionHandle::new();
            registry.register(ConnectionId::new(seq), handle, "/message");
        }
        let order: Vec<u64> = registry.snapshot().map(|(id, _)| id.seq()).collect();
        assert_eq!(order, [0, 1, 2, 11]);
    }
}

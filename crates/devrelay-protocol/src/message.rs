//! The wire message and its outbound constructors.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::identity::ConnectionId;

/// The only protocol version the relay accepts.
pub const PROTOCOL_VERSION: u32 = 2;

/// One frame on the wire.
///
/// Every field other than `version` is optional and kept as raw JSON: which
/// fields are present decides the message shape (see [`crate::classify`]).
/// An explicit `null` counts as present, an absent key does not, and absent
/// fields are left out when the message is serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub version: u32,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub method: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Keeps `null` as `Some(Value::Null)`; only a missing key becomes `None`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Identifier the relay puts on a request it forwards to a peer.
///
/// Carries the requester's original id together with the requester's identity
/// so the peer's response can be routed back without any pending-request table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedId {
    pub request_id: Value,
    pub client_id: String,
}

impl ForwardedId {
    pub fn new(request_id: Value, requester: ConnectionId) -> Self {
        Self {
            request_id,
            client_id: requester.to_string(),
        }
    }

    /// Read a composite id: an object with a string `clientId` and a `requestId` key.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let client_id = object.get("clientId")?.as_str()?.to_string();
        let request_id = object.get("requestId")?.clone();
        Some(Self {
            request_id,
            client_id,
        })
    }

    pub fn into_value(self) -> Value {
        json!({
            "requestId": self.request_id,
            "clientId": self.client_id,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound constructors
// ─────────────────────────────────────────────────────────────────────────────

impl Message {
    fn versioned() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id: None,
            method: None,
            target: None,
            params: None,
            result: None,
            error: None,
        }
    }

    /// Copy of a broadcast as delivered to peers: only `version`, `method`, `params`.
    pub fn broadcast(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: Some(Value::String(method.into())),
            params,
            ..Self::versioned()
        }
    }

    /// Reply from the relay to a server-targeted request.
    pub fn reply(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            ..Self::versioned()
        }
    }

    /// Error reply sent back to the originator of a failed message.
    pub fn error_reply(id: Option<Value>, error: impl Into<String>) -> Self {
        Self {
            id,
            error: Some(Value::String(error.into())),
            ..Self::versioned()
        }
    }

    /// A peer-to-peer request with its id rewritten to embed the requester.
    pub fn forwarded_request(
        method: impl Into<String>,
        params: Option<Value>,
        id: Option<ForwardedId>,
    ) -> Self {
        Self {
            id: id.map(ForwardedId::into_value),
            method: Some(Value::String(method.into())),
            params,
            ..Self::versioned()
        }
    }

    /// A response delivered back to its requester under the original id.
    pub fn response(id: Value, result: Option<Value>, error: Option<Value>) -> Self {
        Self {
            id: Some(id),
            result,
            error,
            ..Self::versioned()
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Field summary used in failure logs; payload bodies are reduced to
    /// `"defined"` / `"undefined"` markers.
    pub fn diagnostic(&self) -> Value {
        fn marker(field: &Option<Value>) -> &'static str {
            if field.is_some() { "defined" } else { "undefined" }
        }

        json!({
            "id": self.id,
            "method": self.method,
            "target": self.target,
            "error": marker(&self.error),
            "params": marker(&self.params),
            "result": marker(&self.result),
        })
    }
}

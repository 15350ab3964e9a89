//! Frame parsing and message classification.

use serde_json::Value;

use crate::error::Violation;
use crate::message::{ForwardedId, Message, PROTOCOL_VERSION};

/// A validated message sorted into the shape that decides how it is routed.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// Fan out to every peer except the sender.
    Broadcast {
        method: String,
        params: Option<Value>,
    },
    /// Addressed to the relay itself (`target == "server"`) or to one peer.
    Request {
        id: Option<Value>,
        method: String,
        target: String,
        params: Option<Value>,
    },
    /// Answer to a forwarded request; `id.client_id` names the requester.
    Response {
        id: ForwardedId,
        result: Option<Value>,
        error: Option<Value>,
    },
    /// Matches none of the shapes above.
    Invalid,
}

impl Classified {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Broadcast { .. } => "broadcast",
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::Invalid => "invalid",
        }
    }
}

/// Decode one frame. Binary frames, malformed JSON, and any `version` other
/// than [`PROTOCOL_VERSION`] are rejected.
pub fn parse(payload: &str, is_binary: bool) -> Result<Message, Violation> {
    if is_binary {
        return Err(Violation::BinaryFrame);
    }

    let mut value: Value = serde_json::from_str(payload)
        .map_err(|e| Violation::MalformedJson(format!("{e}\n{payload}")))?;

    // Any number equal to the version is accepted, so `2.0` passes but `"2"` does not.
    let version = value.get("version");
    if version.and_then(Value::as_f64) != Some(f64::from(PROTOCOL_VERSION)) {
        let found = version.map_or_else(|| "undefined".to_string(), Value::to_string);
        return Err(Violation::WrongVersion(found));
    }
    if let Some(object) = value.as_object_mut() {
        object.insert("version".into(), Value::from(PROTOCOL_VERSION));
    }

    serde_json::from_value(value).map_err(|e| Violation::MalformedJson(e.to_string()))
}

/// Sort a message into its shape. Predicates are tried in order and the first
/// match wins, so a message carrying both `method`+`target` and a
/// response-shaped `id` is a request.
pub fn classify(message: Message) -> Classified {
    let Message {
        id,
        method,
        target,
        params,
        result,
        error,
        ..
    } = message;

    if let Some(Value::String(method)) = method {
        if id.is_none() && target.is_none() {
            return Classified::Broadcast { method, params };
        }
        if let Some(Value::String(target)) = target {
            return Classified::Request {
                id,
                method,
                target,
                params,
            };
        }
    }

    if result.is_some() || error.is_some() {
        if let Some(id) = id.as_ref().and_then(ForwardedId::from_value) {
            return Classified::Response { id, result, error };
        }
    }

    Classified::Invalid
}

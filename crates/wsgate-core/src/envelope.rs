//! Wire-level message envelopes.
//!
//! Every frame exchanged with a client is one JSON envelope. Inbound
//! envelopes carry a caller-chosen correlation `id` that is echoed back
//! verbatim on the response; the gateway never interprets it. The `data`
//! payload is an opaque JSON value that each handler parses into its own
//! typed request struct.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-initiated envelope sent once per connection, right after accept.
pub const TYPE_WELCOME: &str = "welcome";
/// Application-level liveness probe.
pub const TYPE_PING: &str = "ping";
/// Reply to [`TYPE_PING`].
pub const TYPE_PONG: &str = "pong";
/// Failure envelope; `error` carries the machine-readable code.
pub const TYPE_ERROR: &str = "error";

/// Machine-readable error codes carried in [`ErrorBody::code`].
///
/// Handlers may introduce their own codes; these are the ones the gateway
/// itself emits.
pub mod codes {
    /// The inbound frame was not a well-formed envelope (bad UTF-8, bad
    /// JSON, missing `type`), or a handler could not parse its `data`.
    pub const INVALID_FORMAT: &str = "INVALID_FORMAT";
    /// No handler is registered for the envelope's `type`.
    pub const UNKNOWN_MESSAGE_TYPE: &str = "UNKNOWN_MESSAGE_TYPE";
    /// A handler failed; details stay in the server log.
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    /// The credentials were rejected by the verifier.
    pub const AUTH_FAILED: &str = "AUTH_FAILED";
    /// The verifier itself could not be reached.
    pub const VERIFIER_UNAVAILABLE: &str = "VERIFIER_UNAVAILABLE";
    /// The connection already has a bound user id.
    pub const ALREADY_AUTHENTICATED: &str = "ALREADY_AUTHENTICATED";
}

/// Inbound message envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// Caller-chosen correlation token, echoed back on the response.
    #[serde(default)]
    pub id: Option<String>,
    /// Handler selector.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Sender-side timestamp; not validated against wall-clock skew.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Handler-specific payload.
    #[serde(default)]
    pub data: Value,
}

/// Outbound message envelope.
///
/// Exactly one of `data` (success) or `error` (failure) is present.
/// Server-initiated pushes (welcome, broadcasts) carry no `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Set by the gateway at the moment of response construction.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Failure detail carried by an `error` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ResponseEnvelope {
    /// Build a success envelope with a fresh timestamp.
    pub fn success(id: Option<String>, msg_type: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            msg_type: msg_type.into(),
            timestamp: now_rfc3339(),
            data: Some(data),
            error: None,
        }
    }

    /// Build an `error` envelope with a fresh timestamp.
    pub fn failure(
        id: Option<String>,
        code: &str,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self {
            id,
            msg_type: TYPE_ERROR.to_string(),
            timestamp: now_rfc3339(),
            data: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message: message.into(),
                details,
            }),
        }
    }

    /// Whether this envelope reports a failure.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Current wall-clock time as an RFC 3339 string with millisecond precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_carries_data_not_error() {
        let resp = ResponseEnvelope::success(Some("7".into()), TYPE_PONG, json!({"message": "pong"}));
        assert_eq!(resp.id.as_deref(), Some("7"));
        assert_eq!(resp.msg_type, TYPE_PONG);
        assert!(resp.data.is_some());
        assert!(!resp.is_error());
        assert!(!resp.timestamp.is_empty());
    }

    #[test]
    fn failure_echoes_id_and_code() {
        let resp = ResponseEnvelope::failure(
            Some("x".into()),
            codes::UNKNOWN_MESSAGE_TYPE,
            "unknown message type: nope",
            None,
        );
        assert_eq!(resp.msg_type, TYPE_ERROR);
        assert_eq!(resp.id.as_deref(), Some("x"));
        let err = resp.error.expect("error body");
        assert_eq!(err.code, codes::UNKNOWN_MESSAGE_TYPE);
        assert!(err.details.is_none());
    }

    #[test]
    fn serialized_failure_omits_data() {
        let resp = ResponseEnvelope::failure(None, codes::INVALID_FORMAT, "bad frame", None);
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("id").is_none());
        assert!(json.get("data").is_none());
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"]["code"], codes::INVALID_FORMAT);
    }
}

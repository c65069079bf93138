//! JSON codec for the wsgate wire protocol.
//!
//! Frames are UTF-8 JSON text; WebSocket message boundaries delimit
//! envelopes, so there is no length prefix. Decoding never panics: every
//! malformed input maps to a typed [`DecodeError`] the caller turns into
//! an `INVALID_FORMAT` response.

use crate::envelope::{Envelope, ResponseEnvelope};
use crate::error::GateResult;
use serde_json::Value;
use thiserror::Error;

/// Why an inbound frame failed to decode.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid UTF-8")]
    NotUtf8,

    #[error("frame is not valid JSON: {0}")]
    NotJson(String),

    #[error("envelope has no `type` field")]
    MissingType,

    #[error("envelope `type` is not a string")]
    TypeNotString,

    #[error("envelope shape invalid: {0}")]
    BadShape(String),
}

/// Decode an inbound frame into an [`Envelope`].
///
/// Fails if the payload is not UTF-8 JSON or if `type` is missing or not
/// a string. The correlation `id` is optional; a frame that fails here
/// is answered with an `INVALID_FORMAT` envelope carrying no `id`.
pub fn decode(raw: &[u8]) -> Result<Envelope, DecodeError> {
    let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotUtf8)?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::NotJson(e.to_string()))?;

    match value.get("type") {
        None => return Err(DecodeError::MissingType),
        Some(Value::String(_)) => {}
        Some(_) => return Err(DecodeError::TypeNotString),
    }

    serde_json::from_value(value).map_err(|e| DecodeError::BadShape(e.to_string()))
}

/// Encode an outbound envelope as a JSON text frame.
pub fn encode(response: &ResponseEnvelope) -> GateResult<String> {
    Ok(serde_json::to_string(response)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::codes;
    use serde_json::json;

    #[test]
    fn decode_full_envelope() {
        let raw = br#"{"id":"1","type":"ping","timestamp":"2026-01-01T00:00:00Z","data":{}}"#;
        let env = decode(raw).unwrap();
        assert_eq!(env.id.as_deref(), Some("1"));
        assert_eq!(env.msg_type, "ping");
        assert_eq!(env.timestamp.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert!(env.data.is_object());
    }

    #[test]
    fn decode_minimal_envelope() {
        // id, timestamp and data are all optional on the wire.
        let env = decode(br#"{"type":"ping"}"#).unwrap();
        assert!(env.id.is_none());
        assert!(env.data.is_null());
    }

    #[test]
    fn decode_rejects_non_json() {
        assert!(matches!(decode(b"not json at all"), Err(DecodeError::NotJson(_))));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        assert!(matches!(decode(&[0xff, 0xfe, 0x80]), Err(DecodeError::NotUtf8)));
    }

    #[test]
    fn decode_rejects_missing_type() {
        assert!(matches!(
            decode(br#"{"id":"1","data":{}}"#),
            Err(DecodeError::MissingType)
        ));
    }

    #[test]
    fn decode_rejects_non_string_type() {
        assert!(matches!(
            decode(br#"{"type":42}"#),
            Err(DecodeError::TypeNotString)
        ));
    }

    #[test]
    fn encode_then_decode_response() {
        let resp = ResponseEnvelope::failure(Some("9".into()), codes::INTERNAL_ERROR, "internal error", None);
        let frame = encode(&resp).unwrap();
        let parsed: ResponseEnvelope = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed.id.as_deref(), Some("9"));
        assert_eq!(parsed.error.unwrap().code, codes::INTERNAL_ERROR);
    }

    #[test]
    fn encode_success_payload() {
        let resp = ResponseEnvelope::success(None, "welcome", json!({"clientId": "abc"}));
        let frame = encode(&resp).unwrap();
        assert!(frame.contains(r#""type":"welcome""#));
        assert!(!frame.contains("error"));
    }
}

//! Encoding of request envelopes and validation of inbound frames.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::envelope::{Params, Progress, RequestEnvelope, RequestId, ResponseEnvelope, RpcFailure};
use super::sentinel::{self, SentinelPolicy};
use crate::config::ProtocolConfig;
use crate::error::Result;

const RESPONSE_KEY: &str = "response";
const PROGRESS_KEY: &str = "progress";
const ERROR_KEY: &str = "error";

/// Structural problems with an inbound frame.
///
/// These never reach callers; the dispatcher logs them and drops the frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("missing protocol tag")]
    MissingProtocolTag,

    #[error("unsupported protocol version {found}, expected {expected}")]
    ProtocolMismatch { expected: String, found: String },

    #[error("id is missing or not a non-negative integer")]
    InvalidId,

    #[error("frame carries none of response, progress or error")]
    MissingResultKind,

    #[error("frame carries more than one of {0:?}")]
    AmbiguousResultKind(Vec<&'static str>),

    #[error("invalid progress payload: {0}")]
    InvalidProgress(String),

    #[error("invalid error payload: {0}")]
    InvalidFailure(String),
}

#[derive(Serialize)]
struct WireRequest<'a> {
    jsonrpc: &'a str,
    id: RequestId,
    method: &'a str,
    params: &'a Params,
}

/// Stateless codec for one protocol version.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    version: String,
    sentinels: SentinelPolicy,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(ProtocolConfig::PROTOCOL_VERSION)
    }
}

impl MessageCodec {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            sentinels: SentinelPolicy::default(),
        }
    }

    /// Choose how bare `NaN` / `Infinity` / `-Infinity` tokens are decoded.
    pub fn with_sentinel_policy(mut self, policy: SentinelPolicy) -> Self {
        self.sentinels = policy;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Serialize a request into a single frame.
    pub fn encode(&self, request: &RequestEnvelope) -> Result<String> {
        let wire = WireRequest {
            jsonrpc: &self.version,
            id: request.id,
            method: &request.method,
            params: &request.params,
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Decode one inbound frame.
    ///
    /// Non-finite number tokens are rewritten first. Under the default
    /// [`SentinelPolicy::Null`] they decode as `null`, which is lossy: a
    /// `NaN` result and a real `null` result look the same. Use
    /// [`SentinelPolicy::Label`] to keep them distinguishable.
    pub fn decode(&self, frame: &str) -> std::result::Result<ResponseEnvelope, FrameError> {
        let text = sentinel::rewrite_sentinels(frame, self.sentinels);
        let value: Value =
            serde_json::from_str(&text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
        let Value::Object(mut object) = value else {
            return Err(FrameError::NotAnObject);
        };

        self.check_protocol_tag(&object)?;

        let id = object
            .get("id")
            .and_then(Value::as_u64)
            .ok_or(FrameError::InvalidId)?;

        let present: Vec<&'static str> = [RESPONSE_KEY, PROGRESS_KEY, ERROR_KEY]
            .into_iter()
            .filter(|key| object.contains_key(*key))
            .collect();

        match present.as_slice() {
            [] => Err(FrameError::MissingResultKind),
            [RESPONSE_KEY] => {
                // A present `null` is a successful call without a return value.
                let value = object.remove(RESPONSE_KEY).unwrap_or(Value::Null);
                Ok(ResponseEnvelope::Result { id, value })
            }
            [PROGRESS_KEY] => {
                let payload = object.remove(PROGRESS_KEY).unwrap_or(Value::Null);
                let progress = decode_progress(payload)?;
                Ok(ResponseEnvelope::Progress { id, progress })
            }
            [ERROR_KEY] => {
                let payload = object.remove(ERROR_KEY).unwrap_or(Value::Null);
                let failure = decode_failure(payload)?;
                Ok(ResponseEnvelope::Failure { id, failure })
            }
            _ => Err(FrameError::AmbiguousResultKind(present)),
        }
    }

    fn check_protocol_tag(
        &self,
        object: &Map<String, Value>,
    ) -> std::result::Result<(), FrameError> {
        match object.get(ProtocolConfig::PROTOCOL_FIELD) {
            None => Err(FrameError::MissingProtocolTag),
            Some(Value::String(found)) if *found == self.version => Ok(()),
            Some(other) => Err(FrameError::ProtocolMismatch {
                expected: self.version.clone(),
                found: match other {
                    Value::String(s) => s.clone(),
                    v => v.to_string(),
                },
            }),
        }
    }
}

fn decode_progress(payload: Value) -> std::result::Result<Progress, FrameError> {
    match payload {
        // Bare `"progress": null` is a heartbeat without counters.
        Value::Null => Ok(Progress::default()),
        Value::Object(_) => serde_json::from_value(payload)
            .map_err(|e| FrameError::InvalidProgress(e.to_string())),
        other => Err(FrameError::InvalidProgress(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

fn decode_failure(payload: Value) -> std::result::Result<RpcFailure, FrameError> {
    if !payload.is_object() {
        return Err(FrameError::InvalidFailure(format!(
            "expected an object, got {}",
            payload
        )));
    }
    serde_json::from_value(payload).map_err(|e| FrameError::InvalidFailure(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec() -> MessageCodec {
        MessageCodec::default()
    }

    #[test]
    fn test_encode_includes_protocol_tag() {
        let request = RequestEnvelope::new(7, "add", json!([2, 3]));
        let frame = codec().encode(&request).unwrap();
        let parsed: Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(
            parsed,
            json!({"jsonrpc": "2.0", "id": 7, "method": "add", "params": [2, 3]})
        );
    }

    #[test]
    fn test_encode_named_params() {
        let request = RequestEnvelope::new(1, "longTask", json!({"size": 3}));
        let frame = codec().encode(&request).unwrap();
        assert!(frame.contains(r#""params":{"size":3}"#));
    }

    #[test]
    fn test_decode_success() {
        let envelope = codec()
            .decode(r#"{"jsonrpc":"2.0","id":7,"response":5}"#)
            .unwrap();
        assert_eq!(
            envelope,
            ResponseEnvelope::Result {
                id: 7,
                value: json!(5)
            }
        );
    }

    #[test]
    fn test_decode_null_response_is_success() {
        let envelope = codec()
            .decode(r#"{"jsonrpc":"2.0","id":2,"response":null}"#)
            .unwrap();
        assert_eq!(
            envelope,
            ResponseEnvelope::Result {
                id: 2,
                value: Value::Null
            }
        );
    }

    #[test]
    fn test_decode_progress() {
        let envelope = codec()
            .decode(r#"{"jsonrpc":"2.0","id":8,"progress":{"worked":1,"total":10,"message":"step"}}"#)
            .unwrap();
        match envelope {
            ResponseEnvelope::Progress { id, progress } => {
                assert_eq!(id, 8);
                assert_eq!(progress.worked, Some(1.0));
                assert_eq!(progress.total, Some(10.0));
                assert_eq!(progress.message.as_deref(), Some("step"));
            }
            other => panic!("Expected progress, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_failure_with_data() {
        let envelope = codec()
            .decode(r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32602,"message":"bad","data":{"field":"x"}}}"#)
            .unwrap();
        match envelope {
            ResponseEnvelope::Failure { id, failure } => {
                assert_eq!(id, 3);
                assert_eq!(failure.code, -32602);
                assert_eq!(failure.data, Some(json!({"field": "x"})));
            }
            other => panic!("Expected failure, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_tolerates_nan_sentinel() {
        let envelope = codec()
            .decode(r#"{"jsonrpc":"2.0","id":4,"response":{"score":NaN,"doc":"may be NaN"}}"#)
            .unwrap();
        assert_eq!(
            envelope,
            ResponseEnvelope::Result {
                id: 4,
                value: json!({"score": null, "doc": "may be NaN"})
            }
        );
    }

    #[test]
    fn test_decode_progress_with_nan_counters() {
        let envelope = codec()
            .decode(r#"{"jsonrpc":"2.0","id":4,"progress":{"worked":NaN,"total":Infinity}}"#)
            .unwrap();
        assert_eq!(
            envelope,
            ResponseEnvelope::Progress {
                id: 4,
                progress: Progress::default()
            }
        );
    }

    #[test]
    fn test_decode_rejects_structural_errors() {
        let cases = [
            ("not json", FrameError::InvalidJson(String::new())),
            ("[1,2]", FrameError::NotAnObject),
            (r#"{"id":1,"response":1}"#, FrameError::MissingProtocolTag),
            (r#"{"jsonrpc":"2.0","id":"x","response":1}"#, FrameError::InvalidId),
            (r#"{"jsonrpc":"2.0","id":-1,"response":1}"#, FrameError::InvalidId),
            (r#"{"jsonrpc":"2.0","response":1}"#, FrameError::InvalidId),
            (r#"{"jsonrpc":"2.0","id":1}"#, FrameError::MissingResultKind),
        ];

        for (frame, expected) in cases {
            let err = codec().decode(frame).unwrap_err();
            assert_eq!(
                std::mem::discriminant(&err),
                std::mem::discriminant(&expected),
                "frame {} gave {:?}",
                frame,
                err
            );
        }
    }

    #[test]
    fn test_decode_rejects_ambiguous_kind() {
        let err = codec()
            .decode(r#"{"jsonrpc":"2.0","id":1,"response":1,"error":{"code":1,"message":""}}"#)
            .unwrap_err();
        assert_eq!(err, FrameError::AmbiguousResultKind(vec!["response", "error"]));
    }

    #[test]
    fn test_decode_rejects_protocol_mismatch() {
        let err = codec()
            .decode(r#"{"jsonrpc":"1.0","id":1,"response":1}"#)
            .unwrap_err();
        assert!(matches!(err, FrameError::ProtocolMismatch { .. }));
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        let err = codec()
            .decode(r#"{"jsonrpc":"2.0","id":1,"progress":"half"}"#)
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidProgress(_)));

        let err = codec()
            .decode(r#"{"jsonrpc":"2.0","id":1,"error":{"message":"no code"}}"#)
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidFailure(_)));
    }

    #[test]
    fn test_request_id_survives_round_trip() {
        let request = RequestEnvelope::new(42, "echo", json!({"text": "hi"}));
        let sent: Value = serde_json::from_str(&codec().encode(&request).unwrap()).unwrap();

        let reply = json!({"jsonrpc": "2.0", "id": sent["id"], "response": sent["params"]});
        let envelope = codec().decode(&reply.to_string()).unwrap();

        assert_eq!(
            envelope,
            ResponseEnvelope::Result {
                id: 42,
                value: json!({"text": "hi"})
            }
        );
    }

    #[test]
    fn test_label_policy_distinguishes_nan_from_null() {
        let codec = MessageCodec::new("2.0").with_sentinel_policy(SentinelPolicy::Label);
        assert_eq!(codec.version(), "2.0");

        let envelope = codec
            .decode(r#"{"jsonrpc":"2.0","id":5,"response":[NaN,null,-Infinity]}"#)
            .unwrap();
        assert_eq!(
            envelope,
            ResponseEnvelope::Result {
                id: 5,
                value: json!(["NaN", null, "-Infinity"])
            }
        );

        match codec
            .decode(r#"{"jsonrpc":"2.0","id":5,"progress":{"worked":NaN,"total":10}}"#)
            .unwrap()
        {
            ResponseEnvelope::Progress { progress, .. } => {
                assert!(progress.worked.is_some_and(f64::is_nan));
                assert_eq!(progress.total, Some(10.0));
            }
            other => panic!("Expected progress, got: {:?}", other),
        }
    }
}

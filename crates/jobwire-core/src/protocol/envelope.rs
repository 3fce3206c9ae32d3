//! Envelope types shared by the codec, the dispatcher and callers.

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Correlation id tying a request to its progress and terminal messages.
pub type RequestId = u64;

/// Call arguments: an ordered list or a keyed map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl Params {
    /// Empty positional arguments.
    pub fn none() -> Self {
        Params::Positional(Vec::new())
    }

    /// Convert an arbitrary JSON value.
    ///
    /// Arrays and objects map directly, `null` becomes empty positional
    /// arguments and any other scalar becomes a single positional argument.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => Params::Positional(items),
            Value::Object(map) => Params::Named(map),
            Value::Null => Params::none(),
            scalar => Params::Positional(vec![scalar]),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Params::Positional(items) => Value::Array(items.clone()),
            Params::Named(map) => Value::Object(map.clone()),
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Params::none()
    }
}

impl From<Value> for Params {
    fn from(value: Value) -> Self {
        Params::from_value(value)
    }
}

impl From<Vec<Value>> for Params {
    fn from(items: Vec<Value>) -> Self {
        Params::Positional(items)
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Params::Named(map)
    }
}

/// One outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub id: RequestId,
    pub method: String,
    pub params: Params,
}

impl RequestEnvelope {
    pub fn new(id: RequestId, method: impl Into<String>, params: impl Into<Params>) -> Self {
        Self {
            id,
            method: method.into(),
            params: params.into(),
        }
    }
}

/// Non-terminal status update for an in-flight job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(
        default,
        deserialize_with = "counter",
        skip_serializing_if = "Option::is_none"
    )]
    pub worked: Option<f64>,
    #[serde(
        default,
        deserialize_with = "counter",
        skip_serializing_if = "Option::is_none"
    )]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Progress {
    /// Completed fraction in `0.0..=1.0`, when both counters are known.
    pub fn fraction(&self) -> Option<f64> {
        match (self.worked, self.total) {
            (Some(worked), Some(total)) if total > 0.0 => Some((worked / total).clamp(0.0, 1.0)),
            _ => None,
        }
    }
}

/// A progress counter: a number, or a labelled non-finite sentinel.
fn counter<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Counter {
        Number(f64),
        Label(String),
    }

    match Option::<Counter>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Counter::Number(n)) => Ok(Some(n)),
        Some(Counter::Label(label)) => match label.as_str() {
            "NaN" | "Infinity" | "-Infinity" => label.parse().map(Some).map_err(de::Error::custom),
            other => Err(de::Error::custom(format!(
                "expected a number, got {:?}",
                other
            ))),
        },
    }
}

/// Server-reported failure of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcFailure {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEnvelope {
    /// Terminal success. `value` is `Null` for calls with no return value.
    Result { id: RequestId, value: Value },
    Progress { id: RequestId, progress: Progress },
    /// Terminal failure, including cancellation acknowledgments.
    Failure { id: RequestId, failure: RpcFailure },
}

impl ResponseEnvelope {
    pub fn id(&self) -> RequestId {
        match self {
            ResponseEnvelope::Result { id, .. }
            | ResponseEnvelope::Progress { id, .. }
            | ResponseEnvelope::Failure { id, .. } => *id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResponseEnvelope::Progress { .. })
    }

    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ResponseEnvelope::Result { .. } => "response",
            ResponseEnvelope::Progress { .. } => "progress",
            ResponseEnvelope::Failure { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_from_value() {
        assert_eq!(
            Params::from(json!([2, 3])),
            Params::Positional(vec![json!(2), json!(3)])
        );
        assert!(matches!(Params::from(json!({"a": 1})), Params::Named(_)));
        assert_eq!(Params::from(Value::Null), Params::none());
        assert_eq!(Params::from(json!("x")), Params::Positional(vec![json!("x")]));
    }

    #[test]
    fn test_params_to_value() {
        assert_eq!(Params::from(json!([2, 3])).to_value(), json!([2, 3]));
        assert_eq!(Params::from(json!({"a": 1})).to_value(), json!({"a": 1}));
        assert_eq!(Params::none().to_value(), json!([]));
    }

    #[test]
    fn test_progress_counters_accept_labels() {
        let progress: Progress =
            serde_json::from_value(json!({"worked": "NaN", "total": "Infinity"})).unwrap();
        assert!(progress.worked.is_some_and(f64::is_nan));
        assert_eq!(progress.total, Some(f64::INFINITY));

        let bad = serde_json::from_value::<Progress>(json!({"worked": "lots"}));
        assert!(bad.is_err());
    }

    #[test]
    fn test_progress_fraction() {
        let progress = Progress {
            worked: Some(5.0),
            total: Some(10.0),
            message: None,
        };
        assert_eq!(progress.fraction(), Some(0.5));
        assert_eq!(Progress::default().fraction(), None);

        let no_total = Progress {
            worked: Some(1.0),
            total: Some(0.0),
            message: None,
        };
        assert_eq!(no_total.fraction(), None);
    }

    #[test]
    fn test_envelope_accessors() {
        let envelope = ResponseEnvelope::Progress {
            id: 3,
            progress: Progress::default(),
        };
        assert_eq!(envelope.id(), 3);
        assert!(!envelope.is_terminal());
        assert_eq!(envelope.kind(), "progress");
    }
}

//! Classification of server failure codes for presentation.
//!
//! The code table is configuration data: [`ErrorCatalog::builtin`] mirrors the
//! job server's error space, and a replacement catalog can be loaded from
//! JSON. Classification never touches dispatcher state.
//!
//! Audiences drive the two questions UI code asks:
//!
//! | Audience      | Developer error | User error |
//! |---------------|-----------------|------------|
//! | `Developer`   | yes             | no         |
//! | `User`        | no              | yes        |
//! | `Environment` | no              | no         |
//!
//! Codes missing from the catalog are treated as developer errors.
//!
//! The built-in catalog and the free functions below use the default
//! cancellation code. A dispatcher configured with another
//! `cancelled_code` should classify through
//! [`ErrorCatalog::with_cancelled_code`].

use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{JobwireError, Result};
use crate::protocol::RpcFailure;

/// Failure codes used by the job server.
pub mod codes {
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const OS_ERROR: i64 = -32000;
    pub const OUT_OF_MEMORY: i64 = -32001;
    pub const INVALID_RESPONSE: i64 = -32002;
    /// Default cancellation acknowledgment code.
    pub const CANCELLED: i64 = crate::config::ProtocolConfig::CANCELLED_CODE;
}

/// How prominently a failure should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Primary,
    Warning,
    Danger,
}

/// Who is expected to act on a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// Likely an internal or protocol bug.
    Developer,
    /// Caused by user input or a user action.
    User,
    /// Caused by the host environment (OS, memory).
    Environment,
}

/// Display hints for a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presentation {
    pub title: String,
    pub icon: String,
    pub intent: Intent,
}

impl Presentation {
    fn new(title: &str, icon: &str, intent: Intent) -> Self {
        Self {
            title: title.to_string(),
            icon: icon.to_string(),
            intent,
        }
    }
}

/// Catalog entry for one known code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEntry {
    pub code: i64,
    #[serde(flatten)]
    pub presentation: Presentation,
    pub audience: Audience,
}

/// Presentation override triggered by a marker in the failure's `data`.
///
/// The marker is looked for in `data` itself when it is a string, or in its
/// `exception` / `type` fields when it is an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataOverride {
    pub markers: Vec<String>,
    #[serde(flatten)]
    pub presentation: Presentation,
}

impl DataOverride {
    fn matches(&self, data: &Value) -> bool {
        data_labels(data).any(|label| {
            self.markers
                .iter()
                .any(|marker| label.contains(marker.as_str()))
        })
    }
}

fn data_labels(data: &Value) -> impl Iterator<Item = &str> {
    let labels: Vec<&str> = match data {
        Value::String(s) => vec![s.as_str()],
        Value::Object(map) => ["exception", "type"]
            .iter()
            .filter_map(|key| map.get(*key).and_then(Value::as_str))
            .collect(),
        _ => Vec::new(),
    };
    labels.into_iter()
}

/// Full classification of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub code: i64,
    #[serde(flatten)]
    pub presentation: Presentation,
    pub audience: Audience,
    pub developer_error: bool,
    pub user_error: bool,
}

/// Table of known failure codes and payload overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCatalog {
    pub entries: Vec<CodeEntry>,
    #[serde(default)]
    pub overrides: Vec<DataOverride>,
    /// Presentation for codes missing from `entries`.
    pub fallback: Presentation,
}

impl Default for ErrorCatalog {
    fn default() -> Self {
        Self::builtin().clone()
    }
}

impl ErrorCatalog {
    /// The catalog matching the job server's error space.
    pub fn builtin() -> &'static ErrorCatalog {
        static BUILTIN: OnceLock<ErrorCatalog> = OnceLock::new();
        BUILTIN.get_or_init(Self::build_builtin)
    }

    fn build_builtin() -> Self {
        use codes::*;
        use Audience::{Developer, Environment, User};

        let entries = [
            (INVALID_REQUEST, "Invalid request", "error", Intent::Danger, Developer),
            (METHOD_NOT_FOUND, "Method not found", "search", Intent::Danger, Developer),
            (INVALID_PARAMS, "Invalid parameters", "edit", Intent::Warning, User),
            (INTERNAL_ERROR, "Internal error", "error", Intent::Danger, Developer),
            (INVALID_RESPONSE, "Invalid response", "error", Intent::Danger, Developer),
            (OS_ERROR, "System error", "desktop", Intent::Warning, Environment),
            (OUT_OF_MEMORY, "Out of memory", "warning-sign", Intent::Warning, Environment),
            (CANCELLED, "Operation cancelled", "disable", Intent::Primary, User),
        ];

        Self {
            entries: entries
                .into_iter()
                .map(|(code, title, icon, intent, audience)| CodeEntry {
                    code,
                    presentation: Presentation::new(title, icon, intent),
                    audience,
                })
                .collect(),
            overrides: vec![
                DataOverride {
                    markers: vec!["NetworkError".to_string(), "ConnectionError".to_string()],
                    presentation: Presentation::new("Network error", "offline", Intent::Warning),
                },
                DataOverride {
                    markers: vec!["DatabaseError".to_string(), "OperationalError".to_string()],
                    presentation: Presentation::new("Database error", "database", Intent::Danger),
                },
            ],
            fallback: Presentation::new("Unexpected error", "error", Intent::Danger),
        }
    }

    /// Move the default cancellation entry to `code`.
    ///
    /// Use with [`DispatcherConfig::cancelled_code`](crate::DispatcherConfig)
    /// when the server acknowledges cancellation with a non-default code. A
    /// catalog that already has an entry for `code` is returned unchanged.
    pub fn with_cancelled_code(mut self, code: i64) -> Self {
        if self.entry(code).is_some() {
            return self;
        }
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.code == codes::CANCELLED)
        {
            entry.code = code;
        }
        self
    }

    /// Parse a catalog from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| JobwireError::Config {
            message: format!("Invalid error catalog: {}", e),
        })
    }

    /// Load a catalog from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json =
            std::fs::read_to_string(path).map_err(|e| JobwireError::io_with_path(e, path))?;
        Self::from_json_str(&json)
    }

    pub fn entry(&self, code: i64) -> Option<&CodeEntry> {
        self.entries.iter().find(|entry| entry.code == code)
    }

    pub fn audience(&self, code: i64) -> Audience {
        self.entry(code)
            .map_or(Audience::Developer, |entry| entry.audience)
    }

    pub fn is_developer_error(&self, code: i64) -> bool {
        self.audience(code) == Audience::Developer
    }

    pub fn is_user_error(&self, code: i64) -> bool {
        self.audience(code) == Audience::User
    }

    /// Title, icon and intent for a failure, honoring payload overrides.
    pub fn presentation(&self, failure: &RpcFailure) -> &Presentation {
        if let Some(data) = &failure.data {
            if let Some(found) = self.overrides.iter().find(|o| o.matches(data)) {
                return &found.presentation;
            }
        }
        self.entry(failure.code)
            .map_or(&self.fallback, |entry| &entry.presentation)
    }

    pub fn classify(&self, failure: &RpcFailure) -> Classification {
        let audience = self.audience(failure.code);
        Classification {
            code: failure.code,
            presentation: self.presentation(failure).clone(),
            audience,
            developer_error: audience == Audience::Developer,
            user_error: audience == Audience::User,
        }
    }
}

/// Is this code likely an internal bug rather than user input or environment?
pub fn is_developer_error(code: i64) -> bool {
    ErrorCatalog::builtin().is_developer_error(code)
}

/// Can the user act on this code (fix input, or they cancelled)?
pub fn is_user_error(code: i64) -> bool {
    ErrorCatalog::builtin().is_user_error(code)
}

/// Classify a failure against the built-in catalog.
pub fn classify(failure: &RpcFailure) -> Classification {
    ErrorCatalog::builtin().classify(failure)
}

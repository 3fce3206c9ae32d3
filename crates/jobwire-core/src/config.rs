//! Centralized configuration for jobwire.
//!
//! Fixed protocol constants live on [`ProtocolConfig`]. Per-dispatcher knobs
//! live on [`DispatcherConfig`], which can be loaded from JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{JobwireError, Result};
use crate::protocol::SentinelPolicy;

/// Wire protocol constants.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Key of the protocol tag carried by every envelope.
    pub const PROTOCOL_FIELD: &'static str = "jsonrpc";
    pub const PROTOCOL_VERSION: &'static str = "2.0";

    /// Reserved method that asks the server to cancel another job.
    pub const CANCEL_METHOD: &'static str = "__cancel__";

    /// Failure code the server uses to acknowledge a cancelled job.
    pub const CANCELLED_CODE: i64 = 999;

    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Buffered lifecycle events per subscriber before it starts lagging.
    pub const LIFECYCLE_CAPACITY: usize = 32;
}

/// Runtime configuration for a single dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// First request id handed out. Later ids increase by one.
    pub id_offset: u64,
    /// Value expected in (and written to) the protocol tag.
    pub protocol_version: String,
    pub cancel_method: String,
    pub cancelled_code: i64,
    /// Fail outstanding jobs with `ConnectionClosed` when the channel closes.
    ///
    /// Off by default: outstanding jobs stay registered and their handles stay
    /// pending until the server answers or the dispatcher is dropped.
    pub fail_outstanding_on_close: bool,
    pub max_frame_size: usize,
    /// How bare `NaN` / `Infinity` / `-Infinity` in inbound frames decode.
    pub sentinels: SentinelPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            id_offset: 0,
            protocol_version: ProtocolConfig::PROTOCOL_VERSION.to_string(),
            cancel_method: ProtocolConfig::CANCEL_METHOD.to_string(),
            cancelled_code: ProtocolConfig::CANCELLED_CODE,
            fail_outstanding_on_close: false,
            max_frame_size: ProtocolConfig::MAX_FRAME_SIZE,
            sentinels: SentinelPolicy::Null,
        }
    }
}

impl DispatcherConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| JobwireError::Config {
            message: format!("Invalid dispatcher config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json =
            std::fs::read_to_string(path).map_err(|e| JobwireError::io_with_path(e, path))?;
        Self::from_json_str(&json)
    }

    /// Reject values the dispatcher cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.cancel_method.is_empty() {
            return Err(JobwireError::Config {
                message: "cancel_method must not be empty".to_string(),
            });
        }
        if self.protocol_version.is_empty() {
            return Err(JobwireError::Config {
                message: "protocol_version must not be empty".to_string(),
            });
        }
        if self.max_frame_size == 0 {
            return Err(JobwireError::Config {
                message: "max_frame_size must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = DispatcherConfig::default();
        assert_eq!(config.cancel_method, "__cancel__");
        assert_eq!(config.cancelled_code, 999);
        assert_eq!(config.protocol_version, "2.0");
        assert!(!config.fail_outstanding_on_close);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = DispatcherConfig::from_json_str(r#"{"id_offset": 7}"#).unwrap();
        assert_eq!(config.id_offset, 7);
        assert_eq!(config.cancelled_code, 999);
    }

    #[test]
    fn test_sentinel_policy_from_json() {
        let config = DispatcherConfig::from_json_str(r#"{"sentinels": "label"}"#).unwrap();
        assert_eq!(config.sentinels, SentinelPolicy::Label);
        assert_eq!(DispatcherConfig::default().sentinels, SentinelPolicy::Null);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = DispatcherConfig::from_json_str(r#"{"cancel_method": ""}"#);
        assert!(matches!(result, Err(JobwireError::Config { .. })));

        let result = DispatcherConfig::from_json_str("not json");
        assert!(matches!(result, Err(JobwireError::Config { .. })));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"fail_outstanding_on_close": true}}"#).unwrap();

        let config = DispatcherConfig::from_file(file.path()).unwrap();
        assert!(config.fail_outstanding_on_close);
    }

    #[test]
    fn test_from_missing_file_reports_path() {
        let result = DispatcherConfig::from_file("/nonexistent/jobwire.json");
        match result {
            Err(JobwireError::Io { path: Some(path), .. }) => {
                assert!(path.ends_with("jobwire.json"));
            }
            other => panic!("Expected Io error, got: {:?}", other),
        }
    }
}

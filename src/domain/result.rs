//! Canonical result and error values shared by every adapter.
//!
//! Operational failures (upstream errors, bad parameters, network trouble)
//! never surface as `Err`; they travel inside an [`ActionResult`] so the
//! orchestrator can inspect the code and the retryable flag uniformly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameter contract violated. Never retryable.
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";

/// Rollback invoked on an adapter whose actions cannot be reversed.
pub const ROLLBACK_NOT_SUPPORTED: &str = "ROLLBACK_NOT_SUPPORTED";

/// Structured description of an operational failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable taxonomy tag, e.g. `VALIDATION_ERROR` or `VIRUSTOTAL_API_ERROR`
    pub code: String,

    /// Human-readable message
    pub message: String,

    /// Whether re-issuing the same call is safe and may succeed
    pub retryable: bool,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }

    /// Parameter validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(VALIDATION_ERROR, message, false)
    }

    /// Upstream answered with a non-success status.
    ///
    /// `prefix` is the adapter's code prefix (`VIRUSTOTAL` yields
    /// `VIRUSTOTAL_API_ERROR`).
    pub fn api(prefix: &str, message: impl Into<String>, retryable: bool) -> Self {
        Self::new(format!("{}_API_ERROR", prefix), message, retryable)
    }

    /// Transport-level failure (timeout, refused connection, DNS). Always retryable.
    pub fn transport(prefix: &str, message: impl Into<String>) -> Self {
        Self::new(format!("{}_ERROR", prefix), message, true)
    }

    pub fn rollback_not_supported(adapter: &str) -> Self {
        Self::new(
            ROLLBACK_NOT_SUPPORTED,
            format!("Adapter '{}' does not support rollback", adapter),
            false,
        )
    }
}

/// Outcome of one `execute` or `rollback` call.
///
/// Exactly one of `output` / `error` is populated; the constructors are the
/// only way this crate builds one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,

    /// Action identifier echoed back
    pub action: String,

    /// Name of the adapter that produced the result
    pub executor: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,

    /// Free-form facts about the call (`mode`, `attempts`, ...)
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ActionResult {
    pub fn succeeded(action: impl Into<String>, executor: impl Into<String>, output: Value) -> Self {
        Self {
            success: true,
            action: action.into(),
            executor: executor.into(),
            output: Some(output),
            error: None,
            metadata: Map::new(),
        }
    }

    pub fn failed(action: impl Into<String>, executor: impl Into<String>, error: ErrorDetail) -> Self {
        Self {
            success: false,
            action: action.into(),
            executor: executor.into(),
            output: None,
            error: Some(error),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Whether the failure (if any) may be retried
    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.retryable)
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

/// Result of checking parameters against an action's rule set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,

    /// One message per unmet rule, in rule declaration order
    pub errors: Vec<String>,
}

impl ValidationResult {
    /// Build from collected messages; valid iff there are none
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// All messages joined into one line
    pub fn message(&self) -> String {
        self.errors.join("; ")
    }
}

/// Coarse health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        };
        f.pad(s)
    }
}

/// Result of an adapter health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub message: String,

    /// Wall-clock round trip of the probe in milliseconds
    pub latency_ms: u64,

    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    pub fn new(status: HealthState, message: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            status,
            message: message.into(),
            latency_ms,
            checked_at: Utc::now(),
        }
    }
}

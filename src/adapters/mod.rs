//! Adapter interfaces for external systems.
//!
//! Adapters provide a unified interface for interacting with security
//! tooling (threat intel, blocking, notification). Every adapter implements
//! the same [`Adapter`] contract so the orchestrator can reason about it
//! without knowing the vendor behind it.

pub mod dispatch;
pub mod rate_limit;
pub mod retry;
pub mod validation;
pub mod virustotal;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{ActionResult, ExecutionMode, HealthStatus, ValidationResult};

pub use dispatch::{dispatch, ActionHandler};
pub use rate_limit::{Clock, ManualClock, RateLimiter, SystemClock};
pub use retry::{retry_with_policy, Retried, RetryPolicy};
pub use validation::{ActionRules, ParamRule, RuleTable};
pub use virustotal::VirusTotalAdapter;

/// Action parameters as supplied by a playbook step
pub type Params = Map<String, Value>;

/// Misuse of the adapter contract.
///
/// These are integration bugs, not operational failures, so they are
/// returned as `Err` instead of being folded into an [`ActionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("Adapter '{adapter}' used before initialize")]
    NotInitialized { adapter: String },

    #[error("Adapter '{adapter}' does not support action '{action}'")]
    UnsupportedAction { adapter: String, action: String },

    #[error("Unknown adapter type: {0}")]
    UnknownType(String),

    #[error("Invalid adapter configuration: {0}")]
    Config(String),
}

impl AdapterError {
    /// Stable code for reporting
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized { .. } => "NOT_INITIALIZED",
            Self::UnsupportedAction { .. } => "UNSUPPORTED_ACTION",
            Self::UnknownType(_) => "UNKNOWN_ADAPTER_TYPE",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }
}

/// Kind of secret carried in [`Credentials`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    ApiKey,
    Bearer,
    Basic,
    None,
}

/// Opaque secret bag handed to an adapter.
///
/// `Debug` prints the key names only.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub kind: CredentialKind,

    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

impl Credentials {
    /// API-key credentials stored under `api_key`
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            kind: CredentialKind::ApiKey,
            secrets: HashMap::from([("api_key".to_string(), key.into())]),
        }
    }

    /// Look up a secret; empty values count as unset
    pub fn secret(&self, name: &str) -> Option<&str> {
        self.secrets
            .get(name)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.secrets.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("Credentials")
            .field("kind", &self.kind)
            .field("secrets", &format_args!("{:?} (redacted)", keys))
            .finish()
    }
}

/// Configuration bound to an adapter instance by `initialize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Unique adapter name, referenced by playbook steps
    pub name: String,

    /// Adapter type tag (e.g. "virustotal")
    #[serde(rename = "type")]
    pub adapter_type: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Adapter-specific settings (e.g. `base_url`)
    #[serde(default)]
    pub config: Map<String, Value>,

    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_enabled() -> bool {
    true
}
fn default_timeout() -> u64 {
    30
}

impl AdapterConfig {
    pub fn new(name: impl Into<String>, adapter_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adapter_type: adapter_type.into(),
            enabled: default_enabled(),
            config: Map::new(),
            credentials: None,
            timeout: default_timeout(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_setting(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// String setting from `config`, if present and non-empty
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Static facts about what an adapter type can do.
///
/// Fixed per adapter type and available without I/O, so the orchestrator
/// can check them before scheduling a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub supports_simulation: bool,
    pub supports_rollback: bool,
    pub supports_validation: bool,

    /// Upper bound on concurrent in-flight calls to one instance (>= 1)
    pub max_concurrency: usize,

    pub supported_actions: &'static [&'static str],
}

impl Capabilities {
    pub fn supports_action(&self, action: &str) -> bool {
        self.supported_actions.contains(&action)
    }
}

/// The contract every integration implements
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Configured instance name (the type tag before `initialize`)
    fn name(&self) -> &str;

    /// Adapter type tag
    fn adapter_type(&self) -> &'static str;

    /// Bind configuration and credentials. No network I/O.
    ///
    /// Calling it again replaces the previous configuration.
    fn initialize(&mut self, config: AdapterConfig) -> Result<(), AdapterError>;

    fn capabilities(&self) -> Capabilities;

    /// Run `action` in `mode`.
    ///
    /// Operational failures are reported inside the returned result; `Err`
    /// is reserved for calling before `initialize` or with an action the
    /// adapter does not support.
    async fn execute(
        &self,
        action: &str,
        params: &Params,
        mode: ExecutionMode,
    ) -> Result<ActionResult, AdapterError>;

    fn validate_parameters(
        &self,
        action: &str,
        params: &Params,
    ) -> Result<ValidationResult, AdapterError>;

    /// One lightweight authenticated probe. Reports `unknown` before `initialize`.
    async fn health_check(&self) -> HealthStatus;

    /// Undo a previous `execute` of `action`
    async fn rollback(&self, action: &str, params: &Params) -> Result<ActionResult, AdapterError>;
}

/// Build and initialize an adapter from its configuration
pub fn create_adapter(config: AdapterConfig) -> Result<Box<dyn Adapter>, AdapterError> {
    let adapter_type = config.adapter_type.clone();
    match adapter_type.as_str() {
        virustotal::ADAPTER_TYPE => {
            let mut adapter = VirusTotalAdapter::new();
            adapter.initialize(config)?;
            Ok(Box::new(adapter))
        }
        other => Err(AdapterError::UnknownType(other.to_string())),
    }
}

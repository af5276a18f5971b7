//! VirusTotal v3 threat-intelligence adapter.
//!
//! Actions:
//! - `enrich_ioc`: detection ratio and threat label for a hash, domain, IP or URL
//! - `check_reputation`: reputation score and detection buckets for the same IOC kinds
//! - `query_threat_feed`: hunting notification feed, optionally filtered
//! - `calculate_hash`: local digest of supplied data, never touches the network
//!
//! Production calls are spaced by [`VIRUSTOTAL_MIN_INTERVAL`] per adapter
//! instance (the public API quota is four requests per minute).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use md5::Md5;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::domain::{
    ActionResult, ErrorDetail, ExecutionMode, HealthState, HealthStatus, ValidationResult,
};

use super::dispatch::{dispatch, ActionHandler};
use super::rate_limit::{Clock, RateLimiter, SystemClock};
use super::retry::RetryPolicy;
use super::validation::{ActionRules, ParamRule, RuleTable};
use super::{Adapter, AdapterConfig, AdapterError, Capabilities, Params};

pub const ADAPTER_TYPE: &str = "virustotal";

/// Used when no `base_url` is configured
pub const DEFAULT_BASE_URL: &str = "https://www.virustotal.com/api/v3";

/// Minimum spacing between production calls of one instance
pub const VIRUSTOTAL_MIN_INTERVAL: Duration = Duration::from_secs(15);

const ERROR_PREFIX: &str = "VIRUSTOTAL";
const AUTH_HEADER: &str = "x-apikey";
const API_KEY_SECRET: &str = "api_key";
const FEED_PATH: &str = "/intelligence/hunting_notification_files";

/// Engine count reported by simulated enrichments
const SIMULATED_ENGINES: u64 = 70;

const IOC_TYPES: &[&str] = &["hash", "domain", "ip", "url"];
const HASH_ALGORITHMS: &[&str] = &["md5", "sha1", "sha256"];
const ACTIONS: &[&str] = &[
    "enrich_ioc",
    "check_reputation",
    "query_threat_feed",
    "calculate_hash",
];

static RULES: RuleTable = RuleTable(&[
    ActionRules {
        action: "enrich_ioc",
        rules: &[
            ParamRule::required("ioc"),
            ParamRule::required("ioc_type").one_of(IOC_TYPES),
        ],
    },
    ActionRules {
        action: "check_reputation",
        rules: &[
            ParamRule::required("ioc"),
            ParamRule::required("ioc_type").one_of(IOC_TYPES),
        ],
    },
    ActionRules {
        action: "query_threat_feed",
        rules: &[ParamRule::optional("filter"), ParamRule::optional("limit")],
    },
    ActionRules {
        action: "calculate_hash",
        rules: &[
            ParamRule::required("data"),
            ParamRule::optional("algorithm").one_of(HASH_ALGORITHMS),
        ],
    },
]);

const CAPABILITIES: Capabilities = Capabilities {
    supports_simulation: true,
    supports_rollback: false,
    supports_validation: true,
    max_concurrency: 4,
    supported_actions: ACTIONS,
};

/// Actions supported by the VirusTotal adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreatIntelAction {
    EnrichIoc,
    CheckReputation,
    QueryThreatFeed,
    CalculateHash,
}

impl ThreatIntelAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnrichIoc => "enrich_ioc",
            Self::CheckReputation => "check_reputation",
            Self::QueryThreatFeed => "query_threat_feed",
            Self::CalculateHash => "calculate_hash",
        }
    }
}

impl FromStr for ThreatIntelAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enrich_ioc" => Ok(Self::EnrichIoc),
            "check_reputation" => Ok(Self::CheckReputation),
            "query_threat_feed" => Ok(Self::QueryThreatFeed),
            "calculate_hash" => Ok(Self::CalculateHash),
            _ => Err(()),
        }
    }
}

/// Kind of indicator of compromise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IocType {
    Hash,
    Domain,
    Ip,
    Url,
}

impl IocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::Domain => "domain",
            Self::Ip => "ip",
            Self::Url => "url",
        }
    }

    /// API path of the object describing `ioc`.
    ///
    /// URLs are identified by the unpadded URL-safe base64 of the raw string.
    pub fn object_path(&self, ioc: &str) -> String {
        match self {
            Self::Hash => format!("/files/{}", ioc),
            Self::Domain => format!("/domains/{}", ioc),
            Self::Ip => format!("/ip_addresses/{}", ioc),
            Self::Url => format!("/urls/{}", URL_SAFE_NO_PAD.encode(ioc)),
        }
    }
}

impl FromStr for IocType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hash" => Ok(Self::Hash),
            "domain" => Ok(Self::Domain),
            "ip" => Ok(Self::Ip),
            "url" => Ok(Self::Url),
            _ => Err(()),
        }
    }
}

/// Digest algorithms offered by `calculate_hash`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    #[default]
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Lowercase hex digest of `data`
    pub fn digest_hex(&self, data: &[u8]) -> String {
        match self {
            Self::Md5 => hex::encode(Md5::digest(data)),
            Self::Sha1 => hex::encode(Sha1::digest(data)),
            Self::Sha256 => hex::encode(Sha256::digest(data)),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            _ => Err(()),
        }
    }
}

// ============================================================================
// Upstream response schemas
//
// Every field is optional; defaults are applied once, when converting into
// the normalized report types below.
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct ObjectEnvelope {
    data: Option<ObjectData>,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectData {
    attributes: Option<ObjectAttributes>,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectAttributes {
    last_analysis_stats: Option<RawStats>,
    reputation: Option<i64>,
    popular_threat_classification: Option<ThreatClassification>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStats {
    malicious: Option<u64>,
    suspicious: Option<u64>,
    harmless: Option<u64>,
    undetected: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ThreatClassification {
    suggested_threat_label: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FeedEnvelope {
    data: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// Engine verdict counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DetectionStats {
    pub malicious: u64,
    pub suspicious: u64,
    pub harmless: u64,
    pub undetected: u64,
}

impl DetectionStats {
    pub fn total(&self) -> u64 {
        self.malicious + self.undetected + self.harmless + self.suspicious
    }

    /// Fraction of engines flagging the object as malicious; 0 when no engine answered
    pub fn score(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.malicious as f64 / total as f64,
        }
    }
}

/// Normalized view of a file/domain/IP/URL object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectReport {
    pub stats: DetectionStats,
    pub reputation: i64,
    pub threat_label: String,
}

impl From<ObjectEnvelope> for ObjectReport {
    fn from(envelope: ObjectEnvelope) -> Self {
        let attributes = envelope
            .data
            .and_then(|d| d.attributes)
            .unwrap_or_default();
        let raw = attributes.last_analysis_stats.unwrap_or_default();

        Self {
            stats: DetectionStats {
                malicious: raw.malicious.unwrap_or(0),
                suspicious: raw.suspicious.unwrap_or(0),
                harmless: raw.harmless.unwrap_or(0),
                undetected: raw.undetected.unwrap_or(0),
            },
            reputation: attributes.reputation.unwrap_or(0),
            threat_label: attributes
                .popular_threat_classification
                .and_then(|c| c.suggested_threat_label)
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

/// Strip trailing slashes; fall back to the default when nothing usable is left
pub fn normalize_base_url(raw: Option<&str>) -> String {
    let trimmed = raw.unwrap_or_default().trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_BASE_URL.to_string()
    } else {
        trimmed.to_string()
    }
}

/// String form of a parameter; non-string values use their JSON text
fn text_param(params: &Params, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Error text including every underlying cause; a cause repeating the previous text is skipped
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut last = error.to_string();
    let mut message = last.clone();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if text != last {
            message.push_str(": ");
            message.push_str(&text);
            last = text;
        }
        source = cause.source();
    }
    message
}

fn transport_error(error: &reqwest::Error) -> ErrorDetail {
    let kind = if error.is_timeout() { " (timeout)" } else { "" };
    ErrorDetail::transport(
        ERROR_PREFIX,
        format!("VirusTotal request failed{}: {}", kind, error_chain(error)),
    )
}

/// Only throttling and gateway-class statuses are worth repeating
fn is_transient(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

fn api_error(status: reqwest::StatusCode, body: &str) -> ErrorDetail {
    let detail = serde_json::from_str::<ApiErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error)
        .map(|e| match (e.code, e.message) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (code, message) => code.or(message).unwrap_or_default(),
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());

    ErrorDetail::api(
        ERROR_PREFIX,
        format!("VirusTotal API error {}: {}", status.as_u16(), detail),
        is_transient(status),
    )
}

/// Initialized state of the adapter
struct VirusTotalClient {
    name: String,
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl VirusTotalClient {
    fn from_config(config: AdapterConfig, clock: Arc<dyn Clock>) -> Result<Self, AdapterError> {
        let mut builder = reqwest::Client::builder();
        if config.timeout > 0 {
            builder = builder.timeout(config.timeout_duration());
        }
        let http = builder
            .build()
            .map_err(|e| AdapterError::Config(format!("HTTP client: {}", e)))?;

        let api_key = config
            .credentials
            .as_ref()
            .and_then(|c| c.secret(API_KEY_SECRET))
            .map(str::to_string);

        Ok(Self {
            base_url: normalize_base_url(config.setting_str("base_url")),
            name: config.name,
            api_key,
            http,
            retry: config.retry,
            limiter: RateLimiter::new(VIRUSTOTAL_MIN_INTERVAL, clock),
        })
    }

    /// Rate-limited authenticated GET, decoded into `T`
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ErrorDetail> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ErrorDetail::api(ERROR_PREFIX, "No API key configured", false));
        };

        self.limiter.acquire().await;

        let url = format!("{}{}", self.base_url, path);
        debug!(adapter = %self.name, %url, "VirusTotal request");

        let response = self
            .http
            .get(&url)
            .header(AUTH_HEADER, api_key)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_decode() {
                ErrorDetail::api(
                    ERROR_PREFIX,
                    format!("Invalid VirusTotal response: {}", error_chain(&e)),
                    false,
                )
            } else {
                transport_error(&e)
            }
        })
    }

    async fn lookup(&self, params: &Params) -> Result<(String, IocType, ObjectReport), ErrorDetail> {
        let (ioc, ioc_type) = ioc_params(params)?;
        let envelope: ObjectEnvelope = self.get_json(&ioc_type.object_path(&ioc)).await?;
        Ok((ioc, ioc_type, ObjectReport::from(envelope)))
    }

    async fn enrich_ioc(&self, params: &Params) -> Result<Value, ErrorDetail> {
        let (ioc, ioc_type, report) = self.lookup(params).await?;
        Ok(json!({
            "ioc": ioc,
            "ioc_type": ioc_type.as_str(),
            "detections": report.stats.malicious,
            "total_engines": report.stats.total(),
            "score": report.stats.score(),
            "threat_label": report.threat_label,
            "reputation": report.reputation,
            "stats": report.stats,
        }))
    }

    async fn check_reputation(&self, params: &Params) -> Result<Value, ErrorDetail> {
        let (ioc, ioc_type, report) = self.lookup(params).await?;
        Ok(json!({
            "ioc": ioc,
            "ioc_type": ioc_type.as_str(),
            "reputation": report.reputation,
            "malicious": report.stats.malicious,
            "suspicious": report.stats.suspicious,
            "harmless": report.stats.harmless,
            "undetected": report.stats.undetected,
        }))
    }

    async fn query_threat_feed(&self, params: &Params) -> Result<Value, ErrorDetail> {
        let filter = text_param(params, "filter").filter(|f| !f.is_empty());
        let limit = text_param(params, "limit");

        let mut query = Vec::new();
        if let Some(ref filter) = filter {
            query.push(format!("filter={}", urlencoding::encode(filter)));
        }
        if let Some(ref limit) = limit {
            query.push(format!("limit={}", urlencoding::encode(limit)));
        }

        let path = if query.is_empty() {
            FEED_PATH.to_string()
        } else {
            format!("{}?{}", FEED_PATH, query.join("&"))
        };

        let feed: FeedEnvelope = self.get_json(&path).await?;
        let notifications = feed.data.unwrap_or_default();

        Ok(json!({
            "count": notifications.len(),
            "notifications": notifications,
            "filter": filter,
        }))
    }

    async fn probe(&self) -> HealthStatus {
        let Some(api_key) = self.api_key.as_deref() else {
            return HealthStatus::new(HealthState::Unhealthy, "No API key configured", 0);
        };

        let started = std::time::Instant::now();
        let response = self
            .http
            .get(format!("{}/metadata", self.base_url))
            .header(AUTH_HEADER, api_key)
            .send()
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match response {
            Ok(r) if r.status().is_success() => {
                HealthStatus::new(HealthState::Healthy, "VirusTotal API reachable", latency_ms)
            }
            Ok(r) if r.status().as_u16() == 429 => HealthStatus::new(
                HealthState::Degraded,
                "VirusTotal API rate limited (429)",
                latency_ms,
            ),
            Ok(r) => HealthStatus::new(
                HealthState::Unhealthy,
                format!("VirusTotal API returned status {}", r.status().as_u16()),
                latency_ms,
            ),
            Err(e) => {
                warn!(adapter = %self.name, error = %e, "VirusTotal health check failed");
                HealthStatus::new(
                    HealthState::Unhealthy,
                    format!("VirusTotal API unreachable: {}", error_chain(&e)),
                    latency_ms,
                )
            }
        }
    }
}

fn ioc_params(params: &Params) -> Result<(String, IocType), ErrorDetail> {
    let ioc = text_param(params, "ioc")
        .ok_or_else(|| ErrorDetail::validation("Parameter 'ioc' is required"))?;
    let raw_type = text_param(params, "ioc_type").unwrap_or_default();
    let ioc_type = raw_type
        .parse::<IocType>()
        .map_err(|_| ErrorDetail::validation(format!("Invalid ioc_type '{}'", raw_type)))?;
    Ok((ioc, ioc_type))
}

/// Local digest; identical in every mode
fn calculate_hash(params: &Params) -> Result<Value, ErrorDetail> {
    let validation = RULES.validate(ThreatIntelAction::CalculateHash.as_str(), params);
    if !validation.valid {
        return Err(ErrorDetail::validation(validation.message()));
    }

    let data = text_param(params, "data").unwrap_or_default();
    let algorithm = text_param(params, "algorithm")
        .filter(|a| !a.is_empty())
        .and_then(|a| a.parse::<HashAlgorithm>().ok())
        .unwrap_or_default();

    Ok(json!({
        "algorithm": algorithm.as_str(),
        "hash": algorithm.digest_hex(data.as_bytes()),
        "length": data.len(),
    }))
}

#[async_trait]
impl ActionHandler for VirusTotalClient {
    type Action = ThreatIntelAction;

    fn executor_name(&self) -> &str {
        &self.name
    }

    fn parse_action(&self, action: &str) -> Option<ThreatIntelAction> {
        action.parse().ok()
    }

    fn validate(&self, action: &str, params: &Params) -> ValidationResult {
        RULES.validate(action, params)
    }

    fn simulate(&self, action: ThreatIntelAction, params: &Params) -> Result<Value, ErrorDetail> {
        let ioc = text_param(params, "ioc");
        let ioc_type = text_param(params, "ioc_type");

        match action {
            ThreatIntelAction::EnrichIoc => Ok(json!({
                "ioc": ioc,
                "ioc_type": ioc_type,
                "detections": 0,
                "total_engines": SIMULATED_ENGINES,
                "score": 0.0,
                "threat_label": "unknown",
                "reputation": 0,
                "simulated": true,
            })),
            ThreatIntelAction::CheckReputation => Ok(json!({
                "ioc": ioc,
                "ioc_type": ioc_type,
                "reputation": 0,
                "malicious": 0,
                "suspicious": 0,
                "harmless": 0,
                "undetected": SIMULATED_ENGINES,
                "simulated": true,
            })),
            ThreatIntelAction::QueryThreatFeed => Ok(json!({
                "count": 0,
                "notifications": [],
                "filter": text_param(params, "filter"),
                "simulated": true,
            })),
            ThreatIntelAction::CalculateHash => calculate_hash(params),
        }
    }

    async fn perform(&self, action: ThreatIntelAction, params: &Params) -> Result<Value, ErrorDetail> {
        match action {
            ThreatIntelAction::EnrichIoc => self.enrich_ioc(params).await,
            ThreatIntelAction::CheckReputation => self.check_reputation(params).await,
            ThreatIntelAction::QueryThreatFeed => self.query_threat_feed(params).await,
            ThreatIntelAction::CalculateHash => calculate_hash(params),
        }
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn clock(&self) -> &dyn Clock {
        self.limiter.clock().as_ref()
    }
}

/// VirusTotal adapter (read-only: rollback is not supported)
pub struct VirusTotalAdapter {
    clock: Arc<dyn Clock>,
    client: Option<VirusTotalClient>,
}

impl Default for VirusTotalAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl VirusTotalAdapter {
    /// Create an uninitialized adapter using real time
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an uninitialized adapter whose rate limiter and backoff use `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            client: None,
        }
    }

    /// Normalized base URL, once initialized
    pub fn base_url(&self) -> Option<&str> {
        self.client.as_ref().map(|c| c.base_url.as_str())
    }

    /// The instance's rate limiter, once initialized (for resetting or seeding its clock)
    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.client.as_ref().map(|c| &c.limiter)
    }

    fn client(&self) -> Result<&VirusTotalClient, AdapterError> {
        self.client.as_ref().ok_or_else(|| AdapterError::NotInitialized {
            adapter: ADAPTER_TYPE.to_string(),
        })
    }
}

#[async_trait]
impl Adapter for VirusTotalAdapter {
    fn name(&self) -> &str {
        self.client.as_ref().map_or(ADAPTER_TYPE, |c| c.name.as_str())
    }

    fn adapter_type(&self) -> &'static str {
        ADAPTER_TYPE
    }

    fn initialize(&mut self, config: AdapterConfig) -> Result<(), AdapterError> {
        self.client = Some(VirusTotalClient::from_config(config, self.clock.clone())?);
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    async fn execute(
        &self,
        action: &str,
        params: &Params,
        mode: ExecutionMode,
    ) -> Result<ActionResult, AdapterError> {
        dispatch(self.client()?, action, params, mode).await
    }

    fn validate_parameters(
        &self,
        action: &str,
        params: &Params,
    ) -> Result<ValidationResult, AdapterError> {
        self.client()?;
        Ok(RULES.validate(action, params))
    }

    async fn health_check(&self) -> HealthStatus {
        match &self.client {
            Some(client) => client.probe().await,
            None => HealthStatus::new(HealthState::Unknown, "Adapter not initialized", 0),
        }
    }

    async fn rollback(&self, action: &str, _params: &Params) -> Result<ActionResult, AdapterError> {
        let client = self.client()?;
        if client.parse_action(action).is_none() {
            return Err(AdapterError::UnsupportedAction {
                adapter: client.name.clone(),
                action: action.to_string(),
            });
        }

        Ok(ActionResult::failed(
            action,
            client.name.as_str(),
            ErrorDetail::rollback_not_supported(&client.name),
        ))
    }
}

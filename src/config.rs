//! Configuration management for Quotaguard.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::access::ApiKeyRecord;
use crate::error::{QuotaError, Result};

/// Main configuration for Quotaguard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaGuardConfig {
    /// Quota defaults and per-endpoint limits
    #[serde(default)]
    pub rate_limiter: RateLimiterSettings,

    /// DDoS ban tracking
    #[serde(default)]
    pub ddos: DdosSettings,

    /// Distributed counter store
    #[serde(default)]
    pub redis: RedisSettings,

    /// IP lists and known API keys
    #[serde(default)]
    pub access: AccessSettings,
}

impl QuotaGuardConfig {
    /// Load configuration from a file path. The format follows the extension
    /// (`.yaml`, `.toml`, `.json`).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| QuotaError::Config(format!("Failed to load {}: {}", path.display(), e)))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| QuotaError::Config(format!("Failed to parse configuration: {}", e)))
    }
}

/// Quota defaults and per-endpoint limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterSettings {
    /// Master switch; when off every request is admitted
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_limit")]
    pub default_limit: u32,

    #[serde(default = "default_window")]
    pub default_time_window_seconds: u32,

    #[serde(default = "default_api_key_limit")]
    pub default_api_key_limit: u32,

    #[serde(default = "default_window")]
    pub default_api_key_time_window_seconds: u32,

    /// Request headers searched, in order, for an API key
    #[serde(default = "default_api_key_headers")]
    pub api_key_headers: Vec<String>,

    /// Endpoint-specific limits keyed by normalized endpoint
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointLimit>,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_limit: default_limit(),
            default_time_window_seconds: default_window(),
            default_api_key_limit: default_api_key_limit(),
            default_api_key_time_window_seconds: default_window(),
            api_key_headers: default_api_key_headers(),
            endpoints: HashMap::new(),
        }
    }
}

impl RateLimiterSettings {
    /// Find the limits configured for an endpoint.
    pub fn endpoint(&self, endpoint: &str) -> Option<&EndpointLimit> {
        self.endpoints.get(endpoint).or_else(|| {
            self.endpoints
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(endpoint))
                .map(|(_, limit)| limit)
        })
    }
}

/// Limits for a single endpoint. Zero means "not set".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointLimit {
    #[serde(default)]
    pub limit: u32,

    #[serde(default)]
    pub time_window_seconds: u32,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub api_key_limit: u32,

    #[serde(default)]
    pub api_key_time_window_seconds: u32,

    /// Limits for individual HTTP methods on this endpoint
    #[serde(default)]
    pub method_limits: HashMap<String, u32>,
}

impl Default for EndpointLimit {
    fn default() -> Self {
        Self {
            limit: 0,
            time_window_seconds: 0,
            enabled: true,
            api_key_limit: 0,
            api_key_time_window_seconds: 0,
            method_limits: HashMap::new(),
        }
    }
}

impl EndpointLimit {
    /// Limit for an HTTP method, matched case-insensitively.
    pub fn method_limit(&self, method: &str) -> Option<u32> {
        self.method_limits
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(method))
            .map(|(_, limit)| *limit)
    }
}

/// DDoS ban tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdosSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Requests per reset interval before a source is banned
    #[serde(default = "default_ddos_threshold")]
    pub threshold: u64,

    #[serde(default = "default_ban_duration")]
    pub ban_duration_seconds: u64,

    #[serde(default = "default_reset_interval")]
    pub reset_interval_seconds: u64,
}

impl Default for DdosSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_ddos_threshold(),
            ban_duration_seconds: default_ban_duration(),
            reset_interval_seconds: default_reset_interval(),
        }
    }
}

/// Distributed counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Use the Redis-backed counter instead of the in-process one
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Namespace prepended to every rate limit key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Upper bound on a single script or query round trip
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            connect_timeout_ms: default_connect_timeout(),
            command_timeout_ms: default_command_timeout(),
        }
    }
}

impl RedisSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// IP lists and known API keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessSettings {
    #[serde(default = "default_true")]
    pub enable_ip_filtering: bool,

    #[serde(default)]
    pub whitelisted_ips: Vec<String>,

    #[serde(default)]
    pub blacklisted_ips: Vec<String>,

    #[serde(default)]
    pub api_keys: Vec<ApiKeyRecord>,
}

impl Default for AccessSettings {
    fn default() -> Self {
        Self {
            enable_ip_filtering: true,
            whitelisted_ips: Vec::new(),
            blacklisted_ips: Vec::new(),
            api_keys: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

pub(crate) fn default_limit() -> u32 {
    100
}

pub(crate) fn default_window() -> u32 {
    60
}

pub(crate) fn default_api_key_limit() -> u32 {
    200
}

fn default_api_key_headers() -> Vec<String> {
    ["X-API-Key", "api-key", "apikey", "api_key", "key"]
        .iter()
        .map(|h| h.to_string())
        .collect()
}

fn default_ddos_threshold() -> u64 {
    1000
}

fn default_ban_duration() -> u64 {
    3600
}

fn default_reset_interval() -> u64 {
    60
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "rate_limit:".to_string()
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_command_timeout() -> u64 {
    250
}

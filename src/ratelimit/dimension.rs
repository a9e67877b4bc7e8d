//! Rate limit dimensions and their per-dimension policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The axis along which requests are grouped into buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dimension {
    /// One bucket for every caller of an endpoint
    #[default]
    Global,
    /// Per source address
    Ip,
    /// Per authenticated principal
    User,
    /// Per API key presented in a request header
    ApiKey,
    /// Per HTTP method
    Method,
    /// Per endpoint
    Endpoint,
}

/// What the engine does when a dimension yields no bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingKeyPolicy {
    /// Enforcement does not apply; admit the request
    Skip,
    /// The dimension requires an identity; reject as unauthorized
    Unauthorized,
}

/// Per-dimension behavior, kept as data rather than spread across callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionPolicy {
    /// Prefix of every key in this dimension
    pub tag: &'static str,
    pub on_missing_key: MissingKeyPolicy,
    /// Requests are fed to the DDoS guard before counting
    pub ddos_tracked: bool,
    /// Falls back to the API-key defaults instead of the generic ones
    pub api_key_defaults: bool,
    /// Human description used in denial messages
    pub label: &'static str,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Global,
        Dimension::Ip,
        Dimension::User,
        Dimension::ApiKey,
        Dimension::Method,
        Dimension::Endpoint,
    ];

    pub fn policy(&self) -> DimensionPolicy {
        match self {
            Dimension::Global => DimensionPolicy {
                tag: "global",
                on_missing_key: MissingKeyPolicy::Skip,
                ddos_tracked: false,
                api_key_defaults: false,
                label: "Rate limit",
            },
            Dimension::Ip => DimensionPolicy {
                tag: "ip",
                on_missing_key: MissingKeyPolicy::Skip,
                ddos_tracked: true,
                api_key_defaults: false,
                label: "IP-based rate limit",
            },
            Dimension::User => DimensionPolicy {
                tag: "user",
                on_missing_key: MissingKeyPolicy::Skip,
                ddos_tracked: false,
                api_key_defaults: false,
                label: "User-based rate limit",
            },
            Dimension::ApiKey => DimensionPolicy {
                tag: "api-key",
                on_missing_key: MissingKeyPolicy::Unauthorized,
                ddos_tracked: false,
                api_key_defaults: true,
                label: "API key rate limit",
            },
            Dimension::Method => DimensionPolicy {
                tag: "method",
                on_missing_key: MissingKeyPolicy::Skip,
                ddos_tracked: false,
                api_key_defaults: false,
                label: "HTTP method rate limit",
            },
            Dimension::Endpoint => DimensionPolicy {
                tag: "endpoint",
                on_missing_key: MissingKeyPolicy::Skip,
                ddos_tracked: false,
                api_key_defaults: false,
                label: "Endpoint rate limit",
            },
        }
    }

    pub fn tag(&self) -> &'static str {
        self.policy().tag
    }

    /// Message shown to a caller whose quota in this dimension is exhausted.
    pub fn exceeded_message(&self, wait_seconds: u64) -> String {
        format!(
            "{} exceeded. Please try again in {} seconds.",
            self.policy().label,
            wait_seconds
        )
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "global" => Ok(Dimension::Global),
            "ip" | "ip-based" => Ok(Dimension::Ip),
            "user" | "user-based" => Ok(Dimension::User),
            "api-key" | "api-key-based" | "apikey" => Ok(Dimension::ApiKey),
            "method" | "method-based" => Ok(Dimension::Method),
            "endpoint" | "endpoint-based" => Ok(Dimension::Endpoint),
            _ => Err(format!("unknown rate limit dimension: {}", s)),
        }
    }
}

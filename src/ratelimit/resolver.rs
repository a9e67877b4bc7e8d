//! Effective limit resolution.
//!
//! Each of limit, window, and enabled is resolved on its own, highest
//! precedence first:
//!
//! 1. runtime override from a [`ConfigSource`] (environment by default)
//! 2. structured per-endpoint configuration
//! 3. the value declared by the caller's policy
//! 4. the global default
//!
//! A level only contributes a value that is present and positive; anything
//! else falls through to the next level. The global default is itself
//! overridable and ends in a hardcoded value, so resolution always succeeds.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{trace, warn};

use super::dimension::Dimension;
use crate::config::{self, EndpointLimit, RateLimiterSettings};

const ENV_PREFIX: &str = "RATE_LIMITER_";

/// Source of runtime overrides, consulted on every resolution.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads overrides from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Overrides held in memory and changeable at runtime.
#[derive(Debug, Default)]
pub struct MapSource {
    values: RwLock<HashMap<String, String>>,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }
}

/// What a request is being resolved for.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub endpoint: &'a str,
    /// HTTP method; only consulted by the method dimension
    pub method: Option<&'a str>,
}

impl<'a> Scope<'a> {
    pub fn endpoint(endpoint: &'a str) -> Self {
        Self {
            endpoint,
            method: None,
        }
    }

    pub fn with_method(mut self, method: Option<&'a str>) -> Self {
        self.method = method;
        self
    }
}

/// Resolved parameters for one (scope, dimension) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveLimit {
    pub limit: u32,
    pub window_seconds: u32,
    pub enabled: bool,
}

/// Computes effective limits from layered configuration.
pub struct ConfigResolver {
    source: Arc<dyn ConfigSource>,
    settings: RwLock<Arc<RateLimiterSettings>>,
}

impl ConfigResolver {
    pub fn new(settings: RateLimiterSettings, source: Arc<dyn ConfigSource>) -> Self {
        Self {
            source,
            settings: RwLock::new(Arc::new(settings)),
        }
    }

    /// Resolver over the process environment.
    pub fn from_env(settings: RateLimiterSettings) -> Self {
        Self::new(settings, Arc::new(EnvSource))
    }

    /// Swap the structured configuration. Takes effect on the next resolution.
    pub fn replace_settings(&self, settings: RateLimiterSettings) {
        *self.settings.write() = Arc::new(settings);
    }

    /// Snapshot of the structured configuration.
    pub fn settings(&self) -> Arc<RateLimiterSettings> {
        self.settings.read().clone()
    }

    /// Master switch, overridable with `RATE_LIMITER_ENABLED`.
    pub fn globally_enabled(&self) -> bool {
        self.override_bool(&format!("{}ENABLED", ENV_PREFIX))
            .unwrap_or_else(|| self.settings().enabled)
    }

    pub fn resolve(
        &self,
        scope: Scope<'_>,
        dimension: Dimension,
        annotation_limit: Option<u32>,
        annotation_window: Option<u32>,
    ) -> EffectiveLimit {
        let settings = self.settings();
        let api_key = dimension.policy().api_key_defaults;
        let prefix = endpoint_prefix(scope.endpoint);
        let endpoint = settings.endpoint(scope.endpoint);

        let (limit_var, window_var) = if api_key {
            ("API_KEY_LIMIT", "API_KEY_TIME_WINDOW_SECONDS")
        } else {
            ("LIMIT", "TIME_WINDOW_SECONDS")
        };

        let limit = self
            .override_positive(&format!("{}{}", prefix, limit_var))
            .or_else(|| endpoint.and_then(|e| structured_limit(e, dimension, scope.method)))
            .or_else(|| positive(annotation_limit))
            .unwrap_or_else(|| self.default_limit(&settings, api_key));

        let window_seconds = self
            .override_positive(&format!("{}{}", prefix, window_var))
            .or_else(|| endpoint.and_then(|e| structured_window(e, api_key)))
            .or_else(|| positive(annotation_window))
            .unwrap_or_else(|| self.default_window(&settings, api_key));

        let enabled = self
            .override_bool(&format!("{}ENABLED", prefix))
            .or_else(|| endpoint.map(|e| e.enabled))
            .unwrap_or(true);

        let effective = EffectiveLimit {
            limit,
            window_seconds,
            enabled,
        };
        trace!(
            endpoint = %scope.endpoint,
            dimension = %dimension,
            limit = effective.limit,
            window_seconds = effective.window_seconds,
            enabled = effective.enabled,
            "Resolved effective limit"
        );
        effective
    }

    fn default_limit(&self, settings: &RateLimiterSettings, api_key: bool) -> u32 {
        if api_key {
            self.override_positive("RATE_LIMITER_DEFAULT_API_KEY_LIMIT")
                .or_else(|| positive(Some(settings.default_api_key_limit)))
                .unwrap_or_else(config::default_api_key_limit)
        } else {
            self.override_positive("RATE_LIMITER_DEFAULT_LIMIT")
                .or_else(|| positive(Some(settings.default_limit)))
                .unwrap_or_else(config::default_limit)
        }
    }

    fn default_window(&self, settings: &RateLimiterSettings, api_key: bool) -> u32 {
        if api_key {
            self.override_positive("RATE_LIMITER_DEFAULT_API_KEY_TIME_WINDOW_SECONDS")
                .or_else(|| positive(Some(settings.default_api_key_time_window_seconds)))
                .unwrap_or_else(config::default_window)
        } else {
            self.override_positive("RATE_LIMITER_DEFAULT_TIME_WINDOW_SECONDS")
                .or_else(|| positive(Some(settings.default_time_window_seconds)))
                .unwrap_or_else(config::default_window)
        }
    }

    fn override_positive(&self, key: &str) -> Option<u32> {
        let raw = self.source.get(key)?;
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.parse::<i64>() {
            Ok(value) if value > 0 => u32::try_from(value).ok(),
            Ok(value) => {
                warn!(key = %key, value = value, "Ignoring non-positive override");
                None
            }
            Err(e) => {
                warn!(key = %key, value = %raw, error = %e, "Ignoring unparsable override");
                None
            }
        }
    }

    fn override_bool(&self, key: &str) -> Option<bool> {
        let raw = self.source.get(key)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "" => None,
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            other => {
                warn!(key = %key, value = %other, "Ignoring unparsable boolean override");
                None
            }
        }
    }
}

fn positive(value: Option<u32>) -> Option<u32> {
    value.filter(|v| *v > 0)
}

fn structured_limit(endpoint: &EndpointLimit, dimension: Dimension, method: Option<&str>) -> Option<u32> {
    match dimension {
        Dimension::ApiKey => positive(Some(endpoint.api_key_limit)),
        Dimension::Method => method
            .and_then(|m| positive(endpoint.method_limit(m)))
            .or_else(|| positive(Some(endpoint.limit))),
        _ => positive(Some(endpoint.limit)),
    }
}

fn structured_window(endpoint: &EndpointLimit, api_key: bool) -> Option<u32> {
    if api_key {
        positive(Some(endpoint.api_key_time_window_seconds))
    } else {
        positive(Some(endpoint.time_window_seconds))
    }
}

/// `RATE_LIMITER_ENDPOINTS_{EP}_` with the endpoint upper-cased and `-`/`/`
/// mapped to `_`.
fn endpoint_prefix(endpoint: &str) -> String {
    let name: String = endpoint
        .chars()
        .map(|c| match c {
            '-' | '/' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();
    format!("{}ENDPOINTS_{}_", ENV_PREFIX, name)
}

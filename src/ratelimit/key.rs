//! Bucket key derivation.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use super::dimension::Dimension;
use crate::access::ApiKeyValidator;

/// Identifies one independently counted bucket.
///
/// Composed of the dimension tag, the subject, and the endpoint, e.g.
/// `ip:203.0.113.5:orders-create`. `%` and `:` inside the subject or the
/// endpoint are percent-encoded so distinct pairs never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    fn scoped(tag: &str, subject: &str, endpoint: &str) -> Self {
        Self(format!("{}:{}:{}", tag, escape(subject), escape(endpoint)))
    }

    fn unscoped(tag: &str, subject: &str) -> Self {
        Self(format!("{}:{}", tag, escape(subject)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RateLimitKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RateLimitKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

fn escape(part: &str) -> Cow<'_, str> {
    if part.contains(['%', ':']) {
        Cow::Owned(part.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(part)
    }
}

/// The parts of the incoming request that key derivation may look at.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// HTTP method, e.g. `POST`
    pub method: Option<String>,
    /// Name of the authenticated principal, if any
    pub principal: Option<String>,
    /// Request headers, names lower-cased
    headers: HashMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Header lookup, case-insensitive on the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether the request method appears in `methods`. An empty list matches
    /// every method; a request without a method matches only an empty list.
    pub fn method_in(&self, methods: &[String]) -> bool {
        if methods.is_empty() {
            return true;
        }
        match &self.method {
            Some(method) => methods.iter().any(|m| m.eq_ignore_ascii_case(method)),
            None => false,
        }
    }
}

/// Maps a request to the bucket it is counted in.
pub struct KeyDeriver {
    /// Headers searched, in order, for an API key
    api_key_headers: Vec<String>,
    validator: Arc<dyn ApiKeyValidator>,
}

impl KeyDeriver {
    pub fn new(api_key_headers: Vec<String>, validator: Arc<dyn ApiKeyValidator>) -> Self {
        Self {
            api_key_headers,
            validator,
        }
    }

    /// Derive the bucket key, or `None` when the dimension does not apply to
    /// this request. What `None` means is the dimension's
    /// [`MissingKeyPolicy`](super::MissingKeyPolicy).
    pub fn derive_key(
        &self,
        dimension: Dimension,
        client_id: &str,
        endpoint: &str,
        context: &RequestContext,
    ) -> Option<RateLimitKey> {
        let tag = dimension.tag();
        let key = match dimension {
            Dimension::Ip => Some(RateLimitKey::scoped(tag, client_id, endpoint)),
            Dimension::User => context
                .principal
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(|principal| RateLimitKey::scoped(tag, principal, endpoint)),
            Dimension::ApiKey => self
                .api_key(context)
                .filter(|key| self.validator.is_valid_api_key(key))
                .map(|key| RateLimitKey::scoped(tag, key, endpoint)),
            Dimension::Method => match context.method.as_deref().filter(|m| !m.is_empty()) {
                Some(method) => Some(RateLimitKey::scoped(
                    tag,
                    &method.to_ascii_uppercase(),
                    endpoint,
                )),
                None => Some(RateLimitKey::unscoped(Dimension::Endpoint.tag(), endpoint)),
            },
            Dimension::Endpoint => Some(RateLimitKey::unscoped(tag, endpoint)),
            Dimension::Global => Some(RateLimitKey(tag.to_string())),
        };

        trace!(
            dimension = %dimension,
            endpoint = %endpoint,
            derived = key.is_some(),
            "Derived rate limit key"
        );
        key
    }

    /// First non-empty API key header, in configured order.
    pub fn api_key<'a>(&self, context: &'a RequestContext) -> Option<&'a str> {
        self.api_key_headers
            .iter()
            .filter_map(|name| context.header(name))
            .find(|value| !value.is_empty())
    }
}

/// Turn a request path into an endpoint identifier: the leading slash is
/// dropped and the remaining slashes become hyphens.
pub fn normalize_endpoint(path: &str) -> String {
    path.strip_prefix('/').unwrap_or(path).replace('/', "-")
}

//! Admission engine.
//!
//! Ties the resolver, key derivation, the DDoS guard, and the active counter
//! backend together into a single admit/deny decision per request.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::backend::CounterBackend;
use super::dimension::{Dimension, MissingKeyPolicy};
use super::distributed::DistributedCounter;
use super::key::{KeyDeriver, RequestContext};
use super::redis::RedisWindowStore;
use super::resolver::{ConfigResolver, Scope};
use super::sliding::SlidingWindowCounter;
use crate::access::StaticApiKeys;
use crate::clock::{Clock, SystemClock};
use crate::config::QuotaGuardConfig;
use crate::ddos::{DdosGuard, ResetTask};
use crate::error::{QuotaError, Result};

/// Limits declared at a call site.
///
/// Declared values rank below runtime overrides and structured endpoint
/// configuration but above the global defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub dimension: Dimension,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub window_seconds: Option<u32>,
    /// Methods the policy applies to; empty means all
    #[serde(default)]
    pub methods: Vec<String>,
}

impl RateLimitPolicy {
    pub fn new(dimension: Dimension) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_window(mut self, window_seconds: u32) -> Self {
        self.window_seconds = Some(window_seconds);
        self
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }
}

/// Quota figures reported with an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quota {
    pub limit: u32,
    pub remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The bucket is full for the current window
    QuotaExceeded,
    /// The source is serving a DDoS ban
    Banned,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    /// Let the request through. `quota` is absent when no counting happened.
    Admit { quota: Option<Quota> },
    Deny {
        dimension: Dimension,
        reason: DenyReason,
        wait_seconds: u64,
        limit: u32,
        remaining: u32,
    },
    /// The dimension needs an identity the request did not carry.
    Unauthorized { dimension: Dimension },
}

impl Decision {
    fn skip() -> Self {
        Decision::Admit { quota: None }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admit { .. })
    }

    /// Response headers describing the quota state.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Decision::Admit { quota: Some(q) } => vec![
                ("X-RateLimit-Limit", q.limit.to_string()),
                ("X-RateLimit-Remaining", q.remaining.to_string()),
            ],
            Decision::Deny {
                wait_seconds,
                limit,
                remaining,
                ..
            } => vec![
                ("X-RateLimit-Limit", limit.to_string()),
                ("X-RateLimit-Remaining", remaining.to_string()),
                ("Retry-After", wait_seconds.to_string()),
            ],
            Decision::Admit { quota: None } | Decision::Unauthorized { .. } => Vec::new(),
        }
    }

    /// Message for the caller when the request is rejected.
    pub fn message(&self) -> Option<String> {
        match self {
            Decision::Admit { .. } => None,
            Decision::Deny {
                reason: DenyReason::Banned,
                ..
            } => Some(
                "Request blocked due to DDoS protection. Your IP has been temporarily banned."
                    .to_string(),
            ),
            Decision::Deny {
                dimension,
                wait_seconds,
                ..
            } => Some(dimension.exceeded_message(*wait_seconds)),
            Decision::Unauthorized { .. } => Some("API key is missing or invalid.".to_string()),
        }
    }
}

/// Makes admission decisions against one counter backend.
pub struct AdmissionEngine {
    resolver: Arc<ConfigResolver>,
    keys: KeyDeriver,
    backend: Arc<dyn CounterBackend>,
    ddos: Option<Arc<DdosGuard>>,
    reset_task: Mutex<Option<ResetTask>>,
    clock: Arc<dyn Clock>,
}

/// Assembles an [`AdmissionEngine`].
pub struct AdmissionEngineBuilder {
    resolver: Arc<ConfigResolver>,
    keys: KeyDeriver,
    backend: Arc<dyn CounterBackend>,
    ddos: Option<Arc<DdosGuard>>,
    clock: Arc<dyn Clock>,
}

impl AdmissionEngineBuilder {
    /// Feed IP-keyed requests through `guard` before counting.
    pub fn ddos_guard(mut self, guard: Arc<DdosGuard>) -> Self {
        self.ddos = Some(guard);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the engine. With a DDoS guard attached this starts its reset
    /// task, so it must run inside a Tokio runtime.
    pub fn build(self) -> Result<AdmissionEngine> {
        let reset_task = match &self.ddos {
            Some(guard) => {
                if tokio::runtime::Handle::try_current().is_err() {
                    return Err(QuotaError::Config(
                        "DDoS protection requires a Tokio runtime".to_string(),
                    ));
                }
                Some(guard.spawn_reset_task(self.clock.clone()))
            }
            None => None,
        };

        info!(
            backend = self.backend.name(),
            ddos = self.ddos.is_some(),
            "Admission engine ready"
        );

        Ok(AdmissionEngine {
            resolver: self.resolver,
            keys: self.keys,
            backend: self.backend,
            ddos: self.ddos,
            reset_task: Mutex::new(reset_task),
            clock: self.clock,
        })
    }
}

impl AdmissionEngine {
    pub fn builder(
        resolver: Arc<ConfigResolver>,
        keys: KeyDeriver,
        backend: Arc<dyn CounterBackend>,
    ) -> AdmissionEngineBuilder {
        AdmissionEngineBuilder {
            resolver,
            keys,
            backend,
            ddos: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Build an engine from loaded configuration, with runtime overrides
    /// read from the environment. Connects to Redis when it is enabled.
    pub async fn from_config(config: &QuotaGuardConfig) -> Result<Self> {
        let resolver = Arc::new(ConfigResolver::from_env(config.rate_limiter.clone()));
        let api_keys = Arc::new(StaticApiKeys::new(config.access.api_keys.clone()));
        let keys = KeyDeriver::new(config.rate_limiter.api_key_headers.clone(), api_keys);

        let backend: Arc<dyn CounterBackend> = if config.redis.enabled {
            let store = RedisWindowStore::connect(&config.redis).await?;
            Arc::new(DistributedCounter::with_settings(Arc::new(store), &config.redis))
        } else {
            Arc::new(SlidingWindowCounter::new())
        };

        let mut builder = Self::builder(resolver, keys, backend);
        if config.ddos.enabled {
            builder = builder.ddos_guard(Arc::new(DdosGuard::new(config.ddos.clone())));
        }
        builder.build()
    }

    /// Decide whether one request may proceed.
    ///
    /// Quota exhaustion and missing identity come back as [`Decision`]s. An
    /// error means the counter backend failed and no decision could be made;
    /// whether to fail open or closed is up to the caller.
    pub async fn decide(
        &self,
        client_id: &str,
        endpoint: &str,
        policy: &RateLimitPolicy,
        context: &RequestContext,
    ) -> Result<Decision> {
        if !self.resolver.globally_enabled() {
            trace!(endpoint = %endpoint, "Rate limiting disabled");
            return Ok(Decision::skip());
        }

        if !context.method_in(&policy.methods) {
            trace!(
                endpoint = %endpoint,
                method = ?context.method,
                "Method not covered by policy"
            );
            return Ok(Decision::skip());
        }

        let dimension = policy.dimension;
        let dimension_policy = dimension.policy();
        let now_ms = self.clock.now_millis();

        if dimension_policy.ddos_tracked {
            if let Some(guard) = &self.ddos {
                if !guard.track(client_id, now_ms) {
                    let wait_seconds = guard.settings().ban_duration_seconds;
                    warn!(
                        client_id = %client_id,
                        endpoint = %endpoint,
                        wait_seconds = wait_seconds,
                        "Request denied by DDoS protection"
                    );
                    return Ok(Decision::Deny {
                        dimension,
                        reason: DenyReason::Banned,
                        wait_seconds,
                        limit: 0,
                        remaining: 0,
                    });
                }
            }
        }

        let key = match self.keys.derive_key(dimension, client_id, endpoint, context) {
            Some(key) => key,
            None => {
                return Ok(match dimension_policy.on_missing_key {
                    MissingKeyPolicy::Skip => {
                        trace!(dimension = %dimension, endpoint = %endpoint, "No key, skipping");
                        Decision::skip()
                    }
                    MissingKeyPolicy::Unauthorized => {
                        debug!(
                            dimension = %dimension,
                            client_id = %client_id,
                            endpoint = %endpoint,
                            "Missing or invalid identity"
                        );
                        Decision::Unauthorized { dimension }
                    }
                });
            }
        };

        let scope = Scope::endpoint(endpoint).with_method(context.method.as_deref());
        let effective = self
            .resolver
            .resolve(scope, dimension, policy.limit, policy.window_seconds);
        if !effective.enabled {
            trace!(endpoint = %endpoint, "Rate limiting disabled for endpoint");
            return Ok(Decision::skip());
        }

        let admitted = self
            .backend
            .allow(&key, effective.limit, effective.window_seconds, now_ms)
            .await?;

        if admitted {
            let quota = match self.backend.remaining(&key, effective.limit).await {
                Ok(remaining) => Some(Quota {
                    limit: effective.limit,
                    remaining,
                }),
                Err(e) => {
                    warn!(key = %key, error = %e, "Could not read remaining quota");
                    None
                }
            };
            debug!(key = %key, limit = effective.limit, "Request admitted");
            return Ok(Decision::Admit { quota });
        }

        let wait_seconds = match self
            .backend
            .wait_seconds(&key, effective.window_seconds, now_ms)
            .await
        {
            Ok(wait) => wait,
            Err(e) => {
                warn!(key = %key, error = %e, "Could not read wait time, reporting full window");
                u64::from(effective.window_seconds)
            }
        };

        debug!(
            key = %key,
            limit = effective.limit,
            window_seconds = effective.window_seconds,
            wait_seconds = wait_seconds,
            "Rate limit exceeded"
        );
        Ok(Decision::Deny {
            dimension,
            reason: DenyReason::QuotaExceeded,
            wait_seconds,
            limit: effective.limit,
            remaining: 0,
        })
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    /// The active counter backend, for diagnostic queries.
    pub fn backend(&self) -> &Arc<dyn CounterBackend> {
        &self.backend
    }

    pub fn ddos_guard(&self) -> Option<&Arc<DdosGuard>> {
        self.ddos.as_ref()
    }

    /// Whether background work started by the engine is still running.
    pub fn has_background_tasks(&self) -> bool {
        self.reset_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop background work. Safe to call more than once.
    pub async fn shutdown(&self) {
        let task = self.reset_task.lock().take();
        if let Some(task) = task {
            task.stop().await;
            info!("Admission engine shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::ApiKeyRecord;
    use crate::clock::ManualClock;
    use crate::config::{DdosSettings, EndpointLimit, RateLimiterSettings};
    use crate::ratelimit::resolver::MapSource;
    use crate::ratelimit::store::{MemoryWindowStore, WindowStore};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Harness {
        engine: AdmissionEngine,
        counter: Arc<SlidingWindowCounter>,
        overrides: Arc<MapSource>,
        clock: Arc<ManualClock>,
    }

    fn harness_with(settings: RateLimiterSettings, ddos: Option<DdosSettings>) -> Harness {
        let overrides = Arc::new(MapSource::new());
        let resolver = Arc::new(ConfigResolver::new(settings.clone(), overrides.clone()));
        let api_keys = StaticApiKeys::new(vec![ApiKeyRecord::new("good-key", "tests")]);
        let keys = KeyDeriver::new(settings.api_key_headers.clone(), Arc::new(api_keys));
        let counter = Arc::new(SlidingWindowCounter::new());
        let clock = Arc::new(ManualClock::new(1_000_000));

        let mut builder = AdmissionEngine::builder(resolver, keys, counter.clone()).clock(clock.clone());
        if let Some(ddos) = ddos {
            builder = builder.ddos_guard(Arc::new(DdosGuard::new(ddos)));
        }

        Harness {
            engine: builder.build().unwrap(),
            counter,
            overrides,
            clock,
        }
    }

    fn harness() -> Harness {
        harness_with(RateLimiterSettings::default(), None)
    }

    #[tokio::test]
    async fn test_admits_until_limit_then_denies() {
        let h = harness();
        let policy = RateLimitPolicy::new(Dimension::Ip).with_limit(2).with_window(60);
        let ctx = RequestContext::new();

        let first = h.engine.decide("203.0.113.5", "orders", &policy, &ctx).await.unwrap();
        assert_eq!(
            first,
            Decision::Admit {
                quota: Some(Quota { limit: 2, remaining: 1 })
            }
        );
        let second = h.engine.decide("203.0.113.5", "orders", &policy, &ctx).await.unwrap();
        assert!(second.is_admitted());

        let third = h.engine.decide("203.0.113.5", "orders", &policy, &ctx).await.unwrap();
        assert_eq!(
            third,
            Decision::Deny {
                dimension: Dimension::Ip,
                reason: DenyReason::QuotaExceeded,
                wait_seconds: 60,
                limit: 2,
                remaining: 0,
            }
        );
        assert_eq!(
            third.message().unwrap(),
            "IP-based rate limit exceeded. Please try again in 60 seconds."
        );

        // Another client has its own bucket
        let other = h.engine.decide("198.51.100.7", "orders", &policy, &ctx).await.unwrap();
        assert!(other.is_admitted());
    }

    #[tokio::test]
    async fn test_window_slides_with_clock() {
        let h = harness();
        let policy = RateLimitPolicy::new(Dimension::Endpoint).with_limit(1).with_window(1);
        let ctx = RequestContext::new();

        assert!(h.engine.decide("c", "search", &policy, &ctx).await.unwrap().is_admitted());
        h.clock.advance(400);
        match h.engine.decide("c", "search", &policy, &ctx).await.unwrap() {
            Decision::Deny { wait_seconds, .. } => assert_eq!(wait_seconds, 1),
            other => panic!("expected deny, got {:?}", other),
        }
        h.clock.advance(600);
        assert!(h.engine.decide("c", "search", &policy, &ctx).await.unwrap().is_admitted());
    }

    #[tokio::test]
    async fn test_globally_disabled_admits_without_counting() {
        let h = harness();
        h.overrides.set("RATE_LIMITER_ENABLED", "false");
        let policy = RateLimitPolicy::new(Dimension::Ip).with_limit(1);

        for _ in 0..5 {
            let decision = h
                .engine
                .decide("c", "orders", &policy, &RequestContext::new())
                .await
                .unwrap();
            assert_eq!(decision, Decision::Admit { quota: None });
        }
        assert_eq!(h.counter.key_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_unauthorized() {
        let h = harness();
        let policy = RateLimitPolicy::new(Dimension::ApiKey);

        let none = h
            .engine
            .decide("c", "reports", &policy, &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(none, Decision::Unauthorized { dimension: Dimension::ApiKey });
        assert_eq!(none.message().unwrap(), "API key is missing or invalid.");
        assert!(none.headers().is_empty());

        let bad = RequestContext::new().with_header("X-API-Key", "nope");
        assert!(matches!(
            h.engine.decide("c", "reports", &policy, &bad).await.unwrap(),
            Decision::Unauthorized { .. }
        ));

        let good = RequestContext::new().with_header("x-api-key", "good-key");
        match h.engine.decide("c", "reports", &policy, &good).await.unwrap() {
            Decision::Admit { quota: Some(q) } => assert_eq!(q.limit, 200),
            other => panic!("expected admit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_principal_skips() {
        let h = harness();
        let policy = RateLimitPolicy::new(Dimension::User).with_limit(1);

        for _ in 0..3 {
            let decision = h
                .engine
                .decide("c", "profile", &policy, &RequestContext::new())
                .await
                .unwrap();
            assert_eq!(decision, Decision::Admit { quota: None });
        }
        assert_eq!(h.counter.key_count(), 0);

        let alice = RequestContext::new().with_principal("alice");
        assert!(h.engine.decide("c", "profile", &policy, &alice).await.unwrap().is_admitted());
        assert!(!h.engine.decide("c", "profile", &policy, &alice).await.unwrap().is_admitted());
    }

    #[tokio::test]
    async fn test_endpoint_disabled_in_config() {
        let mut settings = RateLimiterSettings::default();
        settings.endpoints.insert(
            "health".to_string(),
            EndpointLimit {
                enabled: false,
                ..Default::default()
            },
        );
        let h = harness_with(settings, None);
        let policy = RateLimitPolicy::new(Dimension::Ip).with_limit(1);

        for _ in 0..3 {
            assert!(h
                .engine
                .decide("c", "health", &policy, &RequestContext::new())
                .await
                .unwrap()
                .is_admitted());
        }
        assert_eq!(h.counter.key_count(), 0);
    }

    #[tokio::test]
    async fn test_override_beats_declared_limit() {
        let h = harness();
        h.overrides.set("RATE_LIMITER_ENDPOINTS_ORDERS_CREATE_LIMIT", "1");
        let policy = RateLimitPolicy::new(Dimension::Ip).with_limit(50);
        let ctx = RequestContext::new();

        assert!(h.engine.decide("c", "orders-create", &policy, &ctx).await.unwrap().is_admitted());
        match h.engine.decide("c", "orders-create", &policy, &ctx).await.unwrap() {
            Decision::Deny { limit, .. } => assert_eq!(limit, 1),
            other => panic!("expected deny, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_method_filter_skips_other_methods() {
        let h = harness();
        let policy = RateLimitPolicy::new(Dimension::Method)
            .with_limit(1)
            .with_methods(["POST"]);

        let get = RequestContext::new().with_method("GET");
        for _ in 0..3 {
            assert_eq!(
                h.engine.decide("c", "orders", &policy, &get).await.unwrap(),
                Decision::Admit { quota: None }
            );
        }

        let post = RequestContext::new().with_method("post");
        assert!(h.engine.decide("c", "orders", &policy, &post).await.unwrap().is_admitted());
        assert!(!h.engine.decide("c", "orders", &policy, &post).await.unwrap().is_admitted());
        assert_eq!(h.counter.current_count(&"method:POST:orders".into()), 1);
    }

    #[tokio::test]
    async fn test_ddos_ban_denies_ip_requests() {
        let ddos = DdosSettings {
            enabled: true,
            threshold: 3,
            ban_duration_seconds: 120,
            reset_interval_seconds: 60,
        };
        let h = harness_with(RateLimiterSettings::default(), Some(ddos));
        let ip = RateLimitPolicy::new(Dimension::Ip).with_limit(100);
        let ctx = RequestContext::new();

        for _ in 0..3 {
            assert!(h.engine.decide("attacker", "login", &ip, &ctx).await.unwrap().is_admitted());
        }
        let banned = h.engine.decide("attacker", "login", &ip, &ctx).await.unwrap();
        assert_eq!(
            banned,
            Decision::Deny {
                dimension: Dimension::Ip,
                reason: DenyReason::Banned,
                wait_seconds: 120,
                limit: 0,
                remaining: 0,
            }
        );
        assert!(banned.message().unwrap().contains("DDoS protection"));

        // Only IP-keyed requests go through the guard
        let endpoint = RateLimitPolicy::new(Dimension::Endpoint).with_limit(100);
        assert!(h.engine.decide("attacker", "login", &endpoint, &ctx).await.unwrap().is_admitted());

        h.clock.advance(120_000);
        assert!(h.engine.decide("attacker", "login", &ip, &ctx).await.unwrap().is_admitted());

        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_reset_task() {
        let h = harness_with(
            RateLimiterSettings::default(),
            Some(DdosSettings {
                enabled: true,
                ..Default::default()
            }),
        );
        assert!(h.engine.has_background_tasks());

        h.engine.shutdown().await;
        assert!(!h.engine.has_background_tasks());
        h.engine.shutdown().await;
    }

    #[test]
    fn test_ddos_guard_needs_runtime() {
        let resolver = Arc::new(ConfigResolver::new(
            RateLimiterSettings::default(),
            Arc::new(MapSource::new()),
        ));
        let keys = KeyDeriver::new(Vec::new(), Arc::new(StaticApiKeys::new(Vec::new())));
        let result = AdmissionEngine::builder(resolver, keys, Arc::new(SlidingWindowCounter::new()))
            .ddos_guard(Arc::new(DdosGuard::new(DdosSettings::default())))
            .build();
        assert!(matches!(result, Err(QuotaError::Config(_))));
    }

    struct DownStore;

    #[async_trait]
    impl WindowStore for DownStore {
        async fn admit(&self, _: &str, _: u32, _: i64, _: i64, _: &str) -> Result<bool> {
            Err(QuotaError::BackendUnavailable("connection reset".to_string()))
        }

        async fn count(&self, _: &str) -> Result<u64> {
            Err(QuotaError::BackendUnavailable("connection reset".to_string()))
        }

        async fn oldest(&self, _: &str) -> Result<Option<i64>> {
            Err(QuotaError::BackendUnavailable("connection reset".to_string()))
        }
    }

    fn distributed_engine(store: Arc<dyn WindowStore>) -> AdmissionEngine {
        let resolver = Arc::new(ConfigResolver::new(
            RateLimiterSettings::default(),
            Arc::new(MapSource::new()),
        ));
        let keys = KeyDeriver::new(Vec::new(), Arc::new(StaticApiKeys::new(Vec::new())));
        let counter = DistributedCounter::new(store, "rate_limit:", Duration::from_millis(250));
        AdmissionEngine::builder(resolver, keys, Arc::new(counter))
            .clock(Arc::new(ManualClock::new(0)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_backend_failure_is_an_error() {
        let engine = distributed_engine(Arc::new(DownStore));
        let policy = RateLimitPolicy::new(Dimension::Ip).with_limit(5);

        let result = engine.decide("c", "orders", &policy, &RequestContext::new()).await;
        assert!(matches!(result, Err(QuotaError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_distributed_backend_decisions() {
        let engine = distributed_engine(Arc::new(MemoryWindowStore::new()));
        assert_eq!(engine.backend().name(), "distributed");
        let policy = RateLimitPolicy::new(Dimension::Global).with_limit(2).with_window(10);
        let ctx = RequestContext::new();

        assert!(engine.decide("a", "orders", &policy, &ctx).await.unwrap().is_admitted());
        assert!(engine.decide("b", "search", &policy, &ctx).await.unwrap().is_admitted());
        match engine.decide("c", "orders", &policy, &ctx).await.unwrap() {
            Decision::Deny { wait_seconds, limit, .. } => {
                assert_eq!(wait_seconds, 10);
                assert_eq!(limit, 2);
            }
            other => panic!("expected deny, got {:?}", other),
        }
    }

    #[test]
    fn test_decision_headers() {
        let admit = Decision::Admit {
            quota: Some(Quota { limit: 10, remaining: 4 }),
        };
        assert_eq!(
            admit.headers(),
            vec![
                ("X-RateLimit-Limit", "10".to_string()),
                ("X-RateLimit-Remaining", "4".to_string()),
            ]
        );
        assert!(admit.message().is_none());

        let deny = Decision::Deny {
            dimension: Dimension::ApiKey,
            reason: DenyReason::QuotaExceeded,
            wait_seconds: 17,
            limit: 10,
            remaining: 0,
        };
        assert!(deny.headers().contains(&("Retry-After", "17".to_string())));
        assert_eq!(
            deny.message().unwrap(),
            "API key rate limit exceeded. Please try again in 17 seconds."
        );
    }

    #[test]
    fn test_decision_serializes_with_outcome_tag() {
        let json = serde_json::to_value(Decision::Unauthorized {
            dimension: Dimension::ApiKey,
        })
        .unwrap();
        assert_eq!(json["outcome"], "unauthorized");
        assert_eq!(json["dimension"], "api-key");
    }
}

//! Rate limiting logic and state management.

mod backend;
mod dimension;
mod distributed;
mod engine;
mod key;
mod redis;
mod resolver;
mod sliding;
mod store;

pub use self::backend::CounterBackend;
pub use self::dimension::{Dimension, DimensionPolicy, MissingKeyPolicy};
pub use self::distributed::DistributedCounter;
pub use self::engine::{
    AdmissionEngine, AdmissionEngineBuilder, Decision, DenyReason, Quota, RateLimitPolicy,
};
pub use self::key::{normalize_endpoint, KeyDeriver, RateLimitKey, RequestContext};
pub use self::redis::RedisWindowStore;
pub use self::resolver::{ConfigResolver, ConfigSource, EffectiveLimit, EnvSource, MapSource, Scope};
pub use self::sliding::SlidingWindowCounter;
pub use self::store::{MemoryWindowStore, WindowStore};

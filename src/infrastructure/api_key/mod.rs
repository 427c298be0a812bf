//! API key infrastructure
//!
//! Secret generation, usage tracking, rate limiting, anomaly detection, the
//! key store, validation, the lifecycle service and its background sweeps.

mod anomaly;
mod generator;
mod rate_limiter;
mod repository;
mod rotation;
mod service;
mod store;
mod usage_tracker;
mod validator;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use anomaly::{AnomalyConfig, AnomalyDetector, AnomalySignal, TimingStats};
pub use generator::{preview, ApiKeyGenerator, GeneratedSecret};
pub use rate_limiter::{RateLimitDecision, RateLimiter, RatePeriod, Remaining};
pub use repository::InMemoryApiKeyRepository;
pub use rotation::{RotationConfig, RotationReport, RotationScheduler};
pub use service::{
    ApiKeyPolicy, CreateKeyOptions, CreatedApiKey, KeyLifecycleManager, LifecycleDeps,
    RotatedApiKey,
};
pub use store::KeyStore;
pub use usage_tracker::{UsageTracker, UsageWindow, WINDOW_RETENTION};
pub use validator::{
    domain_matches, ip_matches, origin_host, KeyValidator, RequestContext, ValidationFailure,
    ValidationResult,
};
pub use worker::{AnomalyScan, Sweep, SweepSummary, SweepWorker};

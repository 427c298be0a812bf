//! PMP API Keys
//!
//! Lifecycle and rate limiting engine for bearer API keys:
//! - Issuing keys with encrypted-at-rest secrets and per-owner quotas
//! - Validating presented secrets against allowlists and sliding-window limits
//! - Zero-downtime rotation with a grace period, and revocation
//! - Background rotation scheduling and usage anomaly detection

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;

use tracing::warn;

use api::state::AppState;
use domain::{AccessControl, AuditSink, Clock, IdentityProvider};
use infrastructure::{
    api_key::{
        AnomalyDetector, AnomalyScan, InMemoryApiKeyRepository, KeyLifecycleManager, KeyStore,
        LifecycleDeps, RateLimiter, RotationScheduler, UsageTracker,
    },
    audit::TracingAuditSink,
    clock::SystemClock,
    crypto::CryptoVault,
    identity::{StaticAccessControl, TaskLocalIdentity},
};

/// Everything `serve` runs: the HTTP state and both background sweeps
pub struct AppComponents {
    pub state: AppState,
    pub clock: Arc<dyn Clock>,
    pub rotation: Arc<RotationScheduler>,
    pub anomaly_scan: Arc<AnomalyScan>,
}

/// Create application components with default configuration
pub async fn create_app_state() -> anyhow::Result<AppComponents> {
    create_app_state_with_config(&AppConfig::default()).await
}

/// Create application components from configuration
pub async fn create_app_state_with_config(config: &AppConfig) -> anyhow::Result<AppComponents> {
    config.api_keys.validate()?;
    config.rotation.validate()?;
    config.anomaly.validate()?;

    let vault = match config.vault.master_key.as_deref() {
        Some(encoded) => CryptoVault::from_base64(encoded)?,
        None => {
            warn!("No vault master key configured; secrets issued by this process cannot be read after restart");
            CryptoVault::generate()?
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let identity: Arc<dyn IdentityProvider> = Arc::new(TaskLocalIdentity);
    let access: Arc<dyn AccessControl> = Arc::new(StaticAccessControl::new(&config.access));

    let repository = Arc::new(InMemoryApiKeyRepository::new());
    let store = Arc::new(KeyStore::load(repository).await?);

    let tracker = Arc::new(UsageTracker::new());
    let anomaly = Arc::new(AnomalyDetector::new(
        Arc::clone(&tracker),
        Arc::clone(&audit),
        config.anomaly.clone(),
    ));

    let manager = KeyLifecycleManager::new(
        LifecycleDeps {
            store: Arc::clone(&store),
            vault: Arc::new(vault),
            rate_limiter: RateLimiter::new(tracker),
            anomaly: Arc::clone(&anomaly),
            identity,
            access,
            audit: Arc::clone(&audit),
            clock: Arc::clone(&clock),
        },
        config.api_keys.clone(),
    )?;

    let rotation = Arc::new(RotationScheduler::new(
        Arc::clone(&store),
        audit,
        config.rotation.clone(),
    )?);
    let anomaly_scan = Arc::new(AnomalyScan::new(store, anomaly));

    Ok(AppComponents {
        state: AppState::new(Arc::new(manager)),
        clock,
        rotation,
        anomaly_scan,
    })
}

//! Validation pipeline for presented secrets
//!
//! `validate` never returns an error. Every outcome is reduced to a
//! [`ValidationResult`] and reported to the audit sink.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::anomaly::AnomalyDetector;
use super::generator::ApiKeyGenerator;
use super::rate_limiter::{RateLimitDecision, RateLimiter};
use super::store::KeyStore;
use crate::domain::{ApiKey, AuditEvent, AuditEventKind, AuditSink, Clock, ErrorKind, KeyUsability};
use crate::infrastructure::crypto::CryptoVault;
use crate::infrastructure::observability::record_validation;

/// Facts about the inbound request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

/// Why a secret was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFailure {
    InvalidKey,
    KeyExpired,
    IpNotAllowed,
    DomainNotAllowed,
    RateLimitExceeded,
}

impl ValidationFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidKey => "Invalid or inactive API key",
            Self::KeyExpired => "API key expired",
            Self::IpNotAllowed => "IP address not allowed",
            Self::DomainNotAllowed => "Domain not allowed",
            Self::RateLimitExceeded => "Rate limit exceeded",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKey => ErrorKind::InvalidKey,
            Self::KeyExpired => ErrorKind::KeyExpired,
            Self::IpNotAllowed => ErrorKind::IpNotAllowed,
            Self::DomainNotAllowed => ErrorKind::DomainNotAllowed,
            Self::RateLimitExceeded => ErrorKind::RateLimitExceeded,
        }
    }
}

/// Outcome of validating a presented secret
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    /// The authenticated key; only set when `valid`
    pub key: Option<ApiKey>,
    pub reason: Option<&'static str>,
    pub failure: Option<ValidationFailure>,
    pub rate_limit: Option<RateLimitDecision>,
}

impl ValidationResult {
    fn success(key: ApiKey, rate_limit: RateLimitDecision) -> Self {
        Self {
            valid: true,
            key: Some(key),
            reason: None,
            failure: None,
            rate_limit: Some(rate_limit),
        }
    }

    fn failure(failure: ValidationFailure, rate_limit: Option<RateLimitDecision>) -> Self {
        Self {
            valid: false,
            key: None,
            reason: Some(failure.reason()),
            failure: Some(failure),
            rate_limit,
        }
    }
}

/// Runs the ordered validation checks
#[derive(Debug)]
pub struct KeyValidator {
    store: Arc<KeyStore>,
    vault: Arc<CryptoVault>,
    generator: ApiKeyGenerator,
    rate_limiter: RateLimiter,
    anomaly: Arc<AnomalyDetector>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl KeyValidator {
    pub fn new(
        store: Arc<KeyStore>,
        vault: Arc<CryptoVault>,
        generator: ApiKeyGenerator,
        rate_limiter: RateLimiter,
        anomaly: Arc<AnomalyDetector>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            vault,
            generator,
            rate_limiter,
            anomaly,
            audit,
            clock,
        }
    }

    pub async fn validate(&self, candidate: &str, context: &RequestContext) -> ValidationResult {
        let now = self.clock.now();

        let Some(key) = self.locate(candidate) else {
            return self.reject(None, ValidationFailure::InvalidKey, None, context, now);
        };

        match key.usability_at(now) {
            KeyUsability::Usable => {}
            KeyUsability::Inactive => {
                return self.reject(Some(&key), ValidationFailure::InvalidKey, None, context, now);
            }
            KeyUsability::Expired => {
                self.expire(&key, now).await;
                return self.reject(Some(&key), ValidationFailure::KeyExpired, None, context, now);
            }
        }

        if !ip_allowed(&key, context.ip.as_deref()) {
            return self.reject(Some(&key), ValidationFailure::IpNotAllowed, None, context, now);
        }

        if !domain_allowed(&key, context.origin.as_deref()) {
            return self.reject(Some(&key), ValidationFailure::DomainNotAllowed, None, context, now);
        }

        let decision = self
            .rate_limiter
            .check_and_consume(key.id(), key.rate_limits(), now);
        if !decision.allowed {
            return self.reject(
                Some(&key),
                ValidationFailure::RateLimitExceeded,
                Some(decision),
                context,
                now,
            );
        }

        // Revoked or rotated away since it was located
        let Some(key) = self.store.record_usage(key.id(), now) else {
            return self.reject(Some(&key), ValidationFailure::InvalidKey, None, context, now);
        };
        self.anomaly.observe(&key, now);

        record_validation("valid");
        self.audit.record(
            usage_event(AuditEventKind::ApiKeyUsed, Some(&key), context, now)
                .with_detail("usage_count", key.usage_count()),
        );

        ValidationResult::success(key, decision)
    }

    /// Find the record whose stored secret equals `candidate`
    ///
    /// Only records sharing the candidate's locator are decrypted. Decryption
    /// failures count as "no match".
    fn locate(&self, candidate: &str) -> Option<ApiKey> {
        let locator = self.generator.locator_for(candidate)?;

        self.store
            .candidates(&locator)
            .into_iter()
            .find(|key| {
                match self
                    .vault
                    .matches(candidate, key.encrypted_secret(), key.id().as_str())
                {
                    Ok(matched) => matched,
                    Err(e) => {
                        debug!(key_id = %key.id(), error = %e, "Candidate could not be decrypted");
                        false
                    }
                }
            })
    }

    /// Persist the lazily observed expiry
    async fn expire(&self, key: &ApiKey, now: DateTime<Utc>) {
        if let Err(e) = self.store.expire_if_lapsed(key.id(), now).await {
            warn!(key_id = %key.id(), error = %e, "Failed to persist key expiry");
        }
    }

    fn reject(
        &self,
        key: Option<&ApiKey>,
        failure: ValidationFailure,
        rate_limit: Option<RateLimitDecision>,
        context: &RequestContext,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        debug!(
            key_id = key.map(|k| k.id().as_str()),
            reason = failure.reason(),
            "API key validation failed"
        );
        record_validation(failure.kind().as_str());

        let mut event = usage_event(AuditEventKind::ApiKeyValidationFailed, key, context, now)
            .with_detail("reason", failure.reason());
        if let Some(period) = rate_limit.as_ref().and_then(|decision| decision.period) {
            event = event.with_detail("period", period.as_str());
        }
        self.audit.record(event);

        ValidationResult::failure(failure, rate_limit)
    }
}

fn usage_event(
    kind: AuditEventKind,
    key: Option<&ApiKey>,
    context: &RequestContext,
    now: DateTime<Utc>,
) -> AuditEvent {
    let mut event = AuditEvent::new(kind, now);

    if let Some(key) = key {
        event = event.with_key(key.id()).with_user(key.owner_id());
    }

    let fields = [
        ("ip", &context.ip),
        ("origin", &context.origin),
        ("endpoint", &context.endpoint),
        ("method", &context.method),
    ];
    for (name, value) in fields {
        if let Some(value) = value {
            event = event.with_detail(name, value.as_str());
        }
    }

    event
}

fn ip_allowed(key: &ApiKey, ip: Option<&str>) -> bool {
    if key.allowed_ips().is_empty() {
        return true;
    }

    let Some(ip) = ip else {
        return false;
    };

    key.allowed_ips()
        .iter()
        .any(|pattern| ip_matches(pattern, ip))
}

/// Match an IP against `*`, a `prefix*` pattern or a literal address
pub fn ip_matches(pattern: &str, ip: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix('*') {
        return ip.starts_with(prefix);
    }

    match (pattern.parse::<IpAddr>(), ip.parse::<IpAddr>()) {
        (Ok(allowed), Ok(actual)) => allowed == actual,
        _ => pattern == ip,
    }
}

fn domain_allowed(key: &ApiKey, origin: Option<&str>) -> bool {
    if key.allowed_domains().is_empty() {
        return true;
    }

    let Some(host) = origin.and_then(origin_host) else {
        return false;
    };

    key.allowed_domains()
        .iter()
        .any(|pattern| domain_matches(pattern, &host))
}

/// Suffix match on label boundaries; `*.` prefixes are accepted
pub fn domain_matches(pattern: &str, host: &str) -> bool {
    let domain = pattern
        .strip_prefix("*.")
        .unwrap_or(pattern)
        .to_ascii_lowercase();

    host == domain || host.ends_with(&format!(".{}", domain))
}

/// Extract the lowercase host of an `Origin`/`Referer` value
pub fn origin_host(origin: &str) -> Option<String> {
    let without_scheme = origin
        .split_once("://")
        .map_or(origin, |(_, rest)| rest);

    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let authority = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);

    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split(']').next().unwrap_or_default()
    } else {
        authority.split(':').next().unwrap_or_default()
    };

    if host.is_empty() {
        None
    } else {
        Some(host.trim_end_matches('.').to_ascii_lowercase())
    }
}

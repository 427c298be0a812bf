//! Observability infrastructure - Metrics

mod config;
mod metrics;

pub use config::MetricsConfig;
pub use metrics::{
    create_metrics_router, init_metrics, record_anomaly, record_http_request, record_lifecycle,
    record_sweep, record_validation, PrometheusMetrics,
};

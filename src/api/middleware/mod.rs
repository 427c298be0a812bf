//! API middleware and extractors

pub mod auth;
pub mod identity;
pub mod metrics;

pub use auth::{request_context, AuthenticatedKey, RequireApiKey};
pub use identity::RequireUser;
pub use metrics::metrics_middleware;

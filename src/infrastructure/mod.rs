//! Infrastructure layer - Engine components and adapters

pub mod api_key;
pub mod audit;
pub mod clock;
pub mod crypto;
pub mod identity;
pub mod logging;
pub mod observability;

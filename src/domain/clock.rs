//! Time source port

use std::fmt::Debug;

use chrono::{DateTime, Utc};

/// Source of wall-clock time for windows, grace periods and sweeps
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

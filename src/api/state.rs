//! Application state shared by the HTTP handlers

use std::sync::Arc;

use crate::infrastructure::api_key::KeyLifecycleManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<KeyLifecycleManager>,
}

impl AppState {
    pub fn new(manager: Arc<KeyLifecycleManager>) -> Self {
        Self { manager }
    }
}

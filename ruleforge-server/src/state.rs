//! Application state

use ruleforge_core::ServiceFacade;
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The rule engine service façade.
    pub facade: Arc<ServiceFacade>,
    /// Server start time.
    pub start_time: Instant,
}

impl AppState {
    /// Create new application state.
    pub fn new(facade: Arc<ServiceFacade>) -> Self {
        Self { facade, start_time: Instant::now() }
    }

    /// Uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

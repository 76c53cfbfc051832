//! HTTP façade over the rule engine service façade.
//!
//! Exposes [`ruleforge_core::ServiceFacade`] as a REST API: content
//! classification, scenario execution, liveness/readiness probes, and
//! Prometheus metrics.

pub mod api;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod state;

pub use api::{ClassifyRequest, HealthResponse, RunRequest};
pub use error::{ApiError, ApiResult};
pub use state::AppState;

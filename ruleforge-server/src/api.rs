//! API request and response types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classification request body.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyRequest {
    /// Raw content to classify.
    pub content: String,
    /// Originating file name, if known.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Declared content size, if known.
    #[serde(default)]
    pub size: Option<u64>,
    /// Caller-supplied correlation facts, attached to the classification span.
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

/// Scenario run request body.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Facts the scenario's rules evaluate against.
    #[serde(default)]
    pub facts: BTreeMap<String, serde_json::Value>,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Service status reported at `/health/live` and `/health/ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Service is healthy.
    Healthy,
    /// Service is degraded but functional.
    Degraded,
    /// Service is unhealthy.
    Unhealthy,
}

impl From<ruleforge_core::HealthStatus> for HealthStatus {
    fn from(status: ruleforge_core::HealthStatus) -> Self {
        match status {
            ruleforge_core::HealthStatus::Healthy => HealthStatus::Healthy,
            ruleforge_core::HealthStatus::Degraded => HealthStatus::Degraded,
            ruleforge_core::HealthStatus::Unhealthy => HealthStatus::Unhealthy,
        }
    }
}

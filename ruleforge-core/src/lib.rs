//! RuleForge Core - a business rule evaluation and classification engine
//!
//! Evaluates boolean/arithmetic expressions against named facts, composes
//! them into groups, chains, and multi-stage scenarios, classifies raw
//! content into routed scenarios, and hot-reloads its configuration from
//! TOML/JSON documents without downtime.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod classify;
pub mod config;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod expr;
pub mod facade;
pub mod model;
pub mod monitor;
pub mod recovery;
pub mod registry;
pub mod reload;
pub mod stages;
pub mod tracing_setup;
pub mod types;
pub mod watcher;

pub use cache::{Cache, CacheConfig, CacheStatistics};
pub use classify::{ClassificationInput, ClassificationResult, Classifier};
pub use config::ConfigurationDocument;
pub use engine::{ChainResult, Engine};
pub use error::{Result, RuleForgeError};
pub use facade::{EventKind, EventRecord, HealthCheckResult, HealthStatus, ServiceFacade};
pub use model::{Category, Metadata, Rule, RuleChain, RuleGroup, RuleResult};
pub use registry::{DataSource, Registry};
pub use reload::ReloadCoordinator;
pub use stages::{execute_stages, ScenarioExecutionResult, Stage};
pub use types::{FactContext, Value};

/// Crate version, as declared in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}

//! Error types for the rule engine

use thiserror::Error;

/// The closed set of error kinds the engine can produce.
///
/// Internal failures (I/O, malformed JSON/TOML, poisoned locks) are mapped to
/// one of these variants at the façade boundary; nothing else is allowed to
/// cross it.
#[derive(Error, Debug)]
pub enum RuleForgeError {
    /// An expression referenced a fact that is not present in the context.
    #[error("missing parameters: {0:?}")]
    MissingParameters(Vec<String>),

    /// An expression could not be parsed.
    #[error("parse error: {0}")]
    ParseError(String),

    /// A value was not of the expected type.
    #[error("type error: {0}")]
    TypeError(String),

    /// A variable reference resolved to nothing.
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    /// An evaluation exceeded its deadline.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// A routing rule produced a key with no matching route.
    #[error("no route for key: {0}")]
    RouteNotFound(String),

    /// Configuration failed validation.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// A name collided with one already registered.
    #[error("duplicate name: {0}")]
    DuplicateName(String),

    /// A lookup by name found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stage could not run because a dependency did not succeed.
    #[error("dependency failed: {0}")]
    DependencyFailed(String),

    /// A scenario was terminated by its failure policy.
    #[error("terminated: {0}")]
    Terminated(String),

    /// The operation was attempted after shutdown.
    #[error("operation attempted after shutdown")]
    Shutdown,
}

impl From<std::io::Error> for RuleForgeError {
    fn from(e: std::io::Error) -> Self {
        RuleForgeError::ConfigurationError(format!("I/O error: {e}"))
    }
}

impl From<serde_json::Error> for RuleForgeError {
    fn from(e: serde_json::Error) -> Self {
        RuleForgeError::ConfigurationError(format!("JSON error: {e}"))
    }
}

impl From<toml::de::Error> for RuleForgeError {
    fn from(e: toml::de::Error) -> Self {
        RuleForgeError::ConfigurationError(format!("TOML error: {e}"))
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RuleForgeError>;

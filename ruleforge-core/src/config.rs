//! External configuration documents (§6)
//!
//! Wire-format types loaded from TOML/JSON, converted into the core model
//! ([`crate::model`]) at the façade boundary. Kept distinct from the core
//! model so the wire format (flat `category` names, `enabled` flags) can
//! evolve independently of the in-memory representation.

use crate::cache::CacheConfig;
use crate::error::{Result, RuleForgeError};
use crate::model::{Category, GroupOperator, Metadata, Rule, RuleBuilder, RuleChain, Status};
use crate::recovery::RecoveryConfig;
use crate::stages::FailurePolicy;
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Top-level metadata for a configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration name.
    pub name: String,
    /// Free-form version string.
    pub version: String,
    /// Human-readable description.
    pub description: String,
    /// Configuration type label (e.g. `"rules"`, `"scenario"`).
    #[serde(rename = "type")]
    pub config_type: String,
    /// Author or owning team.
    pub author: Option<String>,
    /// Creation date (RFC 3339).
    pub created_at: Option<String>,
}

/// A category as it appears in a configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Category name.
    pub name: String,
    /// Display priority; lower sorts first.
    #[serde(default)]
    pub priority: i32,
    /// Owning business domain.
    pub business_domain: Option<String>,
    /// Business owner contact.
    pub business_owner: Option<String>,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

impl CategoryConfig {
    fn into_category(self) -> Category {
        Category { name: self.name, description: self.description, sequence: self.priority }
    }
}

/// A rule as it appears in a configuration document (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Stable identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Optional longer description.
    #[serde(default)]
    pub description: String,
    /// Category name this rule belongs to.
    pub category: Option<String>,
    /// Expression text.
    pub condition: String,
    /// Match message.
    pub message: String,
    /// Lower priority runs first.
    #[serde(default)]
    pub priority: i32,
    /// Whether the rule is eligible for execution.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Creator identity.
    #[serde(default)]
    pub created_by: String,
    /// Owning business domain.
    pub business_domain: Option<String>,
    /// Business owner contact.
    pub business_owner: Option<String>,
    /// Originating source system.
    pub source_system: Option<String>,
    /// Effective date (RFC 3339).
    pub effective_date: Option<String>,
    /// Expiration date (RFC 3339).
    pub expiration_date: Option<String>,
    /// Free-form custom properties.
    #[serde(default)]
    pub custom_properties: BTreeMap<String, Value>,
}

fn default_true() -> bool {
    true
}

impl RuleConfig {
    /// Convert into the core [`Rule`] model, resolving `category` against
    /// the document's category table.
    pub fn into_rule(self, categories: &BTreeMap<String, Category>) -> Result<Rule> {
        let mut builder = RuleBuilder::new()
            .id(self.id)
            .name(self.name)
            .description(self.description)
            .condition(self.condition)
            .message(self.message)
            .priority(self.priority);

        if let Some(category_name) = &self.category {
            let category = categories
                .get(category_name)
                .cloned()
                .unwrap_or_else(|| Category { name: category_name.clone(), description: String::new(), sequence: 0 });
            builder = builder.category(category);
        }

        builder = builder.metadata(Metadata {
            created_at: String::new(),
            modified_at: String::new(),
            created_by: self.created_by,
            status: if self.enabled { Status::Active } else { Status::Inactive },
            version: "1".to_string(),
            business_domain: self.business_domain,
            business_owner: self.business_owner,
            source_system: self.source_system,
            effective_date: self.effective_date,
            expiration_date: self.expiration_date,
            tags: Vec::new(),
            custom_properties: self.custom_properties,
        });

        builder.build()
    }
}

/// A rule group as it appears in a configuration document, referencing
/// rules by id rather than embedding them (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleGroupConfig {
    /// Stable identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Category name, informational.
    pub category: Option<String>,
    /// Display priority.
    #[serde(default)]
    pub priority: i32,
    /// Whether the group is eligible for execution.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Rule ids, resolved against the document's rule table.
    pub rule_ids: Vec<String>,
    /// Combination operator.
    #[serde(default)]
    pub operator: GroupOperator,
}

/// A rule chain as it appears in a configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleChainConfig {
    /// Stable identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Which pattern this chain executes.
    pub pattern: crate::model::ChainPattern,
    /// Whether the chain is eligible for execution.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Display priority.
    #[serde(default)]
    pub priority: i32,
    /// Pattern-specific configuration, passed through to the engine.
    pub configuration: serde_json::Value,
}

impl RuleChainConfig {
    fn into_chain(self) -> RuleChain {
        RuleChain { id: self.id, name: self.name, pattern: self.pattern, configuration: self.configuration }
    }
}

/// A stage reference within a [`ScenarioConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stable identifier.
    pub id: String,
    /// Position in the execution order.
    pub order: i32,
    /// Ids of stages that must succeed before this one runs.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Path or key identifying this stage's rule configuration.
    pub config_ref: String,
    /// Policy applied on stage failure.
    #[serde(default = "default_failure_policy")]
    pub failure_policy: FailurePolicy,
    /// Dataset lookup consulted before this stage's rules run.
    #[serde(default)]
    pub enrichment: Option<StageEnrichmentConfig>,
}

fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::Terminate
}

/// A dataset lookup attached to a [`StageConfig`] (§4.9, §4.10 step c).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEnrichmentConfig {
    /// Dataset name, resolved against the document's dataset table.
    pub dataset: String,
    /// Fact key whose value is used as the lookup key.
    pub key_field: String,
}

/// A scenario as it appears in a configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Stable identifier.
    pub id: String,
    /// Ordered stage references.
    pub stages: Vec<StageConfig>,
    /// Data types this scenario is applicable to.
    #[serde(default)]
    pub data_types: Vec<String>,
    /// Owning business domain.
    pub business_domain: Option<String>,
    /// Scenario owner contact.
    pub owner: Option<String>,
}

/// A data source as it appears in a configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Stable name, unique within the registry.
    pub name: String,
    /// Type label, e.g. `"database"` or `"http"`.
    pub source_type: String,
    /// Source-specific configuration, opaque to the registry.
    #[serde(default)]
    pub source_configuration: serde_json::Value,
    /// Cache configuration for this source's responses.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A lookup dataset as it appears in a configuration document (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Stable name, referenced by a [`StageEnrichmentConfig::dataset`].
    pub name: String,
    /// Field each record is indexed by.
    pub key_field: String,
    /// Raw records to index.
    #[serde(default)]
    pub records: Vec<BTreeMap<String, Value>>,
    /// Fallback fields used when a lookup key has no matching record.
    #[serde(default)]
    pub defaults: Option<BTreeMap<String, Value>>,
}

/// Retry strategy for data-source calls (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategy {
    /// Never retry.
    None,
    /// Always wait `initial_delay`.
    FixedDelay,
    /// Wait `initial_delay * multiplier^(attempt - 1)`.
    ExponentialBackoff,
    /// Wait `initial_delay * attempt`.
    LinearBackoff,
}

/// Circuit-breaker configuration nested within [`RetryConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Master enable switch.
    pub enabled: bool,
    /// Consecutive failures before opening the circuit.
    pub threshold: u32,
    /// How long the circuit stays open before a half-open probe, in
    /// milliseconds.
    pub timeout_ms: u64,
    /// Consecutive probe successes required to close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig { enabled: false, threshold: 5, timeout_ms: 30_000, success_threshold: 2 }
    }
}

/// Retry configuration for data-source calls (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Which backoff shape to apply.
    pub strategy: RetryStrategy,
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Base delay before applying backoff/jitter, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on the computed delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Randomization factor in `[0, 1]` applied to the computed delay.
    pub jitter_factor: f64,
    /// Error type names that should be retried.
    #[serde(default)]
    pub retryable_exceptions: Vec<String>,
    /// Error type names that should never be retried.
    #[serde(default)]
    pub non_retryable_exceptions: Vec<String>,
    /// HTTP status codes that should be retried.
    #[serde(default)]
    pub retryable_http_codes: Vec<u16>,
    /// HTTP status codes that should never be retried.
    #[serde(default)]
    pub non_retryable_http_codes: Vec<u16>,
    /// Circuit-breaker settings layered on top of retry.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Hard ceiling on total time spent retrying a single call, in
    /// milliseconds.
    pub total_retry_timeout_ms: u64,
    /// Maximum retries allowed per minute, across all calls.
    pub per_minute_cap: Option<u32>,
    /// Maximum retries allowed per hour, across all calls.
    pub per_hour_cap: Option<u32>,
    /// Log each retry attempt at `warn` level.
    #[serde(default = "default_true")]
    pub logging: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            strategy: RetryStrategy::ExponentialBackoff,
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            retryable_exceptions: Vec::new(),
            non_retryable_exceptions: Vec::new(),
            retryable_http_codes: vec![502, 503, 504],
            non_retryable_http_codes: vec![400, 401, 403, 404],
            circuit_breaker: CircuitBreakerConfig::default(),
            total_retry_timeout_ms: 30_000,
            per_minute_cap: None,
            per_hour_cap: None,
            logging: true,
        }
    }
}

impl RetryConfig {
    /// Compute the un-jittered delay for attempt `n` (1-indexed), per §6's
    /// formula.
    pub fn base_delay_ms(&self, attempt: u32) -> f64 {
        let n = attempt.max(1) as f64;
        match self.strategy {
            RetryStrategy::None => 0.0,
            RetryStrategy::FixedDelay => self.initial_delay_ms as f64,
            RetryStrategy::ExponentialBackoff => self.initial_delay_ms as f64 * self.backoff_multiplier.powf(n - 1.0),
            RetryStrategy::LinearBackoff => self.initial_delay_ms as f64 * n,
        }
    }

    /// Apply jitter to a base delay and clamp to `max_delay_ms`: `delay *
    /// (1 + (rand - 0.5) * 2 * jitter)`, where `rand` is caller-supplied in
    /// `[0, 1]` so the formula stays deterministic and testable.
    pub fn jittered_delay_ms(&self, base_delay_ms: f64, rand: f64) -> f64 {
        let jittered = base_delay_ms * (1.0 + (rand - 0.5) * 2.0 * self.jitter_factor);
        jittered.clamp(0.0, self.max_delay_ms as f64)
    }
}

/// A fully parsed configuration document, ready to be loaded into the
/// façade (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationDocument {
    /// Document metadata.
    pub metadata: ConfigMetadata,
    /// Category table.
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
    /// Rule table.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    /// Rule group table.
    #[serde(default)]
    pub rule_groups: Vec<RuleGroupConfig>,
    /// Rule chain table.
    #[serde(default)]
    pub rule_chains: Vec<RuleChainConfig>,
    /// Scenario table.
    #[serde(default)]
    pub scenarios: Vec<ScenarioConfig>,
    /// Data source table.
    #[serde(default)]
    pub data_sources: Vec<DataSourceConfig>,
    /// Lookup dataset table.
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

impl ConfigurationDocument {
    /// Parse a configuration document from a TOML file.
    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Parse a configuration document from a JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Resolve every rule and category in this document, by id/name.
    pub fn resolve_rules(&self) -> Result<BTreeMap<String, Rule>> {
        let categories: BTreeMap<String, Category> = self
            .categories
            .iter()
            .cloned()
            .map(|c| (c.name.clone(), c.clone().into_category()))
            .collect();

        let mut rules = BTreeMap::new();
        for rule_config in &self.rules {
            let rule = rule_config.clone().into_rule(&categories)?;
            rules.insert(rule.id.clone(), rule);
        }
        Ok(rules)
    }

    /// Resolve rule groups, expanding `rule_ids` against [`Self::resolve_rules`].
    pub fn resolve_rule_groups(&self, rules: &BTreeMap<String, Rule>) -> Result<Vec<crate::model::RuleGroup>> {
        let mut groups = Vec::with_capacity(self.rule_groups.len());
        for group_config in &self.rule_groups {
            let mut builder = crate::model::RuleGroupBuilder::new()
                .id(group_config.id.clone())
                .name(group_config.name.clone())
                .description(group_config.name.clone())
                .operator(group_config.operator);
            for rule_id in &group_config.rule_ids {
                let rule = rules
                    .get(rule_id)
                    .cloned()
                    .ok_or_else(|| RuleForgeError::NotFound(format!("rule `{rule_id}` referenced by group `{}`", group_config.id)))?;
                builder = builder.rule(rule);
            }
            groups.push(builder.build()?);
        }
        Ok(groups)
    }

    /// Resolve rule chains into the core model.
    pub fn resolve_rule_chains(&self) -> Vec<RuleChain> {
        self.rule_chains.iter().cloned().map(RuleChainConfig::into_chain).collect()
    }

    /// Build the enrichment service backing this document's dataset table.
    pub fn resolve_datasets(&self) -> crate::enrichment::EnrichmentService {
        let mut service = crate::enrichment::EnrichmentService::new();
        for dataset_config in &self.datasets {
            let (dataset, stats) = crate::enrichment::Dataset::new(
                dataset_config.key_field.clone(),
                dataset_config.records.clone(),
                dataset_config.defaults.clone(),
            );
            if stats.skipped_count > 0 {
                warn!(
                    dataset = dataset_config.name.as_str(),
                    skipped = stats.skipped_count,
                    "dataset records skipped at load"
                );
            }
            service.register(dataset_config.name.clone(), dataset);
        }
        service
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_exponential_backoff_doubles_each_attempt() {
        let config = RetryConfig { strategy: RetryStrategy::ExponentialBackoff, initial_delay_ms: 100, backoff_multiplier: 2.0, ..RetryConfig::default() };
        assert_eq!(config.base_delay_ms(1), 100.0);
        assert_eq!(config.base_delay_ms(2), 200.0);
        assert_eq!(config.base_delay_ms(3), 400.0);
    }

    #[test]
    fn retry_linear_backoff_scales_with_attempt() {
        let config = RetryConfig { strategy: RetryStrategy::LinearBackoff, initial_delay_ms: 50, ..RetryConfig::default() };
        assert_eq!(config.base_delay_ms(3), 150.0);
    }

    #[test]
    fn jitter_clamps_to_max_delay() {
        let config = RetryConfig { max_delay_ms: 300, jitter_factor: 0.5, ..RetryConfig::default() };
        let delay = config.jittered_delay_ms(1000.0, 1.0);
        assert_eq!(delay, 300.0);
    }

    #[test]
    fn jitter_with_midpoint_rand_is_unchanged() {
        let config = RetryConfig { max_delay_ms: 10_000, jitter_factor: 0.2, ..RetryConfig::default() };
        let delay = config.jittered_delay_ms(100.0, 0.5);
        assert_eq!(delay, 100.0);
    }

    #[test]
    fn resolve_rules_links_category_by_name() {
        let doc = ConfigurationDocument {
            metadata: ConfigMetadata { name: "n".into(), version: "1".into(), description: "".into(), config_type: "rules".into(), author: None, created_at: None },
            categories: vec![CategoryConfig { name: "risk".into(), priority: 1, business_domain: None, business_owner: None, description: "".into() }],
            rules: vec![RuleConfig {
                id: "r1".into(),
                name: "r1".into(),
                description: "".into(),
                category: Some("risk".into()),
                condition: "#x > 1".into(),
                message: "m".into(),
                priority: 0,
                enabled: true,
                created_by: "test".into(),
                business_domain: None,
                business_owner: None,
                source_system: None,
                effective_date: None,
                expiration_date: None,
                custom_properties: BTreeMap::new(),
            }],
            rule_groups: vec![],
            rule_chains: vec![],
            scenarios: vec![],
            data_sources: vec![],
            datasets: vec![],
        };
        let rules = doc.resolve_rules().unwrap();
        let rule = rules.get("r1").unwrap();
        assert_eq!(rule.categories[0].name, "risk");
    }

    #[test]
    fn resolve_datasets_registers_each_table_entry() {
        let doc = ConfigurationDocument {
            metadata: ConfigMetadata { name: "n".into(), version: "1".into(), description: "".into(), config_type: "rules".into(), author: None, created_at: None },
            categories: vec![],
            rules: vec![],
            rule_groups: vec![],
            rule_chains: vec![],
            scenarios: vec![],
            data_sources: vec![],
            datasets: vec![DatasetConfig {
                name: "customers".into(),
                key_field: "id".into(),
                records: vec![BTreeMap::from([("id".to_string(), Value::string("acme")), ("tier".to_string(), Value::string("gold"))])],
                defaults: None,
            }],
        };
        let service = doc.resolve_datasets();
        let mut facts = crate::types::FactContext::new();
        service.enrich(&mut facts, "stage1", "customers", Some("acme"));
        assert_eq!(facts.get("stage1_tier"), Some(&Value::string("gold")));
    }
}

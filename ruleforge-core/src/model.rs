//! Rule model: immutable rules, groups, chains, categories and metadata (C2)

use crate::error::{Result, RuleForgeError};
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Boolean composition operator for a [`RuleGroup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupOperator {
    /// All rules must match.
    And,
    /// At least one rule must match.
    Or,
}

impl Default for GroupOperator {
    fn default() -> Self {
        GroupOperator::And
    }
}

/// Lifecycle status of a piece of rule metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Eligible for execution.
    Active,
    /// Present but not executed.
    Inactive,
    /// Permanently withdrawn.
    Retired,
    /// Not yet promoted to active.
    Draft,
}

/// A category a rule can be tagged with; equality and ordering are by name
/// only (§3 invariant c), sequence number only affects display ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    /// Category name, used for equality.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Lower sorts first.
    pub sequence: i32,
}

impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for Category {}

impl PartialOrd for Category {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Category {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sequence.cmp(&other.sequence).then_with(|| self.name.cmp(&other.name))
    }
}

/// Immutable metadata record carried by every rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Creation timestamp (RFC 3339), always set.
    pub created_at: String,
    /// Last-modified timestamp (RFC 3339), always set, `>= created_at`.
    pub modified_at: String,
    /// User or system that created the rule.
    pub created_by: String,
    /// Current lifecycle status.
    pub status: Status,
    /// Free-form version string.
    pub version: String,
    /// Owning business domain.
    pub business_domain: Option<String>,
    /// Business owner contact.
    pub business_owner: Option<String>,
    /// Originating source system.
    pub source_system: Option<String>,
    /// Date the rule becomes effective (RFC 3339).
    pub effective_date: Option<String>,
    /// Date the rule expires (RFC 3339).
    pub expiration_date: Option<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Open map for custom properties not otherwise modeled.
    pub custom_properties: BTreeMap<String, Value>,
}

impl Metadata {
    /// `true` iff the rule is in a status the engine will execute.
    pub fn active(&self) -> bool {
        matches!(self.status, Status::Active)
    }
}

/// An immutable, executable rule: a named boolean/arithmetic expression with
/// a priority and a set of categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Stable identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Expression text evaluated against a [`crate::types::FactContext`].
    pub condition: String,
    /// Message attached to a `match` result.
    pub message: String,
    /// Optional longer description.
    pub description: String,
    /// Lower priority value runs first among unordered collections.
    pub priority: i32,
    /// Categories this rule belongs to.
    pub categories: Vec<Category>,
    /// Metadata record.
    pub metadata: Metadata,
}

/// Builder for [`Rule`], rejecting empty required fields at `build()` time
/// (§3 invariant a).
#[derive(Debug, Default, Clone)]
pub struct RuleBuilder {
    id: Option<String>,
    name: Option<String>,
    condition: Option<String>,
    message: Option<String>,
    description: String,
    priority: i32,
    categories: Vec<Category>,
    metadata: Option<Metadata>,
}

impl RuleBuilder {
    /// Start a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rule id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the rule name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the rule condition expression.
    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Set the match message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a category.
    pub fn category(mut self, category: Category) -> Self {
        self.categories.push(category);
        self
    }

    /// Set metadata explicitly (defaults to a minimal active record).
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Validate and construct the rule.
    pub fn build(self) -> Result<Rule> {
        let id = non_empty(self.id, "id")?;
        let name = non_empty(self.name, "name")?;
        let condition = non_empty(self.condition, "condition")?;
        let message = non_empty(self.message, "message")?;
        let metadata = self.metadata.unwrap_or_else(default_metadata);
        Ok(Rule {
            id,
            name,
            condition,
            message,
            description: self.description,
            priority: self.priority,
            categories: self.categories,
            metadata,
        })
    }
}

fn non_empty(field: Option<String>, name: &str) -> Result<String> {
    match field {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(RuleForgeError::ConfigurationError(format!(
            "rule field `{name}` must not be empty"
        ))),
    }
}

fn default_metadata() -> Metadata {
    Metadata {
        created_at: String::new(),
        modified_at: String::new(),
        created_by: String::new(),
        status: Status::Active,
        version: "1".to_string(),
        business_domain: None,
        business_owner: None,
        source_system: None,
        effective_date: None,
        expiration_date: None,
        tags: Vec::new(),
        custom_properties: BTreeMap::new(),
    }
}

/// An ordered collection of rules combined with a boolean operator (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleGroup {
    /// Stable identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Description (required, non-empty).
    pub description: String,
    /// Combination operator.
    #[serde(default)]
    pub operator: GroupOperator,
    /// Rules in declared (insertion) order.
    pub rules: Vec<Rule>,
}

/// Builder for [`RuleGroup`] requiring non-empty name/description.
#[derive(Debug, Default, Clone)]
pub struct RuleGroupBuilder {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    operator: GroupOperator,
    rules: Vec<Rule>,
}

impl RuleGroupBuilder {
    /// Start a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the group id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the group name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the group description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the combination operator.
    pub fn operator(mut self, operator: GroupOperator) -> Self {
        self.operator = operator;
        self
    }

    /// Append a rule, preserving insertion order.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Validate and construct the group.
    pub fn build(self) -> Result<RuleGroup> {
        let name = non_empty(self.name, "name")?;
        let description = non_empty(self.description, "description")?;
        Ok(RuleGroup {
            id: self.id.unwrap_or_default(),
            name,
            description,
            operator: self.operator,
            rules: self.rules,
        })
    }
}

/// The pattern a [`RuleChain`] executes (§4.5.1–4.5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainPattern {
    /// Trigger rule selects one of two rule buckets.
    ConditionalChaining,
    /// Ordered stages whose outputs feed later stages.
    SequentialDependency,
    /// A router rule selects a named route of rules.
    ResultBasedRouting,
}

/// A composite evaluation unit: identifier, pattern, and an opaque
/// pattern-specific configuration map (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleChain {
    /// Stable identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Which pattern this chain executes.
    pub pattern: ChainPattern,
    /// Pattern-specific configuration, interpreted by the engine.
    pub configuration: serde_json::Value,
}

/// Outcome discriminant of a [`RuleResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The rule (or chain) matched.
    Match,
    /// The rule (or chain) did not match.
    NoMatch,
    /// Evaluation failed.
    Error,
    /// There were no rules to evaluate.
    NoRules,
}

/// Timing captured by the performance monitor for a single evaluation
/// (§4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Evaluation start, as nanoseconds since an arbitrary epoch.
    pub start_nanos: u128,
    /// Evaluation end, as nanoseconds since the same epoch.
    pub end_nanos: u128,
    /// `end_nanos - start_nanos`.
    pub elapsed_nanos: u64,
    /// `true` if the evaluation raised an error.
    pub errored: bool,
}

/// The result of evaluating a single rule, rule list, or rule group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    /// Discriminant.
    pub outcome: Outcome,
    /// Name of the rule (or chain/group) that produced this result.
    pub rule_name: String,
    /// Human-facing message (match message, or error text).
    pub message: String,
    /// Timing, present on every result including recovered ones (§8 property 7).
    pub metrics: Option<PerformanceMetrics>,
    /// Data enriched/derived during evaluation.
    pub enriched_data: BTreeMap<String, Value>,
    /// Non-fatal failure messages accumulated during recovery.
    pub failures: Vec<String>,
    /// `true` if the rule matched; kept distinct from `outcome` to let
    /// callers ergonomically check the common case.
    pub triggered: bool,
}

impl RuleResult {
    /// Build a `no-rules` result, used when an empty list is evaluated.
    pub fn no_rules() -> Self {
        RuleResult {
            outcome: Outcome::NoRules,
            rule_name: String::new(),
            message: "no rules to evaluate".to_string(),
            metrics: None,
            enriched_data: BTreeMap::new(),
            failures: Vec::new(),
            triggered: false,
        }
    }

    /// Build a `no-match` result for the named rule.
    pub fn no_match(rule_name: impl Into<String>) -> Self {
        RuleResult {
            outcome: Outcome::NoMatch,
            rule_name: rule_name.into(),
            message: String::new(),
            metrics: None,
            enriched_data: BTreeMap::new(),
            failures: Vec::new(),
            triggered: false,
        }
    }

    /// Build a `match` result for the named rule.
    pub fn matched(rule_name: impl Into<String>, message: impl Into<String>) -> Self {
        RuleResult {
            outcome: Outcome::Match,
            rule_name: rule_name.into(),
            message: message.into(),
            metrics: None,
            enriched_data: BTreeMap::new(),
            failures: Vec::new(),
            triggered: true,
        }
    }

    /// Build an `error` result for the named rule.
    pub fn error(rule_name: impl Into<String>, message: impl Into<String>) -> Self {
        RuleResult {
            outcome: Outcome::Error,
            rule_name: rule_name.into(),
            message: message.into(),
            metrics: None,
            enriched_data: BTreeMap::new(),
            failures: Vec::new(),
            triggered: false,
        }
    }

    /// Attach timing metrics, builder style.
    pub fn with_metrics(mut self, metrics: PerformanceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

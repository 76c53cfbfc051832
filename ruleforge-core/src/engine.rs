//! Rule Engine Core (C5)
//!
//! Executes single rules, rule groups, and rule chains against a
//! [`FactContext`], enforcing the up-front parameter check (§4.5 step 1)
//! before any evaluation and routing failures through [`recovery::recover`]
//! (§4.5 step 2). Chain execution implements the three patterns in
//! §4.5.1–4.5.3.

use crate::error::{Result, RuleForgeError};
use crate::expr::{self, CompiledExpression};
use crate::model::{ChainPattern, GroupOperator, Outcome, Rule, RuleChain, RuleGroup, RuleResult};
use crate::monitor::PerformanceMonitor;
use crate::recovery::{self, RecoveryConfig};
use crate::types::{FactContext, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared configuration the engine needs for every evaluation: a performance
/// monitor and a recovery policy (§4.5).
pub struct Engine {
    monitor: Arc<PerformanceMonitor>,
    recovery: RecoveryConfig,
}

impl Engine {
    /// Build an engine with the process-wide monitor and the given recovery
    /// policy.
    pub fn new(recovery: RecoveryConfig) -> Self {
        Engine { monitor: crate::monitor::global(), recovery }
    }

    /// Build an engine with an explicit monitor, useful for tests that want
    /// isolated aggregates.
    pub fn with_monitor(monitor: Arc<PerformanceMonitor>, recovery: RecoveryConfig) -> Self {
        Engine { monitor, recovery }
    }

    /// Evaluate a single rule against `context` (§4.5 steps 1–2).
    ///
    /// Inactive rules short-circuit to `no-match` without being timed or
    /// parameter-checked, since they were never meant to run.
    pub fn execute_rule(&self, rule: &Rule, context: &FactContext) -> RuleResult {
        if !rule.metadata.active() {
            return RuleResult::no_match(&rule.name);
        }

        let compiled = match CompiledExpression::compile(&rule.condition) {
            Ok(c) => c,
            Err(e) => return RuleResult::error(&rule.name, e.to_string()),
        };

        if let Err(e) = expr::check_parameters(&compiled, context) {
            if let RuleForgeError::MissingParameters(_) = &e {
                return self.recover(rule, context, &e.to_string(), None);
            }
            return RuleResult::error(&rule.name, e.to_string());
        }

        let handle = self.monitor.start(&rule.name);
        match expr::evaluate_compiled(&compiled, context) {
            Ok(value) => {
                let metrics = self.monitor.complete(handle, false);
                outcome_from_value(rule, value).with_metrics(metrics)
            }
            Err(e) => {
                let metrics = self.monitor.complete(handle, true);
                self.recover(rule, context, &e.to_string(), Some(metrics))
            }
        }
    }

    fn recover(
        &self,
        rule: &Rule,
        context: &FactContext,
        message: &str,
        metrics: Option<crate::model::PerformanceMetrics>,
    ) -> RuleResult {
        let severity = rule
            .categories
            .first()
            .map(|c| c.name.as_str());
        recovery::recover(&self.recovery, &rule.name, &rule.condition, context, message, severity, metrics)
    }

    /// Evaluate a sequence of rules independently against the same context,
    /// preserving order. An empty slice yields [`RuleResult::no_rules`].
    pub fn execute_rules(&self, rules: &[Rule], context: &FactContext) -> Vec<RuleResult> {
        if rules.is_empty() {
            return vec![RuleResult::no_rules()];
        }
        rules.iter().map(|r| self.execute_rule(r, context)).collect()
    }

    /// Evaluate a rule group, combining member results with its operator
    /// (§3: AND requires every rule to match, OR requires at least one).
    pub fn execute_rule_group(&self, group: &RuleGroup, context: &FactContext) -> RuleResult {
        if group.rules.is_empty() {
            return RuleResult::no_rules();
        }
        let results = self.execute_rules(&group.rules, context);

        if let Some(error) = results.iter().find(|r| r.outcome == Outcome::Error) {
            return RuleResult::error(&group.name, error.message.clone());
        }

        let triggered = match group.operator {
            GroupOperator::And => results.iter().all(|r| r.triggered),
            GroupOperator::Or => results.iter().any(|r| r.triggered),
        };

        let messages: Vec<String> = results
            .iter()
            .filter(|r| r.triggered)
            .map(|r| r.message.clone())
            .filter(|m| !m.is_empty())
            .collect();

        if triggered {
            RuleResult::matched(&group.name, messages.join("; "))
        } else {
            RuleResult::no_match(&group.name)
        }
    }

    /// Dispatch a [`RuleChain`] to the executor for its configured pattern
    /// (§4.5.1–4.5.3).
    pub fn execute_rule_chain(&self, chain: &RuleChain, context: &FactContext) -> ChainResult {
        match chain.pattern {
            ChainPattern::ConditionalChaining => self.run_conditional_chaining(chain, context),
            ChainPattern::SequentialDependency => self.run_sequential_dependency(chain, context),
            ChainPattern::ResultBasedRouting => self.run_result_based_routing(chain, context),
        }
    }

    fn run_conditional_chaining(&self, chain: &RuleChain, context: &FactContext) -> ChainResult {
        let config: ConditionalChainingConfig = match serde_json::from_value(chain.configuration.clone()) {
            Ok(c) => c,
            Err(e) => return ChainResult::error(&chain.name, format!("invalid chain configuration: {e}")),
        };

        let trigger_result = self.execute_rule(&config.trigger_rule, context);
        if trigger_result.outcome == Outcome::Error {
            return ChainResult::error(&chain.name, trigger_result.message);
        }

        let (label, branch) = if trigger_result.triggered {
            ("TRIGGERED_PATH_COMPLETED", &config.matched_rules)
        } else {
            ("NO_TRIGGER_PATH_COMPLETED", &config.unmatched_rules)
        };

        let mut results = vec![trigger_result];
        results.extend(self.execute_rules(branch, context));
        ChainResult::completed(&chain.name, label, results)
    }

    fn run_sequential_dependency(&self, chain: &RuleChain, context: &FactContext) -> ChainResult {
        let config: SequentialDependencyConfig = match serde_json::from_value(chain.configuration.clone()) {
            Ok(c) => c,
            Err(e) => return ChainResult::error(&chain.name, format!("invalid chain configuration: {e}")),
        };

        let mut working = context.clone();
        let mut results = Vec::with_capacity(config.stages.len());
        for stage in &config.stages {
            let result = self.execute_rule(&stage.rule, &working);
            let stopped = result.outcome == Outcome::Error;
            for (key, value) in &result.enriched_data {
                working.set(key.clone(), value.clone());
            }
            // Bind under the stage's declared output variable, independent of
            // the rule's own name — lets rule ids use the kebab-case
            // convention `#`-expressions can't lex while still giving later
            // stages a name to reference (§4.5.2).
            if let Some(value) = result.enriched_data.get(&stage.rule.name) {
                working.set(stage.output_variable.clone(), value.clone());
            }
            results.push(result);
            if stopped {
                return ChainResult::error(&chain.name, "stage failed, pipeline stopped".to_string());
            }
        }
        ChainResult::completed(&chain.name, "SEQUENTIAL_PIPELINE_COMPLETED", results)
    }

    fn run_result_based_routing(&self, chain: &RuleChain, context: &FactContext) -> ChainResult {
        let config: ResultBasedRoutingConfig = match serde_json::from_value(chain.configuration.clone()) {
            Ok(c) => c,
            Err(e) => return ChainResult::error(&chain.name, format!("invalid chain configuration: {e}")),
        };

        let router_result = self.execute_rule(&config.router_rule, context);
        if router_result.outcome == Outcome::Error {
            return ChainResult::error(&chain.name, router_result.message);
        }

        // The router rule's evaluated value, not its static message, names the
        // route: non-boolean outcomes land in `enriched_data` under the rule's
        // own name (see `outcome_from_value`).
        let route_key = router_result
            .enriched_data
            .get(&config.router_rule.name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| if router_result.message.is_empty() { None } else { Some(router_result.message.clone()) });

        let route_key = match route_key.or_else(|| config.default_route.clone()) {
            Some(k) => k,
            None => {
                return ChainResult::error(
                    &chain.name,
                    RuleForgeError::RouteNotFound("<empty>".to_string()).to_string(),
                )
            }
        };

        let rules = match config.routes.get(&route_key) {
            Some(rules) => rules,
            None => {
                return ChainResult::error(&chain.name, RuleForgeError::RouteNotFound(route_key).to_string())
            }
        };

        let mut results = vec![router_result];
        results.extend(self.execute_rules(rules, context));
        ChainResult::completed(&chain.name, &format!("ROUTE_{route_key}_COMPLETED"), results)
    }
}

fn outcome_from_value(rule: &Rule, value: Value) -> RuleResult {
    match value {
        Value::Null => RuleResult::no_match(&rule.name),
        Value::Bool(true) => {
            let mut result = RuleResult::matched(&rule.name, rule.message.clone());
            result.enriched_data.insert(rule.name.clone(), Value::Bool(true));
            result
        }
        Value::Bool(false) => {
            let mut result = RuleResult::no_match(&rule.name);
            result.enriched_data.insert(rule.name.clone(), Value::Bool(false));
            result
        }
        other => {
            let mut result = RuleResult::matched(&rule.name, rule.message.clone());
            result.enriched_data.insert(rule.name.clone(), other);
            result
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConditionalChainingConfig {
    trigger_rule: Rule,
    #[serde(default)]
    matched_rules: Vec<Rule>,
    #[serde(default)]
    unmatched_rules: Vec<Rule>,
}

/// A single stage of a sequential-dependency chain: the rule to run, and the
/// `#variable` name its result is bound to for later stages (§4.5.2).
#[derive(Debug, Deserialize)]
struct SequentialStage {
    rule: Rule,
    output_variable: String,
}

#[derive(Debug, Deserialize)]
struct SequentialDependencyConfig {
    stages: Vec<SequentialStage>,
}

#[derive(Debug, Deserialize)]
struct ResultBasedRoutingConfig {
    router_rule: Rule,
    routes: BTreeMap<String, Vec<Rule>>,
    #[serde(default)]
    default_route: Option<String>,
}

/// The outcome of executing a [`RuleChain`]: a label describing which path
/// was taken, plus every [`RuleResult`] produced along the way.
#[derive(Debug, Clone, Serialize)]
pub struct ChainResult {
    /// Chain identifier this result belongs to.
    pub chain_name: String,
    /// `true` if the chain ran to completion without error.
    pub completed: bool,
    /// Completion label, e.g. `TRIGGERED_PATH_COMPLETED` or
    /// `ROUTE_<key>_COMPLETED`; empty on error.
    pub label: String,
    /// Per-step results in execution order.
    pub results: Vec<RuleResult>,
    /// Error message, present only when `completed` is `false`.
    pub error: Option<String>,
}

impl ChainResult {
    fn completed(chain_name: &str, label: &str, results: Vec<RuleResult>) -> Self {
        ChainResult {
            chain_name: chain_name.to_string(),
            completed: true,
            label: label.to_string(),
            results,
            error: None,
        }
    }

    fn error(chain_name: &str, message: String) -> Self {
        ChainResult {
            chain_name: chain_name.to_string(),
            completed: false,
            label: String::new(),
            results: Vec::new(),
            error: Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Metadata, RuleBuilder, Status};

    fn rule(id: &str, condition: &str) -> Rule {
        RuleBuilder::new()
            .id(id)
            .name(id)
            .condition(condition)
            .message(format!("{id} matched"))
            .metadata(Metadata {
                created_at: String::new(),
                modified_at: String::new(),
                created_by: "test".into(),
                status: Status::Active,
                version: "1".into(),
                business_domain: None,
                business_owner: None,
                source_system: None,
                effective_date: None,
                expiration_date: None,
                tags: Vec::new(),
                custom_properties: Default::default(),
            })
            .build()
            .unwrap()
    }

    #[test]
    fn execute_rule_matches() {
        let engine = Engine::new(RecoveryConfig::default());
        let mut ctx = FactContext::new();
        ctx.set("amount", Value::Integer(150));
        let result = engine.execute_rule(&rule("r1", "#amount > 100"), &ctx);
        assert_eq!(result.outcome, Outcome::Match);
        assert!(result.metrics.is_some());
    }

    #[test]
    fn execute_rule_missing_parameter_recovers() {
        let engine = Engine::new(RecoveryConfig::default());
        let ctx = FactContext::new();
        let result = engine.execute_rule(&rule("r1", "#amount > 100"), &ctx);
        assert_eq!(result.outcome, Outcome::NoMatch);
    }

    #[test]
    fn execute_rules_empty_yields_no_rules() {
        let engine = Engine::new(RecoveryConfig::default());
        let ctx = FactContext::new();
        let results = engine.execute_rules(&[], &ctx);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, Outcome::NoRules);
    }

    #[test]
    fn execute_rule_group_and_requires_all() {
        let engine = Engine::new(RecoveryConfig::default());
        let mut ctx = FactContext::new();
        ctx.set("amount", Value::Integer(150));
        ctx.set("region", Value::string("us"));
        let group = crate::model::RuleGroupBuilder::new()
            .name("g")
            .description("d")
            .operator(GroupOperator::And)
            .rule(rule("r1", "#amount > 100"))
            .rule(rule("r2", "#region == \"eu\""))
            .build()
            .unwrap();
        let result = engine.execute_rule_group(&group, &ctx);
        assert_eq!(result.outcome, Outcome::NoMatch);
    }

    #[test]
    fn execute_rule_group_or_needs_one() {
        let engine = Engine::new(RecoveryConfig::default());
        let mut ctx = FactContext::new();
        ctx.set("amount", Value::Integer(150));
        ctx.set("region", Value::string("us"));
        let group = crate::model::RuleGroupBuilder::new()
            .name("g")
            .description("d")
            .operator(GroupOperator::Or)
            .rule(rule("r1", "#amount > 100"))
            .rule(rule("r2", "#region == \"eu\""))
            .build()
            .unwrap();
        let result = engine.execute_rule_group(&group, &ctx);
        assert_eq!(result.outcome, Outcome::Match);
    }

    #[test]
    fn conditional_chaining_takes_triggered_path() {
        let engine = Engine::new(RecoveryConfig::default());
        let mut ctx = FactContext::new();
        ctx.set("amount", Value::Integer(5000));
        let config = serde_json::json!({
            "trigger_rule": rule("trigger", "#amount > 1000"),
            "matched_rules": [rule("review", "true")],
            "unmatched_rules": [],
        });
        let chain = RuleChain {
            id: "c1".into(),
            name: "high value path".into(),
            pattern: ChainPattern::ConditionalChaining,
            configuration: config,
        };
        let result = engine.execute_rule_chain(&chain, &ctx);
        assert!(result.completed);
        assert_eq!(result.label, "TRIGGERED_PATH_COMPLETED");
        assert_eq!(result.results.len(), 2);
    }

    #[test]
    fn result_based_routing_dispatches_on_router_message() {
        let engine = Engine::new(RecoveryConfig::default());
        let mut ctx = FactContext::new();
        ctx.set("tier", Value::string("gold"));
        let mut router = rule("router", "#tier");
        router.message.clear();
        let mut routes = BTreeMap::new();
        routes.insert("gold".to_string(), vec![rule("gold-perk", "true")]);
        let config = serde_json::json!({
            "router_rule": router,
            "routes": routes,
            "default_route": serde_json::Value::Null,
        });
        let chain = RuleChain {
            id: "c2".into(),
            name: "tier routing".into(),
            pattern: ChainPattern::ResultBasedRouting,
            configuration: config,
        };
        let result = engine.execute_rule_chain(&chain, &ctx);
        assert!(result.completed);
        assert_eq!(result.label, "ROUTE_gold_COMPLETED");
    }

    #[test]
    fn result_based_routing_missing_route_errors() {
        let engine = Engine::new(RecoveryConfig::default());
        let ctx = FactContext::new();
        let mut router = rule("router", "\"unknown\"");
        router.message.clear();
        let config = serde_json::json!({
            "router_rule": router,
            "routes": BTreeMap::<String, Vec<Rule>>::new(),
            "default_route": serde_json::Value::Null,
        });
        let chain = RuleChain {
            id: "c3".into(),
            name: "missing route".into(),
            pattern: ChainPattern::ResultBasedRouting,
            configuration: config,
        };
        let result = engine.execute_rule_chain(&chain, &ctx);
        assert!(!result.completed);
    }

    #[test]
    fn sequential_dependency_passes_enriched_data_forward() {
        let engine = Engine::new(RecoveryConfig::default());
        let ctx = FactContext::new();
        let config = serde_json::json!({
            "stages": [{"rule": rule("stage1", "1 + 1"), "output_variable": "stage1"}],
        });
        let chain = RuleChain {
            id: "c4".into(),
            name: "pipeline".into(),
            pattern: ChainPattern::SequentialDependency,
            configuration: config,
        };
        let result = engine.execute_rule_chain(&chain, &ctx);
        assert!(result.completed);
        assert_eq!(result.label, "SEQUENTIAL_PIPELINE_COMPLETED");
    }
}

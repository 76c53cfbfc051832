//! Error Recovery (C3)
//!
//! Turns a failed evaluation into a usable [`RuleResult`] according to a
//! configurable per-severity strategy, preserving the performance metrics
//! captured before the failure (§4.3).

use crate::expr;
use crate::model::{PerformanceMetrics, RuleResult};
use crate::types::FactContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// A recovery strategy applied when a rule's evaluation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryStrategy {
    /// Substitute a `no-match` result.
    ContinueWithDefault,
    /// Rewrite the expression defensively and retry once.
    RetryWithSafeExpression,
    /// Return `no-match`, marking the rule skipped.
    SkipRule,
    /// Propagate the error upward unchanged.
    FailFast,
}

/// Per-severity recovery configuration (§6 "Error-recovery configuration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Master enable switch.
    pub enabled: bool,
    /// Log every recovery attempt at `warn` level.
    pub log_recovery_attempts: bool,
    /// Emit metrics for recovery attempts and outcomes.
    pub metrics_enabled: bool,
    /// Strategy used when no severity-specific policy matches.
    pub default_strategy: RecoveryStrategy,
    /// Strategy overrides keyed by severity label.
    pub severity_policies: BTreeMap<String, RecoveryStrategy>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            enabled: true,
            log_recovery_attempts: true,
            metrics_enabled: true,
            default_strategy: RecoveryStrategy::ContinueWithDefault,
            severity_policies: BTreeMap::new(),
        }
    }
}

impl RecoveryConfig {
    fn strategy_for(&self, severity: Option<&str>) -> RecoveryStrategy {
        severity
            .and_then(|s| self.severity_policies.get(s))
            .copied()
            .unwrap_or(self.default_strategy)
    }
}

/// Recover from a rule evaluation failure, per the strategy configured for
/// `severity` (or the config default when `severity` is `None` or unmapped).
///
/// `pre_failure_metrics` are attached to the recovered result if the
/// recovery path doesn't produce its own (§4.3 contract).
pub fn recover(
    config: &RecoveryConfig,
    rule_name: &str,
    expression: &str,
    context: &FactContext,
    failure_message: &str,
    severity: Option<&str>,
    pre_failure_metrics: Option<PerformanceMetrics>,
) -> RuleResult {
    let strategy = config.strategy_for(severity);

    if config.log_recovery_attempts {
        warn!(
            rule = rule_name,
            strategy = ?strategy,
            error = failure_message,
            "recovering from rule evaluation failure"
        );
    }

    if config.metrics_enabled {
        crate::monitor::record_recovery_attempt(rule_name, strategy);
    }

    let mut result = match strategy {
        RecoveryStrategy::ContinueWithDefault => {
            let mut r = RuleResult::no_match(rule_name);
            r.failures.push(failure_message.to_string());
            r
        }
        RecoveryStrategy::SkipRule => {
            let mut r = RuleResult::no_match(rule_name);
            r.failures.push(format!("rule skipped after failure: {failure_message}"));
            r
        }
        RecoveryStrategy::RetryWithSafeExpression => {
            match expr::make_safe_expression(expression) {
                Some(safe_expr) => {
                    let mut r = expr::evaluate_with_result(rule_name, &safe_expr, context);
                    if r.metrics.is_none() {
                        r.failures.push(format!(
                            "recovered via safe-expression retry after: {failure_message}"
                        ));
                    }
                    r
                }
                None => {
                    let mut r = RuleResult::error(rule_name, failure_message.to_string());
                    r.failures.push("no safe rewrite available for this expression".to_string());
                    r
                }
            }
        }
        RecoveryStrategy::FailFast => RuleResult::error(rule_name, failure_message.to_string()),
    };

    // Every result carries metrics (§8 property 7), even recovery paths that
    // never reached a timed evaluation (e.g. a missing-parameter short
    // circuit) — those get a zero-duration record rather than `None`.
    if result.metrics.is_none() {
        result.metrics = Some(pre_failure_metrics.unwrap_or(crate::model::PerformanceMetrics {
            start_nanos: 0,
            end_nanos: 0,
            elapsed_nanos: 0,
            errored: result.outcome == crate::model::Outcome::Error,
        }));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn continue_with_default_yields_no_match() {
        let config = RecoveryConfig { default_strategy: RecoveryStrategy::ContinueWithDefault, ..Default::default() };
        let ctx = FactContext::new();
        let result = recover(&config, "r1", "#x > 1", &ctx, "boom", None, None);
        assert_eq!(result.outcome, crate::model::Outcome::NoMatch);
        assert_eq!(result.failures.len(), 1);
    }

    #[test]
    fn fail_fast_propagates_error() {
        let config = RecoveryConfig { default_strategy: RecoveryStrategy::FailFast, ..Default::default() };
        let ctx = FactContext::new();
        let result = recover(&config, "r1", "#x > 1", &ctx, "boom", None, None);
        assert_eq!(result.outcome, crate::model::Outcome::Error);
    }

    #[test]
    fn retry_with_safe_expression_recovers_when_guard_saves_it() {
        let config = RecoveryConfig {
            default_strategy: RecoveryStrategy::RetryWithSafeExpression,
            ..Default::default()
        };
        let mut ctx = FactContext::new();
        ctx.set("account", Value::Null);
        let result = recover(&config, "r1", "#account.owner.active", &ctx, "field not found", None, None);
        // The null guard makes the safe expression evaluate to false -> no-match.
        assert_eq!(result.outcome, crate::model::Outcome::NoMatch);
    }

    #[test]
    fn severity_policy_overrides_default() {
        let mut config = RecoveryConfig { default_strategy: RecoveryStrategy::FailFast, ..Default::default() };
        config.severity_policies.insert("low".to_string(), RecoveryStrategy::SkipRule);
        let ctx = FactContext::new();
        let result = recover(&config, "r1", "#x", &ctx, "boom", Some("low"), None);
        assert_eq!(result.outcome, crate::model::Outcome::NoMatch);
    }

    #[test]
    fn preserves_pre_failure_metrics_when_recovery_has_none() {
        let config = RecoveryConfig::default();
        let ctx = FactContext::new();
        let metrics = PerformanceMetrics { start_nanos: 0, end_nanos: 10, elapsed_nanos: 10, errored: true };
        let result = recover(&config, "r1", "#x", &ctx, "boom", None, Some(metrics));
        assert!(result.metrics.is_some());
        assert_eq!(result.metrics.unwrap().elapsed_nanos, 10);
    }
}

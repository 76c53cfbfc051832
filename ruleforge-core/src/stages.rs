//! Scenario Stage Executor (C10)
//!
//! Runs a scenario's stages in declared order, honoring inter-stage
//! dependencies and a per-stage failure policy, and produces a
//! [`ScenarioExecutionResult`] summarizing the run (§4.10).

use crate::engine::Engine;
use crate::enrichment::EnrichmentService;
use crate::model::{Outcome, Rule, RuleResult};
use crate::types::{FactContext, Value};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// What to do when a stage fails (§4.10 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop the scenario; mark all remaining stages skipped.
    Terminate,
    /// Record a warning and keep going.
    ContinueWithWarnings,
    /// Flag the scenario for manual review and keep going.
    FlagForReview,
}

/// A single stage in a scenario's execution plan.
#[derive(Debug, Clone)]
pub struct Stage {
    /// Stable identifier, also used as the `stagePrefix` for enriched output
    /// keys contributed to later stages.
    pub id: String,
    /// Position in the execution order; stages run lowest-first.
    pub order: i32,
    /// Other stage ids that must have completed successfully first.
    pub dependencies: Vec<String>,
    /// Rules this stage evaluates.
    pub rules: Vec<Rule>,
    /// Policy applied if this stage's result is a failure.
    pub failure_policy: FailurePolicy,
    /// Optional dataset lookup consulted against the shared enrichment
    /// service before this stage's rules run (§4.9, §4.10 step c).
    pub enrichment: Option<StageEnrichment>,
}

/// A stage's binding to the enrichment service: which dataset to consult and
/// which fact to use as the lookup key.
#[derive(Debug, Clone)]
pub struct StageEnrichment {
    /// Name the dataset is registered under in the [`EnrichmentService`].
    pub dataset: String,
    /// Fact key whose string value is looked up in the dataset.
    pub key_field: String,
}

/// Per-stage outcome after running [`execute_stages`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    /// Ran and every rule succeeded (no errors).
    Success,
    /// Ran but produced an error.
    Error,
    /// Did not run because a dependency did not succeed, or because the
    /// scenario had already terminated.
    Skipped { reason: String },
    /// Stage configuration itself was invalid.
    ConfigurationError { reason: String },
}

/// Result for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage identifier.
    pub stage_id: String,
    /// Outcome discriminant.
    pub status: StageStatus,
    /// Rule results produced, if the stage ran.
    pub rule_results: Vec<RuleResult>,
    /// Elapsed time for this stage, in microseconds.
    pub elapsed_micros: u64,
}

impl StageResult {
    fn succeeded(&self) -> bool {
        matches!(self.status, StageStatus::Success)
    }
}

/// The outcome of running every stage of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioExecutionResult {
    /// Per-stage results, in execution order.
    pub stage_results: Vec<StageResult>,
    /// Accumulated warnings from `continue-with-warnings` stages.
    pub warnings: Vec<String>,
    /// Accumulated review flags from `flag-for-review` stages.
    pub review_flags: Vec<String>,
    /// `true` if a `terminate` policy stage stopped the scenario early.
    pub terminated: bool,
    /// `true` if any stage set a review flag.
    pub requires_review: bool,
    /// Total elapsed time across all stages, in microseconds.
    pub total_elapsed_micros: u64,
    /// One-line human-facing summary.
    pub summary: String,
}

/// Execute every stage of a scenario against `data`, in declared order,
/// honoring dependencies and failure policies, and consulting `enrichment`
/// for any stage that declares a dataset lookup (§4.10).
pub fn execute_stages(
    engine: &Engine,
    stages: &[Stage],
    data: &FactContext,
    enrichment: &EnrichmentService,
) -> ScenarioExecutionResult {
    let mut ordered: Vec<&Stage> = stages.iter().collect();
    ordered.sort_by_key(|s| s.order);

    let mut stage_results: Vec<StageResult> = Vec::with_capacity(ordered.len());
    let mut warnings = Vec::new();
    let mut review_flags = Vec::new();
    let mut terminated = false;
    let total_start = Instant::now();

    let succeeded_ids = |results: &[StageResult]| -> Vec<String> {
        results.iter().filter(|r| r.succeeded()).map(|r| r.stage_id.clone()).collect()
    };

    for stage in ordered {
        if terminated {
            stage_results.push(StageResult {
                stage_id: stage.id.clone(),
                status: StageStatus::Skipped { reason: "terminated by prior failure".to_string() },
                rule_results: Vec::new(),
                elapsed_micros: 0,
            });
            continue;
        }

        let completed = succeeded_ids(&stage_results);
        let failed_deps: Vec<&String> =
            stage.dependencies.iter().filter(|d| !completed.contains(d)).collect();
        if !failed_deps.is_empty() {
            stage_results.push(StageResult {
                stage_id: stage.id.clone(),
                status: StageStatus::Skipped {
                    reason: format!(
                        "unmet dependencies: {}",
                        failed_deps.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                    ),
                },
                rule_results: Vec::new(),
                elapsed_micros: 0,
            });
            continue;
        }

        if stage.rules.is_empty() {
            stage_results.push(StageResult {
                stage_id: stage.id.clone(),
                status: StageStatus::ConfigurationError { reason: "stage has no rules".to_string() },
                rule_results: Vec::new(),
                elapsed_micros: 0,
            });
            apply_failure_policy(
                stage,
                &mut stage_results,
                &mut warnings,
                &mut review_flags,
                &mut terminated,
            );
            continue;
        }

        let mut facts = data.clone();
        for prior in &stage_results {
            for rr in &prior.rule_results {
                for (key, value) in &rr.enriched_data {
                    facts.set(format!("{}_{}", prior.stage_id, key), value.clone());
                }
            }
        }
        facts.set("scenarioStage", Value::string(stage.id.clone()));

        if let Some(lookup) = &stage.enrichment {
            let key = facts.get(&lookup.key_field).and_then(Value::as_str).map(str::to_string);
            enrichment.enrich(&mut facts, &stage.id, &lookup.dataset, key.as_deref());
        }

        let stage_start = Instant::now();
        let rule_results = engine.execute_rules(&stage.rules, &facts);
        let elapsed_micros = stage_start.elapsed().as_micros() as u64;

        let status = if rule_results.iter().any(|r| r.outcome == Outcome::Error) {
            StageStatus::Error
        } else {
            StageStatus::Success
        };

        stage_results.push(StageResult { stage_id: stage.id.clone(), status, rule_results, elapsed_micros });

        if !stage_results.last().unwrap().succeeded() {
            apply_failure_policy(
                stage,
                &mut stage_results,
                &mut warnings,
                &mut review_flags,
                &mut terminated,
            );
        }
    }

    let requires_review = !review_flags.is_empty();
    let total_elapsed_micros = total_start.elapsed().as_micros() as u64;
    let success_count = stage_results.iter().filter(|r| r.succeeded()).count();
    let summary = format!(
        "{}/{} stages succeeded{}{}",
        success_count,
        stage_results.len(),
        if terminated { ", terminated early" } else { "" },
        if requires_review { ", flagged for review" } else { "" },
    );

    ScenarioExecutionResult {
        stage_results,
        warnings,
        review_flags,
        terminated,
        requires_review,
        total_elapsed_micros,
        summary,
    }
}

fn apply_failure_policy(
    stage: &Stage,
    stage_results: &mut [StageResult],
    warnings: &mut Vec<String>,
    review_flags: &mut Vec<String>,
    terminated: &mut bool,
) {
    match stage.failure_policy {
        FailurePolicy::Terminate => *terminated = true,
        FailurePolicy::ContinueWithWarnings => {
            warnings.push(format!("stage `{}` failed", stage.id));
        }
        FailurePolicy::FlagForReview => {
            review_flags.push(format!("stage `{}` requires review", stage.id));
        }
    }
    let _ = stage_results;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Metadata, RuleBuilder, Status};
    use crate::recovery::RecoveryConfig;

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
    fn stages_run_in_declared_order() {
        let engine = Engine::new(RecoveryConfig::default());
        let data = FactContext::new();
        let stages = vec![
            Stage { id: "b".into(), order: 2, dependencies: vec![], rules: vec![rule("b1", "true")], failure_policy: FailurePolicy::Terminate, enrichment: None },
            Stage { id: "a".into(), order: 1, dependencies: vec![], rules: vec![rule("a1", "true")], failure_policy: FailurePolicy::Terminate, enrichment: None },
        ];
        let result = execute_stages(&engine, &stages, &data, &EnrichmentService::new());
        assert_eq!(result.stage_results[0].stage_id, "a");
        assert_eq!(result.stage_results[1].stage_id, "b");
    }

    #[test]
    fn unmet_dependency_is_skipped() {
        let engine = Engine::new(RecoveryConfig::default());
        let data = FactContext::new();
        let stages = vec![Stage {
            id: "second".into(),
            order: 1,
            dependencies: vec!["first".to_string()],
            rules: vec![rule("s1", "true")],
            failure_policy: FailurePolicy::Terminate,
            enrichment: None,
        }];
        let result = execute_stages(&engine, &stages, &data, &EnrichmentService::new());
        assert!(matches!(result.stage_results[0].status, StageStatus::Skipped { .. }));
    }

    fn fail_fast_engine() -> Engine {
        // The default recovery strategy (`ContinueWithDefault`) turns
        // evaluation errors into `no-match`, which never trips a stage's
        // failure policy. These tests need a genuine stage-level failure, so
        // they opt into `FailFast` instead.
        Engine::new(RecoveryConfig {
            default_strategy: crate::recovery::RecoveryStrategy::FailFast,
            ..RecoveryConfig::default()
        })
    }

    #[test]
    fn terminate_policy_skips_remaining_stages() {
        let engine = fail_fast_engine();
        let data = FactContext::new();
        let stages = vec![
            Stage { id: "first".into(), order: 1, dependencies: vec![], rules: vec![rule("f1", "1 / 0")], failure_policy: FailurePolicy::Terminate, enrichment: None },
            Stage { id: "second".into(), order: 2, dependencies: vec![], rules: vec![rule("s1", "true")], failure_policy: FailurePolicy::Terminate, enrichment: None },
        ];
        let result = execute_stages(&engine, &stages, &data, &EnrichmentService::new());
        assert!(result.terminated);
        assert!(matches!(result.stage_results[1].status, StageStatus::Skipped { .. }));
    }

    #[test]
    fn continue_with_warnings_keeps_running() {
        let engine = fail_fast_engine();
        let data = FactContext::new();
        let stages = vec![
            Stage { id: "first".into(), order: 1, dependencies: vec![], rules: vec![rule("f1", "1 / 0")], failure_policy: FailurePolicy::ContinueWithWarnings, enrichment: None },
            Stage { id: "second".into(), order: 2, dependencies: vec![], rules: vec![rule("s1", "true")], failure_policy: FailurePolicy::Terminate, enrichment: None },
        ];
        let result = execute_stages(&engine, &stages, &data, &EnrichmentService::new());
        assert!(!result.terminated);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.stage_results[1].succeeded());
    }

    #[test]
    fn stage_enrichment_lookup_merges_into_facts() {
        use crate::enrichment::Dataset;

        let mut data = FactContext::new();
        data.set("customerId", Value::string("acme"));

        let records = vec![std::collections::BTreeMap::from([
            ("id".to_string(), Value::string("acme")),
            ("tier".to_string(), Value::string("gold")),
        ])];
        let (dataset, _) = Dataset::new("id", records, None);
        let mut enrichment = EnrichmentService::new();
        enrichment.register("customers", dataset);

        let stages = vec![Stage {
            id: "lookup".into(),
            order: 1,
            dependencies: vec![],
            rules: vec![rule("r1", "#lookup_tier == \"gold\"")],
            failure_policy: FailurePolicy::Terminate,
            enrichment: Some(StageEnrichment { dataset: "customers".into(), key_field: "customerId".into() }),
        }];

        let engine = Engine::new(RecoveryConfig::default());
        let result = execute_stages(&engine, &stages, &data, &enrichment);
        assert!(result.stage_results[0].succeeded());
        assert!(result.stage_results[0].rule_results[0].triggered);
    }

    #[test]
    fn flag_for_review_sets_requires_review() {
        let engine = fail_fast_engine();
        let data = FactContext::new();
        let stages = vec![Stage {
            id: "first".into(),
            order: 1,
            dependencies: vec![],
            rules: vec![rule("f1", "1 / 0")],
            failure_policy: FailurePolicy::FlagForReview,
            enrichment: None,
        }];
        let result = execute_stages(&engine, &stages, &data, &EnrichmentService::new());
        assert!(result.requires_review);
        assert_eq!(result.review_flags.len(), 1);
    }
}

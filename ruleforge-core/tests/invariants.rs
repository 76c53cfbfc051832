//! Property-based tests for the invariants catalogued in §8.

use proptest::prelude::*;
use ruleforge_core::cache::{Cache, CacheConfig};
use ruleforge_core::engine::Engine;
use ruleforge_core::model::{GroupOperator, Metadata, Outcome, Rule, RuleBuilder, RuleGroupBuilder, Status};
use ruleforge_core::recovery::RecoveryConfig;
use ruleforge_core::registry::{DataSource, Registry};
use ruleforge_core::types::{FactContext, Value};
use std::sync::Arc;

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

struct StubSource {
    name: String,
}

#[async_trait::async_trait]
impl DataSource for StubSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> &str {
        "stub"
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

proptest! {
    /// Invariant 1: `execute_rule` never panics and always lands in one of
    /// the three terminal outcomes, with metrics attached (invariant 7).
    #[test]
    fn execute_rule_never_panics_and_always_terminates(amount in any::<i64>(), threshold in any::<i64>()) {
        let engine = Engine::new(RecoveryConfig::default());
        let mut ctx = FactContext::new();
        ctx.set("amount", Value::Integer(amount));

        let result = engine.execute_rule(&rule("r1", &format!("#amount > {threshold}")), &ctx);
        prop_assert!(matches!(result.outcome, Outcome::Match | Outcome::NoMatch | Outcome::Error));
        prop_assert!(result.metrics.is_some());
    }

    /// Invariant 1, with a missing fact: the recovery path must still
    /// terminate cleanly and still carry metrics.
    #[test]
    fn execute_rule_missing_fact_never_panics(threshold in any::<i64>()) {
        let engine = Engine::new(RecoveryConfig::default());
        let ctx = FactContext::new();

        let result = engine.execute_rule(&rule("r1", &format!("#missing > {threshold}")), &ctx);
        prop_assert!(matches!(result.outcome, Outcome::Match | Outcome::NoMatch | Outcome::Error));
        prop_assert!(result.metrics.is_some());
    }

    /// Invariant 2: AND groups match iff every member matches; OR groups
    /// match iff at least one member matches.
    #[test]
    fn group_operator_matches_boolean_semantics(flags in prop::collection::vec(any::<bool>(), 1..6)) {
        let mut ctx = FactContext::new();
        for (i, flag) in flags.iter().enumerate() {
            ctx.set(format!("f{i}"), Value::Bool(*flag));
        }

        let mut and_builder = RuleGroupBuilder::new().name("and-group").description("d").operator(GroupOperator::And);
        let mut or_builder = RuleGroupBuilder::new().name("or-group").description("d").operator(GroupOperator::Or);
        for i in 0..flags.len() {
            and_builder = and_builder.rule(rule(&format!("r{i}"), &format!("#f{i}")));
            or_builder = or_builder.rule(rule(&format!("r{i}"), &format!("#f{i}")));
        }

        let engine = Engine::new(RecoveryConfig::default());
        let and_result = engine.execute_rule_group(&and_builder.build().unwrap(), &ctx);
        let or_result = engine.execute_rule_group(&or_builder.build().unwrap(), &ctx);

        prop_assert_eq!(and_result.outcome == Outcome::Match, flags.iter().all(|f| *f));
        prop_assert_eq!(or_result.outcome == Outcome::Match, flags.iter().any(|f| *f));
    }

    /// Invariant 4: cache hit-rate equals hits/(hits+misses), or 0 with no
    /// activity.
    #[test]
    fn cache_hit_rate_matches_formula(hits in 0u64..20, misses in 0u64..20) {
        let cache: Cache<Value> = Cache::new(CacheConfig::default());
        cache.put("present", Value::Integer(1));
        for _ in 0..hits {
            let _ = cache.get("present");
        }
        for _ in 0..misses {
            let _ = cache.get("absent");
        }

        let stats = cache.statistics();
        let expected = if hits + misses == 0 { 0.0 } else { hits as f64 / (hits + misses) as f64 };
        prop_assert!((stats.hit_rate() - expected).abs() < 1e-9);
    }

    /// Round-trip: `put(k, v); put(k, v'); get(k) == v'`.
    #[test]
    fn cache_put_overwrite_round_trips(a in any::<i64>(), b in any::<i64>()) {
        let cache: Cache<Value> = Cache::new(CacheConfig::default());
        cache.put("k", Value::Integer(a));
        cache.put("k", Value::Integer(b));
        prop_assert_eq!(cache.get("k"), Some(Value::Integer(b)));
    }
}

/// Invariant 5: after registering N distinct sources and removing M, total
/// equals N - M.
#[test]
fn registry_statistics_reflect_register_and_unregister() {
    let registry = Registry::new();
    for i in 0..5 {
        registry.register(Arc::new(StubSource { name: format!("source-{i}") })).unwrap();
    }
    for i in 0..2 {
        registry.unregister(&format!("source-{i}"));
    }
    assert_eq!(registry.statistics().total, 3);
}

/// Boundary: empty rule list yields `no-rules`, not a panic or empty vec.
#[test]
fn empty_rule_list_yields_no_rules() {
    let engine = Engine::new(RecoveryConfig::default());
    let results = engine.execute_rules(&[], &FactContext::new());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, Outcome::NoRules);
}

/// Boundary: TTL = 0 never expires by time.
#[test]
fn zero_ttl_never_expires() {
    let cache: Cache<Value> = Cache::new(CacheConfig { ttl_seconds: 0, ..CacheConfig::default() });
    cache.put("k", Value::Integer(1));
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert_eq!(cache.get("k"), Some(Value::Integer(1)));
}

/// Boundary: registering a duplicate name errors and leaves the original
/// registered.
#[test]
fn duplicate_registration_leaves_original_intact() {
    let registry = Registry::new();
    registry.register(Arc::new(StubSource { name: "dup".into() })).unwrap();
    let err = registry.register(Arc::new(StubSource { name: "dup".into() })).unwrap_err();
    assert!(matches!(err, ruleforge_core::RuleForgeError::DuplicateName(_)));
    assert!(registry.get("dup").is_some());
}

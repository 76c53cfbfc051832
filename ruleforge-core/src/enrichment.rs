//! Lookup / Enrichment (C9)
//!
//! Dataset-backed key lookups with default-value fallback, and a generic
//! transformer that applies positive/negative field actions to a copy of an
//! input object (§4.9).

use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// A dataset of records keyed by a named field, with optional default
/// values for keys with no matching record.
#[derive(Debug, Clone)]
pub struct Dataset {
    key_field: String,
    records: BTreeMap<String, BTreeMap<String, Value>>,
    defaults: Option<BTreeMap<String, Value>>,
}

/// Load-time and lookup-time statistics for a [`Dataset`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetStatistics {
    /// Records successfully indexed.
    pub record_count: usize,
    /// Records skipped at load because they lacked the key field.
    pub skipped_count: usize,
}

impl Dataset {
    /// Build a dataset from raw records, indexing by `key_field`. Records
    /// missing the key field are skipped with a warning (§4.9 invariant).
    pub fn new(
        key_field: impl Into<String>,
        raw_records: Vec<BTreeMap<String, Value>>,
        defaults: Option<BTreeMap<String, Value>>,
    ) -> (Self, DatasetStatistics) {
        let key_field = key_field.into();
        let mut records = BTreeMap::new();
        let mut skipped_count = 0;

        for record in raw_records {
            match record.get(&key_field).and_then(Value::as_str) {
                Some(key) => {
                    records.insert(key.to_string(), record);
                }
                None => {
                    warn!(key_field = key_field.as_str(), "skipping record missing key field");
                    skipped_count += 1;
                }
            }
        }

        let record_count = records.len();
        (Dataset { key_field, records, defaults }, DatasetStatistics { record_count, skipped_count })
    }

    /// `true` iff a record exists for `key`.
    pub fn validate(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// Look up a record by key; falls through to default values if no
    /// record matches, then to `None` if there are no defaults either
    /// (§4.9: a `null` key always falls through to defaults).
    pub fn lookup(&self, key: Option<&str>) -> Option<BTreeMap<String, Value>> {
        match key.and_then(|k| self.records.get(k)) {
            Some(record) => Some(record.clone()),
            None => self.defaults.clone(),
        }
    }

    /// All records in the dataset, in key order.
    pub fn all_records(&self) -> Vec<&BTreeMap<String, Value>> {
        self.records.values().collect()
    }

    /// Key field name this dataset is indexed by.
    pub fn key_field(&self) -> &str {
        &self.key_field
    }
}

/// Named collection of [`Dataset`]s consulted by the stage executor before a
/// stage's rules run (§4.10 step c: "construct a per-stage engine bound to
/// the shared enrichment service").
#[derive(Debug, Clone, Default)]
pub struct EnrichmentService {
    datasets: BTreeMap<String, Dataset>,
}

impl EnrichmentService {
    /// An enrichment service with no registered datasets; stages with no
    /// `enrichment` lookup configured are unaffected by it.
    pub fn new() -> Self {
        EnrichmentService { datasets: BTreeMap::new() }
    }

    /// Register a dataset under `name`, replacing any prior dataset with the
    /// same name.
    pub fn register(&mut self, name: impl Into<String>, dataset: Dataset) {
        self.datasets.insert(name.into(), dataset);
    }

    /// Look up `dataset`'s record for `key` and merge its fields into
    /// `facts`, each prefixed `{prefix}_` (the `stagePrefix_outputKey`
    /// convention from §4.10 step d). A no-op if `dataset` isn't registered
    /// or the lookup yields nothing.
    pub fn enrich(&self, facts: &mut crate::types::FactContext, prefix: &str, dataset: &str, key: Option<&str>) {
        let Some(ds) = self.datasets.get(dataset) else { return };
        let Some(record) = ds.lookup(key) else { return };
        for (field, value) in record {
            facts.set(format!("{prefix}_{field}"), value);
        }
    }
}

/// An action a [`TransformerRule`] applies to a field, depending on whether
/// its match condition held (§4.9).
#[derive(Debug, Clone)]
pub enum FieldAction {
    /// Set `field` to a fixed value.
    SetValue { field: String, value: Value },
    /// Copy `source_field`'s value into `field`.
    CopyField { field: String, source_field: String },
    /// Remove `field` entirely.
    RemoveField { field: String },
}

impl FieldAction {
    fn apply(&self, target: &mut BTreeMap<String, Value>) {
        match self {
            FieldAction::SetValue { field, value } => {
                target.insert(field.clone(), value.clone());
            }
            FieldAction::CopyField { field, source_field } => {
                if let Some(v) = target.get(source_field).cloned() {
                    target.insert(field.clone(), v);
                }
            }
            FieldAction::RemoveField { field } => {
                target.remove(field);
            }
        }
    }
}

/// A single transformation step: a match predicate plus the actions to run
/// on a positive or negative outcome.
pub struct TransformerRule {
    /// Human-readable name, used in error messages.
    pub name: String,
    /// Predicate evaluated against the working record.
    pub matches: Box<dyn Fn(&BTreeMap<String, Value>) -> bool + Send + Sync>,
    /// Actions applied when `matches` returns `true`.
    pub on_match: Vec<FieldAction>,
    /// Actions applied when `matches` returns `false`.
    pub on_no_match: Vec<FieldAction>,
}

/// Applies a sequence of [`TransformerRule`]s to a copy of an input record,
/// never mutating the caller's original (§4.9).
pub struct Transformer {
    rules: Vec<TransformerRule>,
}

impl Transformer {
    /// Build a transformer from an ordered rule sequence.
    pub fn new(rules: Vec<TransformerRule>) -> Self {
        Transformer { rules }
    }

    /// Run every rule against a clone of `input`, in order, and return the
    /// transformed copy.
    pub fn transform(&self, input: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        let mut working = input.clone();
        for rule in &self.rules {
            let actions = if (rule.matches)(&working) { &rule.on_match } else { &rule.on_no_match };
            for action in actions {
                action.apply(&mut working);
            }
        }
        working
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn dataset_skips_records_missing_key_field() {
        let records = vec![
            record(&[("id", Value::string("a")), ("name", Value::string("Alice"))]),
            record(&[("name", Value::string("NoId"))]),
        ];
        let (dataset, stats) = Dataset::new("id", records, None);
        assert_eq!(stats.record_count, 1);
        assert_eq!(stats.skipped_count, 1);
        assert!(dataset.validate("a"));
    }

    #[test]
    fn lookup_falls_back_to_defaults_then_none() {
        let records = vec![record(&[("id", Value::string("a"))])];
        let defaults = record(&[("tier", Value::string("standard"))]);
        let (dataset, _) = Dataset::new("id", records, Some(defaults.clone()));

        assert_eq!(dataset.lookup(Some("a")), Some(record(&[("id", Value::string("a"))])));
        assert_eq!(dataset.lookup(Some("missing")), Some(defaults));
        assert_eq!(dataset.lookup(None), Some(record(&[("tier", Value::string("standard"))])));

        let (no_default_dataset, _) = Dataset::new("id", vec![record(&[("id", Value::string("a"))])], None);
        assert_eq!(no_default_dataset.lookup(Some("missing")), None);
    }

    #[test]
    fn enrichment_service_merges_looked_up_fields_with_prefix() {
        use crate::types::FactContext;

        let records = vec![record(&[("id", Value::string("acme")), ("tier", Value::string("gold"))])];
        let (dataset, _) = Dataset::new("id", records, None);
        let mut service = EnrichmentService::new();
        service.register("customers", dataset);

        let mut facts = FactContext::new();
        facts.set("customerId", Value::string("acme"));
        service.enrich(&mut facts, "stage1", "customers", Some("acme"));

        assert_eq!(facts.get("stage1_tier"), Some(&Value::string("gold")));
    }

    #[test]
    fn enrichment_service_unknown_dataset_is_a_no_op() {
        use crate::types::FactContext;

        let service = EnrichmentService::new();
        let mut facts = FactContext::new();
        service.enrich(&mut facts, "stage1", "missing-dataset", Some("acme"));
        assert_eq!(facts.len(), 0);
    }

    #[test]
    fn transformer_applies_positive_and_negative_actions() {
        let rules = vec![TransformerRule {
            name: "flag high value".to_string(),
            matches: Box::new(|r| r.get("amount").and_then(Value::as_f64).unwrap_or(0.0) > 1000.0),
            on_match: vec![FieldAction::SetValue { field: "tier".to_string(), value: Value::string("gold") }],
            on_no_match: vec![FieldAction::SetValue { field: "tier".to_string(), value: Value::string("standard") }],
        }];
        let transformer = Transformer::new(rules);

        let high = record(&[("amount", Value::Float(5000.0))]);
        let result = transformer.transform(&high);
        assert_eq!(result.get("tier"), Some(&Value::string("gold")));
        assert!(!high.contains_key("tier"));

        let low = record(&[("amount", Value::Float(10.0))]);
        let result = transformer.transform(&low);
        assert_eq!(result.get("tier"), Some(&Value::string("standard")));
    }

    #[test]
    fn transformer_copy_and_remove_field() {
        let rules = vec![TransformerRule {
            name: "copy then drop raw".to_string(),
            matches: Box::new(|_| true),
            on_match: vec![
                FieldAction::CopyField { field: "normalized_id".to_string(), source_field: "raw_id".to_string() },
                FieldAction::RemoveField { field: "raw_id".to_string() },
            ],
            on_no_match: vec![],
        }];
        let transformer = Transformer::new(rules);
        let input = record(&[("raw_id", Value::string("X1"))]);
        let result = transformer.transform(&input);
        assert_eq!(result.get("normalized_id"), Some(&Value::string("X1")));
        assert!(!result.contains_key("raw_id"));
    }
}

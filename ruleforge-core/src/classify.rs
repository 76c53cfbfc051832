//! Classification Pipeline (C8)
//!
//! Layered format/content detection with confidence fusion, pluggable
//! scenario routing, and a SHA-256-keyed result cache (§4.8).

use crate::cache::{Cache, CacheConfig};
use crate::error::{Result, RuleForgeError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Input to the classification pipeline.
#[derive(Debug, Clone)]
pub struct ClassificationInput {
    /// Raw content to classify.
    pub content: String,
    /// Optional originating file name, used in cache keys and extension
    /// sniffing.
    pub file_name: Option<String>,
    /// Optional declared size, used in cache keys.
    pub size: Option<u64>,
}

/// Detected wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDetection {
    /// Detected format label, e.g. `JSON`, `XML`, `CSV`, or `UNKNOWN`.
    pub format: String,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Which detection strategy produced this result.
    pub method: String,
    /// Free-form supporting details.
    pub details: String,
}

impl FormatDetection {
    fn unknown() -> Self {
        FormatDetection { format: "UNKNOWN".to_string(), confidence: 0.0, method: "none".to_string(), details: String::new() }
    }
}

/// Detected semantic content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDetection {
    /// Detected content type, e.g. `TRADE`, `POSITION`, `MARKET_DATA`, `UNKNOWN`.
    pub content_type: String,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Human-readable justification.
    pub reason: String,
}

impl ContentDetection {
    fn unknown() -> Self {
        ContentDetection { content_type: "UNKNOWN".to_string(), confidence: 0.0, reason: "no matching field patterns".to_string() }
    }
}

/// A single row in the scenario routing table (§4.8 step 4).
pub struct ScenarioRoute {
    /// Scenario identifier returned when this route matches.
    pub scenario_id: String,
    /// Predicate over the fused classification, evaluated in table order.
    pub predicate: Box<dyn Fn(&FormatDetection, &ContentDetection) -> bool + Send + Sync>,
}

/// Selects a scenario id from a routing table given a classification
/// (§9 open question a).
pub trait ScenarioRouter: Send + Sync {
    /// Return the first matching scenario id, or `None` if no route matches.
    fn route(&self, table: &[ScenarioRoute], format: &FormatDetection, content: &ContentDetection) -> Option<String>;
}

/// The default router: evaluates routes in declared order and returns the
/// first match.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstMatchRouter;

impl ScenarioRouter for FirstMatchRouter {
    fn route(&self, table: &[ScenarioRoute], format: &FormatDetection, content: &ContentDetection) -> Option<String> {
        table.iter().find(|r| (r.predicate)(format, content)).map(|r| r.scenario_id.clone())
    }
}

/// Full classification result, cached verbatim except for `elapsed_micros`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Format detection outcome.
    pub format: FormatDetection,
    /// Content detection outcome.
    pub content: ContentDetection,
    /// Fused confidence, §4.8 step 3.
    pub combined_confidence: f64,
    /// Routed scenario id, if any table entry matched.
    pub scenario_id: Option<String>,
    /// Elapsed microseconds for this classification call; excluded from
    /// cache-key/equality comparisons at the call site since every cached
    /// read naturally has a fresh timing.
    pub elapsed_micros: u64,
}

/// Classifies raw content into a format, content type, and routed scenario,
/// caching successful results by content hash (§4.8).
pub struct Classifier {
    router: Arc<dyn ScenarioRouter>,
    cache: Cache<ClassificationResult>,
    cache_key_prefix: String,
}

impl Classifier {
    /// Build a classifier using the default [`FirstMatchRouter`] and cache
    /// defaults (300s TTL, 1000 entries).
    pub fn new() -> Self {
        Self::with_router(Arc::new(FirstMatchRouter))
    }

    /// Build a classifier with a custom router.
    pub fn with_router(router: Arc<dyn ScenarioRouter>) -> Self {
        Classifier {
            router,
            cache: Cache::new(CacheConfig { ttl_seconds: 300, max_size: 1000, ..Default::default() }),
            cache_key_prefix: "classify".to_string(),
        }
    }

    /// Classify `input` against `routes`, consulting (and populating) the
    /// cache keyed by a truncated SHA-256 of the content plus file name/size.
    pub fn classify(&self, input: &ClassificationInput, routes: &[ScenarioRoute]) -> Result<ClassificationResult> {
        let key = self.cache_key(input);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let start = std::time::Instant::now();
        let format = detect_format(input);
        let content = detect_content(input);
        let combined = (0.6 * format.confidence + 0.4 * content.confidence).min(0.95);

        let scenario_id = self.router.route(routes, &format, &content);
        if scenario_id.is_none() && routes.is_empty() {
            // An empty routing table is a configuration gap, not a runtime failure;
            // callers that require a scenario should treat `None` as `NoScenario`.
        }

        let result = ClassificationResult {
            format,
            content,
            combined_confidence: combined,
            scenario_id,
            elapsed_micros: start.elapsed().as_micros() as u64,
        };

        self.cache.put(key, result.clone());
        Ok(result)
    }

    /// Convenience wrapper that turns a missing route into
    /// [`RuleForgeError::RouteNotFound`] (§4.8 step 4).
    pub fn classify_or_error(
        &self,
        input: &ClassificationInput,
        routes: &[ScenarioRoute],
    ) -> Result<ClassificationResult> {
        let result = self.classify(input, routes)?;
        if result.scenario_id.is_none() {
            return Err(RuleForgeError::RouteNotFound("NoScenario".to_string()));
        }
        Ok(result)
    }

    fn cache_key(&self, input: &ClassificationInput) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input.content.as_bytes());
        let digest = hasher.finalize();
        let truncated: String = digest.iter().map(|b| format!("{b:02x}")).collect::<String>().chars().take(16).collect();

        let mut key = format!("{}:{}", self.cache_key_prefix, truncated);
        if let Some(name) = &input.file_name {
            key.push(':');
            key.push_str(name);
        }
        if let Some(size) = input.size {
            key.push(':');
            key.push_str(&size.to_string());
        }
        key
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

fn detect_format(input: &ClassificationInput) -> FormatDetection {
    let trimmed = input.content.trim_start();

    if let Some(name) = &input.file_name {
        if let Some(ext) = name.rsplit('.').next() {
            let by_ext = match ext.to_ascii_lowercase().as_str() {
                "json" => Some("JSON"),
                "xml" => Some("XML"),
                "csv" => Some("CSV"),
                _ => None,
            };
            if let Some(format) = by_ext {
                return FormatDetection {
                    format: format.to_string(),
                    confidence: 0.9,
                    method: "extension".to_string(),
                    details: format!("matched extension .{ext}"),
                };
            }
        }
    }

    if (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    {
        if balanced_braces(trimmed) {
            return FormatDetection {
                format: "JSON".to_string(),
                confidence: 0.85,
                method: "content-sniff".to_string(),
                details: "balanced braces/brackets".to_string(),
            };
        }
    }

    if trimmed.starts_with('<') && trimmed.trim_end().ends_with('>') {
        return FormatDetection {
            format: "XML".to_string(),
            confidence: 0.8,
            method: "content-sniff".to_string(),
            details: "angle-bracket root element".to_string(),
        };
    }

    let lines: Vec<&str> = trimmed.lines().take(3).collect();
    if lines.len() >= 2 {
        let comma_counts: Vec<usize> = lines.iter().map(|l| l.matches(',').count()).collect();
        if comma_counts.iter().all(|c| *c > 0) && comma_counts.iter().all(|c| *c == comma_counts[0]) {
            return FormatDetection {
                format: "CSV".to_string(),
                confidence: 0.75,
                method: "content-sniff".to_string(),
                details: "uniform comma counts across lines".to_string(),
            };
        }
    }

    FormatDetection::unknown()
}

fn balanced_braces(s: &str) -> bool {
    let mut depth = 0i32;
    for c in s.chars() {
        match c {
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    depth == 0
}

const TRADE_FIELDS: &[&str] = &["tradeId", "trade_id", "counterparty", "settlementDate"];
const POSITION_FIELDS: &[&str] = &["positionId", "position_id", "quantity", "netExposure"];
const MARKET_DATA_FIELDS: &[&str] = &["instrumentId", "bid", "ask", "lastPrice"];

fn detect_content(input: &ClassificationInput) -> ContentDetection {
    let hits = |fields: &[&str]| fields.iter().filter(|f| input.content.contains(*f)).count();

    let trade_hits = hits(TRADE_FIELDS);
    let position_hits = hits(POSITION_FIELDS);
    let market_hits = hits(MARKET_DATA_FIELDS);

    let best = [
        ("TRADE", trade_hits, TRADE_FIELDS.len()),
        ("POSITION", position_hits, POSITION_FIELDS.len()),
        ("MARKET_DATA", market_hits, MARKET_DATA_FIELDS.len()),
    ]
    .into_iter()
    .max_by_key(|(_, hits, _)| *hits);

    match best {
        Some((label, hits, total)) if hits > 0 => ContentDetection {
            content_type: label.to_string(),
            confidence: hits as f64 / total as f64,
            reason: format!("{hits}/{total} {label} field markers present"),
        },
        _ => ContentDetection::unknown(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(scenario_id: &str, format_label: &'static str) -> ScenarioRoute {
        ScenarioRoute {
            scenario_id: scenario_id.to_string(),
            predicate: Box::new(move |f, _c| f.format == format_label),
        }
    }

    #[test]
    fn detects_json_by_extension() {
        let input = ClassificationInput { content: "{\"a\":1}".to_string(), file_name: Some("trade.json".to_string()), size: Some(7) };
        let format = detect_format(&input);
        assert_eq!(format.format, "JSON");
        assert_eq!(format.method, "extension");
    }

    #[test]
    fn detects_json_by_content_sniff() {
        let input = ClassificationInput { content: "{\"a\":{\"b\":1}}".to_string(), file_name: None, size: None };
        let format = detect_format(&input);
        assert_eq!(format.format, "JSON");
    }

    #[test]
    fn detects_trade_content_type() {
        let input = ClassificationInput {
            content: "{\"tradeId\":\"T1\",\"counterparty\":\"ACME\"}".to_string(),
            file_name: None,
            size: None,
        };
        let content = detect_content(&input);
        assert_eq!(content.content_type, "TRADE");
    }

    #[test]
    fn classify_caches_second_call() {
        let classifier = Classifier::new();
        let input = ClassificationInput {
            content: "{\"tradeId\":\"T1\"}".to_string(),
            file_name: Some("trade.json".to_string()),
            size: Some(42),
        };
        let routes = vec![route("trade-scenario", "JSON")];

        let first = classifier.classify(&input, &routes).unwrap();
        let second = classifier.classify(&input, &routes).unwrap();

        assert_eq!(first.scenario_id, Some("trade-scenario".to_string()));
        assert_eq!(first.format, second.format);
        assert_eq!(first.content, second.content);
    }

    #[test]
    fn no_matching_route_yields_none_scenario() {
        let classifier = Classifier::new();
        let input = ClassificationInput { content: "not really anything".to_string(), file_name: None, size: None };
        let result = classifier.classify(&input, &[]).unwrap();
        assert!(result.scenario_id.is_none());
    }

    #[test]
    fn classify_or_error_reports_route_not_found() {
        let classifier = Classifier::new();
        let input = ClassificationInput { content: "plain text".to_string(), file_name: None, size: None };
        let result = classifier.classify_or_error(&input, &[]);
        assert!(matches!(result, Err(RuleForgeError::RouteNotFound(_))));
    }

    #[test]
    fn combined_confidence_never_exceeds_cap() {
        let input = ClassificationInput {
            content: "{\"tradeId\":\"T1\",\"counterparty\":\"ACME\",\"settlementDate\":\"2026-01-01\"}".to_string(),
            file_name: Some("trade.json".to_string()),
            size: Some(60),
        };
        let classifier = Classifier::new();
        let result = classifier.classify(&input, &[]).unwrap();
        assert!(result.combined_confidence <= 0.95);
    }
}

//! Performance Monitor (C4)
//!
//! Captures per-evaluation timing and maintains per-rule aggregates (count,
//! sum, min, max, a bounded sample ring) used for slow-rule warnings and the
//! `/metrics` surface. Concurrent updates serialize only on the sample-ring
//! write for a given rule (§5).

use crate::model::PerformanceMetrics;
use crate::recovery::RecoveryStrategy;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

const DEFAULT_SAMPLE_CAPACITY: usize = 256;

/// An in-flight timing handle returned by [`PerformanceMonitor::start`].
pub struct Handle {
    rule_name: String,
    started: Instant,
    start_nanos: u128,
}

/// Aggregated statistics for a single rule.
#[derive(Debug, Clone)]
pub struct RuleAggregate {
    /// Number of evaluations observed.
    pub count: u64,
    /// Sum of elapsed nanoseconds across all evaluations.
    pub sum_nanos: u64,
    /// Smallest elapsed duration observed.
    pub min_nanos: u64,
    /// Largest elapsed duration observed.
    pub max_nanos: u64,
    /// Most recent samples, bounded to `DEFAULT_SAMPLE_CAPACITY`.
    pub recent_nanos: Vec<u64>,
}

impl RuleAggregate {
    fn new() -> Self {
        RuleAggregate { count: 0, sum_nanos: 0, min_nanos: u64::MAX, max_nanos: 0, recent_nanos: Vec::new() }
    }

    fn record(&mut self, elapsed_nanos: u64) {
        self.count += 1;
        self.sum_nanos = self.sum_nanos.saturating_add(elapsed_nanos);
        self.min_nanos = self.min_nanos.min(elapsed_nanos);
        self.max_nanos = self.max_nanos.max(elapsed_nanos);
        self.recent_nanos.push(elapsed_nanos);
        if self.recent_nanos.len() > DEFAULT_SAMPLE_CAPACITY {
            self.recent_nanos.remove(0);
        }
    }

    /// Mean elapsed nanoseconds across all recorded evaluations.
    pub fn mean_nanos(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_nanos as f64 / self.count as f64
        }
    }
}

/// Tracks per-rule timing aggregates and emits slow-rule warnings.
pub struct PerformanceMonitor {
    aggregates: DashMap<String, Mutex<RuleAggregate>>,
    slow_rule_threshold: Duration,
    recovery_attempts: AtomicU64,
    recovery_by_strategy: DashMap<&'static str, AtomicU64>,
    evaluations_total: AtomicU64,
    errors_total: AtomicU64,
}

impl PerformanceMonitor {
    /// Create a monitor with a default slow-rule threshold of 50ms.
    pub fn new() -> Arc<Self> {
        Self::with_threshold(Duration::from_millis(50))
    }

    /// Create a monitor with a custom slow-rule threshold.
    pub fn with_threshold(slow_rule_threshold: Duration) -> Arc<Self> {
        Arc::new(PerformanceMonitor {
            aggregates: DashMap::new(),
            slow_rule_threshold,
            recovery_attempts: AtomicU64::new(0),
            recovery_by_strategy: DashMap::new(),
            evaluations_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
        })
    }

    /// Begin timing an evaluation (§4.4 `start`).
    pub fn start(&self, rule_name: impl Into<String>) -> Handle {
        Handle {
            rule_name: rule_name.into(),
            started: Instant::now(),
            start_nanos: nanos_since_epoch(),
        }
    }

    /// Finish timing, recording the outcome and updating aggregates
    /// (§4.4 `complete`).
    pub fn complete(&self, handle: Handle, errored: bool) -> PerformanceMetrics {
        let elapsed = handle.started.elapsed();
        let elapsed_nanos = elapsed.as_nanos() as u64;

        self.evaluations_total.fetch_add(1, Ordering::Relaxed);
        if errored {
            self.errors_total.fetch_add(1, Ordering::Relaxed);
        }

        self.aggregates
            .entry(handle.rule_name.clone())
            .or_insert_with(|| Mutex::new(RuleAggregate::new()))
            .lock()
            .record(elapsed_nanos);

        if elapsed >= self.slow_rule_threshold {
            warn!(
                rule = handle.rule_name.as_str(),
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                threshold_ms = self.slow_rule_threshold.as_secs_f64() * 1000.0,
                "slow rule evaluation"
            );
        }

        PerformanceMetrics {
            start_nanos: handle.start_nanos,
            end_nanos: handle.start_nanos + elapsed_nanos as u128,
            elapsed_nanos,
            errored,
        }
    }

    /// Snapshot of the aggregate for a single rule, if any evaluations have
    /// been recorded.
    pub fn aggregate_for(&self, rule_name: &str) -> Option<RuleAggregate> {
        self.aggregates.get(rule_name).map(|a| a.lock().clone())
    }

    /// Total evaluations observed across all rules.
    pub fn evaluations_total(&self) -> u64 {
        self.evaluations_total.load(Ordering::Relaxed)
    }

    /// Total evaluations that errored.
    pub fn errors_total(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    fn record_recovery(&self, strategy: RecoveryStrategy) {
        self.recovery_attempts.fetch_add(1, Ordering::Relaxed);
        let label = strategy_label(strategy);
        self.recovery_by_strategy
            .entry(label)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Total number of recovery attempts recorded via [`record_recovery_attempt`].
    pub fn recovery_attempts(&self) -> u64 {
        self.recovery_attempts.load(Ordering::Relaxed)
    }
}

fn strategy_label(strategy: RecoveryStrategy) -> &'static str {
    match strategy {
        RecoveryStrategy::ContinueWithDefault => "continue_with_default",
        RecoveryStrategy::RetryWithSafeExpression => "retry_with_safe_expression",
        RecoveryStrategy::SkipRule => "skip_rule",
        RecoveryStrategy::FailFast => "fail_fast",
    }
}

fn nanos_since_epoch() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

// A process-wide monitor used by `recovery::recover` to record recovery
// attempts without threading a monitor handle through every call site,
// mirroring the teacher's global metrics singleton (monitoring/mod.rs).
static GLOBAL_MONITOR: std::sync::OnceLock<Arc<PerformanceMonitor>> = std::sync::OnceLock::new();

/// The process-wide monitor singleton, created lazily on first use.
pub fn global() -> Arc<PerformanceMonitor> {
    GLOBAL_MONITOR.get_or_init(PerformanceMonitor::new).clone()
}

/// Record a recovery attempt against the process-wide monitor.
pub fn record_recovery_attempt(_rule_name: &str, strategy: RecoveryStrategy) {
    global().record_recovery(strategy);
}

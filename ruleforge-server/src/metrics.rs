//! Prometheus metrics collection for the rule engine server

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Initialize all metric descriptions.
pub fn init_metrics() {
    describe_counter!("ruleforge_classify_requests_total", "Total number of classification requests");
    describe_counter!("ruleforge_run_requests_total", "Total number of scenario run requests");
    describe_counter!("ruleforge_rule_evaluations_total", "Total number of rule evaluations");
    describe_counter!("ruleforge_cache_hits_total", "Total number of classification cache hits");
    describe_counter!("ruleforge_cache_misses_total", "Total number of classification cache misses");
    describe_counter!("ruleforge_errors_total", "Total number of request errors");

    describe_histogram!("ruleforge_classify_latency_seconds", "Classification request latency in seconds");
    describe_histogram!("ruleforge_run_latency_seconds", "Scenario run latency in seconds");

    describe_gauge!("ruleforge_registry_sources_total", "Total registered data sources");
    describe_gauge!("ruleforge_registry_sources_healthy", "Healthy registered data sources");
}

/// Record a classification request.
pub fn record_classify(latency_seconds: f64, cached: bool) {
    counter!("ruleforge_classify_requests_total", 1);
    histogram!("ruleforge_classify_latency_seconds", latency_seconds);
    if cached {
        counter!("ruleforge_cache_hits_total", 1);
    } else {
        counter!("ruleforge_cache_misses_total", 1);
    }
}

/// Record a scenario run request.
pub fn record_run(latency_seconds: f64, rule_count: usize) {
    counter!("ruleforge_run_requests_total", 1);
    counter!("ruleforge_rule_evaluations_total", rule_count as u64);
    histogram!("ruleforge_run_latency_seconds", latency_seconds);
}

/// Record a request-level error.
pub fn record_error(error_type: &str) {
    counter!("ruleforge_errors_total", 1, "type" => error_type.to_string());
}

/// Update registry gauges.
pub fn update_registry_metrics(total: usize, healthy: usize) {
    gauge!("ruleforge_registry_sources_total", total as f64);
    gauge!("ruleforge_registry_sources_healthy", healthy as f64);
}

/// Storage for the Prometheus recorder handle.
static PROMETHEUS_HANDLE: std::sync::OnceLock<metrics_exporter_prometheus::PrometheusHandle> =
    std::sync::OnceLock::new();

/// Install the Prometheus recorder.
pub fn init_prometheus() -> anyhow::Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder.install_recorder()?;
    PROMETHEUS_HANDLE.set(handle).map_err(|_| anyhow::anyhow!("prometheus handle already set"))?;
    Ok(())
}

/// Render the current Prometheus metrics text.
pub fn get_prometheus_metrics() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Prometheus metrics not initialized\n".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn setup() {
        INIT.call_once(|| {
            let _ = init_prometheus();
            init_metrics();
        });
    }

    #[test]
    fn init_prometheus_is_idempotent_guarded() {
        setup();
        assert!(init_prometheus().is_err());
    }

    #[test]
    fn get_prometheus_metrics_does_not_panic() {
        setup();
        let _ = get_prometheus_metrics();
    }

    #[test]
    fn record_classify_and_run_do_not_panic() {
        setup();
        record_classify(0.001, true);
        record_classify(0.002, false);
        record_run(0.01, 5);
        record_error("not_found");
        update_registry_metrics(3, 2);
    }
}

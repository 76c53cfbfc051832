//! HTTP request handlers

use crate::api::{ClassifyRequest, HealthResponse, HealthStatus, RunRequest};
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use ruleforge_core::{ChainResult, ClassificationInput, ClassificationResult, FactContext, ScenarioExecutionResult, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};

fn facts_from_json(facts: BTreeMap<String, serde_json::Value>) -> FactContext {
    let map = facts.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect();
    FactContext::from_map(map)
}

/// `POST /v1/classify` — classify raw content and route it to a scenario.
#[tracing::instrument(name = "classify", skip(state, req))]
pub async fn classify(
    State(state): State<AppState>,
    Json(req): Json<ClassifyRequest>,
) -> ApiResult<Json<ClassificationResult>> {
    let start = Instant::now();
    let input = ClassificationInput { content: req.content, file_name: req.file_name, size: req.size };
    let ctx = facts_from_json(req.context);

    let result = state.facade.classify(&input, &ctx).map_err(|e| {
        metrics::record_error("classify");
        e
    })?;

    let elapsed = start.elapsed().as_secs_f64();
    metrics::record_classify(elapsed, false);
    info!(
        scenario_id = ?result.scenario_id,
        elapsed_ms = elapsed * 1000.0,
        "classification complete"
    );

    Ok(Json(result))
}

/// `POST /v1/run/:scenario_id` — run every stage of a scenario.
#[tracing::instrument(name = "run", skip(state, req), fields(scenario_id = %scenario_id))]
pub async fn run(
    State(state): State<AppState>,
    Path(scenario_id): Path<String>,
    Json(req): Json<RunRequest>,
) -> ApiResult<Json<ScenarioExecutionResult>> {
    let start = Instant::now();
    let facts = facts_from_json(req.facts);

    let result: ScenarioExecutionResult = state.facade.run(&scenario_id, &facts).map_err(|e| {
        metrics::record_error("run");
        e
    })?;

    let elapsed = start.elapsed().as_secs_f64();
    let rule_count: usize = result.stage_results.iter().map(|s| s.rule_results.len()).sum();
    metrics::record_run(elapsed, rule_count);
    info!(scenario_id = %scenario_id, elapsed_ms = elapsed * 1000.0, "scenario run complete");

    Ok(Json(result))
}

/// `POST /v1/chains/:chain_id` — execute a configured rule chain.
#[tracing::instrument(name = "run_chain", skip(state, req), fields(chain_id = %chain_id))]
pub async fn run_chain(
    State(state): State<AppState>,
    Path(chain_id): Path<String>,
    Json(req): Json<RunRequest>,
) -> ApiResult<Json<ChainResult>> {
    let start = Instant::now();
    let facts = facts_from_json(req.facts);

    let result: ChainResult = state.facade.run_chain(&chain_id, &facts).map_err(|e| {
        metrics::record_error("run_chain");
        e
    })?;

    let elapsed = start.elapsed().as_secs_f64();
    metrics::record_run(elapsed, result.results.len());
    info!(chain_id = %chain_id, elapsed_ms = elapsed * 1000.0, "chain run complete");

    Ok(Json(result))
}

/// `GET /health/live` — liveness probe; never touches the façade.
pub async fn health_live(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: HealthStatus::Healthy,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
    })
}

/// `GET /health/ready` — readiness probe backed by [`ServiceFacade::health_check`].
pub async fn health_ready(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let check = state.facade.health_check();
    let status: HealthStatus = check.status.into();

    metrics::update_registry_metrics(check.metrics.registry_total, check.metrics.registry_healthy);

    if status == HealthStatus::Unhealthy {
        warn!(status = ?check.status, "readiness check reports unhealthy");
        return Err(ApiError::ServiceUnavailable("service unhealthy".to_string()));
    }

    Ok(Json(HealthResponse { status, version: env!("CARGO_PKG_VERSION").to_string(), uptime_seconds: state.uptime_seconds() }))
}

/// `GET /metrics` — Prometheus text exposition.
pub async fn metrics_endpoint() -> String {
    metrics::get_prometheus_metrics()
}

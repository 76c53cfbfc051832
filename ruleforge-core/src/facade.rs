//! Service Façade (C11)
//!
//! The top-level entry point combining the engine, registry, classifier, and
//! scenario executor behind one API surface: `classify`, `run`,
//! `add_configuration`, `remove_configuration`, `reload`, `health_check`,
//! `shutdown` (§4.11, §6). Configuration is held behind an [`ArcSwap`] so a
//! `reload` is a single atomic pointer swap; in-flight calls keep running
//! against the snapshot they started with (§5).

use crate::cache::{Cache, CacheConfig};
use crate::classify::{ClassificationInput, ClassificationResult, Classifier, ScenarioRoute};
use crate::config::{ConfigurationDocument, DataSourceConfig};
use crate::engine::{ChainResult, Engine};
use crate::enrichment::EnrichmentService;
use crate::error::{Result, RuleForgeError};
use crate::model::{Rule, RuleChain, RuleGroup};
use crate::recovery::RecoveryConfig;
use crate::registry::{DataSource, HealthEvent, HealthListener, Registry};
use crate::stages::{execute_stages, ScenarioExecutionResult, Stage};
use crate::types::{FactContext, Value};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Kind of lifecycle event emitted on the façade's event stream (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// A data source was registered.
    Registered,
    /// A data source was unregistered.
    Unregistered,
    /// A data source transitioned from unhealthy to healthy.
    HealthRestored,
    /// A data source transitioned from healthy to unhealthy.
    HealthLost,
}

/// A single entry on the façade's event stream (§6 "Event stream").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EventRecord {
    /// Discriminant.
    pub kind: EventKind,
    /// Name of the data source the event concerns.
    pub name: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Human-readable detail.
    pub message: String,
}

impl EventRecord {
    fn new(kind: EventKind, name: impl Into<String>, message: impl Into<String>) -> Self {
        EventRecord {
            kind,
            name: name.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            message: message.into(),
        }
    }
}

/// Forwards registry health transitions onto the façade's unified event
/// stream.
struct EventBridge {
    tx: broadcast::Sender<EventRecord>,
}

impl HealthListener for EventBridge {
    fn on_event(&self, event: HealthEvent) {
        let record = match event {
            HealthEvent::Restored { name } => {
                EventRecord::new(EventKind::HealthRestored, name, "data source restored")
            }
            HealthEvent::Lost { name } => EventRecord::new(EventKind::HealthLost, name, "data source lost"),
        };
        // No subscribers is a normal, not an error: the stream is best-effort.
        let _ = self.tx.send(record);
    }
}

/// A data source built directly from a [`DataSourceConfig`]. Source-specific
/// connectivity is opaque to the registry (§6), so this reports healthy
/// unconditionally; a real deployment would register a type-specific
/// [`DataSource`] impl instead of relying on this generic wrapper.
struct ConfiguredDataSource {
    config: DataSourceConfig,
}

#[async_trait]
impl DataSource for ConfiguredDataSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn source_type(&self) -> &str {
        &self.config.source_type
    }

    fn tags(&self) -> Vec<String> {
        self.config.tags.clone()
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

/// Configuration resolved into the shapes the engine and stage executor
/// consume, rebuilt wholesale on every [`ServiceFacade::reload`].
struct ResolvedConfiguration {
    document: ConfigurationDocument,
    rules: BTreeMap<String, Rule>,
    rule_groups: BTreeMap<String, RuleGroup>,
    rule_chains: BTreeMap<String, RuleChain>,
    scenarios: BTreeMap<String, Vec<Stage>>,
    routes: Vec<ScenarioRoute>,
    enrichment: EnrichmentService,
}

fn resolve(document: ConfigurationDocument) -> Result<ResolvedConfiguration> {
    let rules = document.resolve_rules()?;
    let rule_groups_vec = document.resolve_rule_groups(&rules)?;
    let rule_groups: BTreeMap<String, RuleGroup> =
        document.rule_groups.iter().map(|g| g.id.clone()).zip(rule_groups_vec).collect();
    let rule_chains: BTreeMap<String, RuleChain> =
        document.resolve_rule_chains().into_iter().map(|c| (c.id.clone(), c)).collect();
    let enrichment = document.resolve_datasets();

    let mut scenarios = BTreeMap::new();
    for scenario in &document.scenarios {
        let mut stages = Vec::with_capacity(scenario.stages.len());
        for stage_config in &scenario.stages {
            let group = rule_groups.get(&stage_config.config_ref).ok_or_else(|| {
                RuleForgeError::ConfigurationError(format!(
                    "scenario `{}` stage `{}` references unknown rule group `{}`",
                    scenario.id, stage_config.id, stage_config.config_ref
                ))
            })?;
            stages.push(Stage {
                id: stage_config.id.clone(),
                order: stage_config.order,
                dependencies: stage_config.dependencies.clone(),
                rules: group.rules.clone(),
                failure_policy: stage_config.failure_policy,
                enrichment: stage_config.enrichment.as_ref().map(|e| crate::stages::StageEnrichment {
                    dataset: e.dataset.clone(),
                    key_field: e.key_field.clone(),
                }),
            });
        }
        scenarios.insert(scenario.id.clone(), stages);
    }

    let routes = document
        .scenarios
        .iter()
        .map(|scenario| {
            let data_types: Vec<String> = scenario.data_types.iter().map(|t| t.to_ascii_uppercase()).collect();
            ScenarioRoute {
                scenario_id: scenario.id.clone(),
                predicate: Box::new(move |_format, content| data_types.contains(&content.content_type)),
            }
        })
        .collect();

    Ok(ResolvedConfiguration { document, rules, rule_groups, rule_chains, scenarios, routes, enrichment })
}

/// Lifecycle status reported by [`ServiceFacade::health_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Everything within thresholds.
    Healthy,
    /// Within operating range but showing stress.
    Degraded,
    /// Outside acceptable operating range.
    Unhealthy,
}

/// Health of a single façade-managed component.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ComponentHealth {
    /// Component name, e.g. `"engine"`, `"registry"`, `"cache"`.
    pub name: String,
    /// That component's status.
    pub status: HealthStatus,
    /// Human-readable detail.
    pub detail: String,
}

/// Counters fed into the [`HealthThresholds`] comparison.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct HealthMetrics {
    /// Total rule evaluations since process start.
    pub evaluations_total: u64,
    /// Total evaluations that errored.
    pub errors_total: u64,
    /// `errors_total / evaluations_total`, or `0.0` with no evaluations.
    pub error_rate: f64,
    /// Classification cache hit rate.
    pub cache_hit_rate: f64,
    /// Total registered data sources.
    pub registry_total: usize,
    /// Currently healthy data sources.
    pub registry_healthy: usize,
}

/// Thresholds applied to [`HealthMetrics`] to derive a [`HealthStatus`].
#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    /// Error rate at or above which a component is `degraded`.
    pub degraded_error_rate: f64,
    /// Error rate at or above which a component is `unhealthy`.
    pub unhealthy_error_rate: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        HealthThresholds { degraded_error_rate: 0.1, unhealthy_error_rate: 0.5 }
    }
}

/// Full result of [`ServiceFacade::health_check`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthCheckResult {
    /// Overall status, the worst of any component.
    pub status: HealthStatus,
    /// Per-component breakdown.
    pub components: Vec<ComponentHealth>,
    /// Raw counters backing the verdict.
    pub metrics: HealthMetrics,
}

/// Top-level façade combining the rule engine, data-source registry,
/// classifier, and scenario executor (§4.11).
pub struct ServiceFacade {
    config: ArcSwap<ResolvedConfiguration>,
    engine: Engine,
    registry: Arc<Registry>,
    classifier: Classifier,
    data_source_cache: Cache<Value>,
    event_tx: broadcast::Sender<EventRecord>,
    thresholds: HealthThresholds,
    shutdown: AtomicBool,
}

impl ServiceFacade {
    /// Build a façade seeded with an initial configuration document and
    /// error-recovery policy, and start the registry's health monitor.
    pub fn new(document: ConfigurationDocument, recovery: RecoveryConfig) -> Result<Arc<Self>> {
        let resolved = resolve(document)?;
        let registry = Registry::new();
        registry.start_health_monitor();

        let (event_tx, _rx) = broadcast::channel(256);
        registry.add_listener(Arc::new(EventBridge { tx: event_tx.clone() }));

        let facade = Arc::new(ServiceFacade {
            config: ArcSwap::from_pointee(resolved),
            engine: Engine::new(recovery),
            registry,
            classifier: Classifier::new(),
            data_source_cache: Cache::new(CacheConfig::default()),
            event_tx,
            thresholds: HealthThresholds::default(),
            shutdown: AtomicBool::new(false),
        });
        info!("service façade started");
        Ok(facade)
    }

    /// Subscribe to the façade's lifecycle/health event stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventRecord> {
        self.event_tx.subscribe()
    }

    fn ensure_not_shutdown(&self) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(RuleForgeError::Shutdown);
        }
        Ok(())
    }

    /// Classify raw content and route it to a scenario id, if any configured
    /// scenario's declared data types match the detected content type (§4.8,
    /// §4.11). `ctx` carries caller-supplied correlation data for tracing;
    /// it does not affect the classification result itself.
    #[instrument(skip(self, data, ctx), fields(content_len = data.content.len(), ctx_len = ctx.len()))]
    pub fn classify(&self, data: &ClassificationInput, ctx: &FactContext) -> Result<ClassificationResult> {
        self.ensure_not_shutdown()?;
        let resolved = self.config.load();
        self.classifier.classify(data, &resolved.routes)
    }

    /// Run every stage of a scenario against `data` (§4.10, §4.11).
    #[instrument(skip(self, data), fields(scenario_id))]
    pub fn run(&self, scenario_id: &str, data: &FactContext) -> Result<ScenarioExecutionResult> {
        self.ensure_not_shutdown()?;
        let resolved = self.config.load();
        let stages = resolved
            .scenarios
            .get(scenario_id)
            .ok_or_else(|| RuleForgeError::NotFound(format!("scenario `{scenario_id}`")))?;
        Ok(execute_stages(&self.engine, stages, data, &resolved.enrichment))
    }

    /// Execute a configured rule chain by id against `data` (§4.5, §4.11).
    #[instrument(skip(self, data), fields(chain_id))]
    pub fn run_chain(&self, chain_id: &str, data: &FactContext) -> Result<ChainResult> {
        self.ensure_not_shutdown()?;
        let resolved = self.config.load();
        let chain = resolved
            .rule_chains
            .get(chain_id)
            .ok_or_else(|| RuleForgeError::NotFound(format!("rule chain `{chain_id}`")))?;
        Ok(self.engine.execute_rule_chain(chain, data))
    }

    /// Register a data source built from a configuration block, failing on a
    /// name collision (§4.7, §7).
    pub fn add_configuration(&self, config: DataSourceConfig) -> Result<()> {
        self.ensure_not_shutdown()?;
        let name = config.name.clone();
        self.registry.register(Arc::new(ConfiguredDataSource { config }))?;
        let _ = self.event_tx.send(EventRecord::new(EventKind::Registered, &name, "data source registered"));
        Ok(())
    }

    /// Unregister a data source by name; a no-op if it isn't registered
    /// (mirrors [`Registry::unregister`]).
    pub fn remove_configuration(&self, name: &str) -> Result<()> {
        self.ensure_not_shutdown()?;
        self.registry.unregister(name);
        let _ = self.event_tx.send(EventRecord::new(EventKind::Unregistered, name, "data source unregistered"));
        Ok(())
    }

    /// `true` iff a data source named `name` is currently registered.
    pub fn has_configuration(&self, name: &str) -> bool {
        self.registry.get(name).is_some()
    }

    /// Atomically replace the rule/scenario configuration document.
    /// In-flight `run`/`classify` calls keep using the snapshot they already
    /// loaded (§5).
    #[instrument(skip(self, document))]
    pub fn reload(&self, document: ConfigurationDocument) -> Result<()> {
        self.ensure_not_shutdown()?;
        let resolved = resolve(document)?;
        self.config.store(Arc::new(resolved));
        info!("configuration reloaded");
        Ok(())
    }

    /// Document metadata currently active, for introspection.
    pub fn current_metadata(&self) -> crate::config::ConfigMetadata {
        self.config.load().document.metadata.clone()
    }

    /// Aggregate health across the engine's performance monitor, the
    /// classification cache, and the data-source registry (§4.11).
    pub fn health_check(&self) -> HealthCheckResult {
        let monitor = crate::monitor::global();
        let evaluations_total = monitor.evaluations_total();
        let errors_total = monitor.errors_total();
        let error_rate = if evaluations_total == 0 { 0.0 } else { errors_total as f64 / evaluations_total as f64 };
        let cache_hit_rate = self.data_source_cache.statistics().hit_rate();
        let registry_stats = self.registry.statistics();

        let engine_status = self.status_for_error_rate(error_rate);
        let registry_status = if registry_stats.total > 0 && registry_stats.unhealthy > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let components = vec![
            ComponentHealth {
                name: "engine".to_string(),
                status: engine_status,
                detail: format!("{evaluations_total} evaluations, {errors_total} errors"),
            },
            ComponentHealth {
                name: "registry".to_string(),
                status: registry_status,
                detail: format!("{}/{} sources healthy", registry_stats.healthy, registry_stats.total),
            },
        ];

        let status = components.iter().map(|c| c.status).max_by_key(status_rank).unwrap_or(HealthStatus::Healthy);

        HealthCheckResult {
            status,
            components,
            metrics: HealthMetrics {
                evaluations_total,
                errors_total,
                error_rate,
                cache_hit_rate,
                registry_total: registry_stats.total,
                registry_healthy: registry_stats.healthy,
            },
        }
    }

    fn status_for_error_rate(&self, error_rate: f64) -> HealthStatus {
        if error_rate >= self.thresholds.unhealthy_error_rate {
            HealthStatus::Unhealthy
        } else if error_rate >= self.thresholds.degraded_error_rate {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Stop the registry's background health monitor and reject any further
    /// façade calls. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.registry.shutdown().await;
        self.data_source_cache.shutdown();
        warn!("service façade shut down");
    }
}

fn status_rank(status: &HealthStatus) -> u8 {
    match status {
        HealthStatus::Healthy => 0,
        HealthStatus::Degraded => 1,
        HealthStatus::Unhealthy => 2,
    }
}

//! Data-Source Registry (C7)
//!
//! A process-wide index of named data sources with type/tag lookups and a
//! background health monitor that polls each registration every 30 seconds
//! and notifies listeners of health transitions (§4.7).

use crate::error::{Result, RuleForgeError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// A registered data source: something the engine can query and poll for
/// health.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Stable name, unique within the registry.
    fn name(&self) -> &str;

    /// Type label used for `byType` lookups (e.g. `"database"`, `"http"`).
    fn source_type(&self) -> &str;

    /// Free-form tags this source is additionally indexed under.
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Re-sample health. Called by the background monitor every 30s and may
    /// also be invoked directly via `refreshAll`.
    async fn is_healthy(&self) -> bool;
}

/// A health transition event delivered to listeners (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// A source that was unhealthy (or new) is now healthy.
    Restored { name: String },
    /// A source that was healthy (or new) is now unhealthy.
    Lost { name: String },
}

/// Receives health transition notifications; exceptions are logged and
/// swallowed so one bad listener can't break monitoring for the rest (§4.7).
pub trait HealthListener: Send + Sync {
    /// Handle a transition event.
    fn on_event(&self, event: HealthEvent);
}

struct Registration {
    source: Arc<dyn DataSource>,
    healthy: Arc<AtomicBool>,
}

/// Aggregate registry statistics.
#[derive(Debug, Clone, Default)]
pub struct RegistryStatistics {
    /// Total registered sources.
    pub total: usize,
    /// Sources currently reporting healthy.
    pub healthy: usize,
    /// Sources currently reporting unhealthy.
    pub unhealthy: usize,
}

struct Indices {
    by_name: BTreeMap<String, Registration>,
    by_type: BTreeMap<String, BTreeSet<String>>,
    by_tag: BTreeMap<String, BTreeSet<String>>,
}

impl Indices {
    fn new() -> Self {
        Indices { by_name: BTreeMap::new(), by_type: BTreeMap::new(), by_tag: BTreeMap::new() }
    }
}

/// The data-source registry. `register`/`unregister`/`shutdown` serialize via
/// an internal lock; `get`/`byType`/`byTag` read through the same lock but
/// never block on each other for long since writes are rare (§4.7).
pub struct Registry {
    indices: RwLock<Indices>,
    listeners: RwLock<Vec<Arc<dyn HealthListener>>>,
    monitor_handle: RwLock<Option<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl Registry {
    /// Build an empty registry. Call [`Registry::start_health_monitor`] to
    /// begin background polling.
    pub fn new() -> Arc<Self> {
        Arc::new(Registry {
            indices: RwLock::new(Indices::new()),
            listeners: RwLock::new(Vec::new()),
            monitor_handle: RwLock::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Register a data source. Fails if a source with the same name is
    /// already registered (§4.7 failure semantics).
    pub fn register(&self, source: Arc<dyn DataSource>) -> Result<()> {
        let name = source.name().to_string();
        if name.is_empty() {
            return Err(RuleForgeError::ConfigurationError("data source name must not be empty".to_string()));
        }

        let mut indices = self.indices.write();
        if indices.by_name.contains_key(&name) {
            return Err(RuleForgeError::DuplicateName(name));
        }

        let source_type = source.source_type().to_string();
        let mut tags: Vec<String> = source.tags();
        tags.push(source_type.clone());

        indices.by_type.entry(source_type).or_default().insert(name.clone());
        for tag in &tags {
            indices.by_tag.entry(tag.clone()).or_default().insert(name.clone());
        }
        indices.by_name.insert(
            name,
            Registration { source, healthy: Arc::new(AtomicBool::new(true)) },
        );
        Ok(())
    }

    /// Remove a registration by name. Unregistering an unknown name is a
    /// no-op.
    pub fn unregister(&self, name: &str) {
        let mut indices = self.indices.write();
        if let Some(reg) = indices.by_name.remove(name) {
            let source_type = reg.source.source_type().to_string();
            if let Some(set) = indices.by_type.get_mut(&source_type) {
                set.remove(name);
            }
            let mut tags = reg.source.tags();
            tags.push(source_type);
            for tag in &tags {
                if let Some(set) = indices.by_tag.get_mut(tag) {
                    set.remove(name);
                }
            }
        }
    }

    /// Look up a data source by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn DataSource>> {
        self.indices.read().by_name.get(name).map(|r| r.source.clone())
    }

    /// All source names registered under `source_type`.
    pub fn by_type(&self, source_type: &str) -> Vec<String> {
        self.indices.read().by_type.get(source_type).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// All source names registered under `tag`.
    pub fn by_tag(&self, tag: &str) -> Vec<String> {
        self.indices.read().by_tag.get(tag).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// Names of currently healthy sources.
    pub fn healthy(&self) -> Vec<String> {
        self.indices
            .read()
            .by_name
            .iter()
            .filter(|(_, r)| r.healthy.load(Ordering::Relaxed))
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Names of currently unhealthy sources.
    pub fn unhealthy(&self) -> Vec<String> {
        self.indices
            .read()
            .by_name
            .iter()
            .filter(|(_, r)| !r.healthy.load(Ordering::Relaxed))
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Current aggregate statistics.
    pub fn statistics(&self) -> RegistryStatistics {
        let indices = self.indices.read();
        let total = indices.by_name.len();
        let healthy = indices.by_name.values().filter(|r| r.healthy.load(Ordering::Relaxed)).count();
        RegistryStatistics { total, healthy, unhealthy: total - healthy }
    }

    /// Register a health-event listener.
    pub fn add_listener(&self, listener: Arc<dyn HealthListener>) {
        self.listeners.write().push(listener);
    }

    /// Re-sample health for every registration immediately, outside the
    /// background monitor's cadence.
    pub async fn refresh_all(&self) {
        let snapshot: Vec<(String, Arc<dyn DataSource>, Arc<AtomicBool>)> = {
            let indices = self.indices.read();
            indices
                .by_name
                .iter()
                .map(|(n, r)| (n.clone(), r.source.clone(), r.healthy.clone()))
                .collect()
        };
        for (name, source, healthy_flag) in snapshot {
            self.refresh_one(&name, source.as_ref(), &healthy_flag).await;
        }
    }

    async fn refresh_one(&self, name: &str, source: &dyn DataSource, healthy_flag: &AtomicBool) {
        let now_healthy = source.is_healthy().await;
        let was_healthy = healthy_flag.swap(now_healthy, Ordering::Relaxed);
        if now_healthy != was_healthy {
            let event = if now_healthy {
                HealthEvent::Restored { name: name.to_string() }
            } else {
                HealthEvent::Lost { name: name.to_string() }
            };
            self.notify(event);
        }
    }

    fn notify(&self, event: HealthEvent) {
        for listener in self.listeners.read().iter() {
            listener.on_event(event.clone());
        }
    }

    /// Start the 30-second background health-polling task. Returns
    /// immediately; poll failures inside a listener are caught and logged,
    /// never propagated (§4.7).
    pub fn start_health_monitor(self: &Arc<Self>) {
        let registry = self.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                registry.refresh_all().await;
            }
        });
        *self.monitor_handle.write() = Some(handle);
    }

    /// Stop the background monitor, waiting up to 5 seconds before aborting
    /// the task outright (§4.7). A second call is a no-op.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = self.monitor_handle.write().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("registry health monitor did not stop within 5s; aborting");
            }
        }
    }
}

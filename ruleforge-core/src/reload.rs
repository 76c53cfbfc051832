//! Hot-reload coordinator for zero-downtime configuration updates (§5)
//!
//! Watches configuration files for changes and atomically swaps a shared
//! [`ConfigurationDocument`] reference once a reload parses cleanly. A
//! failed reload leaves the previously loaded configuration in place.

use crate::config::ConfigurationDocument;
use crate::error::{Result, RuleForgeError};
use crate::watcher::{ConfigWatcher, EventDebouncer};
use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Emitted after every reload attempt, successful or not.
#[derive(Debug, Clone)]
pub struct ReloadEvent {
    /// Path that triggered the reload.
    pub path: PathBuf,
    /// Outcome of the attempt.
    pub result: ReloadResult,
    /// When the attempt completed.
    pub timestamp: std::time::Instant,
}

/// Outcome of a single reload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadResult {
    /// The new configuration was parsed and swapped in.
    Success,
    /// Parsing or validation failed; the old configuration is retained.
    Failed(String),
    /// The event was not acted on (auto-reload disabled).
    Skipped(String),
}

/// Tuning knobs for the reload coordinator.
#[derive(Debug, Clone)]
pub struct ReloadConfig {
    /// How long to wait for a burst of writes to settle before reloading.
    pub debounce_duration: Duration,
    /// Reserved for a future retrying reload; currently informational.
    pub max_retry_attempts: usize,
    /// Reserved alongside `max_retry_attempts`.
    pub retry_delay: Duration,
    /// Master switch; when `false`, settled events are reported as
    /// `Skipped` rather than applied.
    pub auto_reload: bool,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        ReloadConfig {
            debounce_duration: Duration::from_millis(500),
            max_retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            auto_reload: true,
        }
    }
}

/// Holds the currently active configuration behind an atomically swappable
/// reference, and coordinates file-watch-triggered reloads (§5: "any
/// reload builds a new object and atomically swaps a single reference").
pub struct ReloadCoordinator {
    current: Arc<ArcSwap<ConfigurationDocument>>,
    watcher: ConfigWatcher,
    debouncer: EventDebouncer,
    config: ReloadConfig,
    event_tx: Option<mpsc::UnboundedSender<ReloadEvent>>,
    watched_files: Vec<PathBuf>,
}

impl ReloadCoordinator {
    /// Create a coordinator seeded with an initial configuration.
    pub fn new(initial: ConfigurationDocument) -> Result<Self> {
        Self::with_config(initial, ReloadConfig::default())
    }

    /// Create a coordinator with custom tuning.
    pub fn with_config(initial: ConfigurationDocument, config: ReloadConfig) -> Result<Self> {
        let watcher = ConfigWatcher::new()?;
        let debouncer = EventDebouncer::new(config.debounce_duration);
        Ok(ReloadCoordinator {
            current: Arc::new(ArcSwap::from_pointee(initial)),
            watcher,
            debouncer,
            config,
            event_tx: None,
            watched_files: Vec::new(),
        })
    }

    /// A cheap handle to the live configuration, safe to read concurrently
    /// with reloads.
    pub fn current(&self) -> Arc<ArcSwap<ConfigurationDocument>> {
        Arc::clone(&self.current)
    }

    /// Start watching a configuration file.
    pub fn watch_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RuleForgeError::ConfigurationError(format!("file does not exist: {path:?}")));
        }
        self.watcher.watch(path)?;
        self.watched_files.push(path.to_path_buf());
        info!("watching configuration file: {:?}", path);
        Ok(())
    }

    /// Subscribe to reload events; replaces any previous subscription.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ReloadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_tx = Some(tx);
        rx
    }

    /// Drive the watch/debounce/reload loop. Never returns under normal
    /// operation; intended to run as a background task.
    pub async fn run(mut self) -> Result<()> {
        info!("reload coordinator started");
        loop {
            if let Some(event) = self.watcher.recv_timeout(Duration::from_millis(100)) {
                debug!("file change event: {:?}", event);
                self.debouncer.add_event(event);
            }

            for event in self.debouncer.get_settled_events() {
                if !self.config.auto_reload {
                    debug!("auto-reload disabled, skipping: {:?}", event.path);
                    if let Some(tx) = &self.event_tx {
                        let _ = tx.send(ReloadEvent {
                            path: event.path,
                            result: ReloadResult::Skipped("auto-reload disabled".to_string()),
                            timestamp: std::time::Instant::now(),
                        });
                    }
                    continue;
                }

                let result = self.reload_file(&event.path).await;
                if let Some(tx) = &self.event_tx {
                    let reload_event = ReloadEvent { path: event.path.clone(), result, timestamp: std::time::Instant::now() };
                    if tx.send(reload_event).is_err() {
                        warn!("failed to send reload event (no subscribers)");
                    }
                }
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn reload_file(&self, path: &Path) -> ReloadResult {
        let document = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => ConfigurationDocument::load_json(path),
            _ => ConfigurationDocument::load_toml(path),
        };

        let document = match document {
            Ok(d) => d,
            Err(e) => {
                error!("failed to parse {:?}: {}", path, e);
                return ReloadResult::Failed(format!("parse error: {e}"));
            }
        };

        if let Err(e) = document.resolve_rules() {
            error!("rejected reload of {:?}: {}", path, e);
            return ReloadResult::Failed(format!("validation error: {e}"));
        }

        self.current.store(Arc::new(document));
        info!("successfully reloaded configuration from {:?}", path);
        ReloadResult::Success
    }

    /// Reload from `path` immediately, bypassing the watch/debounce loop.
    pub async fn manual_reload(&self, path: &Path) -> ReloadResult {
        self.reload_file(path).await
    }

    /// Stop watching every file.
    pub fn stop(&mut self) -> Result<()> {
        self.watcher.clear()
    }

    /// Files currently being watched.
    pub fn watched_files(&self) -> &[PathBuf] {
        &self.watched_files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigMetadata;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn empty_document() -> ConfigurationDocument {
        ConfigurationDocument {
            metadata: ConfigMetadata {
                name: "seed".into(),
                version: "1".into(),
                description: "".into(),
                config_type: "rules".into(),
                author: None,
                created_at: None,
            },
            categories: vec![],
            rules: vec![],
            rule_groups: vec![],
            rule_chains: vec![],
            scenarios: vec![],
            data_sources: vec![],
            datasets: vec![],
        }
    }

    #[test]
    fn coordinator_creation() {
        assert!(ReloadCoordinator::new(empty_document()).is_ok());
    }

    #[tokio::test]
    async fn manual_reload_swaps_in_new_document() {
        let coordinator = ReloadCoordinator::new(empty_document()).unwrap();
        let handle = coordinator.current();

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            temp_file,
            r#"[metadata]
name = "reloaded"
version = "2"
description = ""
type = "rules"
"#
        )
        .unwrap();
        temp_file.flush().unwrap();

        let result = coordinator.manual_reload(temp_file.path()).await;
        assert_eq!(result, ReloadResult::Success);
        assert_eq!(handle.load().metadata.name, "reloaded");
    }

    #[tokio::test]
    async fn manual_reload_invalid_toml_fails() {
        let coordinator = ReloadCoordinator::new(empty_document()).unwrap();
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(temp_file, "not valid [[[ toml").unwrap();
        temp_file.flush().unwrap();

        let result = coordinator.manual_reload(temp_file.path()).await;
        assert!(matches!(result, ReloadResult::Failed(_)));
    }

    #[tokio::test]
    async fn manual_reload_missing_file_fails() {
        let coordinator = ReloadCoordinator::new(empty_document()).unwrap();
        let result = coordinator.manual_reload(Path::new("/nonexistent/file.toml")).await;
        assert!(matches!(result, ReloadResult::Failed(_)));
    }

    #[tokio::test]
    async fn failed_reload_retains_previous_configuration() {
        let coordinator = ReloadCoordinator::new(empty_document()).unwrap();
        let handle = coordinator.current();

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(temp_file, "not valid [[[ toml").unwrap();
        temp_file.flush().unwrap();

        coordinator.manual_reload(temp_file.path()).await;
        assert_eq!(handle.load().metadata.name, "seed");
    }

    #[test]
    fn watch_nonexistent_file_errors() {
        let mut coordinator = ReloadCoordinator::new(empty_document()).unwrap();
        let result = coordinator.watch_file("/nonexistent/path/file.toml");
        assert!(result.is_err());
        assert_eq!(coordinator.watched_files().len(), 0);
    }

    #[test]
    fn watch_file_tracks_path() {
        let mut coordinator = ReloadCoordinator::new(empty_document()).unwrap();
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(temp_file, "[metadata]\nname = \"x\"\nversion = \"1\"\ndescription = \"\"\ntype = \"rules\"").unwrap();
        temp_file.flush().unwrap();

        coordinator.watch_file(temp_file.path()).unwrap();
        assert_eq!(coordinator.watched_files().len(), 1);
    }

    #[test]
    fn stop_clears_watches_without_error() {
        let mut coordinator = ReloadCoordinator::new(empty_document()).unwrap();
        assert!(coordinator.stop().is_ok());
    }

    #[test]
    fn reload_config_defaults() {
        let config = ReloadConfig::default();
        assert!(config.auto_reload);
        assert_eq!(config.debounce_duration, Duration::from_millis(500));
    }
}

//! File watching for hot-reload functionality
//!
//! Detects changes to configuration files on disk and feeds them to the
//! [`crate::reload`] coordinator.

use crate::error::{Result, RuleForgeError};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// A single file-system change relevant to a watched configuration file.
#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    /// Path that changed.
    pub path: PathBuf,
    /// Type of change.
    pub kind: ChangeKind,
    /// When the underlying OS event arrived.
    pub timestamp: std::time::Instant,
}

/// Type of file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// File was created.
    Created,
    /// File was modified.
    Modified,
    /// File was removed.
    Removed,
}

/// Watches configuration files (`.toml`, `.json`) for changes.
pub struct ConfigWatcher {
    watcher: RecommendedWatcher,
    event_rx: Receiver<FileChangeEvent>,
    event_tx: Sender<FileChangeEvent>,
    watched_paths: HashSet<PathBuf>,
    extensions: Vec<String>,
}

impl ConfigWatcher {
    /// Create a new file watcher.
    pub fn new() -> Result<Self> {
        let (tx, rx) = channel();
        let tx_clone = tx.clone();

        let watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    if let Some(change_event) = process_notify_event(event) {
                        if let Err(e) = tx.send(change_event) {
                            error!("failed to send file change event: {}", e);
                        }
                    }
                }
                Err(e) => error!("file watch error: {}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(1)).with_compare_contents(false),
        )
        .map_err(|e| RuleForgeError::ConfigurationError(format!("failed to create watcher: {e}")))?;

        Ok(ConfigWatcher {
            watcher,
            event_rx: rx,
            event_tx: tx_clone,
            watched_paths: HashSet::new(),
            extensions: vec!["toml".to_string(), "json".to_string()],
        })
    }

    /// Watch a file or directory.
    pub fn watch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if self.watched_paths.contains(path) {
            debug!("already watching path: {:?}", path);
            return Ok(());
        }

        let mode = if path.is_dir() { RecursiveMode::Recursive } else { RecursiveMode::NonRecursive };
        self.watcher
            .watch(path, mode)
            .map_err(|e| RuleForgeError::ConfigurationError(format!("failed to watch {path:?}: {e}")))?;

        self.watched_paths.insert(path.to_path_buf());
        info!("now watching: {:?} (mode: {:?})", path, mode);
        Ok(())
    }

    /// Stop watching a path; a no-op if it isn't currently watched.
    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !self.watched_paths.contains(path) {
            return Ok(());
        }

        self.watcher
            .unwatch(path)
            .map_err(|e| RuleForgeError::ConfigurationError(format!("failed to unwatch {path:?}: {e}")))?;
        self.watched_paths.remove(path);
        info!("stopped watching: {:?}", path);
        Ok(())
    }

    /// Try to receive a file change event without blocking.
    pub fn try_recv(&self) -> Option<FileChangeEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<FileChangeEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// A clone of the event sender, for tests and multi-threaded use.
    pub fn event_sender(&self) -> Sender<FileChangeEvent> {
        self.event_tx.clone()
    }

    /// `true` iff `path`'s extension is one this watcher cares about.
    pub fn should_watch(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()).map(|e| self.extensions.contains(&e.to_string())).unwrap_or(false)
    }

    /// Currently watched paths.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watched_paths.iter().cloned().collect()
    }

    /// Stop watching everything.
    pub fn clear(&mut self) -> Result<()> {
        let paths: Vec<PathBuf> = self.watched_paths.iter().cloned().collect();
        for path in paths {
            self.unwatch(&path)?;
        }
        Ok(())
    }
}

fn process_notify_event(event: Event) -> Option<FileChangeEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(modify_kind) => {
            use notify::event::ModifyKind;
            match modify_kind {
                ModifyKind::Data(_) | ModifyKind::Any => ChangeKind::Modified,
                _ => return None,
            }
        }
        EventKind::Remove(_) => ChangeKind::Removed,
        _ => return None,
    };

    let path = event.paths.into_iter().next()?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") | Some("json") => {}
        _ => {
            trace!("ignoring non-configuration file: {:?}", path);
            return None;
        }
    }

    Some(FileChangeEvent { path, kind, timestamp: std::time::Instant::now() })
}

/// Coalesces bursts of change events per path into a single settled event,
/// since files are often written in multiple chunks.
pub struct EventDebouncer {
    duration: Duration,
    pending: HashMap<PathBuf, FileChangeEvent>,
    last_event_time: HashMap<PathBuf, std::time::Instant>,
}

impl EventDebouncer {
    /// Create a debouncer that waits `duration` of silence before settling.
    pub fn new(duration: Duration) -> Self {
        EventDebouncer { duration, pending: HashMap::new(), last_event_time: HashMap::new() }
    }

    /// Register an event, resetting that path's settle timer.
    pub fn add_event(&mut self, event: FileChangeEvent) {
        let now = std::time::Instant::now();
        self.pending.insert(event.path.clone(), event.clone());
        self.last_event_time.insert(event.path, now);
    }

    /// Drain and return every path that has had no new events for
    /// `duration`.
    pub fn get_settled_events(&mut self) -> Vec<FileChangeEvent> {
        let now = std::time::Instant::now();
        let settled_paths: Vec<PathBuf> = self
            .last_event_time
            .iter()
            .filter_map(|(path, time)| (now.duration_since(*time) >= self.duration).then(|| path.clone()))
            .collect();

        let mut settled = Vec::with_capacity(settled_paths.len());
        for path in settled_paths {
            if let Some(event) = self.pending.remove(&path) {
                self.last_event_time.remove(&path);
                settled.push(event);
            }
        }
        settled
    }

    /// `true` iff any path is still waiting to settle.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Discard all pending events.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.last_event_time.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn watcher_creation() {
        assert!(ConfigWatcher::new().is_ok());
    }

    #[test]
    fn watch_file_is_idempotent() {
        let mut watcher = ConfigWatcher::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.toml");
        fs::write(&file_path, "version = \"1.0\"").unwrap();

        assert!(watcher.watch(&file_path).is_ok());
        assert_eq!(watcher.watched_paths().len(), 1);
        assert!(watcher.watch(&file_path).is_ok());
        assert_eq!(watcher.watched_paths().len(), 1);
    }

    #[test]
    fn watch_directory_recursively() {
        let mut watcher = ConfigWatcher::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        assert!(watcher.watch(temp_dir.path()).is_ok());
        assert!(watcher.watched_paths().contains(&temp_dir.path().to_path_buf()));
    }

    #[test]
    fn unwatch_removes_path() {
        let mut watcher = ConfigWatcher::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.toml");
        fs::write(&file_path, "version = \"1.0\"").unwrap();

        watcher.watch(&file_path).unwrap();
        watcher.unwatch(&file_path).unwrap();
        assert_eq!(watcher.watched_paths().len(), 0);
        assert!(watcher.unwatch(&file_path).is_ok());
    }

    #[test]
    fn clear_stops_all_watches() {
        let mut watcher = ConfigWatcher::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let file1 = temp_dir.path().join("a.toml");
        let file2 = temp_dir.path().join("b.json");
        fs::write(&file1, "").unwrap();
        fs::write(&file2, "{}").unwrap();

        watcher.watch(&file1).unwrap();
        watcher.watch(&file2).unwrap();
        watcher.clear().unwrap();
        assert_eq!(watcher.watched_paths().len(), 0);
    }

    #[test]
    fn should_watch_checks_extension() {
        let watcher = ConfigWatcher::new().unwrap();
        assert!(watcher.should_watch(Path::new("config.toml")));
        assert!(watcher.should_watch(Path::new("data.json")));
        assert!(!watcher.should_watch(Path::new("readme.md")));
        assert!(!watcher.should_watch(Path::new("no_extension")));
    }

    #[test]
    fn watch_nonexistent_path_errors() {
        let mut watcher = ConfigWatcher::new().unwrap();
        assert!(watcher.watch(Path::new("/nonexistent/path/to/file.toml")).is_err());
    }

    #[test]
    fn process_event_ignores_wrong_extension() {
        use notify::event::{CreateKind, EventKind};
        let event = Event { kind: EventKind::Create(CreateKind::File), paths: vec![PathBuf::from("test.txt")], attrs: Default::default() };
        assert!(process_notify_event(event).is_none());
    }

    #[test]
    fn process_event_accepts_toml_create() {
        use notify::event::{CreateKind, EventKind};
        let event = Event { kind: EventKind::Create(CreateKind::File), paths: vec![PathBuf::from("test.toml")], attrs: Default::default() };
        let result = process_notify_event(event).unwrap();
        assert_eq!(result.kind, ChangeKind::Created);
    }

    #[test]
    fn debouncer_settles_after_duration() {
        let mut debouncer = EventDebouncer::new(Duration::from_millis(80));
        let event = FileChangeEvent { path: PathBuf::from("test.toml"), kind: ChangeKind::Modified, timestamp: std::time::Instant::now() };

        debouncer.add_event(event.clone());
        assert!(debouncer.has_pending());
        assert_eq!(debouncer.get_settled_events().len(), 0);

        std::thread::sleep(Duration::from_millis(120));
        let settled = debouncer.get_settled_events();
        assert_eq!(settled.len(), 1);
        assert!(!debouncer.has_pending());
    }

    #[test]
    fn debouncer_keeps_latest_event_on_overwrite() {
        let mut debouncer = EventDebouncer::new(Duration::from_millis(150));
        let path = PathBuf::from("test.toml");
        debouncer.add_event(FileChangeEvent { path: path.clone(), kind: ChangeKind::Created, timestamp: std::time::Instant::now() });
        std::thread::sleep(Duration::from_millis(40));
        debouncer.add_event(FileChangeEvent { path, kind: ChangeKind::Modified, timestamp: std::time::Instant::now() });

        std::thread::sleep(Duration::from_millis(90));
        assert_eq!(debouncer.get_settled_events().len(), 0);

        std::thread::sleep(Duration::from_millis(150));
        let settled = debouncer.get_settled_events();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].kind, ChangeKind::Modified);
    }
}

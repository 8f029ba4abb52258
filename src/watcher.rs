//! File system watcher for automatic reloads
//!
//! The watcher monitors the directory of each configured source file and
//! reloads the matching record type when that exact file changes. Sibling
//! files in the same directory are ignored. The watcher never parses
//! anything itself; it only tells the store which type to reload.

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::record::RecordType;
use crate::store::DataStore;

/// How often the event loop wakes up to check the debounce timer
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for file watching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Reload source files when they change on disk
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Debounce duration in milliseconds.
    /// A type is reloaded once this long after its last change event;
    /// 0 reloads on every event.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    100
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// A watched source file and the record type it feeds
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub record_type: RecordType,
    pub path: PathBuf,
}

/// Running watcher; dropping it (or calling [`FileWatcher::stop`]) ends watching
pub struct FileWatcher {
    watcher: Option<RecommendedWatcher>,
    thread: Option<JoinHandle<()>>,
}

impl FileWatcher {
    /// Start watching the source files of `store`.
    ///
    /// Each parent directory is watched once, non-recursively. Change events
    /// are handled on a dedicated background thread.
    pub fn spawn(store: Arc<DataStore>, config: &WatchConfig) -> Result<Self> {
        let targets = [RecordType::Account, RecordType::Group]
            .into_iter()
            .map(|record_type| {
                let path = std::path::absolute(store.path(record_type))
                    .with_context(|| format!("Failed to resolve {} source path", record_type))?;
                Ok(WatchTarget { record_type, path })
            })
            .collect::<Result<Vec<_>>>()?;

        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(tx, Config::default())
            .context("Failed to create file watcher")?;

        let mut dirs: Vec<&Path> = Vec::new();
        for target in &targets {
            let dir = target.path.parent().unwrap_or_else(|| Path::new("/"));
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        for dir in dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to start watching {}", dir.display()))?;
            log::info!("Watching {} for changes", dir.display());
        }

        let debounce = Duration::from_millis(config.debounce_ms);
        let thread = std::thread::Builder::new()
            .name("pwdsvc-watcher".to_string())
            .spawn(move || run(rx, &store, &targets, debounce))
            .context("Failed to spawn watcher thread")?;

        Ok(Self {
            watcher: Some(watcher),
            thread: Some(thread),
        })
    }

    /// Stop watching and wait for the event thread to exit
    pub fn stop(mut self) {
        // Dropping the watcher closes the event channel
        self.watcher.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Watcher thread panicked");
            }
        }
    }
}

/// Event loop: collect changed types and reload them once debounced
fn run(
    rx: Receiver<notify::Result<Event>>,
    store: &DataStore,
    targets: &[WatchTarget],
    debounce: Duration,
) {
    let mut pending: HashSet<RecordType> = HashSet::new();
    let mut last_event_time: Option<Instant> = None;

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(event)) => {
                for record_type in changed_types(&event, targets) {
                    log::debug!("Detected change to {} source: {:?}", record_type, event.kind);
                    if debounce.is_zero() {
                        store.reload(record_type);
                    } else {
                        pending.insert(record_type);
                        last_event_time = Some(Instant::now());
                    }
                }
            }
            Ok(Err(e)) => {
                log::warn!("Watch error: {}", e);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("Watcher channel disconnected, stopping...");
                break;
            }
        }

        // Checked every iteration: unrelated events in the watched
        // directories must not hold back a due reload
        if let Some(last_time) = last_event_time {
            if !pending.is_empty() && last_time.elapsed() >= debounce {
                for record_type in pending.drain() {
                    store.reload(record_type);
                }
                last_event_time = None;
            }
        }
    }
}

/// Record types whose source file is touched by `event`
///
/// Create, modify and remove events count; access and other events do not.
pub fn changed_types(event: &Event, targets: &[WatchTarget]) -> Vec<RecordType> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
        _ => return Vec::new(),
    }

    let mut changed = Vec::new();
    for target in targets {
        if changed.contains(&target.record_type) {
            continue;
        }
        if event.paths.iter().any(|p| same_file(p, &target.path)) {
            changed.push(target.record_type);
        }
    }
    changed
}

/// Compare an event path with a watched path.
///
/// Backends may report canonical directory paths (e.g. through symlinked
/// temp directories), so parents are compared canonically when the plain
/// paths differ.
fn same_file(event_path: &Path, target: &Path) -> bool {
    if event_path == target {
        return true;
    }
    if event_path.file_name() != target.file_name() {
        return false;
    }
    match (
        event_path.parent().map(Path::canonicalize),
        target.parent().map(Path::canonicalize),
    ) {
        (Some(Ok(a)), Some(Ok(b))) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind};

    fn targets() -> Vec<WatchTarget> {
        vec![
            WatchTarget {
                record_type: RecordType::Account,
                path: PathBuf::from("/srv/pwdsvc/passwd"),
            },
            WatchTarget {
                record_type: RecordType::Group,
                path: PathBuf::from("/srv/pwdsvc/group"),
            },
        ]
    }

    fn event(kind: EventKind, path: &str) -> Event {
        Event {
            kind,
            paths: vec![PathBuf::from(path)],
            attrs: Default::default(),
        }
    }

    #[test]
    fn test_watch_config_default() {
        let config = WatchConfig::default();
        assert!(config.enabled);
        assert_eq!(config.debounce_ms, 100);
    }

    #[test]
    fn test_modify_of_watched_file() {
        let event = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Any)),
            "/srv/pwdsvc/group",
        );
        assert_eq!(changed_types(&event, &targets()), vec![RecordType::Group]);
    }

    #[test]
    fn test_create_and_remove_count_as_changes() {
        let created = event(EventKind::Create(CreateKind::File), "/srv/pwdsvc/passwd");
        assert_eq!(changed_types(&created, &targets()), vec![RecordType::Account]);

        let removed = event(EventKind::Remove(RemoveKind::File), "/srv/pwdsvc/passwd");
        assert_eq!(changed_types(&removed, &targets()), vec![RecordType::Account]);
    }

    #[test]
    fn test_sibling_file_is_ignored() {
        let event = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Any)),
            "/srv/pwdsvc/shadow",
        );
        assert!(changed_types(&event, &targets()).is_empty());
    }

    #[test]
    fn test_same_name_in_other_directory_is_ignored() {
        let event = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Any)),
            "/nonexistent-elsewhere/passwd",
        );
        assert!(changed_types(&event, &targets()).is_empty());
    }

    #[test]
    fn test_access_event_ignored() {
        let event = event(EventKind::Access(AccessKind::Read), "/srv/pwdsvc/passwd");
        assert!(changed_types(&event, &targets()).is_empty());
    }

    #[test]
    fn test_rename_touching_both_files() {
        let event = Event {
            kind: EventKind::Modify(ModifyKind::Name(notify::event::RenameMode::Both)),
            paths: vec![
                PathBuf::from("/srv/pwdsvc/group"),
                PathBuf::from("/srv/pwdsvc/passwd"),
            ],
            attrs: Default::default(),
        };
        assert_eq!(
            changed_types(&event, &targets()),
            vec![RecordType::Account, RecordType::Group]
        );
    }
}

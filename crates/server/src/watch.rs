//! File watching for the data source and the route rules file.
//!
//! The source file is watched through its parent directory: atomic writers
//! replace the file with a rename, which a watch on the file itself can miss.
//! Raw directory events are reduced to [`WatchEvent`]s, filtered down to the
//! source path, parsed, and forwarded as [`Change`]s. The routes file is
//! polled by modification time.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use jsonwatch_core::{detect, RouteRules, SourceLocation};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("can't watch remote source {0}")]
    RemoteSource(String),

    #[error("failed to resolve {}: {source}", path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("routes poll interval must be greater than zero (JSONWATCH_ROUTES_POLL_MS)")]
    ZeroPollInterval,

    #[error("failed to watch {}: {source}", path.display())]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// A directory-level notification; `file_name` is absent on platforms that
/// report events without a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub dir: PathBuf,
    pub file_name: Option<OsString>,
}

impl WatchEvent {
    pub fn named(dir: impl Into<PathBuf>, file_name: impl Into<OsString>) -> Self {
        Self {
            dir: dir.into(),
            file_name: Some(file_name.into()),
        }
    }

    pub fn unnamed(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_name: None,
        }
    }

    /// Reduce a notify event to one watch event per affected path.
    fn from_notify(watched_dir: &Path, event: &Event) -> Vec<Self> {
        if event.paths.is_empty() {
            return vec![Self::unnamed(watched_dir)];
        }
        event
            .paths
            .iter()
            .map(|path| Self {
                dir: path.parent().map_or_else(|| watched_dir.to_path_buf(), Path::to_path_buf),
                file_name: path.file_name().map(OsString::from),
            })
            .collect()
    }
}

/// Which watched file produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Source,
    Routes,
}

/// A parsed, valid candidate document.
#[derive(Debug, Clone)]
pub struct Change {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub value: Value,
}

// ── Pure filters ─────────────────────────────────────────────────

/// Accepts watch events that resolve to the source file.
#[derive(Debug, Clone)]
pub struct SourceFilter {
    dir: PathBuf,
    target: PathBuf,
}

impl SourceFilter {
    pub fn new(source: &Path) -> Result<Self, WatchError> {
        let target = std::path::absolute(source).map_err(|e| WatchError::Resolve {
            path: source.to_path_buf(),
            source: e,
        })?;
        let dir = target
            .parent()
            .map_or_else(|| PathBuf::from("/"), Path::to_path_buf);
        Ok(Self { dir, target })
    }

    pub fn watched_dir(&self) -> &Path {
        &self.dir
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Resolved path of the event when it names the source file.
    pub fn accepts(&self, event: &WatchEvent) -> Option<PathBuf> {
        let file_name = event.file_name.as_ref()?;
        let resolved = std::path::absolute(event.dir.join(file_name)).ok()?;
        same_path(&resolved, &self.target).then_some(resolved)
    }
}

/// Lexical comparison first; canonical paths cover symlinked temp dirs.
fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Reports a change only when the modification time differs from the last
/// observation; repeated notifications with the same mtime are dropped.
#[derive(Debug, Clone, Default)]
pub struct MtimePoller {
    last: Option<SystemTime>,
}

impl MtimePoller {
    pub fn new(initial: Option<SystemTime>) -> Self {
        Self { last: initial }
    }

    pub fn observe(&mut self, current: Option<SystemTime>) -> bool {
        let changed = current != self.last;
        self.last = current;
        changed
    }
}

async fn modified_time(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.and_then(|m| m.modified()).ok()
}

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

// ── Subscription ─────────────────────────────────────────────────

/// Live watch; dropping it stops every stream.
pub struct WatchSubscription {
    _watcher: Option<RecommendedWatcher>,
    tasks: Vec<JoinHandle<()>>,
}

impl WatchSubscription {
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Source and routes change streams.
#[derive(Debug, Clone)]
pub struct FileWatchSource {
    filter: SourceFilter,
    routes: Option<PathBuf>,
    poll_interval: Duration,
}

impl FileWatchSource {
    /// Remote sources and a zero routes poll interval are rejected here,
    /// before any watcher exists.
    pub fn new(source: &SourceLocation, routes: Option<&Path>, poll_interval: Duration) -> Result<Self, WatchError> {
        let path = match source {
            SourceLocation::File(path) => path,
            SourceLocation::Remote(url) => return Err(WatchError::RemoteSource(url.to_string())),
        };
        if routes.is_some() && poll_interval.is_zero() {
            return Err(WatchError::ZeroPollInterval);
        }
        Ok(Self {
            filter: SourceFilter::new(path)?,
            routes: routes.map(Path::to_path_buf),
            poll_interval,
        })
    }

    /// Watch the source directory with the platform notifier.
    pub fn spawn(self, changes: mpsc::Sender<Change>) -> Result<WatchSubscription, WatchError> {
        let dir = self.filter.watched_dir().to_path_buf();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<WatchEvent>();

        let callback_dir = dir.clone();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if is_read_only_access(&event.kind) {
                    return;
                }
                for watch_event in WatchEvent::from_notify(&callback_dir, &event) {
                    let _ = events_tx.send(watch_event);
                }
            }
            Err(e) => warn!(error = %e, "filesystem watcher error"),
        })
        .map_err(|source| WatchError::Notify {
            path: dir.clone(),
            source,
        })?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Notify {
                path: dir.clone(),
                source,
            })?;

        info!(path = %dir.display(), source = %self.filter.target().display(), "watching source directory");
        let mut subscription = self.spawn_with_events(events_rx, changes);
        subscription._watcher = Some(watcher);
        Ok(subscription)
    }

    /// Run the pipeline over an injected event stream.
    pub fn spawn_with_events(
        self,
        events: mpsc::UnboundedReceiver<WatchEvent>,
        changes: mpsc::Sender<Change>,
    ) -> WatchSubscription {
        let mut tasks = vec![tokio::spawn(pump_source_events(self.filter, events, changes.clone()))];
        if let Some(routes) = self.routes {
            info!(path = %routes.display(), interval_ms = self.poll_interval.as_millis() as u64, "polling routes file");
            tasks.push(tokio::spawn(poll_routes(routes, self.poll_interval, changes)));
        }
        WatchSubscription {
            _watcher: None,
            tasks,
        }
    }
}

/// Opening or reading the file is not a change; a closed writer is.
fn is_read_only_access(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Access(access) if !matches!(access, AccessKind::Close(AccessMode::Write)))
}

async fn pump_source_events(
    filter: SourceFilter,
    mut events: mpsc::UnboundedReceiver<WatchEvent>,
    changes: mpsc::Sender<Change>,
) {
    let filter = Arc::new(filter);
    while let Some(event) = events.recv().await {
        // `accepts` may canonicalize paths.
        let filter = Arc::clone(&filter);
        let Ok(Some(path)) = tokio::task::spawn_blocking(move || filter.accepts(&event)).await else {
            continue;
        };
        if !is_regular_file(&path).await {
            debug!(path = %path.display(), "source event without a regular file, ignoring");
            continue;
        }
        match detect::read_candidate(&path).await {
            Ok(value) => {
                let change = Change {
                    kind: ChangeKind::Source,
                    path,
                    value,
                };
                if changes.send(change).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(path = %e.path.display(), error = %e.message, "failed to parse source, keeping current state"),
        }
    }
}

async fn poll_routes(path: PathBuf, interval: Duration, changes: mpsc::Sender<Change>) {
    let mut poller = MtimePoller::new(modified_time(&path).await);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if !poller.observe(modified_time(&path).await) {
            continue;
        }
        let parsed = detect::read_candidate(&path)
            .await
            .map_err(|e| e.message)
            .and_then(|value| {
                RouteRules::from_value(value.clone(), &path)
                    .map(|_| value)
                    .map_err(|e| e.to_string())
            });
        match parsed {
            Ok(value) => {
                let change = Change {
                    kind: ChangeKind::Routes,
                    path: path.clone(),
                    value,
                };
                if changes.send(change).await.is_err() {
                    break;
                }
            }
            Err(message) => warn!(path = %path.display(), error = %message, "failed to parse routes, keeping current rules"),
        }
    }
}

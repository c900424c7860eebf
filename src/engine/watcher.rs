//! Watch folder observer.
//!
//! Reacts to files created in (or renamed into) the watch folder. Each
//! arrival is held back until its size and modification time stop
//! changing, so a half-written job is never read. Files already present
//! when the watcher starts are ignored.

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::types::AgentError;

/// Keeps the OS watch alive; dropping it stops delivery.
pub struct JobWatcher {
    _watcher: RecommendedWatcher,
}

impl JobWatcher {
    /// Start watching `dir` non-recursively. Stable arrivals are sent on `tx`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        dir: &Path,
        cfg: &WatcherConfig,
        tx: UnboundedSender<PathBuf>,
    ) -> Result<Self, AgentError> {
        let runtime = tokio::runtime::Handle::current();
        let threshold = Duration::from_millis(cfg.stability_threshold_ms);
        let poll = Duration::from_millis(cfg.poll_interval_ms.max(1));

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Watch error");
                    return;
                }
            };
            if !is_arrival(&event.kind) {
                return;
            }
            for path in event.paths {
                let tx = tx.clone();
                runtime.spawn(async move {
                    if wait_for_write_finish(&path, threshold, poll).await {
                        debug!(path = %path.display(), "File added");
                        forward(&tx, path);
                    } else {
                        debug!(path = %path.display(), "File vanished before it settled");
                    }
                });
            }
        })
        .map_err(|e| AgentError::Watch(e.to_string()))?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| AgentError::Watch(format!("{}: {e}", dir.display())))?;

        info!(dir = %dir.display(), "Watching folder...");
        Ok(Self { _watcher: watcher })
    }
}

/// Creation, or a rename that lands a file in the folder. Updates to
/// existing files are not arrivals.
pub fn is_arrival(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(CreateKind::File | CreateKind::Any)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    )
}

/// Hand a settled arrival to the queue. Returns false once the receiving
/// side is gone.
fn forward(tx: &UnboundedSender<PathBuf>, path: PathBuf) -> bool {
    match tx.send(path) {
        Ok(()) => true,
        Err(e) => {
            debug!(path = %e.0.display(), "Queue closed, dropping arrival");
            false
        }
    }
}

fn snapshot(path: &Path) -> Option<(u64, Option<SystemTime>)> {
    let meta = std::fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    Some((meta.len(), meta.modified().ok()))
}

/// Poll `path` until it has been unchanged for `threshold`.
/// Returns false if it disappears or is not a regular file.
pub async fn wait_for_write_finish(path: &Path, threshold: Duration, poll: Duration) -> bool {
    let Some(mut last) = snapshot(path) else {
        return false;
    };
    let mut stable_since = Instant::now();

    loop {
        tokio::time::sleep(poll).await;
        let Some(current) = snapshot(path) else {
            return false;
        };
        if current != last {
            last = current;
            stable_since = Instant::now();
        } else if stable_since.elapsed() >= threshold {
            return true;
        }
    }
}

//! Filesystem watcher (§4.E FILES source): any write to a configured cert
//! key file triggers a cert reload.

use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

use crate::reload::Coalescer;

/// Watches every path in `files` for write events, forwarding a single
/// `"inotify-write-event"` trigger per matching `notify::Event`. Returns
/// once the underlying channel closes (on watcher drop).
pub async fn watch_files(files: Vec<String>, coalescer: Arc<Coalescer>) {
    if files.is_empty() {
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

    let mut watcher: RecommendedWatcher = match notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    }) {
        Ok(w) => w,
        Err(err) => {
            warn!(error = %err, "failed to create filesystem watcher");
            return;
        }
    };

    for path in &files {
        if let Err(err) = watcher.watch(std::path::Path::new(path), RecursiveMode::NonRecursive) {
            warn!(error = %err, path, "failed to watch certificate file");
        }
    }

    while let Some(res) = rx.recv().await {
        match res {
            Ok(event) if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) => {
                coalescer.trigger("inotify-write-event");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "filesystem watch error"),
        }
    }
}

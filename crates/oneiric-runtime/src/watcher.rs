use std::sync::Arc;
use std::time::{Duration, SystemTime};

use oneiric_config::load_selection;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::runtime::Runtime;

/// Watches the selection document and dispatches swaps for changed keys.
///
/// The file is polled on the debounce interval and reloaded only when its
/// mtime moves, so bursty editor saves coalesce into a single
/// application.
pub struct SelectionWatcher;

impl SelectionWatcher {
    pub fn spawn(runtime: Arc<Runtime>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let Some(path) = runtime.settings().watcher.selection_path.clone() else {
                return;
            };
            let debounce = runtime
                .settings()
                .watcher
                .debounce
                .max(Duration::from_millis(50));
            let cancel = runtime.cancel().clone();
            let mut last_modified: Option<SystemTime> = None;

            debug!(path = %path.display(), "selection watcher running");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(debounce) => {}
                }

                let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
                if modified == last_modified {
                    continue;
                }
                last_modified = modified;

                match load_selection(&path) {
                    Ok(doc) => runtime.update_selection(doc).await,
                    Err(e) => warn!(path = %path.display(), error = %e, "selection file rejected"),
                }
            }
            debug!("selection watcher stopped");
        })
    }
}

// Bridges file-system notifications for the image directory into the photo
// cache's rebuild queue. The notify callback runs on the watcher's own thread
// and only enqueues; the rebuild itself happens on the cache's worker.

use super::RebuildQueue;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;

// Keeps the OS watch alive; dropping it stops notifications.
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
}

pub fn watch_directory(dir: &Path, queue: RebuildQueue) -> notify::Result<DirectoryWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if changes_listing(&event.kind) {
                tracing::trace!("Image directory changed: {:?} {:?}", event.kind, event.paths);
                queue.request();
            }
        }
        Err(e) => tracing::warn!("Image directory watch error: {}", e),
    })?;

    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    tracing::info!("Watching {:?} for changes", dir);

    Ok(DirectoryWatcher { _watcher: watcher })
}

// Files appearing, disappearing, being renamed or rewritten (size / mtime).
fn changes_listing(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Any
    )
}

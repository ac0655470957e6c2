// In-memory snapshot of the image directory.
//
// Readers get an immutable `Arc<[PhotoRecord]>` and never touch the disk.
// Rebuilds scan the directory off the async executor and swap the whole
// snapshot at once; they are serialized so two scans never race each other.

mod watcher;

pub use watcher::watch_directory;

use serde::Serialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// Extensions (compared case-insensitively) that make a file part of the gallery.
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

// Delay used to coalesce bursts of change notifications into one rebuild.
pub const REBUILD_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRecord {
    pub id: String,
    pub name: String,
    pub filename: String,
    // URL under which the image is served without throttling.
    pub path: String,
    pub size: u64,
    // Milliseconds since the Unix epoch.
    pub last_modified: u64,
}

impl PhotoRecord {
    fn new(filename: String, size: u64, last_modified: u64) -> Self {
        Self {
            id: filename.clone(),
            name: filename.clone(),
            path: format!("/images/{}", filename),
            filename,
            size,
            last_modified,
        }
    }
}

pub fn is_allowed_image(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| {
            ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
}

pub struct PhotoCache {
    images_dir: PathBuf,
    snapshot: RwLock<Arc<[PhotoRecord]>>,
    // Held for the duration of a rebuild.
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl PhotoCache {
    // Creates an empty cache; call `rebuild` to populate it.
    pub fn new(images_dir: impl Into<PathBuf>) -> Self {
        Self {
            images_dir: images_dir.into(),
            snapshot: RwLock::new(Arc::from(Vec::new())),
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Rescans the image directory and replaces the snapshot.
    ///
    /// An unreadable directory yields an empty snapshot; the error is logged and
    /// never propagated. Returns the number of photos in the new snapshot.
    pub async fn rebuild(&self) -> usize {
        let _guard = self.rebuild_lock.lock().await;

        let dir = self.images_dir.clone();
        let records = match tokio::task::spawn_blocking(move || scan_directory(&dir)).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                tracing::error!(
                    "Error updating photo cache from {:?}: {}",
                    self.images_dir,
                    e
                );
                Vec::new()
            }
            Err(e) => {
                tracing::error!("Photo cache scan task failed: {}", e);
                Vec::new()
            }
        };

        let count = records.len();
        self.replace(records);
        tracing::info!("Photo cache rebuilt: {} photo(s)", count);
        count
    }

    fn replace(&self, records: Vec<PhotoRecord>) {
        let records: Arc<[PhotoRecord]> = records.into();
        match self.snapshot.write() {
            Ok(mut snapshot) => *snapshot = records,
            // A reader panicking cannot leave a half-written Arc behind.
            Err(poisoned) => *poisoned.into_inner() = records,
        }
    }

    // Current snapshot, sorted by filename.
    pub fn list(&self) -> Arc<[PhotoRecord]> {
        match self.snapshot.read() {
            Ok(snapshot) => snapshot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn get(&self, filename: &str) -> Option<PhotoRecord> {
        let snapshot = self.list();
        snapshot
            .binary_search_by(|record| record.filename.as_str().cmp(filename))
            .ok()
            .map(|index| snapshot[index].clone())
    }

    /// Starts the single rebuild worker for this cache.
    ///
    /// Producers only enqueue requests through the returned queue. The worker
    /// waits `debounce` after the first pending request, drains everything
    /// that arrived meanwhile and runs one rebuild. It stops once every queue
    /// handle has been dropped.
    pub fn spawn_rebuild_worker(
        self: &Arc<Self>,
        debounce: Duration,
    ) -> (RebuildQueue, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_rebuild_worker(self.clone(), rx, debounce));
        (RebuildQueue { tx }, task)
    }
}

#[derive(Clone, Debug)]
pub struct RebuildQueue {
    tx: mpsc::UnboundedSender<()>,
}

impl RebuildQueue {
    pub fn request(&self) {
        if self.tx.send(()).is_err() {
            tracing::debug!("Photo cache rebuild worker has stopped; request dropped");
        }
    }
}

async fn run_rebuild_worker(
    cache: Arc<PhotoCache>,
    mut rx: mpsc::UnboundedReceiver<()>,
    debounce: Duration,
) {
    while rx.recv().await.is_some() {
        tokio::time::sleep(debounce).await;

        let mut coalesced = 1;
        while rx.try_recv().is_ok() {
            coalesced += 1;
        }
        tracing::debug!(
            "Rebuilding photo cache for {} change notification(s)",
            coalesced
        );
        cache.rebuild().await;
    }
    tracing::debug!("Photo cache rebuild worker stopped");
}

fn scan_directory(dir: &Path) -> std::io::Result<Vec<PhotoRecord>> {
    let mut records = Vec::new();

    for entry_result in std::fs::read_dir(dir)? {
        let entry = entry_result?;

        let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!("Skipping non UTF-8 file name: {:?}", entry.file_name());
            continue;
        };
        if !is_allowed_image(&filename) {
            continue;
        }

        // Follows symlinks, so a linked image counts like a regular one.
        let metadata = match std::fs::metadata(entry.path()) {
            Ok(metadata) => metadata,
            Err(e) => {
                // Removed between listing and stat, or unreadable.
                tracing::warn!("Skipping {:?}: {}", entry.path(), e);
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |since_epoch| since_epoch.as_millis() as u64);

        records.push(PhotoRecord::new(filename, metadata.len(), last_modified));
    }

    records.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str, len: usize) {
        std::fs::write(dir.join(name), vec![0u8; len]).unwrap();
    }

    #[test]
    fn test_allowed_extensions() {
        assert!(is_allowed_image("a.jpg"));
        assert!(is_allowed_image("a.JPEG"));
        assert!(is_allowed_image("a.Png"));
        assert!(is_allowed_image("a.gif"));
        assert!(is_allowed_image("a.webp"));
        assert!(!is_allowed_image("a.txt"));
        assert!(!is_allowed_image("a.jpg.exe"));
        assert!(!is_allowed_image("jpg"));
        assert!(!is_allowed_image(".png.bak"));
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = PhotoRecord::new("x.png".to_string(), 12, 1_700_000_000_000);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "x.png");
        assert_eq!(json["name"], "x.png");
        assert_eq!(json["filename"], "x.png");
        assert_eq!(json["path"], "/images/x.png");
        assert_eq!(json["size"], 12);
        assert_eq!(json["lastModified"], 1_700_000_000_000u64);
    }

    #[tokio::test]
    async fn test_rebuild_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.JPG", 3);
        touch(dir.path(), "a.png", 5);
        touch(dir.path(), "notes.txt", 1);
        std::fs::create_dir(dir.path().join("nested.jpg")).unwrap();

        let cache = PhotoCache::new(dir.path());
        assert!(cache.list().is_empty());
        assert_eq!(cache.rebuild().await, 2);

        let names: Vec<_> = cache.list().iter().map(|r| r.filename.clone()).collect();
        assert_eq!(names, vec!["a.png", "b.JPG"]);
        assert_eq!(cache.get("a.png").unwrap().size, 5);
        assert!(cache.get("notes.txt").is_none());
        // Identity is case-sensitive.
        assert!(cache.get("b.jpg").is_none());
    }

    #[tokio::test]
    async fn test_rebuild_reflects_removal() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.gif", 1);
        let cache = PhotoCache::new(dir.path());
        cache.rebuild().await;
        assert!(cache.get("a.gif").is_some());

        std::fs::remove_file(dir.path().join("a.gif")).unwrap();
        // Stale until the next rebuild.
        assert!(cache.get("a.gif").is_some());
        cache.rebuild().await;
        assert!(cache.get("a.gif").is_none());
    }

    #[tokio::test]
    async fn test_missing_directory_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.webp", 1);
        let cache = PhotoCache::new(dir.path());
        cache.rebuild().await;
        assert_eq!(cache.list().len(), 1);

        let path = dir.path().to_path_buf();
        drop(dir);
        assert!(!path.exists());
        assert_eq!(cache.rebuild().await, 0);
        assert!(cache.list().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_held_by_reader_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.jpg", 1);
        let cache = PhotoCache::new(dir.path());
        cache.rebuild().await;

        let before = cache.list();
        touch(dir.path(), "b.jpg", 1);
        cache.rebuild().await;

        assert_eq!(before.len(), 1);
        assert_eq!(cache.list().len(), 2);
    }

    #[tokio::test]
    async fn test_rebuild_worker_coalesces_requests() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(PhotoCache::new(dir.path()));
        let (queue, task) = cache.spawn_rebuild_worker(Duration::from_millis(50));

        for i in 0..5 {
            touch(dir.path(), &format!("burst-{}.jpg", i), 1);
            queue.request();
        }
        // Nothing happens before the debounce delay.
        assert!(cache.list().is_empty());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while cache.list().len() < 5 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(cache.list().len(), 5);

        drop(queue);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("worker should stop once the queue is dropped")
            .unwrap();
    }
}

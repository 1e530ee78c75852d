use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::transport::ChatRef;

const THUMBNAIL_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "webp"];

/// Strip characters that are not safe in a file name.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !['/', '\\', '?', '%', '*', ':', '|', '"', '<', '>'].contains(c))
        .collect()
}

type LeaseLocks = Arc<Mutex<HashMap<ChatRef, Arc<tokio::sync::Mutex<()>>>>>;

/// Per-chat scratch directories. A directory belongs to whoever holds its
/// lease, so two items dispatched to the same chat never share it.
pub struct ScratchSpace {
    root: PathBuf,
    locks: LeaseLocks,
}

/// Exclusive use of one chat's scratch directory until dropped.
pub struct ScratchLease {
    path: PathBuf,
    chat: ChatRef,
    locks: LeaseLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ScratchLease {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchLease {
    /// The last lease out removes the chat's lock entry.
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        if locks.get(&self.chat).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.chat);
        }
    }
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), locks: Arc::default() }
    }

    pub fn dir_for(&self, chat: ChatRef) -> PathBuf {
        self.root.join(chat.0.to_string())
    }

    /// Waits while another item holds this chat's directory. The directory
    /// itself is created by the pipeline.
    pub async fn acquire(&self, chat: ChatRef) -> ScratchLease {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(chat).or_default())
        };
        let guard = lock.lock_owned().await;
        ScratchLease {
            path: self.dir_for(chat),
            chat,
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked_chats(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Output template handed to the extractor; every produced file starts with
/// the track id.
pub fn output_template(dir: &Path, track_id: &str) -> PathBuf {
    dir.join(format!("{}.%(ext)s", sanitize_filename(track_id)))
}

/// Find `<track_id>.<ext>` or, failing that, any file with the track id as
/// prefix and the wanted extension.
pub fn find_artifact(dir: &Path, track_id: &str, ext: &str) -> Option<PathBuf> {
    let stem = sanitize_filename(track_id);
    let exact = dir.join(format!("{stem}.{ext}"));
    if exact.is_file() {
        return Some(exact);
    }
    files_with_prefix(dir, &stem)
        .into_iter()
        .find(|p| p.extension().is_some_and(|e| e.eq_ignore_ascii_case(ext)))
}

pub fn find_thumbnail(dir: &Path, track_id: &str) -> Option<PathBuf> {
    THUMBNAIL_EXTENSIONS
        .iter()
        .find_map(|ext| find_artifact(dir, track_id, ext))
}

fn files_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();
    files.sort();
    files
}

#[derive(Debug, Default, PartialEq)]
pub struct CleanupReport {
    pub removed: usize,
    pub failed: usize,
    pub dir_removed: bool,
}

/// Remove everything the pipeline left for `track_id`, then the directory
/// if it is empty. Each failure is logged and skipped.
pub fn cleanup_scratch(dir: &Path, track_id: &str) -> CleanupReport {
    let mut report = CleanupReport::default();
    for file in files_with_prefix(dir, &sanitize_filename(track_id)) {
        match fs::remove_file(&file) {
            Ok(()) => report.removed += 1,
            Err(e) => {
                report.failed += 1;
                warn!(path = %file.display(), error = %e, "failed to remove scratch file");
            }
        }
    }

    let is_empty = fs::read_dir(dir).map(|mut it| it.next().is_none()).unwrap_or(false);
    if is_empty {
        match fs::remove_dir(dir) {
            Ok(()) => report.dir_removed = true,
            Err(e) => warn!(path = %dir.display(), error = %e, "failed to remove scratch dir"),
        }
    }
    debug!(dir = %dir.display(), track_id, ?report, "scratch cleaned");
    report
}

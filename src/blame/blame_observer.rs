use std::path::Path;

use log::*;

use super::BlameError;

/// Receives progress and completion of blames,
/// e.g., to show a progress indicator.
///
/// Calls may come from any thread and may interleave across files.
pub trait BlameObserver: Send + Sync {
    /// Called on every `BlameCacheEntry::get_blame()`, whether cached or not.
    fn on_progress_start(&self, _path: &Path) {}

    /// Called when blaming `path` succeeded.
    fn on_blamed(&self, _path: &Path, _commits: usize) {}

    /// Called when blaming `path` failed.
    /// The result is the blank `BlameInfo`.
    fn on_failed(&self, _path: &Path, _error: &BlameError) {}
}

/// Writes the notifications to the log.
#[derive(Debug, Default)]
pub struct LogBlameObserver;

impl BlameObserver for LogBlameObserver {
    fn on_progress_start(&self, path: &Path) {
        debug!("Blaming {path:?}");
    }

    fn on_blamed(&self, path: &Path, commits: usize) {
        info!("Blamed file {path:?} and found {commits} commits");
    }

    fn on_failed(&self, path: &Path, error: &BlameError) {
        error!("Failed to blame {path:?}: {error}");
    }
}

use std::{
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
};

use log::*;
use notify::{
    EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::ModifyKind,
};

use crate::blame::BlameError;

/// The changes of a watched file that affect its blame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileWatchEvent {
    /// The content was modified.
    /// Rapid successive modifications may be coalesced.
    Modified,
    /// The file was renamed or removed.
    /// No more events are delivered after this.
    RenamedOrRemoved,
}

impl FileWatchEvent {
    /// Map a `notify` event kind to `FileWatchEvent`.
    /// Returns `None` if the event doesn't affect the blame.
    pub fn from_event_kind(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Modify(ModifyKind::Name(_)) | EventKind::Remove(_) => {
                Some(Self::RenamedOrRemoved)
            }
            EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Other) => {
                Some(Self::Modified)
            }
            _ => None,
        }
    }
}

pub type FileWatchHandler = Box<dyn FnMut(FileWatchEvent) + Send>;

/// A running watch of a file.
pub trait FileWatch: Send {
    /// Stop delivering events and release the watch.
    /// Calling this more than once is a no-op.
    fn stop(&mut self);
}

/// Starts watching files.
pub trait FileWatcher: Send + Sync {
    /// Start watching `path`.
    /// The `handler` may be called on any thread.
    fn watch(
        &self,
        path: &Path,
        handler: FileWatchHandler,
    ) -> Result<Box<dyn FileWatch>, BlameError>;
}

/// `FileWatcher` by the `notify` crate.
#[derive(Debug, Default)]
pub struct NotifyFileWatcher;

impl NotifyFileWatcher {
    /// Calls the `handler` for the events from `rx`,
    /// until the file is renamed or removed, the watch reports an error,
    /// or the watch is stopped.
    fn dispatch_thread(
        path: &Path,
        rx: mpsc::Receiver<notify::Result<notify::Event>>,
        mut handler: FileWatchHandler,
    ) {
        trace!("dispatch thread start: {path:?}");
        for result in rx {
            match result {
                Ok(event) => {
                    trace!("watch: {path:?} {:?}", event.kind);
                    let Some(event) = FileWatchEvent::from_event_kind(&event.kind) else {
                        continue;
                    };
                    handler(event);
                    if event == FileWatchEvent::RenamedOrRemoved {
                        break;
                    }
                }
                Err(error) => {
                    // The entry keeps the cache until it's disposed.
                    error!(
                        "{}; {path:?} is no longer invalidated on changes",
                        BlameError::from(error)
                    );
                    break;
                }
            }
        }
        trace!("dispatch thread end: {path:?}");
    }
}

impl FileWatcher for NotifyFileWatcher {
    fn watch(
        &self,
        path: &Path,
        handler: FileWatchHandler,
    ) -> Result<Box<dyn FileWatch>, BlameError> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx)?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        debug!("watch: {path:?}");

        let dispatch_path = path.to_path_buf();
        thread::spawn(move || Self::dispatch_thread(&dispatch_path, rx, handler));
        Ok(Box::new(NotifyFileWatch {
            path: path.to_path_buf(),
            watcher: Some(watcher),
        }))
    }
}

/// Dropping the `RecommendedWatcher` closes the channel,
/// which ends the dispatch thread.
/// The thread isn't joined because `stop()` may be called from the handler.
struct NotifyFileWatch {
    path: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl FileWatch for NotifyFileWatch {
    fn stop(&mut self) {
        if self.watcher.take().is_some() {
            debug!("unwatch: {:?}", self.path);
        }
    }
}

impl Drop for NotifyFileWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Weak, mpsc},
    thread,
};

use log::*;
use parking_lot::Mutex;

use crate::watch::{FileWatch, FileWatchEvent, FileWatchHandler, FileWatcher, NotifyFileWatcher};

use super::{
    BlameConfig, BlameError, BlameEvent, BlameFuture, BlameInfo, BlameInfoBuilder,
    BlameObserver, BlameProcess, BlameSpawner, GitBlameSpawner, LogBlameObserver,
};

/// The collaborators of `BlameCacheEntry`.
#[derive(Clone)]
pub struct BlameServices {
    pub spawner: Arc<dyn BlameSpawner>,
    pub watcher: Arc<dyn FileWatcher>,
    pub observer: Arc<dyn BlameObserver>,
    pub config: BlameConfig,
}

impl BlameServices {
    /// Create with `git blame`, the `notify` file watcher, and the log.
    pub fn new(config: BlameConfig) -> Self {
        Self {
            spawner: Arc::new(GitBlameSpawner::new(config.clone())),
            watcher: Arc::new(NotifyFileWatcher),
            observer: Arc::new(LogBlameObserver),
            config,
        }
    }
}

impl Default for BlameServices {
    fn default() -> Self {
        Self::new(BlameConfig::default())
    }
}

#[derive(Default)]
struct EntryState {
    pending: Option<BlameFuture>,
    active_process: Option<Arc<dyn BlameProcess>>,
    /// Incremented for each computation,
    /// so that a superseded computation doesn't clear `active_process`.
    generation: u64,
    watch: Option<Box<dyn FileWatch>>,
    is_disposed: bool,
}

/// The blame of a file, cached until the file is modified.
///
/// Concurrent `get_blame()` calls share one computation.
/// The cache is cleared when the file is modified,
/// and the entry is disposed when the file is renamed or removed.
/// # Examples
/// ```no_run
/// use git_blame_cache::blame::{BlameCacheEntry, BlameServices};
///
/// # use std::path::Path;
/// fn main() -> anyhow::Result<()> {
///   let entry = BlameCacheEntry::new(Path::new("src/main.rs"), BlameServices::default());
///   let info = entry.get_blame()?.wait();
///   println!("{} lines", info.lines.len());
///   Ok(())
/// }
/// ```
pub struct BlameCacheEntry {
    file_name: PathBuf,
    services: BlameServices,
    state: Mutex<EntryState>,
    this: Weak<Self>,
}

impl BlameCacheEntry {
    /// Create an entry and start watching `file_name`.
    ///
    /// If watching fails, the error is logged
    /// and the entry isn't invalidated by changes until it's disposed.
    pub fn new(file_name: &Path, services: BlameServices) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let entry = this.clone();
            let handler: FileWatchHandler = Box::new(move |event| {
                if let Some(entry) = entry.upgrade() {
                    entry.on_file_watch_event(event);
                }
            });
            let watch = match services.watcher.watch(file_name, handler) {
                Ok(watch) => Some(watch),
                Err(error) => {
                    error!("{error}; {file_name:?} is not invalidated on changes");
                    None
                }
            };
            Self {
                file_name: file_name.to_path_buf(),
                services,
                state: Mutex::new(EntryState {
                    watch,
                    ..Default::default()
                }),
                this: this.clone(),
            }
        })
    }

    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().is_disposed
    }

    /// `true` if `get_blame()` returns the cached computation.
    pub fn is_cached(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Get the blame of the file.
    ///
    /// Returns the cached computation if any, or starts a new one.
    /// The result is the blank `BlameInfo` if the computation fails.
    /// Fails with `BlameError::Disposed` after `dispose()`.
    pub fn get_blame(&self) -> Result<BlameFuture, BlameError> {
        let mut state = self.state.lock();
        if state.is_disposed {
            return Err(BlameError::Disposed(self.file_name.clone()));
        }
        self.services.observer.on_progress_start(&self.file_name);
        if let Some(pending) = &state.pending {
            trace!("get_blame: cached {:?}", self.file_name);
            return Ok(pending.clone());
        }

        // Store before spawning, so that callers racing with this one share it.
        let future = BlameFuture::new();
        state.pending = Some(future.clone());
        state.generation += 1;
        let generation = state.generation;
        debug!("get_blame: start #{generation} {:?}", self.file_name);

        let (tx, rx) = mpsc::channel();
        match self.services.spawner.spawn(&self.file_name, tx) {
            Ok(process) => {
                state.active_process = Some(process.clone());
                drop(state);
                self.start_receive_thread(rx, process, future.clone(), generation);
            }
            Err(error) => {
                drop(state);
                future.resolve(self.report(Err(error)));
            }
        }
        Ok(future)
    }

    fn start_receive_thread(
        &self,
        rx: mpsc::Receiver<BlameEvent>,
        process: Arc<dyn BlameProcess>,
        future: BlameFuture,
        generation: u64,
    ) {
        let entry = self.this.clone();
        let file_name = self.file_name.clone();
        let observer = self.services.observer.clone();
        let timeout = self.services.config.timeout;
        thread::spawn(move || {
            let result = BlameInfoBuilder::new().receive(&rx, timeout, &*process);
            future.resolve(Self::report_to(&*observer, &file_name, result));
            if let Some(entry) = entry.upgrade() {
                entry.on_computation_end(generation);
            }
        });
    }

    fn report(&self, result: Result<BlameInfo, BlameError>) -> BlameInfo {
        Self::report_to(&*self.services.observer, &self.file_name, result)
    }

    fn report_to(
        observer: &dyn BlameObserver,
        file_name: &Path,
        result: Result<BlameInfo, BlameError>,
    ) -> BlameInfo {
        match result {
            Ok(info) => {
                observer.on_blamed(file_name, info.commits.len());
                info
            }
            Err(error) => {
                observer.on_failed(file_name, &error);
                BlameInfo::blank()
            }
        }
    }

    fn on_computation_end(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.active_process = None;
        }
    }

    fn on_file_watch_event(&self, event: FileWatchEvent) {
        debug!("{event:?}: {:?}", self.file_name);
        match event {
            FileWatchEvent::Modified => self.invalidate(),
            FileWatchEvent::RenamedOrRemoved => self.dispose(),
        }
    }

    /// Clear the cache. The next `get_blame()` starts a new computation.
    ///
    /// A running computation isn't terminated;
    /// its result is still delivered to those who already have its future.
    pub fn invalidate(&self) {
        if self.state.lock().pending.take().is_some() {
            trace!("invalidate: {:?}", self.file_name);
        }
    }

    /// Terminate the running computation and stop watching the file.
    /// The entry can't be used after this.
    /// Calling this more than once is a no-op.
    pub fn dispose(&self) {
        let (process, watch) = {
            let mut state = self.state.lock();
            if state.is_disposed {
                return;
            }
            state.is_disposed = true;
            state.pending = None;
            (state.active_process.take(), state.watch.take())
        };
        debug!("dispose: {:?}", self.file_name);
        if let Some(process) = process {
            process.terminate();
        }
        if let Some(mut watch) = watch {
            watch.stop();
        }
    }
}

impl Drop for BlameCacheEntry {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use crate::blame::CommitInfo;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    struct FakeProcess {
        tx: Mutex<Option<mpsc::Sender<BlameEvent>>>,
        terminate_count: AtomicUsize,
    }

    impl FakeProcess {
        fn send(&self, event: BlameEvent) {
            let is_end = matches!(event, BlameEvent::End(_));
            let mut tx = self.tx.lock();
            if let Some(sender) = tx.as_ref() {
                sender.send(event).unwrap();
            }
            if is_end {
                *tx = None;
            }
        }

        fn blame(&self, hash: &str, line_numbers: &[usize]) {
            self.send(BlameEvent::Commit {
                hash: hash.to_string(),
                info: CommitInfo::default(),
            });
            for &line_number in line_numbers {
                self.send(BlameEvent::Line {
                    line_number,
                    hash: hash.to_string(),
                });
            }
            self.send(BlameEvent::End(Ok(())));
        }

        fn terminate_count(&self) -> usize {
            self.terminate_count.load(Ordering::SeqCst)
        }
    }

    impl BlameProcess for FakeProcess {
        fn terminate(&self) {
            self.terminate_count.fetch_add(1, Ordering::SeqCst);
            self.send(BlameEvent::End(Err(BlameError::Terminated)));
        }
    }

    #[derive(Default)]
    struct FakeSpawner {
        processes: Mutex<Vec<Arc<FakeProcess>>>,
        fails: bool,
    }

    impl FakeSpawner {
        fn spawn_count(&self) -> usize {
            self.processes.lock().len()
        }

        fn process(&self, index: usize) -> Arc<FakeProcess> {
            self.processes.lock()[index].clone()
        }
    }

    impl BlameSpawner for FakeSpawner {
        fn spawn(
            &self,
            _path: &Path,
            tx: mpsc::Sender<BlameEvent>,
        ) -> Result<Arc<dyn BlameProcess>, BlameError> {
            if self.fails {
                return Err(BlameError::Repository("fake".to_string()));
            }
            let process = Arc::new(FakeProcess {
                tx: Mutex::new(Some(tx)),
                terminate_count: AtomicUsize::new(0),
            });
            self.processes.lock().push(process.clone());
            Ok(process)
        }
    }

    struct FakeWatch {
        stop_count: Arc<AtomicUsize>,
    }

    impl FileWatch for FakeWatch {
        fn stop(&mut self) {
            self.stop_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeWatcher {
        handler: Mutex<Option<FileWatchHandler>>,
        stop_count: Arc<AtomicUsize>,
        fails: bool,
    }

    impl FakeWatcher {
        fn fire(&self, event: FileWatchEvent) {
            let mut handler = self.handler.lock();
            (handler.as_mut().unwrap())(event);
        }

        fn stop_count(&self) -> usize {
            self.stop_count.load(Ordering::SeqCst)
        }
    }

    impl FileWatcher for FakeWatcher {
        fn watch(
            &self,
            _path: &Path,
            handler: FileWatchHandler,
        ) -> Result<Box<dyn FileWatch>, BlameError> {
            if self.fails {
                return Err(BlameError::Watch("fake".to_string()));
            }
            *self.handler.lock() = Some(handler);
            Ok(Box::new(FakeWatch {
                stop_count: self.stop_count.clone(),
            }))
        }
    }

    #[derive(Default)]
    struct CountObserver {
        progress: AtomicUsize,
        blamed: AtomicUsize,
        failed: AtomicUsize,
    }

    impl BlameObserver for CountObserver {
        fn on_progress_start(&self, _path: &Path) {
            self.progress.fetch_add(1, Ordering::SeqCst);
        }

        fn on_blamed(&self, _path: &Path, _commits: usize) {
            self.blamed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_failed(&self, _path: &Path, _error: &BlameError) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct TestEntry {
        entry: Arc<BlameCacheEntry>,
        spawner: Arc<FakeSpawner>,
        watcher: Arc<FakeWatcher>,
        observer: Arc<CountObserver>,
    }

    impl TestEntry {
        fn new() -> Self {
            Self::with(FakeSpawner::default(), FakeWatcher::default(), None)
        }

        fn with(spawner: FakeSpawner, watcher: FakeWatcher, timeout: Option<Duration>) -> Self {
            let spawner = Arc::new(spawner);
            let watcher = Arc::new(watcher);
            let observer = Arc::new(CountObserver::default());
            let services = BlameServices {
                spawner: spawner.clone(),
                watcher: watcher.clone(),
                observer: observer.clone(),
                config: BlameConfig {
                    timeout,
                    ..Default::default()
                },
            };
            Self {
                entry: BlameCacheEntry::new(Path::new("test.txt"), services),
                spawner,
                watcher,
                observer,
            }
        }
    }

    fn wait(future: &BlameFuture) -> Arc<BlameInfo> {
        future.wait_timeout(TIMEOUT).expect("blame timed out")
    }

    #[test]
    fn get_blame_shares_computation() -> anyhow::Result<()> {
        let test = TestEntry::new();
        let future1 = test.entry.get_blame()?;
        let future2 = test.entry.get_blame()?;
        assert!(future1.ptr_eq(&future2));
        assert_eq!(test.spawner.spawn_count(), 1);
        assert_eq!(test.observer.progress.load(Ordering::SeqCst), 2);

        test.spawner.process(0).blame("h1", &[1, 2]);
        let info1 = wait(&future1);
        let info2 = wait(&future2);
        assert!(Arc::ptr_eq(&info1, &info2));
        assert_eq!(info1.lines.len(), 2);
        assert_eq!(info1.lines[&2], "h1");
        assert!(info1.commits.contains_key("h1"));

        // Resolved results stay cached.
        assert!(test.entry.get_blame()?.ptr_eq(&future1));
        assert_eq!(test.spawner.spawn_count(), 1);
        Ok(())
    }

    #[test]
    fn get_blame_from_threads() -> anyhow::Result<()> {
        let test = TestEntry::new();
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let entry = test.entry.clone();
                thread::spawn(move || entry.get_blame().unwrap())
            })
            .collect();
        let futures: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert_eq!(test.spawner.spawn_count(), 1);
        for future in &futures {
            assert!(future.ptr_eq(&futures[0]));
        }
        Ok(())
    }

    #[test]
    fn modified_invalidates() -> anyhow::Result<()> {
        let test = TestEntry::new();
        let future1 = test.entry.get_blame()?;
        test.spawner.process(0).blame("h1", &[1]);
        assert_eq!(wait(&future1).lines[&1], "h1");

        assert!(test.entry.is_cached());
        test.watcher.fire(FileWatchEvent::Modified);
        assert!(!test.entry.is_cached());
        let future2 = test.entry.get_blame()?;
        assert_eq!(test.spawner.spawn_count(), 2);
        assert!(!future1.ptr_eq(&future2));
        test.spawner.process(1).blame("h2", &[1]);
        assert_eq!(wait(&future2).lines[&1], "h2");
        assert!(!test.entry.is_disposed());
        Ok(())
    }

    #[test]
    fn modified_while_running() -> anyhow::Result<()> {
        let test = TestEntry::new();
        let future1 = test.entry.get_blame()?;
        test.watcher.fire(FileWatchEvent::Modified);
        test.watcher.fire(FileWatchEvent::Modified);
        let future2 = test.entry.get_blame()?;
        assert_eq!(test.spawner.spawn_count(), 2);

        // The superseded computation isn't terminated, and still resolves.
        assert_eq!(test.spawner.process(0).terminate_count(), 0);
        test.spawner.process(0).blame("h1", &[1]);
        test.spawner.process(1).blame("h2", &[1]);
        assert_eq!(wait(&future1).lines[&1], "h1");
        assert_eq!(wait(&future2).lines[&1], "h2");
        assert!(test.entry.get_blame()?.ptr_eq(&future2));
        Ok(())
    }

    #[test]
    fn renamed_disposes() -> anyhow::Result<()> {
        let test = TestEntry::new();
        let future = test.entry.get_blame()?;
        test.watcher.fire(FileWatchEvent::RenamedOrRemoved);
        assert!(test.entry.is_disposed());
        assert_eq!(test.watcher.stop_count(), 1);
        assert_eq!(test.spawner.process(0).terminate_count(), 1);

        // The terminated computation resolves to blank.
        assert!(wait(&future).is_blank());
        assert_eq!(test.observer.failed.load(Ordering::SeqCst), 1);

        let error = test.entry.get_blame().unwrap_err();
        assert!(matches!(error, BlameError::Disposed(path) if path == Path::new("test.txt")));
        // No progress for calls after disposal.
        assert_eq!(test.observer.progress.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn dispose_twice() -> anyhow::Result<()> {
        let test = TestEntry::new();
        test.entry.get_blame()?;
        test.entry.dispose();
        test.entry.dispose();
        assert_eq!(test.watcher.stop_count(), 1);
        assert_eq!(test.spawner.process(0).terminate_count(), 1);

        let stop_count = test.watcher.stop_count.clone();
        drop(test);
        assert_eq!(stop_count.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn drop_disposes() {
        let test = TestEntry::new();
        let TestEntry {
            entry, watcher, ..
        } = test;
        drop(entry);
        assert_eq!(watcher.stop_count(), 1);
        // Events after the entry is gone are ignored.
        watcher.fire(FileWatchEvent::Modified);
    }

    #[test]
    fn completed_process_not_terminated() -> anyhow::Result<()> {
        let test = TestEntry::new();
        let future = test.entry.get_blame()?;
        test.spawner.process(0).blame("h1", &[1]);
        wait(&future);
        // Wait for the receive thread to clear the active process.
        let start_time = std::time::Instant::now();
        while test.entry.state.lock().active_process.is_some() {
            assert!(start_time.elapsed() < TIMEOUT);
            thread::sleep(Duration::from_millis(1));
        }
        test.entry.dispose();
        assert_eq!(test.spawner.process(0).terminate_count(), 0);
        assert_eq!(test.observer.blamed.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn stream_error_is_blank() -> anyhow::Result<()> {
        let test = TestEntry::new();
        let future = test.entry.get_blame()?;
        let process = test.spawner.process(0);
        process.send(BlameEvent::Line {
            line_number: 1,
            hash: "h1".to_string(),
        });
        process.send(BlameEvent::End(Err(BlameError::StreamClosed)));
        assert!(wait(&future).is_blank());
        assert_eq!(test.observer.failed.load(Ordering::SeqCst), 1);
        assert_eq!(test.observer.blamed.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn spawn_error_is_blank() -> anyhow::Result<()> {
        let spawner = FakeSpawner {
            fails: true,
            ..Default::default()
        };
        let test = TestEntry::with(spawner, FakeWatcher::default(), None);
        let future = test.entry.get_blame()?;
        assert!(future.is_ready());
        assert!(wait(&future).is_blank());
        assert_eq!(test.observer.failed.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn timeout_terminates() -> anyhow::Result<()> {
        let test = TestEntry::with(
            FakeSpawner::default(),
            FakeWatcher::default(),
            Some(Duration::from_millis(20)),
        );
        let future = test.entry.get_blame()?;
        assert!(wait(&future).is_blank());
        assert_eq!(test.spawner.process(0).terminate_count(), 1);
        assert_eq!(test.observer.failed.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn watch_error_keeps_entry() -> anyhow::Result<()> {
        let watcher = FakeWatcher {
            fails: true,
            ..Default::default()
        };
        let test = TestEntry::with(FakeSpawner::default(), watcher, None);
        let future = test.entry.get_blame()?;
        test.spawner.process(0).blame("h1", &[1]);
        assert_eq!(wait(&future).lines[&1], "h1");
        test.entry.dispose();
        assert_eq!(test.watcher.stop_count(), 0);
        Ok(())
    }
}

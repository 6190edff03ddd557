use std::{
    io::{Write, stdout},
    path::{Path, PathBuf},
    sync::{Arc, mpsc},
    time::Duration,
};

use clap::Parser;
use log::debug;
use parking_lot::Mutex;
use unicode_width::UnicodeWidthChar;

use crate::{
    blame::{BlameCacheEntry, BlameConfig, BlameError, BlameInfo, BlameServices, CommitInfo},
    watch::{FileWatch, FileWatchEvent, FileWatchHandler, FileWatcher},
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
/// The `git-blame-cache` command line interface.
/// # Examples
/// ```no_run
/// use git_blame_cache::Cli;
///
/// fn main() -> anyhow::Result<()> {
///   let cli: Cli = Cli::new_from_args();
///   cli.run()
/// }
/// ```
pub struct Cli {
    /// Path of the file to blame.
    path: PathBuf,
    /// Keep running, and print again when the file is modified.
    #[arg(long)]
    watch: bool,
    /// Ignore whitespace changes.
    #[arg(short = 'w', long)]
    ignore_whitespace: bool,
    /// The `git` command.
    #[arg(long, default_value = "git")]
    git: PathBuf,
    /// Terminate `git blame` if it takes longer than this.
    #[arg(long, default_value_t = BlameConfig::DEFAULT_TIMEOUT.as_secs())]
    timeout_secs: u64,
    /// Wait for `git blame` forever.
    #[arg(long, conflicts_with = "timeout_secs")]
    no_timeout: bool,
}

impl Cli {
    const AUTHOR_WIDTH: usize = 16;

    pub fn new_from_args() -> Self {
        Self::parse()
    }

    pub fn config(&self) -> BlameConfig {
        BlameConfig {
            git_command: self.git.clone().into_os_string(),
            ignore_whitespace: self.ignore_whitespace,
            timeout: (!self.no_timeout).then(|| Duration::from_secs(self.timeout_secs)),
        }
    }

    /// Run the `git-blame-cache` command line interface.
    pub fn run(&self) -> anyhow::Result<()> {
        let mut services = BlameServices::new(self.config());
        let (tx, rx) = mpsc::channel();
        if self.watch {
            services.watcher = Arc::new(ForwardFileWatcher::new(services.watcher.clone(), tx));
        } else {
            drop(tx);
        }
        let entry = BlameCacheEntry::new(&self.path, services);
        let mut out = stdout();
        if !self.print(&entry, &mut out)? {
            return Ok(());
        }

        // Ends when the watch ends.
        while let Ok(event) = rx.recv() {
            if event == FileWatchEvent::RenamedOrRemoved {
                break;
            }
            // Coalesce queued modifications into one print.
            let is_removed = rx
                .try_iter()
                .any(|event| event == FileWatchEvent::RenamedOrRemoved);
            writeln!(out)?;
            if !self.print(&entry, &mut out)? || is_removed {
                break;
            }
        }
        debug!("{:?}: watch ended", self.path);
        Ok(())
    }

    /// Print the blame of the file.
    /// Returns `false` if the file was renamed or removed.
    fn print(&self, entry: &BlameCacheEntry, out: &mut impl Write) -> anyhow::Result<bool> {
        let info = match entry.get_blame() {
            Ok(future) => future.wait(),
            Err(BlameError::Disposed(path)) => {
                debug!("{path:?} is renamed or removed");
                return Ok(false);
            }
            Err(error) => return Err(error.into()),
        };
        // The content may be newer than the blame; lines are matched by numbers.
        let content = std::fs::read(&self.path).unwrap_or_default();
        let content = String::from_utf8_lossy(&content);
        Self::write_blame(&info, &content, out)?;
        out.flush()?;
        Ok(true)
    }

    fn write_blame(info: &BlameInfo, content: &str, out: &mut impl Write) -> anyhow::Result<()> {
        for (index, line) in content.lines().enumerate() {
            let line_number = index + 1;
            let left_pane = match info.commit_for_line(line_number) {
                Some((hash, commit)) => Self::left_pane(hash, commit),
                None => String::new(),
            };
            writeln!(out, "{line_number:4}:{left_pane:50}|{line}")?;
        }
        Ok(())
    }

    fn left_pane(hash: &str, commit: Option<&CommitInfo>) -> String {
        let short_hash = &hash[..hash.len().min(8)];
        let Some(commit) = commit else {
            return short_hash.to_string();
        };
        let author = Self::pad(&commit.author.name, Self::AUTHOR_WIDTH);
        let date = commit
            .author
            .time
            .map(|time| time.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        if CommitInfo::is_uncommitted_hash(hash) {
            return format!("{short_hash} {author} {date:10} (uncommitted)");
        }
        format!("{short_hash} {author} {date:10} {}", commit.summary)
    }

    /// Truncate or pad `text` to `width` columns.
    fn pad(text: &str, width: usize) -> String {
        let mut result = String::new();
        let mut columns = 0;
        for ch in text.chars() {
            let ch_width = ch.width().unwrap_or(0);
            if columns + ch_width > width {
                break;
            }
            result.push(ch);
            columns += ch_width;
        }
        result.extend(std::iter::repeat_n(' ', width - columns));
        result
    }
}

/// Calls the handler of the wrapped `FileWatcher`, then sends the event to `tx`.
/// The sender is dropped when the watch ends.
struct ForwardFileWatcher {
    inner: Arc<dyn FileWatcher>,
    tx: Mutex<Option<mpsc::Sender<FileWatchEvent>>>,
}

impl ForwardFileWatcher {
    fn new(inner: Arc<dyn FileWatcher>, tx: mpsc::Sender<FileWatchEvent>) -> Self {
        Self {
            inner,
            tx: Mutex::new(Some(tx)),
        }
    }
}

impl FileWatcher for ForwardFileWatcher {
    fn watch(
        &self,
        path: &Path,
        mut handler: FileWatchHandler,
    ) -> Result<Box<dyn FileWatch>, BlameError> {
        let tx = self.tx.lock().take();
        self.inner.watch(
            path,
            Box::new(move |event| {
                handler(event);
                if let Some(tx) = &tx {
                    let _ = tx.send(event);
                }
            }),
        )
    }
}

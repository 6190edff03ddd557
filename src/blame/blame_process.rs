use std::{
    io::{BufReader, Read},
    path::Path,
    process,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
};

use log::*;
use parking_lot::Mutex;

use crate::extensions::{GitTools, LineReadBuffer};

use super::{BlameConfig, BlameError, BlameEvent, IncrementalParser};

/// A running blame computation.
pub trait BlameProcess: Send + Sync {
    /// Cancel the computation.
    ///
    /// The event channel still receives `BlameEvent::End`,
    /// unless the computation has already ended.
    /// Calling this after the end is a no-op.
    fn terminate(&self);
}

/// Starts blame computations.
pub trait BlameSpawner: Send + Sync {
    /// Start blaming `path`, sending `BlameEvent`s to `tx`.
    ///
    /// Once this returns `Ok`, exactly one `BlameEvent::End` is sent
    /// as the last event.
    fn spawn(
        &self,
        path: &Path,
        tx: mpsc::Sender<BlameEvent>,
    ) -> Result<Arc<dyn BlameProcess>, BlameError>;
}

/// Spawns `git blame --incremental`.
#[derive(Debug, Default)]
pub struct GitBlameSpawner {
    config: BlameConfig,
}

impl GitBlameSpawner {
    pub fn new(config: BlameConfig) -> Self {
        Self { config }
    }

    pub fn create_blame_command(&self, workdir_path: &Path, path: &Path) -> process::Command {
        let mut command = process::Command::new(&self.config.git_command);
        command
            .current_dir(workdir_path)
            .args(["blame", "--incremental"]);
        if self.config.ignore_whitespace {
            command.arg("-w");
        }
        command.arg("--").arg(path);
        command
    }
}

impl BlameSpawner for GitBlameSpawner {
    fn spawn(
        &self,
        path: &Path,
        tx: mpsc::Sender<BlameEvent>,
    ) -> Result<Arc<dyn BlameProcess>, BlameError> {
        let git = GitTools::from_file_path(path)?;
        let path_in_workdir = git.path_in_workdir(path)?;
        debug!("git-blame: {path_in_workdir:?} in {:?}", git.workdir_path());
        let command = self.create_blame_command(git.workdir_path(), &path_in_workdir);
        let process = GitBlameProcess::spawn(command, tx)?;
        Ok(process)
    }
}

/// A child process writing `git blame --incremental` output,
/// and the thread parsing it into `BlameEvent`s.
#[derive(Debug)]
pub struct GitBlameProcess {
    child: Mutex<Option<process::Child>>,
    is_terminated: AtomicBool,
}

impl GitBlameProcess {
    /// Spawn the `command` and start reading its output.
    /// The output must be in the `git blame --incremental` format.
    pub fn spawn(
        mut command: process::Command,
        tx: mpsc::Sender<BlameEvent>,
    ) -> Result<Arc<Self>, BlameError> {
        let mut child = command
            .stdin(process::Stdio::null())
            .stdout(process::Stdio::piped())
            .stderr(process::Stdio::piped())
            .spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let process = Arc::new(Self {
            child: Mutex::new(Some(child)),
            is_terminated: AtomicBool::new(false),
        });

        let reader = process.clone();
        thread::spawn(move || {
            trace!("read thread start");
            let result = match stdout {
                Some(stdout) => reader.read_thread(stdout, stderr, &tx),
                None => Err(BlameError::StreamClosed),
            };
            if let Err(error) = &result {
                debug!("read thread: {error}");
            }
            // The receiver may have gone; nobody is waiting for the end then.
            let _ = tx.send(BlameEvent::End(result));
            trace!("read thread end");
        });
        Ok(process)
    }

    pub fn is_terminated(&self) -> bool {
        self.is_terminated.load(Ordering::Acquire)
    }

    fn read_thread(
        &self,
        stdout: process::ChildStdout,
        stderr: Option<process::ChildStderr>,
        tx: &mpsc::Sender<BlameEvent>,
    ) -> Result<(), BlameError> {
        let stderr_thread = stderr.map(|mut stderr| {
            thread::spawn(move || {
                let mut bytes = vec![];
                let _ = stderr.read_to_end(&mut bytes);
                String::from_utf8_lossy(&bytes).trim().to_string()
            })
        });

        let result = Self::read_stdout(stdout, tx);
        if result.is_err() {
            self.kill();
        }
        let status = self.wait()?;
        let stderr = stderr_thread
            .and_then(|thread| thread.join().ok())
            .unwrap_or_default();
        debug!("git-blame exited with: {status:?}");

        if self.is_terminated() {
            return Err(BlameError::Terminated);
        }
        result?;
        match status {
            Some(status) if !status.success() => Err(BlameError::Exit { status, stderr }),
            _ => Ok(()),
        }
    }

    fn read_stdout(
        stdout: process::ChildStdout,
        tx: &mpsc::Sender<BlameEvent>,
    ) -> Result<(), BlameError> {
        let mut reader = BufReader::new(stdout);
        let mut buffer = LineReadBuffer::new();
        let mut parser = IncrementalParser::new();
        let mut is_disconnected = false;
        while let Some(line) = buffer.read_line_from(&mut reader)? {
            parser.parse_line(&line, &mut |event| {
                if !is_disconnected && tx.send(event).is_err() {
                    is_disconnected = true;
                }
            })?;
            if is_disconnected {
                return Err(BlameError::StreamClosed);
            }
        }
        trace!("read_stdout: {} lines", buffer.line_count());
        parser.finish()
    }

    fn kill(&self) {
        if let Some(child) = self.child.lock().as_mut() {
            if let Err(error) = child.kill() {
                debug!("kill: {error}");
            }
        }
    }

    /// Wait for the child to exit.
    /// Returns `None` if it was already waited for.
    fn wait(&self) -> Result<Option<process::ExitStatus>, BlameError> {
        let child = self.child.lock().take();
        match child {
            Some(mut child) => Ok(Some(child.wait()?)),
            None => Ok(None),
        }
    }
}

impl BlameProcess for GitBlameProcess {
    fn terminate(&self) {
        if self.is_terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("terminate");
        self.kill();
    }
}

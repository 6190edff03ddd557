use std::{io, path::PathBuf, process::ExitStatus, sync::Arc, time::Duration};

#[derive(thiserror::Error, Debug, Clone)]
pub enum BlameError {
    #[error("Failed to run git blame: {0}")]
    Io(#[source] Arc<io::Error>),
    #[error("Not a git repository: {0}")]
    Repository(String),
    #[error("git blame exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },
    #[error("Invalid blame output at line {line_number}: {message}")]
    Parse { line_number: usize, message: String },
    #[error("The blame stream closed without an end marker")]
    StreamClosed,
    #[error("git blame was terminated")]
    Terminated,
    #[error("git blame did not finish in {0:?}")]
    Timeout(Duration),
    #[error("Failed to watch the file: {0}")]
    Watch(String),
    #[error("The blame cache entry for {0:?} is disposed")]
    Disposed(PathBuf),
}

impl BlameError {
    pub(crate) fn parse(line_number: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line_number,
            message: message.into(),
        }
    }
}

impl From<io::Error> for BlameError {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

impl From<git2::Error> for BlameError {
    fn from(error: git2::Error) -> Self {
        Self::Repository(error.message().to_string())
    }
}

impl From<notify::Error> for BlameError {
    fn from(error: notify::Error) -> Self {
        Self::Watch(error.to_string())
    }
}

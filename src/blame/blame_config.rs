use std::{ffi::OsString, time::Duration};

/// Options for running `git blame`.
#[derive(Clone, Debug)]
pub struct BlameConfig {
    /// The `git` executable.
    pub git_command: OsString,
    /// Pass `-w` to ignore whitespace changes.
    pub ignore_whitespace: bool,
    /// Terminate `git blame` if it doesn't finish in this duration.
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

impl BlameConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
}

impl Default for BlameConfig {
    fn default() -> Self {
        Self {
            git_command: "git".into(),
            ignore_whitespace: false,
            timeout: Some(Self::DEFAULT_TIMEOUT),
        }
    }
}

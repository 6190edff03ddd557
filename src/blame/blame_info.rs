use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
};

/// An author or a committer of a commit.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GitPerson {
    pub name: String,
    /// The email address without the surrounding `<>`.
    pub mail: String,
    pub time: Option<chrono::DateTime<chrono::FixedOffset>>,
}

/// The metadata of a commit reported by `git blame`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommitInfo {
    pub author: GitPerson,
    pub committer: GitPerson,
    pub summary: String,
    /// The file name in this commit, if it differs by renames.
    pub filename: PathBuf,
    /// The parent commit and the file name in it.
    pub previous: Option<(String, PathBuf)>,
    /// `true` if this commit is the boundary of the blame range.
    pub is_boundary: bool,
}

impl CommitInfo {
    /// The hash `git blame` uses for lines not committed yet.
    pub fn is_uncommitted_hash(hash: &str) -> bool {
        !hash.is_empty() && hash.bytes().all(|b| b == b'0')
    }
}

/// The line attribution of a file.
///
/// The blank `BlameInfo`, with no lines and no commits,
/// means no attribution is available; e.g., blaming the file failed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlameInfo {
    /// The commit hash for each 1-based line number.
    pub lines: BTreeMap<usize, String>,
    /// The commit metadata by the commit hash.
    pub commits: HashMap<String, CommitInfo>,
}

impl BlameInfo {
    pub fn blank() -> Self {
        Self::default()
    }

    pub fn is_blank(&self) -> bool {
        self.lines.is_empty() && self.commits.is_empty()
    }

    pub fn commit_for_line(&self, line_number: usize) -> Option<(&str, Option<&CommitInfo>)> {
        self.lines
            .get(&line_number)
            .map(|hash| (hash.as_str(), self.commits.get(hash)))
    }
}

use std::path::{Path, PathBuf};

use log::*;

use crate::blame::BlameError;

pub struct GitTools {
    workdir_path: PathBuf,
}

impl GitTools {
    /// Construct from the `Path` to a file in the repository.
    /// The `path` can be a path to a subdirectory inside the working directory
    /// of the repository.
    /// See <https://libgit2.org/docs/reference/main/repository/git_repository_open_ext.html>.
    pub fn from_file_path(path: &Path) -> Result<Self, BlameError> {
        let repository = git2::Repository::open_ext(
            path,
            git2::RepositoryOpenFlags::empty(),
            &[] as &[&std::ffi::OsStr],
        )?;
        Self::from_repository(&repository)
    }

    fn from_repository(repository: &git2::Repository) -> Result<Self, BlameError> {
        let workdir_path = repository
            .workdir()
            .ok_or_else(|| BlameError::Repository("The repository is bare".to_string()))?
            .canonicalize()?;
        debug!("GitTools: workdir {workdir_path:?}");
        Ok(Self { workdir_path })
    }

    /// Get the canonicalized root directory of the worktree.
    pub fn workdir_path(&self) -> &Path {
        &self.workdir_path
    }

    /// Get the path relative to the root of the worktree.
    pub fn path_in_workdir(&self, path: &Path) -> Result<PathBuf, BlameError> {
        let path = path.canonicalize()?;
        let path = path.strip_prefix(self.workdir_path()).map_err(|_| {
            BlameError::Repository(format!("{path:?} is not in {:?}", self.workdir_path()))
        })?;
        Ok(Self::to_posix_path(path))
    }

    #[cfg(target_os = "windows")]
    fn to_posix_path(path: &Path) -> PathBuf {
        assert!(path.is_relative());
        let path_str = path.to_string_lossy().replace('\\', "/");
        PathBuf::from(path_str)
    }

    #[cfg(not(target_os = "windows"))]
    fn to_posix_path(path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

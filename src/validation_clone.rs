//! The scoped bare clone a validation run operates against.

use tempfile::TempDir;

use crate::error::Error;
use crate::git::GitRepo;

/// A bare clone of the authentication repository, fetched into a fresh temporary directory for
/// the duration of one validation run.
///
/// Dropping a `ValidationClone` removes its backing directory unconditionally, including on
/// panics mid-validation — the original Python source required an explicit `cleanup()` call
/// after `_clone_validation_repo`, which left the directory behind on any early return; this
/// ties the lifetime to the Rust value instead so the guarantee always holds.
pub struct ValidationClone {
    _dir: TempDir,
    repo: GitRepo,
}

impl ValidationClone {
    /// Clone `url` into a new temporary directory and fetch every ref.
    pub fn new(url: &str) -> Result<Self, Error> {
        let dir = TempDir::new().map_err(|e| Error::from_io(&e, dir_hint()))?;
        let repo = GitRepo::clone_bare(url, dir.path())?;
        Ok(ValidationClone { _dir: dir, repo })
    }

    /// The underlying repository handle.
    pub fn repo(&self) -> &GitRepo {
        &self.repo
    }

    /// Fetch any new commits that have landed on the remote since the clone.
    pub fn refresh(&self) -> Result<(), Error> {
        self.repo.fetch()
    }
}

fn dir_hint() -> &'static std::path::Path {
    std::path::Path::new("<tempdir>")
}

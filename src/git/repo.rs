use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use git2::{build::RepoBuilder, FetchOptions, Repository};

use crate::error::Error;
use crate::git::CommitInfo;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// A thin synchronous wrapper over a `git2::Repository`, exposing exactly the operations the
/// rest of the crate needs. Network operations retry transient failures with linear backoff;
/// everything else is a single `git2` call.
pub struct GitRepo {
    path: PathBuf,
    repo: Repository,
}

impl GitRepo {
    /// Open an already-cloned repository at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let repo = Repository::open(&path)?;
        Ok(GitRepo { path, repo })
    }

    /// Clone `url` into `path` as a bare repository, retrying transient network errors.
    pub fn clone_bare(url: &str, path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let repo = with_retry(|| {
            let mut builder = RepoBuilder::new();
            builder.bare(true);
            builder.clone(url, &path)
        })?;
        Ok(GitRepo { path, repo })
    }

    /// Clone `url` into `path` as a regular (non-bare) repository with a working tree, so
    /// `checkout`/`reset_hard` have somewhere to write files. Used for the user-facing AR and
    /// non-bare target clones; the Validation Clone always uses [`GitRepo::clone_bare`] instead.
    pub fn clone_with_worktree(url: &str, path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let repo = with_retry(|| RepoBuilder::new().clone(url, &path))?;
        Ok(GitRepo { path, repo })
    }

    /// The on-disk location of this repository.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch all refs from `origin`, retrying transient network errors.
    pub fn fetch(&self) -> Result<(), Error> {
        let mut remote = self.repo.find_remote("origin")?;
        with_retry(|| {
            let mut opts = FetchOptions::new();
            remote.fetch(&["+refs/heads/*:refs/heads/*"], Some(&mut opts), None)
        })?;
        Ok(())
    }

    /// Resolve `reference` (a branch name, tag, or raw SHA) to a commit id.
    pub fn resolve(&self, reference: &str) -> Result<String, Error> {
        let obj = self
            .repo
            .revparse_single(reference)
            .map_err(|_| Error::InvalidCommit(reference.to_string()))?;
        let commit = obj
            .peel_to_commit()
            .map_err(|_| Error::InvalidCommit(reference.to_string()))?;
        Ok(commit.id().to_string())
    }

    /// List the commits reachable from `to` (inclusive) but not from `from` (exclusive),
    /// oldest-first, suitable for feeding `commit_iterator::commit_sequence`.
    pub fn commits_between(&self, from: Option<&str>, to: &str) -> Result<Vec<CommitInfo>, Error> {
        let to_oid = self
            .repo
            .revparse_single(to)
            .map_err(|_| Error::InvalidCommit(to.to_string()))?
            .id();

        let mut walk = self.repo.revwalk()?;
        walk.push(to_oid)?;
        walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE)?;
        if let Some(from) = from {
            let from_oid = self
                .repo
                .revparse_single(from)
                .map_err(|_| Error::InvalidCommit(from.to_string()))?
                .id();
            walk.hide(from_oid)?;
        }

        let mut commits = Vec::new();
        for oid in walk {
            let oid = oid?;
            let commit = self.repo.find_commit(oid)?;
            let committed_at = Utc
                .timestamp_opt(commit.committer().when().seconds(), 0)
                .single()
                .ok_or_else(|| Error::InvalidCommit(oid.to_string()))?;
            let parents = commit.parent_ids().map(|id| id.to_string()).collect();
            commits.push(CommitInfo {
                id: oid.to_string(),
                committed_at,
                parents,
            });
        }
        Ok(commits)
    }

    /// Read the full contents of `path` as it existed at `commit`.
    pub fn read_file(&self, commit: &str, path: &str) -> Result<Vec<u8>, Error> {
        let oid = self
            .repo
            .revparse_single(commit)
            .map_err(|_| Error::InvalidCommit(commit.to_string()))?
            .id();
        let commit = self.repo.find_commit(oid)?;
        let tree = commit.tree()?;
        let entry = tree
            .get_path(Path::new(path))
            .map_err(|_| Error::MissingTarget(path.to_string()))?;
        let blob = entry.to_object(&self.repo)?.peel_to_blob()?;
        Ok(blob.content().to_vec())
    }

    /// List every file path (relative to the repository root) present under `prefix` at
    /// `commit`.
    pub fn list_files(&self, commit: &str, prefix: &str) -> Result<Vec<String>, Error> {
        let oid = self
            .repo
            .revparse_single(commit)
            .map_err(|_| Error::InvalidCommit(commit.to_string()))?
            .id();
        let commit = self.repo.find_commit(oid)?;
        let tree = commit.tree()?;

        let subtree = match tree.get_path(Path::new(prefix)) {
            Ok(entry) => entry.to_object(&self.repo)?.peel_to_tree()?,
            Err(_) => return Ok(Vec::new()),
        };

        let mut files = Vec::new();
        subtree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(git2::ObjectType::Blob) {
                let name = entry.name().unwrap_or_default();
                files.push(format!("{}{}/{}", prefix, root.trim_end_matches('/'), name));
            }
            git2::TreeWalkResult::Ok
        })?;
        Ok(files)
    }

    /// The committer timestamp of `commit`.
    pub fn commit_date(&self, commit: &str) -> Result<chrono::DateTime<Utc>, Error> {
        let oid = self
            .repo
            .revparse_single(commit)
            .map_err(|_| Error::InvalidCommit(commit.to_string()))?
            .id();
        let commit = self.repo.find_commit(oid)?;
        Utc.timestamp_opt(commit.committer().when().seconds(), 0)
            .single()
            .ok_or_else(|| Error::InvalidCommit(oid.to_string()))
    }

    /// Hard-reset the working tree (if any) to `commit`. A no-op write-wise for bare
    /// repositories, used by non-bare target-repo clones.
    pub fn reset_hard(&self, commit: &str) -> Result<(), Error> {
        let obj = self
            .repo
            .revparse_single(commit)
            .map_err(|_| Error::InvalidCommit(commit.to_string()))?;
        self.repo
            .reset(&obj, git2::ResetType::Hard, None)
            .map_err(Error::from)
    }

    /// Check out `commit` into the working tree.
    pub fn checkout(&self, commit: &str) -> Result<(), Error> {
        let oid = self
            .repo
            .revparse_single(commit)
            .map_err(|_| Error::InvalidCommit(commit.to_string()))?
            .id();
        let commit_obj = self.repo.find_commit(oid)?;
        let tree = commit_obj.tree()?;
        self.repo
            .checkout_tree(tree.as_object(), Some(git2::build::CheckoutBuilder::new().force()))?;
        self.repo.set_head_detached(oid)?;
        Ok(())
    }

    /// Whether `ancestor` is an ancestor of (or equal to) `descendant`.
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, Error> {
        let a = self
            .repo
            .revparse_single(ancestor)
            .map_err(|_| Error::InvalidCommit(ancestor.to_string()))?
            .id();
        let d = self
            .repo
            .revparse_single(descendant)
            .map_err(|_| Error::InvalidCommit(descendant.to_string()))?
            .id();
        if a == d {
            return Ok(true);
        }
        Ok(self.repo.graph_descendant_of(d, a)?)
    }
}

fn with_retry<T>(mut op: impl FnMut() -> Result<T, git2::Error>) -> Result<T, Error> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < RETRY_ATTEMPTS && is_transient(&err) => {
                attempt += 1;
                let delay = RETRY_BASE_DELAY * attempt;
                log::warn!(
                    "transient git error on attempt {}/{}: {}; retrying in {:?}",
                    attempt,
                    RETRY_ATTEMPTS,
                    err,
                    delay
                );
                thread::sleep(delay);
            }
            Err(err) => return Err(Error::from(err)),
        }
    }
}

fn is_transient(err: &git2::Error) -> bool {
    use git2::ErrorClass;
    matches!(
        err.class(),
        ErrorClass::Net | ErrorClass::Ssh | ErrorClass::Http
    )
}

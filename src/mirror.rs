//! The git-backed metadata and target source for one pinned commit.
//!
//! This deliberately does not generalize to a list of mirrors the way the teacher's
//! `Repository<D>` trait does (see `tuf.rs`'s multi-mirror fetch loop): a git-backed
//! authentication repository has exactly one location per file at a given commit, so there is no
//! "try the next mirror on failure" dimension to model. `GitMirror` is the only implementation
//! and is expected to stay that way.

use crate::error::Error;
use crate::git::GitRepo;

/// Where C5 (the per-commit verifier) and C6 (the target updater) pull metadata and target
/// bytes from, for a single pinned authentication-repository commit.
pub trait MetadataSource {
    /// Fetch the raw bytes of `metadata/<role_name>.json` at this source's pinned commit.
    fn fetch(&self, role_name: &str) -> Result<Vec<u8>, Error>;

    /// Fetch the raw bytes of a target file at `path` (relative to `targets/`).
    fn fetch_target(&self, path: &str) -> Result<Vec<u8>, Error>;

    /// List every target path known at this commit, relative to `targets/`.
    fn list_targets(&self) -> Result<Vec<String>, Error>;

    /// The commit date this source is pinned to, as a Unix timestamp, used as the historical
    /// "now" for expiration checks (`spec.md` §4.5).
    fn earliest_valid_expiration(&self) -> i64;
}

/// A `MetadataSource` backed by one commit of a cloned authentication repository.
pub struct GitMirror<'repo> {
    repo: &'repo GitRepo,
    commit: String,
    commit_timestamp: i64,
}

impl<'repo> GitMirror<'repo> {
    /// Pin a mirror to `commit` of `repo`.
    pub fn new(repo: &'repo GitRepo, commit: impl Into<String>) -> Result<Self, Error> {
        let commit = commit.into();
        let commit_timestamp = repo.commit_date(&commit)?.timestamp();
        Ok(GitMirror {
            repo,
            commit,
            commit_timestamp,
        })
    }

    /// The commit this mirror is pinned to.
    pub fn commit(&self) -> &str {
        &self.commit
    }
}

impl<'repo> MetadataSource for GitMirror<'repo> {
    fn fetch(&self, role_name: &str) -> Result<Vec<u8>, Error> {
        let path = format!("metadata/{}.json", role_name);
        self.repo.read_file(&self.commit, &path)
    }

    fn fetch_target(&self, path: &str) -> Result<Vec<u8>, Error> {
        let full_path = format!("targets/{}", path);
        self.repo.read_file(&self.commit, &full_path)
    }

    fn list_targets(&self) -> Result<Vec<String>, Error> {
        let files = self.repo.list_files(&self.commit, "targets/")?;
        Ok(files
            .into_iter()
            .map(|f| f.trim_start_matches("targets/").to_string())
            .collect())
    }

    fn earliest_valid_expiration(&self) -> i64 {
        self.commit_timestamp
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn repo_with_metadata() -> (TempDir, String) {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        std::fs::create_dir_all(dir.path().join("metadata")).unwrap();
        std::fs::create_dir_all(dir.path().join("targets")).unwrap();
        std::fs::write(dir.path().join("metadata/root.json"), b"{\"version\":1}").unwrap();
        std::fs::write(dir.path().join("targets/repo-a"), b"sha").unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new("metadata/root.json")).unwrap();
        index.add_path(Path::new("targets/repo-a")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("t", "t@example.com").unwrap();
        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, "c", &tree, &[])
            .unwrap();
        (dir, oid.to_string())
    }

    #[test]
    fn fetches_metadata_and_targets_at_pinned_commit() {
        let (dir, commit) = repo_with_metadata();
        let git_repo = GitRepo::open(dir.path()).unwrap();
        let mirror = GitMirror::new(&git_repo, commit).unwrap();

        let root_bytes = mirror.fetch("root").unwrap();
        assert_eq!(root_bytes, b"{\"version\":1}");

        let target_bytes = mirror.fetch_target("repo-a").unwrap();
        assert_eq!(target_bytes, b"sha");

        let targets = mirror.list_targets().unwrap();
        assert_eq!(targets, vec!["repo-a".to_string()]);
    }
}

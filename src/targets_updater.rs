//! Target Repo Updater (C6): for a validated AR commit, advances every non-excluded target
//! repository up to the commit named for it, enforcing that the new commit is a descendant of
//! whatever was previously validated for that target.

use std::collections::HashMap;
use std::path::Path;

use rayon::prelude::*;

use crate::config::Config;
use crate::error::Error;
use crate::git::GitRepo;
use crate::manifest::Manifest;
use crate::target_entry::TargetEntry;

/// The outcome of advancing one target repository for one AR commit.
#[derive(Debug, Clone)]
pub struct TargetUpdateResult {
    /// The target repository's name (its `targets/<name>` file name).
    pub name: String,
    /// The commit it was advanced to.
    pub commit: String,
}

/// Fetch and verify every non-excluded target named at `targets`, in parallel across targets
/// (never across AR commits — this function validates the targets of exactly one already-
/// validated commit). `previous_commits` holds the commit each target was last validated at, if
/// any.
pub fn update_targets(
    config: &Config,
    manifest: &Manifest,
    targets: &HashMap<String, TargetEntry>,
    previous_commits: &HashMap<String, String>,
) -> Result<Vec<TargetUpdateResult>, Error> {
    let jobs: Vec<(&String, &TargetEntry)> = targets
        .iter()
        .filter(|(name, _)| !config.is_excluded(name))
        .collect();

    let results: Vec<Result<TargetUpdateResult, Error>> = jobs
        .into_par_iter()
        .map(|(name, entry)| {
            let repo_entry = manifest
                .get(name)
                .ok_or_else(|| Error::InconsistentManifest(format!("no manifest entry for {}", name)))?;
            update_one_target(
                config,
                name,
                repo_entry,
                entry,
                previous_commits.get(name).map(String::as_str),
            )
        })
        .collect();

    results.into_iter().collect()
}

fn update_one_target(
    config: &Config,
    name: &str,
    repo_entry: &crate::manifest::RepositoryEntry,
    target_entry: &TargetEntry,
    previous_commit: Option<&str>,
) -> Result<TargetUpdateResult, Error> {
    let dest = config.library_dir().join(name);
    let repo = open_or_clone(repo_entry, &dest, config.bare())?;

    repo.fetch()?;

    let resolved_commit = repo
        .resolve(&target_entry.commit)
        .map_err(|_| Error::MissingTarget(target_entry.commit.clone()))?;

    if let Some(branch) = &target_entry.branch {
        let branch_tip = repo
            .resolve(branch)
            .map_err(|_| Error::InvalidCommit(branch.clone()))?;
        if !repo.is_ancestor(&resolved_commit, &branch_tip)? {
            return Err(Error::InconsistentManifest(format!(
                "{} is not reachable from branch {} for target {}",
                resolved_commit, branch, name
            )));
        }
    }

    if let Some(previous) = previous_commit {
        if !repo.is_ancestor(previous, &resolved_commit)? {
            return Err(Error::TargetForcePush(
                name.to_string(),
                resolved_commit,
                previous.to_string(),
            ));
        }
    }

    Ok(TargetUpdateResult {
        name: name.to_string(),
        commit: resolved_commit,
    })
}

fn open_or_clone(
    repo_entry: &crate::manifest::RepositoryEntry,
    dest: &Path,
    bare: bool,
) -> Result<GitRepo, Error> {
    if dest.exists() {
        return GitRepo::open(dest);
    }

    let mut last_err = None;
    for url in &repo_entry.urls {
        match clone_into(url, dest, bare) {
            Ok(repo) => return Ok(repo),
            Err(err) => {
                log::warn!("clone of {} from {} failed: {}", dest.display(), url, err);
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| Error::IllegalArgument(format!("no urls for {}", dest.display()))))
}

fn clone_into(url: &str, dest: &Path, bare: bool) -> Result<GitRepo, Error> {
    // A bare clone has no working tree to check out into later, so `config.bare()` has to be
    // decided at clone time, not at the orchestrator's later checkout step.
    if bare {
        GitRepo::clone_bare(url, dest)
    } else {
        GitRepo::clone_with_worktree(url, dest)
    }
}

/// Whether `name` names a nested authentication repository, per `repositories.json`'s `custom`
/// block, for the orchestrator's dependency-recursion hook (C7).
pub fn is_dependency(manifest: &Manifest, name: &str) -> bool {
    manifest.get(name).map(|e| e.is_dependency()).unwrap_or(false)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::manifest::RepositoryEntry;
    use std::collections::HashMap as Map;
    use tempfile::TempDir;

    fn make_bare_with_commit(dir: &Path) -> String {
        let repo = git2::Repository::init_bare(dir).unwrap();
        let sig = git2::Signature::now("t", "t@example.com").unwrap();
        let tree_id = {
            let mut index = git2::Index::new().unwrap();
            let blob = repo.blob(b"hello").unwrap();
            index
                .add(&git2::IndexEntry {
                    ctime: git2::IndexTime::new(0, 0),
                    mtime: git2::IndexTime::new(0, 0),
                    dev: 0,
                    ino: 0,
                    mode: 0o100644,
                    uid: 0,
                    gid: 0,
                    file_size: 5,
                    id: blob,
                    flags: 0,
                    flags_extended: 0,
                    path: b"a.txt".to_vec(),
                })
                .unwrap();
            index.write_tree_to(&repo).unwrap()
        };
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("refs/heads/main"), &sig, &sig, "c", &tree, &[])
            .unwrap()
            .to_string()
    }

    #[test]
    fn is_dependency_reads_custom_flag() {
        let mut repos = Map::new();
        repos.insert(
            "nested".to_string(),
            RepositoryEntry {
                urls: vec!["https://example.com/nested.git".into()],
                custom: Some(serde_json::json!({ "dependency": true })),
            },
        );
        let manifest_json = serde_json::to_vec(&serde_json::json!({ "repositories": repos })).unwrap();
        let manifest = Manifest::from_bytes(&manifest_json).unwrap();
        assert!(is_dependency(&manifest, "nested"));
        assert!(!is_dependency(&manifest, "missing"));
    }

    #[test]
    fn clone_into_creates_bare_repo_with_commit() {
        let src = TempDir::new().unwrap();
        let commit = make_bare_with_commit(src.path());
        let dest = TempDir::new().unwrap();
        let dest_path = dest.path().join("clone");

        let repo = clone_into(src.path().to_str().unwrap(), &dest_path, true).unwrap();
        let resolved = repo.resolve(&commit).unwrap();
        assert_eq!(resolved, commit);
    }
}

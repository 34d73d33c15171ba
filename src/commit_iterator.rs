//! Builds the eager commit sequence a validation run walks, and rejects the user's authentication
//! repository being relocated out from under it (the non-fast-forward "force push" case) before
//! any metadata validation begins.

use crate::error::Error;
use crate::git::GitRepo;

/// One commit in the sequence to be validated, carrying just enough identity to drive C5 and to
/// check the parent-child chain invariant eagerly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSeq {
    /// This commit's id.
    pub sha: String,
    /// The immediately preceding commit in this sequence, or `None` for the first entry (the
    /// previously trusted tip, or the root commit on an initial clone).
    pub parent: Option<String>,
    /// This commit's position in the sequence, starting at 0.
    pub index: usize,
}

/// Build the ordered commit sequence from `previous_tip` (inclusive, as the run's trust anchor,
/// or `None` for a fresh clone) to `new_tip` (inclusive).
///
/// If `previous_tip` is given and is not an ancestor of `new_tip`, the remote's history has been
/// rewritten out from under the locally trusted commit: this is a force push on the
/// authentication repository itself, and is rejected unless `force` is set (in which case the
/// single-commit sequence `[new_tip]` is returned, discarding all history between the two tips).
///
/// When there is no force push and `previous_tip` names a real commit, it is prepended as the
/// sequence's first element so the caller re-validates it before anything new: `spec.md` §4.5
/// step 1 starts "from trusted root at `c_{i-1}`", so the first genuinely new commit must be
/// checked for continuity (key-set and version monotonicity) against `previous_tip`'s own
/// metadata, not accepted as if it were a first clone. If there is nothing new past
/// `previous_tip`, an empty sequence is returned instead (the idempotent no-op case), so the
/// anchor is never re-validated on its own.
///
/// `no_upstream` skips the ancestry check (and so can never raise `ForcePushDetected`): it is
/// `spec.md` §6's escape hatch for a caller that already knows `previous_tip` may not be an
/// ancestor of `new_tip` and wants the walk to proceed anyway.
pub fn commit_sequence(
    repo: &GitRepo,
    previous_tip: Option<&str>,
    new_tip: &str,
    force: bool,
    no_upstream: bool,
) -> Result<Vec<CommitSeq>, Error> {
    if !no_upstream {
        if let Some(previous) = previous_tip {
            if !repo.is_ancestor(previous, new_tip)? {
                if !force {
                    return Err(Error::ForcePushDetected(new_tip.to_string()));
                }
                log::warn!(
                    "force push detected on authentication repository at {}; discarding history back to {}",
                    new_tip,
                    previous
                );
                return Ok(vec![CommitSeq {
                    sha: new_tip.to_string(),
                    parent: None,
                    index: 0,
                }]);
            }
        }
    }

    let commits = repo.commits_between(previous_tip, new_tip)?;
    if commits.is_empty() {
        return Ok(Vec::new());
    }

    let mut sequence = Vec::with_capacity(commits.len() + 1);
    if let Some(previous) = previous_tip {
        sequence.push(CommitSeq {
            sha: previous.to_string(),
            parent: None,
            index: 0,
        });
    }

    let mut expected_parent: Option<String> = previous_tip.map(|s| s.to_string());
    for commit in commits {
        if let Some(expected) = &expected_parent {
            if !commit.parents.iter().any(|p| p == expected) {
                return Err(Error::Programming(format!(
                    "commit {} does not chain from {}",
                    commit.id, expected
                )));
            }
        }
        expected_parent = Some(commit.id.clone());
        let index = sequence.len();
        sequence.push(CommitSeq {
            sha: commit.id,
            parent: sequence.last().map(|c: &CommitSeq| c.sha.clone()),
            index,
        });
    }

    Ok(sequence)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn commit(repo: &git2::Repository, file: &str, contents: &str) -> git2::Oid {
        std::fs::write(repo.path().parent().unwrap().join(file), contents).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(file)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let parents: Vec<git2::Commit> = match repo.head() {
            Ok(head) => vec![head.peel_to_commit().unwrap()],
            Err(_) => vec![],
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, "c", &tree, &parent_refs)
            .unwrap()
    }

    #[test]
    fn builds_chain_from_scratch() {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        let c1 = commit(&repo, "a.txt", "1");
        let c2 = commit(&repo, "a.txt", "2");
        drop(repo);

        let git_repo = GitRepo::open(dir.path()).unwrap();
        let seq = commit_sequence(&git_repo, None, &c2.to_string(), false, false).unwrap();

        assert_eq!(seq.len(), 2);
        assert_eq!(seq[0].sha, c1.to_string());
        assert_eq!(seq[1].sha, c2.to_string());
        assert_eq!(seq[1].parent.as_deref(), Some(c1.to_string().as_str()));
    }

    #[test]
    fn prepends_previous_tip_as_anchor_for_an_update() {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        let c1 = commit(&repo, "a.txt", "1");
        let c2 = commit(&repo, "a.txt", "2");
        drop(repo);

        let git_repo = GitRepo::open(dir.path()).unwrap();
        let seq = commit_sequence(&git_repo, Some(&c1.to_string()), &c2.to_string(), false, false).unwrap();

        assert_eq!(seq.len(), 2);
        assert_eq!(seq[0].sha, c1.to_string());
        assert_eq!(seq[0].parent, None);
        assert_eq!(seq[1].sha, c2.to_string());
        assert_eq!(seq[1].parent.as_deref(), Some(c1.to_string().as_str()));
    }

    #[test]
    fn returns_empty_sequence_when_nothing_new_past_previous_tip() {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        let c1 = commit(&repo, "a.txt", "1");
        drop(repo);

        let git_repo = GitRepo::open(dir.path()).unwrap();
        let seq = commit_sequence(&git_repo, Some(&c1.to_string()), &c1.to_string(), false, false).unwrap();

        assert!(seq.is_empty());
    }

    #[test]
    fn rejects_non_fast_forward_without_force() {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        let c1 = commit(&repo, "a.txt", "1");
        drop(repo);

        let git_repo = GitRepo::open(dir.path()).unwrap();
        let err = commit_sequence(&git_repo, Some("deadbeefdeadbeefdeadbeefdeadbeefdeadbeef"), &c1.to_string(), false, false);
        assert!(err.is_err());
    }

    #[test]
    fn no_upstream_bypasses_the_ancestry_check() {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        let c0 = commit(&repo, "a.txt", "0");
        let c1 = commit(&repo, "a.txt", "1");
        repo.set_head_detached(c0).unwrap();
        let c2 = commit(&repo, "a.txt", "2");
        drop(repo);

        let git_repo = GitRepo::open(dir.path()).unwrap();

        let without = commit_sequence(&git_repo, Some(&c1.to_string()), &c2.to_string(), false, false);
        assert!(matches!(without, Err(Error::ForcePushDetected(_))));

        let with = commit_sequence(&git_repo, Some(&c1.to_string()), &c2.to_string(), false, true);
        assert!(!matches!(with, Err(Error::ForcePushDetected(_))));
    }
}

//! Synchronous Git plumbing.
//!
//! The authentication repository is only ever transported as a git repository, so there is no
//! mirror-fetch abstraction to thread an executor through: every operation here blocks, the way
//! `git2` itself blocks.

mod repo;

pub use repo::GitRepo;

use chrono::{DateTime, Utc};

/// A commit SHA, rendered as its lowercase hex string. Kept as an owned `String` rather than
/// `git2::Oid` so the rest of the crate doesn't need a `git2` dependency in its public API.
pub type CommitId = String;

/// A commit together with the data the verifier and commit iterator need about it, independent
/// of any particular `git2::Repository` handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// This commit's id.
    pub id: CommitId,
    /// The commit's committer timestamp, used for the historical expiration check (`spec.md`
    /// §4.5) rather than wall-clock time.
    pub committed_at: DateTime<Utc>,
    /// This commit's parents, oldest-repository-history first is not implied; order matches
    /// `git2`'s.
    pub parents: Vec<CommitId>,
}

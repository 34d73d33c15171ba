//! In-memory trusted state the per-commit verifier carries forward from one commit to the next.
//!
//! This is the generalization of the teacher's bare `Tuf<D>` struct (`tuf.rs`'s `trusted_root` /
//! `trusted_snapshot` / `trusted_targets` / `trusted_timestamp` / `trusted_delegations` fields):
//! same shape, plus the `previous_expiration_seen` map the teacher doesn't need because it only
//! ever compares expiration against wall-clock now.

use std::collections::HashMap;

use crate::metadata::{RootMetadata, SnapshotMetadata, TargetsMetadata, TimestampMetadata};

/// Everything learned so far while walking an authentication repository's commit history,
/// carried from commit `c_i` into the verification of commit `c_{i+1}`.
#[derive(Debug, Clone, Default)]
pub struct RoleTrustState {
    /// The most recently verified root metadata.
    pub root: Option<RootMetadata>,
    /// The most recently verified timestamp metadata.
    pub timestamp: Option<TimestampMetadata>,
    /// The most recently verified snapshot metadata.
    pub snapshot: Option<SnapshotMetadata>,
    /// The most recently verified top-level targets metadata.
    pub targets: Option<TargetsMetadata>,
    /// The most recently verified metadata for each delegated role, keyed by role name.
    pub delegations: HashMap<String, TargetsMetadata>,
    /// The latest expiration timestamp (Unix seconds) ever observed for each role, across every
    /// commit validated so far. A role's metadata at commit `c_i` must expire no earlier than
    /// `max(commit_date(c_i), previous_expiration_seen[role])` — not just "not expired as of
    /// `c_i`" — so that a compromised signer cannot roll a role's expiration date backward while
    /// leaving its version number untouched. Keyed by role name (`"root"`, `"snapshot"`,
    /// `"timestamp"`, `"targets"`, or a delegated role's name).
    pub previous_expiration_seen: HashMap<String, i64>,
}

impl RoleTrustState {
    /// A fresh trust state, as when cloning an authentication repository for the first time.
    pub fn new() -> Self {
        RoleTrustState::default()
    }

    /// Record the expiration seen for `role` at this commit, enforcing that it only moves
    /// forward. Returns the floor the next commit's expiration for this role must clear.
    pub fn record_expiration(&mut self, role: &str, commit_timestamp: i64, expires: i64) -> i64 {
        let floor = self
            .previous_expiration_seen
            .get(role)
            .copied()
            .unwrap_or(0)
            .max(commit_timestamp);
        let new_floor = floor.max(expires);
        self.previous_expiration_seen
            .insert(role.to_string(), new_floor);
        floor
    }
}

//! Shared fixture builders for the integration tests: a signed authentication repository is just
//! a sequence of git commits, so these helpers build one directly with `git2` rather than
//! standing up a server, mirroring the teacher's `init_server`/`init_client` split (formerly in
//! `tests/simple_example.rs`) but against this crate's git-backed commit history instead of an
//! in-memory `EphemeralRepository`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;

use authrepo::metadata::{
    Delegation, Delegations, MetadataDescription, MetadataPath, Metadata, RoleDefinition,
    RootMetadata, SignedMetadata, SnapshotMetadata, TargetDescription, TargetPath, TargetsMetadata,
    TimestampMetadata,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use tempfile::TempDir;

pub struct Key {
    pub public: authrepo::crypto::PublicKey,
    keypair: Ed25519KeyPair,
}

impl Key {
    pub fn generate() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let keypair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let public = authrepo::crypto::PublicKey::new(
            authrepo::crypto::KeyType::Ed25519,
            keypair.public_key().as_ref().to_vec(),
        );
        Key { public, keypair }
    }

    fn sign_bytes(&self, bytes: &[u8]) -> authrepo::crypto::Signature {
        authrepo::crypto::Signature::new(
            self.public.key_id().clone(),
            self.keypair.sign(bytes).as_ref().to_vec(),
        )
    }
}

/// Sign `metadata` with every key in `keys`, and return the serialized `metadata/<role>.json`
/// body ready to be written into a commit.
pub fn sign<M: Metadata>(metadata: M, keys: &[&Key]) -> Vec<u8> {
    let canonical = serde_json::to_vec(&metadata).unwrap();
    let signatures = keys.iter().map(|k| k.sign_bytes(&canonical)).collect();
    serde_json::to_vec(&SignedMetadata::new(metadata, signatures)).unwrap()
}

pub fn role_def(threshold: u32, keys: &[&Key]) -> RoleDefinition {
    let ids = keys.iter().map(|k| k.public.key_id().clone()).collect();
    RoleDefinition::new(threshold, ids).unwrap()
}

pub fn root_metadata(
    version: u32,
    expires: DateTime<Utc>,
    key_pool: &[&Key],
    root: RoleDefinition,
    snapshot: RoleDefinition,
    targets: RoleDefinition,
    timestamp: RoleDefinition,
) -> RootMetadata {
    let keys = key_pool
        .iter()
        .map(|k| (k.public.key_id().clone(), k.public.clone()))
        .collect::<HashMap<_, _>>();
    RootMetadata::new(version, expires, false, keys, root, snapshot, targets, timestamp)
}

pub fn snapshot_metadata(
    version: u32,
    expires: DateTime<Utc>,
    targets_version: u32,
) -> SnapshotMetadata {
    let mut meta = HashMap::new();
    meta.insert(
        MetadataPath::new("targets").unwrap(),
        MetadataDescription::new(targets_version),
    );
    SnapshotMetadata::new(version, expires, meta)
}

pub fn timestamp_metadata(version: u32, expires: DateTime<Utc>, snapshot_version: u32) -> TimestampMetadata {
    TimestampMetadata::new(version, expires, MetadataDescription::new(snapshot_version))
}

pub fn targets_metadata(
    version: u32,
    expires: DateTime<Utc>,
    targets: HashMap<TargetPath, TargetDescription>,
    delegations: Option<Delegations>,
) -> TargetsMetadata {
    TargetsMetadata::new(version, expires, targets, delegations)
}

pub fn plain_target(contents: &[u8]) -> TargetDescription {
    TargetDescription::new(contents.len() as u64, HashMap::new(), None)
}

pub fn delegation(name: &str, threshold: u32, keys: &[&Key], paths: Vec<String>, terminating: bool) -> Delegation {
    let ids = keys.iter().map(|k| k.public.key_id().clone()).collect();
    Delegation::new(name, threshold, ids, paths, terminating)
}

pub fn far_future() -> DateTime<Utc> {
    Utc::now() + Duration::days(3650)
}

/// An authentication repository under construction: a bare git repo that one commit at a time
/// receives a fresh `metadata/*.json` set plus whatever `targets/*` files the test wants.
pub struct AuthRepoBuilder {
    _dir: TempDir,
    repo: git2::Repository,
    parent: Option<git2::Oid>,
    seq: i64,
}

impl AuthRepoBuilder {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        AuthRepoBuilder {
            _dir: dir,
            repo,
            parent: None,
            seq: 1_700_000_000,
        }
    }

    pub fn path(&self) -> &Path {
        self.repo.path().parent().unwrap()
    }

    pub fn url(&self) -> String {
        self.path().to_str().unwrap().to_string()
    }

    /// Commit one AR revision. `files` is a list of `(path relative to the worktree root, bytes)`
    /// pairs; every previous file stays, matching git's usual "commit is a full tree" semantics.
    /// Each commit lands one hour after the last unless `at` overrides the timestamp.
    pub fn commit(&mut self, files: &[(&str, &[u8])]) -> String {
        self.seq += 3600;
        self.commit_at(files, self.seq)
    }

    pub fn commit_at(&mut self, files: &[(&str, &[u8])], unix_time: i64) -> String {
        for (path, bytes) in files {
            let full = self.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, bytes).unwrap();
        }

        let mut index = self.repo.index().unwrap();
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = self.repo.find_tree(tree_id).unwrap();

        let when = git2::Time::new(unix_time, 0);
        let sig = git2::Signature::new("fixture", "fixture@example.com", &when).unwrap();

        let parent_commit = self.parent.map(|oid| self.repo.find_commit(oid).unwrap());
        let parents: Vec<&git2::Commit> = parent_commit.iter().collect();

        let oid = self
            .repo
            .commit(Some("refs/heads/main"), &sig, &sig, "commit", &tree, &parents)
            .unwrap();
        self.repo.set_head("refs/heads/main").unwrap();
        self.parent = Some(oid);
        oid.to_string()
    }

    /// Force-update `main` to a brand-new, parentless commit, simulating a rewritten remote
    /// history (a force push) out from under any clone that trusted the previous tip.
    pub fn force_push_orphan(&mut self, files: &[(&str, &[u8])]) -> String {
        for (path, bytes) in files {
            let full = self.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, bytes).unwrap();
        }

        let mut index = self.repo.index().unwrap();
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = self.repo.find_tree(tree_id).unwrap();

        self.seq += 3600;
        let when = git2::Time::new(self.seq, 0);
        let sig = git2::Signature::new("fixture", "fixture@example.com", &when).unwrap();

        let oid = self
            .repo
            .commit(None, &sig, &sig, "force pushed root", &tree, &[])
            .unwrap();
        self.repo
            .reference("refs/heads/main", oid, true, "force push")
            .unwrap();
        self.repo.set_head("refs/heads/main").unwrap();
        self.parent = Some(oid);
        oid.to_string()
    }

    pub fn commit_date(&self, sha: &str) -> DateTime<Utc> {
        let oid = git2::Oid::from_str(sha).unwrap();
        let commit = self.repo.find_commit(oid).unwrap();
        Utc.timestamp_opt(commit.committer().when().seconds(), 0).single().unwrap()
    }
}

/// A plain (non-TUF) git repository standing in for a target repository, with a handful of
/// linear commits on `main` that tests can reference by index.
pub struct TargetRepoBuilder {
    _dir: TempDir,
    repo: git2::Repository,
    parent: Option<git2::Oid>,
    pub commits: Vec<String>,
}

impl TargetRepoBuilder {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init_bare(dir.path()).unwrap();
        repo.set_head("refs/heads/main").unwrap();
        TargetRepoBuilder {
            _dir: dir,
            repo,
            parent: None,
            commits: Vec::new(),
        }
    }

    pub fn url(&self) -> String {
        self.repo.path().to_str().unwrap().to_string()
    }

    pub fn commit(&mut self, contents: &str) -> String {
        let blob = self.repo.blob(contents.as_bytes()).unwrap();
        let mut builder = self.repo.treebuilder(None).unwrap();
        builder.insert("README.md", blob, 0o100644).unwrap();
        let tree_id = builder.write().unwrap();
        let tree = self.repo.find_tree(tree_id).unwrap();

        let sig = git2::Signature::now("fixture", "fixture@example.com").unwrap();
        let parent_commit = self.parent.map(|oid| self.repo.find_commit(oid).unwrap());
        let parents: Vec<&git2::Commit> = parent_commit.iter().collect();

        let oid = self
            .repo
            .commit(Some("refs/heads/main"), &sig, &sig, "commit", &tree, &parents)
            .unwrap();
        self.parent = Some(oid);
        let sha = oid.to_string();
        self.commits.push(sha.clone());
        sha
    }
}

pub fn manifest_json(repos: &[(&str, &str)]) -> Vec<u8> {
    let mut map = serde_json::Map::new();
    for (name, url) in repos {
        map.insert(
            (*name).to_string(),
            serde_json::json!({ "urls": [url] }),
        );
    }
    serde_json::to_vec(&serde_json::json!({ "repositories": map })).unwrap()
}

pub fn target_entry_json(commit: &str, branch: Option<&str>) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "commit": commit, "branch": branch })).unwrap()
}

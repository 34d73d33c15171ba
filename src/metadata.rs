//! The TUF role-metadata data model: the tagged `Role` variants, the per-role metadata bodies,
//! and the signed envelope that wraps them.
//!
//! Unlike the upstream `tuf` crate this is descended from, there is no `DataInterchange`
//! generic: every authentication repository speaks canonical JSON (`spec.md`'s AR content
//! contract names `.json` files explicitly), so `SignedMetadata` hardcodes `serde_json` instead
//! of threading a type parameter through every call site for a choice that is never actually
//! made differently.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::crypto::{KeyId, PublicKey, Signature};
use crate::error::Error;

/// A TUF role. Delegated roles are named variants rather than a fixed enum of the four
/// top-level roles, per the re-architecture the Design Notes call for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    /// The root role: the trust anchor, naming the key sets for every other role.
    Root,
    /// The snapshot role: pins the versions of `targets.json` and any delegated targets files.
    Snapshot,
    /// The top-level targets role.
    Targets,
    /// The timestamp role: the frequently-resigned pointer to the current snapshot.
    Timestamp,
    /// A delegated targets role, named by its path under `metadata/`.
    Delegated(String),
}

impl Role {
    /// The name this role is addressed by (the `metadata/<name>.json` filename, minus the
    /// extension).
    pub fn name(&self) -> &str {
        match self {
            Role::Root => "root",
            Role::Snapshot => "snapshot",
            Role::Targets => "targets",
            Role::Timestamp => "timestamp",
            Role::Delegated(name) => name,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The identifier under which a role's metadata is stored, e.g. `"root"` or the name of a
/// delegated role. Distinct from `Role` itself so that snapshot/delegation bookkeeping doesn't
/// need to invent a `Role` variant just to use it as a map key before the role's own metadata
/// has been fetched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetadataPath(String);

impl MetadataPath {
    /// Construct a path from a role name.
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::IllegalArgument("empty metadata path".into()));
        }
        Ok(MetadataPath(name))
    }

    /// The path for one of the four top-level roles.
    pub fn from_role(role: &Role) -> Self {
        MetadataPath(role.name().to_string())
    }

    /// The string form of this path.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetadataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Common operations every role's metadata body supports.
pub trait Metadata: fmt::Debug + PartialEq + Serialize + DeserializeOwned {
    /// The role name this metadata belongs to ("root", "snapshot", "timestamp", "targets").
    /// Delegated roles share `TargetsMetadata`'s shape, so this is only meaningful for the four
    /// fixed roles; callers that need the delegated role's name track it alongside the metadata
    /// (see [`crate::trust::RoleTrustState`]).
    const ROLE_NAME: &'static str;

    /// This metadata's version number. Must be monotonically non-decreasing across commits for
    /// the same role, per `spec.md` §4.5.
    fn version(&self) -> u32;

    /// This metadata's stated expiration time.
    fn expires(&self) -> &DateTime<Utc>;
}

fn canonicalize<M: Serialize>(metadata: &M) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(metadata).map_err(Error::from)
}

/// A metadata body together with the signatures over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedMetadata<M> {
    signatures: Vec<Signature>,
    #[serde(rename = "signed")]
    metadata: M,
}

impl<M> SignedMetadata<M>
where
    M: Metadata,
{
    /// Wrap already-signed metadata (as read from an AR commit) in its envelope.
    pub fn new(metadata: M, signatures: Vec<Signature>) -> Self {
        SignedMetadata {
            signatures,
            metadata,
        }
    }

    /// Parse a `metadata/<role>.json` body into its signed envelope, without verifying anything
    /// yet.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes).map_err(Error::from)
    }

    /// The wrapped metadata, without regard to whether it has been verified.
    pub fn unverified(&self) -> &M {
        &self.metadata
    }

    /// The attached signatures.
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Verify that at least `threshold` of `authorized_keys` produced valid signatures over this
    /// metadata's canonical body.
    pub fn verify<'a, I>(&self, threshold: u32, authorized_keys: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = &'a PublicKey>,
    {
        if threshold < 1 {
            return Err(Error::IllegalArgument(
                "threshold must be strictly greater than zero".into(),
            ));
        }

        let authorized_keys: HashMap<&KeyId, &PublicKey> = authorized_keys
            .into_iter()
            .map(|k| (k.key_id(), k))
            .collect();

        let canonical_bytes = canonicalize(&self.metadata)?;

        let mut seen = HashSet::new();
        let mut valid = 0u32;
        for sig in &self.signatures {
            if !seen.insert(sig.key_id().clone()) {
                continue;
            }
            if let Some(public_key) = authorized_keys.get(sig.key_id()) {
                match public_key.verify(&canonical_bytes, sig) {
                    Ok(()) => valid += 1,
                    Err(_) => log::warn!("bad signature from key id {}", sig.key_id()),
                }
            }
            if valid >= threshold {
                return Ok(());
            }
        }

        Err(Error::ThresholdUnmet(role_of::<M>(), threshold, valid))
    }
}

impl<M> AsRef<M> for SignedMetadata<M> {
    fn as_ref(&self) -> &M {
        &self.metadata
    }
}

/// Best-effort `Role` for an error message; delegated roles show up as `Role::Targets` here
/// since `Metadata` doesn't carry the delegated name. Callers that need the precise delegated
/// name attach it themselves via `Error::for_role`.
fn role_of<M: Metadata>() -> Role {
    match M::ROLE_NAME {
        "root" => Role::Root,
        "snapshot" => Role::Snapshot,
        "timestamp" => Role::Timestamp,
        _ => Role::Targets,
    }
}

/// One role's key threshold and authorized key set, as declared in `root.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDefinition {
    threshold: u32,
    #[serde(rename = "keyids")]
    key_ids: HashSet<KeyId>,
}

impl RoleDefinition {
    /// Construct a new role definition.
    pub fn new(threshold: u32, key_ids: HashSet<KeyId>) -> Result<Self, Error> {
        if threshold < 1 {
            return Err(Error::IllegalArgument(
                "role threshold must be at least 1".into(),
            ));
        }
        if (key_ids.len() as u32) < threshold {
            return Err(Error::IllegalArgument(format!(
                "role has {} keys but a threshold of {}",
                key_ids.len(),
                threshold
            )));
        }
        Ok(RoleDefinition { threshold, key_ids })
    }

    /// The signature threshold for this role.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// The set of key ids authorized to sign for this role.
    pub fn key_ids(&self) -> &HashSet<KeyId> {
        &self.key_ids
    }
}

/// The root role's metadata: the trust anchor for every other role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootMetadata {
    version: u32,
    expires: DateTime<Utc>,
    #[serde(default)]
    consistent_snapshot: bool,
    keys: HashMap<KeyId, PublicKey>,
    roles: HashMap<String, RoleDefinition>,
}

impl RootMetadata {
    /// Construct a new `RootMetadata`.
    pub fn new(
        version: u32,
        expires: DateTime<Utc>,
        consistent_snapshot: bool,
        keys: HashMap<KeyId, PublicKey>,
        root: RoleDefinition,
        snapshot: RoleDefinition,
        targets: RoleDefinition,
        timestamp: RoleDefinition,
    ) -> Self {
        let mut roles = HashMap::new();
        roles.insert("root".to_string(), root);
        roles.insert("snapshot".to_string(), snapshot);
        roles.insert("targets".to_string(), targets);
        roles.insert("timestamp".to_string(), timestamp);
        RootMetadata {
            version,
            expires,
            consistent_snapshot,
            keys,
            roles,
        }
    }

    /// The role definition for a fixed top-level role.
    pub fn role_definition(&self, role: &Role) -> Option<&RoleDefinition> {
        self.roles.get(role.name())
    }

    /// The public key material known to root, by key id.
    pub fn keys(&self) -> &HashMap<KeyId, PublicKey> {
        &self.keys
    }

    /// Resolve the public keys authorized for a role.
    pub fn authorized_keys(&self, role: &Role) -> Vec<&PublicKey> {
        match self.role_definition(role) {
            Some(def) => def
                .key_ids()
                .iter()
                .filter_map(|id| self.keys.get(id))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Whether consistent-snapshot addressing is in effect for this repository.
    pub fn consistent_snapshot(&self) -> bool {
        self.consistent_snapshot
    }
}

impl Metadata for RootMetadata {
    const ROLE_NAME: &'static str = "root";

    fn version(&self) -> u32 {
        self.version
    }

    fn expires(&self) -> &DateTime<Utc> {
        &self.expires
    }
}

/// A reference to another role's metadata, as recorded in `snapshot.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDescription {
    version: u32,
}

impl MetadataDescription {
    /// Construct a new description.
    pub fn new(version: u32) -> Self {
        MetadataDescription { version }
    }

    /// The version recorded for the described role.
    pub fn version(&self) -> u32 {
        self.version
    }
}

/// The snapshot role's metadata: pins the version of every targets role (top-level and
/// delegated) at this commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    version: u32,
    expires: DateTime<Utc>,
    meta: HashMap<MetadataPath, MetadataDescription>,
}

impl SnapshotMetadata {
    /// Construct new snapshot metadata.
    pub fn new(
        version: u32,
        expires: DateTime<Utc>,
        meta: HashMap<MetadataPath, MetadataDescription>,
    ) -> Self {
        SnapshotMetadata {
            version,
            expires,
            meta,
        }
    }

    /// The recorded version/role map.
    pub fn meta(&self) -> &HashMap<MetadataPath, MetadataDescription> {
        &self.meta
    }
}

impl Metadata for SnapshotMetadata {
    const ROLE_NAME: &'static str = "snapshot";

    fn version(&self) -> u32 {
        self.version
    }

    fn expires(&self) -> &DateTime<Utc> {
        &self.expires
    }
}

/// The timestamp role's metadata: the frequently-resigned pointer to the current snapshot
/// version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampMetadata {
    version: u32,
    expires: DateTime<Utc>,
    snapshot: MetadataDescription,
}

impl TimestampMetadata {
    /// Construct new timestamp metadata.
    pub fn new(version: u32, expires: DateTime<Utc>, snapshot: MetadataDescription) -> Self {
        TimestampMetadata {
            version,
            expires,
            snapshot,
        }
    }

    /// The snapshot version this timestamp points at.
    pub fn snapshot(&self) -> &MetadataDescription {
        &self.snapshot
    }
}

impl Metadata for TimestampMetadata {
    const ROLE_NAME: &'static str = "timestamp";

    fn version(&self) -> u32 {
        self.version
    }

    fn expires(&self) -> &DateTime<Utc> {
        &self.expires
    }
}

/// The path of a target file, relative to `targets/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetPath(String);

impl TargetPath {
    /// Construct a new target path.
    pub fn new(path: impl Into<String>) -> Result<Self, Error> {
        let path = path.into();
        if path.is_empty() {
            return Err(Error::IllegalArgument("empty target path".into()));
        }
        Ok(TargetPath(path))
    }

    /// The string form of this path.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `path` falls within a delegation with a declared path prefix of `self`, using
    /// TUF's `/`-segment semantics (a delegation for `"a/b"` covers `"a/b/c"` but not `"a/bc"`).
    pub fn is_parent_of(&self, path: &TargetPath) -> bool {
        if self.0 == "*" {
            return true;
        }
        path.0 == self.0
            || path
                .0
                .strip_prefix(&self.0)
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The hashes and length of a target file, as recorded in the owning targets metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDescription {
    length: u64,
    hashes: HashMap<String, String>,
    /// Arbitrary consumer-defined data; for authentication repositories this is where the
    /// commit SHA and branch name live (`spec.md` §3's Target Entry).
    #[serde(default)]
    custom: Option<serde_json::Value>,
}

impl TargetDescription {
    /// Construct a new target description.
    pub fn new(
        length: u64,
        hashes: HashMap<String, String>,
        custom: Option<serde_json::Value>,
    ) -> Self {
        TargetDescription {
            length,
            hashes,
            custom,
        }
    }

    /// The target's length in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// The target's content hashes.
    pub fn hashes(&self) -> &HashMap<String, String> {
        &self.hashes
    }

    /// The consumer-defined `custom` block.
    pub fn custom(&self) -> Option<&serde_json::Value> {
        self.custom.as_ref()
    }
}

/// One delegation: a subset of target paths whose authority `targets.json` (or another
/// delegating role) hands off to another role's key set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    name: String,
    threshold: u32,
    #[serde(rename = "keyids")]
    key_ids: HashSet<KeyId>,
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    terminating: bool,
}

impl Delegation {
    /// Construct a new delegation.
    pub fn new(
        name: impl Into<String>,
        threshold: u32,
        key_ids: HashSet<KeyId>,
        paths: Vec<String>,
        terminating: bool,
    ) -> Self {
        Delegation {
            name: name.into(),
            threshold,
            key_ids,
            paths,
            terminating,
        }
    }

    /// The delegated role's name, and the path its metadata is stored under.
    pub fn role(&self) -> MetadataPath {
        MetadataPath(self.name.clone())
    }

    /// The signature threshold for the delegated role.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// The keys authorized to sign for the delegated role.
    pub fn key_ids(&self) -> &HashSet<KeyId> {
        &self.key_ids
    }

    /// Whether `path` falls within this delegation's path constraints.
    pub fn matches(&self, path: &TargetPath) -> bool {
        self.paths
            .iter()
            .any(|p| TargetPath(p.clone()).is_parent_of(path))
    }

    /// Whether a non-matching, or failed, delegation should stop the walk for this target
    /// rather than falling through to sibling delegations.
    pub fn terminating(&self) -> bool {
        self.terminating
    }
}

/// The ordered list of delegations declared by a targets role.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Delegations {
    keys: HashMap<KeyId, PublicKey>,
    roles: Vec<Delegation>,
}

impl Delegations {
    /// Construct a new delegation set.
    pub fn new(keys: HashMap<KeyId, PublicKey>, roles: Vec<Delegation>) -> Self {
        Delegations { keys, roles }
    }

    /// The delegations, in the declared (depth-first walk) order.
    pub fn roles(&self) -> &[Delegation] {
        &self.roles
    }

    /// Resolve a delegated role's authorized keys.
    pub fn authorized_keys(&self, delegation: &Delegation) -> Vec<&PublicKey> {
        delegation
            .key_ids()
            .iter()
            .filter_map(|id| self.keys.get(id))
            .collect()
    }
}

/// The targets role's metadata: target descriptions plus any further delegations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetsMetadata {
    version: u32,
    expires: DateTime<Utc>,
    targets: HashMap<TargetPath, TargetDescription>,
    #[serde(default)]
    delegations: Option<Delegations>,
}

impl TargetsMetadata {
    /// Construct new targets metadata.
    pub fn new(
        version: u32,
        expires: DateTime<Utc>,
        targets: HashMap<TargetPath, TargetDescription>,
        delegations: Option<Delegations>,
    ) -> Self {
        TargetsMetadata {
            version,
            expires,
            targets,
            delegations,
        }
    }

    /// The targets this role directly describes (not including anything delegated further).
    pub fn targets(&self) -> &HashMap<TargetPath, TargetDescription> {
        &self.targets
    }

    /// This role's delegations, if any.
    pub fn delegations(&self) -> Option<&Delegations> {
        self.delegations.as_ref()
    }
}

impl Metadata for TargetsMetadata {
    const ROLE_NAME: &'static str = "targets";

    fn version(&self) -> u32 {
        self.version
    }

    fn expires(&self) -> &DateTime<Utc> {
        &self.expires
    }
}

//! The per-commit TUF verification pass (C5): generalizes the teacher's `Tuf::update_root` /
//! `update_timestamp` / `update_snapshot` / `update_targets` / `update_delegation` cascade
//! (`tuf.rs`) from "verify against wall-clock now" to "verify against this commit's date", and
//! from "one HTTP fetch per role" to "one `MetadataSource::fetch` per role per commit, replayed
//! for every commit in the sequence".

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::metadata::{
    MetadataDescription, MetadataPath, RootMetadata, Role, SignedMetadata, SnapshotMetadata,
    TargetDescription, TargetPath, TargetsMetadata, TimestampMetadata,
};
use crate::mirror::MetadataSource;
use crate::trust::RoleTrustState;

/// The result of successfully verifying one AR commit: the new trust state, and the fully
/// resolved set of target descriptions visible at this commit (top-level plus every delegation
/// that matched), keyed by target path.
pub struct VerifiedCommit {
    /// The trust state after accepting this commit's metadata.
    pub trust: RoleTrustState,
    /// Every target description reachable from `targets.json` or a delegation at this commit.
    pub targets: HashMap<TargetPath, TargetDescription>,
}

/// Verify one AR commit's metadata set against the trust state carried from the previous commit.
///
/// `commit_timestamp` is the commit's own authoring date (`spec.md` §4.4's
/// `earliest_valid_expiration`), used instead of wall-clock now for every expiration check.
pub fn verify_commit(
    source: &dyn MetadataSource,
    mut trust: RoleTrustState,
    commit_timestamp: i64,
    max_delegation_depth: u32,
) -> Result<VerifiedCommit, Error> {
    verify_root_chain(source, &mut trust, commit_timestamp)?;
    verify_timestamp(source, &mut trust, commit_timestamp)?;
    verify_snapshot(source, &mut trust, commit_timestamp)?;
    let targets =
        verify_targets_and_delegations(source, &mut trust, commit_timestamp, max_delegation_depth)?;

    Ok(VerifiedCommit { trust, targets })
}

fn not_expired(expires: &DateTime<Utc>, commit_timestamp: i64, floor: i64) -> bool {
    expires.timestamp() >= commit_timestamp.max(floor)
}

/// Mirrors `Tuf::update_root`: fetch root repeatedly, each new version checked against both the
/// old root's threshold (to prove continuity of trust) and the new root's own threshold (to
/// prove the new key set is self-consistent), until the version at this commit is reached.
fn verify_root_chain(
    source: &dyn MetadataSource,
    trust: &mut RoleTrustState,
    commit_timestamp: i64,
) -> Result<(), Error> {
    let bytes = source
        .fetch("root")
        .map_err(|_| Error::MissingMetadata(Role::Root))?;
    let signed: SignedMetadata<RootMetadata> = SignedMetadata::from_bytes(&bytes)?;
    let new_root = signed.unverified();

    match &trust.root {
        None => {
            // First clone: the shipped/initial root is trusted by fiat (it is the trust anchor),
            // but it must still verify against its own declared keys and threshold.
            let self_keys = new_root.authorized_keys(&Role::Root);
            let threshold = new_root
                .role_definition(&Role::Root)
                .ok_or_else(|| Error::MissingMetadata(Role::Root))?
                .threshold();
            signed
                .verify(threshold, self_keys)
                .map_err(|_| Error::InvalidSignatures(Role::Root))?;
        }
        Some(old_root) => {
            if new_root.version() < old_root.version() {
                return Err(Error::RollbackAttempted(
                    Role::Root,
                    old_root.version(),
                    new_root.version(),
                ));
            }
            if new_root.version() > old_root.version() {
                let old_keys = old_root.authorized_keys(&Role::Root);
                let old_threshold = old_root
                    .role_definition(&Role::Root)
                    .ok_or_else(|| Error::MissingMetadata(Role::Root))?
                    .threshold();
                signed
                    .verify(old_threshold, old_keys)
                    .map_err(|_| Error::InvalidSignatures(Role::Root))?;

                let new_keys = new_root.authorized_keys(&Role::Root);
                let new_threshold = new_root
                    .role_definition(&Role::Root)
                    .ok_or_else(|| Error::MissingMetadata(Role::Root))?
                    .threshold();
                signed
                    .verify(new_threshold, new_keys)
                    .map_err(|_| Error::InvalidSignatures(Role::Root))?;
            }
        }
    }

    let floor = trust.record_expiration("root", commit_timestamp, new_root.expires().timestamp());
    if !not_expired(new_root.expires(), commit_timestamp, floor) {
        return Err(Error::ExpiredMetadata(
            Role::Root,
            commit_timestamp.to_string(),
        ));
    }

    trust.root = Some(new_root.clone());
    Ok(())
}

fn verify_timestamp(
    source: &dyn MetadataSource,
    trust: &mut RoleTrustState,
    commit_timestamp: i64,
) -> Result<(), Error> {
    let root = trust
        .root
        .as_ref()
        .ok_or_else(|| Error::Programming("timestamp verified before root".into()))?;
    let def = root
        .role_definition(&Role::Timestamp)
        .ok_or_else(|| Error::MissingMetadata(Role::Timestamp))?;
    let keys = root.authorized_keys(&Role::Timestamp);

    let bytes = source
        .fetch("timestamp")
        .map_err(|_| Error::MissingMetadata(Role::Timestamp))?;
    let signed: SignedMetadata<TimestampMetadata> = SignedMetadata::from_bytes(&bytes)?;
    signed
        .verify(def.threshold(), keys)
        .map_err(|_| Error::InvalidSignatures(Role::Timestamp))?;
    let new_timestamp = signed.unverified();

    if let Some(old) = &trust.timestamp {
        if new_timestamp.version() < old.version() {
            return Err(Error::RollbackAttempted(
                Role::Timestamp,
                old.version(),
                new_timestamp.version(),
            ));
        }
    }

    let floor = trust.record_expiration(
        "timestamp",
        commit_timestamp,
        new_timestamp.expires().timestamp(),
    );
    if !not_expired(new_timestamp.expires(), commit_timestamp, floor) {
        return Err(Error::ExpiredMetadata(
            Role::Timestamp,
            commit_timestamp.to_string(),
        ));
    }

    trust.timestamp = Some(new_timestamp.clone());
    Ok(())
}

fn verify_snapshot(
    source: &dyn MetadataSource,
    trust: &mut RoleTrustState,
    commit_timestamp: i64,
) -> Result<(), Error> {
    let root = trust
        .root
        .as_ref()
        .ok_or_else(|| Error::Programming("snapshot verified before root".into()))?;
    let def = root
        .role_definition(&Role::Snapshot)
        .ok_or_else(|| Error::MissingMetadata(Role::Snapshot))?;
    let keys = root.authorized_keys(&Role::Snapshot);

    let bytes = source
        .fetch("snapshot")
        .map_err(|_| Error::MissingMetadata(Role::Snapshot))?;
    let signed: SignedMetadata<SnapshotMetadata> = SignedMetadata::from_bytes(&bytes)?;
    signed
        .verify(def.threshold(), keys)
        .map_err(|_| Error::InvalidSignatures(Role::Snapshot))?;
    let new_snapshot = signed.unverified();

    let expected_version = trust
        .timestamp
        .as_ref()
        .map(|t| t.snapshot().version())
        .unwrap_or_else(|| new_snapshot.version());
    if new_snapshot.version() != expected_version {
        return Err(Error::RollbackAttempted(
            Role::Snapshot,
            expected_version,
            new_snapshot.version(),
        ));
    }

    if let Some(old) = &trust.snapshot {
        if new_snapshot.version() < old.version() {
            return Err(Error::RollbackAttempted(
                Role::Snapshot,
                old.version(),
                new_snapshot.version(),
            ));
        }
        for (path, old_desc) in old.meta() {
            if let Some(new_desc) = new_snapshot.meta().get(path) {
                if new_desc.version() < old_desc.version() {
                    return Err(Error::RollbackAttempted(
                        Role::Delegated(path.to_string()),
                        old_desc.version(),
                        new_desc.version(),
                    ));
                }
            }
        }
    }

    let floor = trust.record_expiration(
        "snapshot",
        commit_timestamp,
        new_snapshot.expires().timestamp(),
    );
    if !not_expired(new_snapshot.expires(), commit_timestamp, floor) {
        return Err(Error::ExpiredMetadata(
            Role::Snapshot,
            commit_timestamp.to_string(),
        ));
    }

    trust.snapshot = Some(new_snapshot.clone());
    Ok(())
}

fn verify_targets_and_delegations(
    source: &dyn MetadataSource,
    trust: &mut RoleTrustState,
    commit_timestamp: i64,
    max_delegation_depth: u32,
) -> Result<HashMap<TargetPath, TargetDescription>, Error> {
    let root = trust
        .root
        .as_ref()
        .ok_or_else(|| Error::Programming("targets verified before root".into()))?
        .clone();
    let snapshot = trust
        .snapshot
        .as_ref()
        .ok_or_else(|| Error::Programming("targets verified before snapshot".into()))?
        .clone();

    let def = root
        .role_definition(&Role::Targets)
        .ok_or_else(|| Error::MissingMetadata(Role::Targets))?;
    let keys = root.authorized_keys(&Role::Targets);

    let top_level = fetch_and_verify_targets(
        source,
        "targets",
        def.threshold(),
        &keys,
        &snapshot,
        trust,
        commit_timestamp,
        Role::Targets,
    )?;

    let mut resolved: HashMap<TargetPath, TargetDescription> = top_level
        .targets()
        .iter()
        .map(|(p, d)| (p.clone(), d.clone()))
        .collect();

    if let Some(delegations) = top_level.delegations() {
        // Depth-first in declaration order, per `spec.md` §4.5's "walk delegations depth-first
        // in the order declared". Depth is capped by `max_delegation_depth`: a role found beyond
        // the cap is skipped outright rather than fetched, the same guard the teacher's
        // `Client` placed on its own on-demand delegation lookups, needed here because delegation
        // graphs are attacker-controlled and could otherwise cycle forever.
        let mut queue: Vec<_> = delegations.roles().iter().cloned().map(|d| (d, 1u32)).collect();
        while let Some((delegation, depth)) = queue.pop() {
            if depth > max_delegation_depth {
                log::warn!(
                    "delegation {} exceeds max_delegation_depth of {}, skipping",
                    delegation.role().as_str(),
                    max_delegation_depth
                );
                continue;
            }

            let role_path = delegation.role();
            let delegated_keys = delegations.authorized_keys(&delegation);

            let fetched = fetch_and_verify_targets(
                source,
                role_path.as_str(),
                delegation.threshold(),
                &delegated_keys,
                &snapshot,
                trust,
                commit_timestamp,
                Role::Delegated(role_path.as_str().to_string()),
            );

            let fetched = match fetched {
                Ok(metadata) => metadata,
                Err(err) if delegation.terminating() => return Err(err),
                Err(_) => continue,
            };

            for (path, description) in fetched.targets() {
                if delegation.matches(path) {
                    resolved.insert(path.clone(), description.clone());
                }
            }

            if let Some(nested) = fetched.delegations() {
                queue.extend(nested.roles().iter().cloned().map(|d| (d, depth + 1)));
            }

            trust
                .delegations
                .insert(role_path.as_str().to_string(), fetched);
        }
    }

    trust.targets = Some(top_level);
    Ok(resolved)
}

#[allow(clippy::too_many_arguments)]
fn fetch_and_verify_targets(
    source: &dyn MetadataSource,
    role_name: &str,
    threshold: u32,
    keys: &[&crate::crypto::PublicKey],
    snapshot: &SnapshotMetadata,
    trust: &mut RoleTrustState,
    commit_timestamp: i64,
    role: Role,
) -> Result<TargetsMetadata, Error> {
    let path = MetadataPath::new(role_name)?;
    let expected: &MetadataDescription = snapshot
        .meta()
        .get(&path)
        .ok_or_else(|| Error::MissingMetadata(role.clone()))?;

    let bytes = source
        .fetch(role_name)
        .map_err(|_| Error::MissingMetadata(role.clone()))?;
    let signed: SignedMetadata<TargetsMetadata> = SignedMetadata::from_bytes(&bytes)?;
    signed
        .verify(threshold, keys.iter().copied())
        .map_err(|_| Error::InvalidSignatures(role.clone()))?;
    let metadata = signed.unverified();

    if metadata.version() != expected.version() {
        return Err(Error::RollbackAttempted(
            role.clone(),
            expected.version(),
            metadata.version(),
        ));
    }

    let previous = trust.delegations.get(role_name).or_else(|| {
        if role_name == "targets" {
            trust.targets.as_ref()
        } else {
            None
        }
    });
    if let Some(previous) = previous {
        if metadata.version() < previous.version() {
            return Err(Error::RollbackAttempted(
                role.clone(),
                previous.version(),
                metadata.version(),
            ));
        }
    }

    let floor = trust.record_expiration(role_name, commit_timestamp, metadata.expires().timestamp());
    if !not_expired(metadata.expires(), commit_timestamp, floor) {
        return Err(Error::ExpiredMetadata(role, commit_timestamp.to_string()));
    }

    Ok(metadata.clone())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{KeyType, PublicKey, Signature};
    use crate::metadata::RoleDefinition;
    use chrono::Duration;
    use ring::rand::SystemRandom;
    use ring::signature::{Ed25519KeyPair, KeyPair};
    use std::cell::RefCell;
    use std::collections::{HashMap as Map, HashSet};

    struct FakeSource {
        files: RefCell<HashMap<String, Vec<u8>>>,
        commit_timestamp: i64,
    }

    impl MetadataSource for FakeSource {
        fn fetch(&self, role_name: &str) -> Result<Vec<u8>, Error> {
            self.files
                .borrow()
                .get(role_name)
                .cloned()
                .ok_or(Error::NotFound)
        }
        fn fetch_target(&self, _path: &str) -> Result<Vec<u8>, Error> {
            Err(Error::NotFound)
        }
        fn list_targets(&self) -> Result<Vec<String>, Error> {
            Ok(Vec::new())
        }
        fn earliest_valid_expiration(&self) -> i64 {
            self.commit_timestamp
        }
    }

    fn keypair() -> (PublicKey, Ed25519KeyPair) {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let kp = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let public = PublicKey::new(KeyType::Ed25519, kp.public_key().as_ref().to_vec());
        (public, kp)
    }

    fn sign<M: serde::Serialize>(metadata: M, kp: &Ed25519KeyPair, public: &PublicKey) -> Vec<u8>
    where
        M: crate::metadata::Metadata,
    {
        let bytes = serde_json::to_vec(&metadata).unwrap();
        let sig = Signature::new(public.key_id().clone(), kp.sign(&bytes).as_ref().to_vec());
        serde_json::to_vec(&SignedMetadata::new(metadata, vec![sig])).unwrap()
    }

    fn basic_root(public: &PublicKey) -> RootMetadata {
        let mut keys = Map::new();
        keys.insert(public.key_id().clone(), public.clone());
        let mut ids = HashSet::new();
        ids.insert(public.key_id().clone());
        RootMetadata::new(
            1,
            Utc::now() + Duration::days(365),
            false,
            keys,
            RoleDefinition::new(1, ids.clone()).unwrap(),
            RoleDefinition::new(1, ids.clone()).unwrap(),
            RoleDefinition::new(1, ids.clone()).unwrap(),
            RoleDefinition::new(1, ids).unwrap(),
        )
    }

    #[test]
    fn accepts_a_consistent_first_commit() {
        let (public, kp) = keypair();
        let root = basic_root(&public);
        let expires = Utc::now() + Duration::days(365);

        let snapshot = SnapshotMetadata::new(
            1,
            expires,
            Map::from([(
                MetadataPath::new("targets").unwrap(),
                MetadataDescription::new(1),
            )]),
        );
        let timestamp =
            TimestampMetadata::new(1, expires, MetadataDescription::new(snapshot.version()));
        let targets = TargetsMetadata::new(1, expires, Map::new(), None);

        let files = HashMap::from([
            ("root".to_string(), sign(root, &kp, &public)),
            ("timestamp".to_string(), sign(timestamp, &kp, &public)),
            ("snapshot".to_string(), sign(snapshot, &kp, &public)),
            ("targets".to_string(), sign(targets, &kp, &public)),
        ]);

        let source = FakeSource {
            files: RefCell::new(files),
            commit_timestamp: Utc::now().timestamp(),
        };

        let result = verify_commit(&source, RoleTrustState::new(), source.commit_timestamp, 8);
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_expired_timestamp() {
        let (public, kp) = keypair();
        let root = basic_root(&public);
        let expires = Utc::now() - Duration::days(1);

        let snapshot = SnapshotMetadata::new(1, Utc::now() + Duration::days(1), Map::new());
        let timestamp =
            TimestampMetadata::new(1, expires, MetadataDescription::new(snapshot.version()));

        let files = HashMap::from([
            ("root".to_string(), sign(root, &kp, &public)),
            ("timestamp".to_string(), sign(timestamp, &kp, &public)),
        ]);
        let source = FakeSource {
            files: RefCell::new(files),
            commit_timestamp: Utc::now().timestamp(),
        };

        let err = verify_commit(&source, RoleTrustState::new(), source.commit_timestamp, 8);
        assert!(matches!(err, Err(Error::ExpiredMetadata(Role::Timestamp, _))));
    }

    #[test]
    fn max_delegation_depth_of_zero_skips_every_delegation() {
        use crate::metadata::Delegation;
        use crate::metadata::Delegations;

        let (public, kp) = keypair();
        let root = basic_root(&public);
        let expires = Utc::now() + Duration::days(365);

        let mut ids = HashSet::new();
        ids.insert(public.key_id().clone());
        let delegation = Delegation::new("team", 1, ids, vec!["team".to_string()], false);
        let mut delegated_keys = Map::new();
        delegated_keys.insert(public.key_id().clone(), public.clone());
        let delegations = Delegations::new(delegated_keys, vec![delegation]);

        let targets = TargetsMetadata::new(1, expires, Map::new(), Some(delegations));
        let delegated_targets = TargetsMetadata::new(
            1,
            expires,
            Map::from([(
                TargetPath::new("team/service-b").unwrap(),
                TargetDescription::new(5, Map::new(), None),
            )]),
            None,
        );

        let snapshot = SnapshotMetadata::new(
            1,
            expires,
            Map::from([
                (MetadataPath::new("targets").unwrap(), MetadataDescription::new(1)),
                (MetadataPath::new("team").unwrap(), MetadataDescription::new(1)),
            ]),
        );
        let timestamp =
            TimestampMetadata::new(1, expires, MetadataDescription::new(snapshot.version()));

        let files = HashMap::from([
            ("root".to_string(), sign(root, &kp, &public)),
            ("timestamp".to_string(), sign(timestamp, &kp, &public)),
            ("snapshot".to_string(), sign(snapshot, &kp, &public)),
            ("targets".to_string(), sign(targets, &kp, &public)),
            ("team".to_string(), sign(delegated_targets, &kp, &public)),
        ]);
        let source = FakeSource {
            files: RefCell::new(files),
            commit_timestamp: Utc::now().timestamp(),
        };

        let skipped = verify_commit(&source, RoleTrustState::new(), source.commit_timestamp, 0)
            .unwrap();
        assert!(!skipped.targets.contains_key(&TargetPath::new("team/service-b").unwrap()));

        let followed = verify_commit(&source, RoleTrustState::new(), source.commit_timestamp, 8)
            .unwrap();
        assert!(followed.targets.contains_key(&TargetPath::new("team/service-b").unwrap()));
    }
}

//! `targets/repositories.json`: the manifest mapping each target repository name to its clone
//! URLs and free-form `custom` metadata.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One target repository's entry in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    /// Clone URLs to try, in order; the first that succeeds wins.
    pub urls: Vec<String>,
    /// Free-form metadata: a `type` tag and a `dependency` marker are the only fields this crate
    /// interprets, but `custom`'s schema is consumer-defined, so it stays a loose JSON value
    /// rather than a typed struct.
    #[serde(default)]
    pub custom: Option<serde_json::Value>,
}

impl RepositoryEntry {
    /// Whether this entry's `custom` block marks it as a nested authentication repository.
    pub fn is_dependency(&self) -> bool {
        self.custom
            .as_ref()
            .and_then(|v| v.get("dependency"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// The parsed `repositories.json` manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    repositories: HashMap<String, RepositoryEntry>,
}

impl Manifest {
    /// Parse a manifest from its JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes).map_err(Error::from)
    }

    /// The manifest's repository entries, by name.
    pub fn repositories(&self) -> &HashMap<String, RepositoryEntry> {
        &self.repositories
    }

    /// Look up one repository's entry by name.
    pub fn get(&self, name: &str) -> Option<&RepositoryEntry> {
        self.repositories.get(name)
    }

    /// Check that every target path present under `targets/` (other than the manifest and the
    /// test-AR sentinel) has a corresponding manifest entry, and vice versa.
    pub fn check_consistent<'a>(
        &self,
        target_paths: impl Iterator<Item = &'a str>,
    ) -> Result<(), Error> {
        for path in target_paths {
            if path == "repositories.json" || path == "test-auth-repo" {
                continue;
            }
            if !self.repositories.contains_key(path) {
                return Err(Error::InconsistentManifest(format!(
                    "target file {} has no repositories.json entry",
                    path
                )));
            }
        }
        Ok(())
    }
}

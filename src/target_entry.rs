//! `targets/<repo-name>`: the commit pointer a single AR commit attests to for one target
//! repository.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The contents of one `targets/<repo-name>` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    /// The 40-hex commit SHA this entry attests to.
    pub commit: String,
    /// The branch the commit is expected to be reachable from, if declared.
    #[serde(default)]
    pub branch: Option<String>,
    /// Any additional keys present in the file are preserved but ignored, per `spec.md` §6.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TargetEntry {
    /// Parse a target entry from its JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let entry: TargetEntry = serde_json::from_slice(bytes).map_err(Error::from)?;
        if entry.commit.len() != 40 || !entry.commit.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InconsistentManifest(format!(
                "target entry commit {:?} is not a 40-hex sha",
                entry.commit
            )));
        }
        Ok(entry)
    }
}

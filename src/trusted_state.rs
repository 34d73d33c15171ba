//! Persisted state in the client AR: `<AR>/last_validated_commit`, written atomically.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Handle to the `last_validated_commit` marker file alongside a client AR clone.
pub struct TrustedState {
    path: PathBuf,
}

impl TrustedState {
    /// Point at the marker file for the AR checked out at `ar_path`.
    pub fn new(ar_path: impl AsRef<Path>) -> Self {
        TrustedState {
            path: ar_path.as_ref().join("last_validated_commit"),
        }
    }

    /// Read the last validated commit, if one has been recorded.
    pub fn read(&self) -> Result<Option<String>, Error> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents.trim().to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::from_io(&err, &self.path)),
        }
    }

    /// Atomically record `commit` as the new last-validated commit (write to a sibling temp file,
    /// then rename over the target).
    pub fn write(&self, commit: &str) -> Result<(), Error> {
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, format!("{}\n", commit))
            .map_err(|e| Error::from_io(&e, &tmp_path))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| Error::from_io(&e, &self.path))
    }
}

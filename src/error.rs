//! Error types and converters.

use std::io;
use std::path::Path;
use thiserror::Error;

use crate::metadata::Role;

/// Error type for all authentication-repository related errors.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// A Git operation failed (clone, fetch, or a repository-shape problem).
    #[error("git: {0}")]
    Git(#[from] git2::Error),

    /// The user's authentication repository tip is not an ancestor of the remote tip, and
    /// `force` was not set.
    #[error("force push detected on authentication repository at {0}")]
    ForcePushDetected(String),

    /// A target repository's new commit is not a descendant of the commit previously validated
    /// for it.
    #[error("force push detected on target repository {0}: {1} is not a descendant of {2}")]
    TargetForcePush(String, String, String),

    /// The metadata had a bad signature, or too few valid signatures to meet a role's threshold.
    #[error("bad signature for {0} metadata")]
    InvalidSignatures(Role),

    /// A role's metadata was signed by fewer keys than its threshold requires.
    #[error("threshold not met for {0} metadata: needed {1}, got {2}")]
    ThresholdUnmet(Role, u32, u32),

    /// Metadata was expired relative to the commit date it was validated against.
    #[error("expired {0} metadata at commit {1}")]
    ExpiredMetadata(Role, String),

    /// A role's metadata version decreased relative to the previously accepted version.
    #[error("rollback attempted for {0} metadata: {1} -> {2}")]
    RollbackAttempted(Role, u32, u32),

    /// The metadata for a role was missing at the commit being validated.
    #[error("missing {0} metadata")]
    MissingMetadata(Role),

    /// A target file referenced by metadata was missing at the commit being validated.
    #[error("missing target {0}")]
    MissingTarget(String),

    /// `repositories.json` is inconsistent with the `targets/` entries at this commit.
    #[error("inconsistent manifest: {0}")]
    InconsistentManifest(String),

    /// Two authentication repositories (including nested dependencies) referenced each other,
    /// forming a validation cycle.
    #[error("dependency cycle detected at {0}#{1}")]
    DependencyCycle(String, String),

    /// A commit SHA referenced by metadata does not exist, or is not reachable the way it was
    /// expected to be.
    #[error("invalid commit reference: {0}")]
    InvalidCommit(String),

    /// A glob pattern in `excluded_target_globs` failed to parse.
    #[error("invalid glob pattern: {0}")]
    InvalidGlob(#[from] glob::PatternError),

    /// There was a problem encoding or decoding metadata.
    #[error("encoding: {0}")]
    Encoding(String),

    /// An illegal argument was passed into a function.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// The metadata or target was not found.
    #[error("not found")]
    NotFound,

    /// Opaque I/O error, with the offending path attached where known.
    #[error("opaque: {0}")]
    Opaque(String),

    /// There was an internal logic error. These are always bugs and should be reported.
    #[error("programming error: {0}")]
    Programming(String),

    /// Umbrella wrapping one of the above with the offending commit and role/target name, per
    /// the error reporting contract: every fatal error surfaces to the orchestrator as one of
    /// these.
    #[error("update failed at commit {commit:?} ({role_or_target:?}): {inner}")]
    UpdateFailed {
        /// The offending error.
        inner: Box<Error>,
        /// The authentication-repository commit being validated when the error occurred, if any.
        commit: Option<String>,
        /// The role or target name implicated, if any.
        role_or_target: Option<String>,
    },
}

impl Error {
    /// Wrap `self` as an `UpdateFailed` umbrella, attaching the commit context. Idempotent: if
    /// `self` is already an `UpdateFailed`, only the commit field is filled in.
    pub fn at_commit(self, commit: impl Into<String>) -> Error {
        match self {
            Error::UpdateFailed {
                inner,
                role_or_target,
                ..
            } => Error::UpdateFailed {
                inner,
                commit: Some(commit.into()),
                role_or_target,
            },
            other => Error::UpdateFailed {
                inner: Box::new(other),
                commit: Some(commit.into()),
                role_or_target: None,
            },
        }
    }

    /// Attach the role or target name implicated by this error.
    pub fn for_role(self, role_or_target: impl Into<String>) -> Error {
        match self {
            Error::UpdateFailed { inner, commit, .. } => Error::UpdateFailed {
                inner,
                commit,
                role_or_target: Some(role_or_target.into()),
            },
            other => Error::UpdateFailed {
                inner: Box::new(other),
                commit: None,
                role_or_target: Some(role_or_target.into()),
            },
        }
    }

    /// Helper to include the path that caused the error for FS I/O errors.
    pub fn from_io(err: &io::Error, path: &Path) -> Error {
        Error::Opaque(format!("path {:?}: {:?}", path, err))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::NotFound => Error::NotFound,
            _ => Error::Opaque(format!("io: {:?}", err)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Encoding(format!("json: {:?}", err))
    }
}

//! Update invocation configuration (`spec.md` §6's "Update invocation (logical, not CLI)"),
//! generalizing the teacher's `Config`/`ConfigBuilder` pattern (`client.rs`) from TUF download
//! limits to the full set of options a clone/update call recognizes.

use std::path::PathBuf;

use glob::Pattern;

use crate::error::Error;

/// Which operation an invocation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `path` is absent; fetch the full AR history and validate it from scratch.
    Clone,
    /// `path` is present; validate and advance past the client's last validated commit.
    Update,
}

/// The expected shape of the authentication repository being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedRepoType {
    /// Must contain the `targets/test-auth-repo` sentinel.
    Test,
    /// Must NOT contain the sentinel.
    Official,
    /// Either is accepted.
    Either,
}

/// Validated configuration for one clone or update invocation.
#[derive(Debug, Clone)]
pub struct Config {
    operation: Operation,
    url: String,
    path: Option<PathBuf>,
    library_dir: PathBuf,
    expected_repo_type: ExpectedRepoType,
    update_from_filesystem: bool,
    excluded_target_globs: Vec<Pattern>,
    strict: bool,
    force: bool,
    bare: bool,
    no_upstream: bool,
    max_delegation_depth: u32,
}

impl Config {
    /// Initialize a `ConfigBuilder` for a `clone` invocation.
    pub fn clone_builder(url: impl Into<String>, library_dir: impl Into<PathBuf>) -> ConfigBuilder {
        ConfigBuilder::new(Operation::Clone, url, library_dir)
    }

    /// Initialize a `ConfigBuilder` for an `update` invocation.
    pub fn update_builder(
        url: impl Into<String>,
        path: impl Into<PathBuf>,
        library_dir: impl Into<PathBuf>,
    ) -> ConfigBuilder {
        let mut builder = ConfigBuilder::new(Operation::Update, url, library_dir);
        builder.path = Some(path.into());
        builder
    }

    /// Which operation this invocation performs.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// The remote AR URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The local AR path, present for `Update`.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// The root directory under which target repos are cloned.
    pub fn library_dir(&self) -> &PathBuf {
        &self.library_dir
    }

    /// The expected AR shape.
    pub fn expected_repo_type(&self) -> ExpectedRepoType {
        self.expected_repo_type
    }

    /// Whether `url` may name a local filesystem path instead of a network URL.
    pub fn update_from_filesystem(&self) -> bool {
        self.update_from_filesystem
    }

    /// Whether `path` (relative to `targets/`) matches an excluded glob.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_target_globs
            .iter()
            .any(|pattern| pattern.matches(path))
    }

    /// Whether warnings should be treated as errors.
    pub fn strict(&self) -> bool {
        self.strict
    }

    /// Whether a detected non-fast-forward should trigger a re-clone instead of failing.
    pub fn force(&self) -> bool {
        self.force
    }

    /// Whether target repo clones should be bare.
    pub fn bare(&self) -> bool {
        self.bare
    }

    /// Whether the upstream ancestry check on the user's AR should be skipped.
    pub fn no_upstream(&self) -> bool {
        self.no_upstream
    }

    /// How many delegation levels below `targets.json` are walked before a delegated role is
    /// ignored rather than followed further.
    pub fn max_delegation_depth(&self) -> u32 {
        self.max_delegation_depth
    }
}

/// Helper for building and validating a [`Config`].
#[derive(Debug)]
pub struct ConfigBuilder {
    operation: Operation,
    url: String,
    path: Option<PathBuf>,
    library_dir: PathBuf,
    expected_repo_type: ExpectedRepoType,
    update_from_filesystem: bool,
    excluded_target_globs: Vec<String>,
    strict: bool,
    force: bool,
    bare: bool,
    no_upstream: bool,
    max_delegation_depth: u32,
}

impl ConfigBuilder {
    fn new(operation: Operation, url: impl Into<String>, library_dir: impl Into<PathBuf>) -> Self {
        ConfigBuilder {
            operation,
            url: url.into(),
            path: None,
            library_dir: library_dir.into(),
            expected_repo_type: ExpectedRepoType::Either,
            update_from_filesystem: false,
            excluded_target_globs: Vec::new(),
            strict: false,
            force: false,
            bare: false,
            no_upstream: false,
            max_delegation_depth: 8,
        }
    }

    /// Set the expected AR shape.
    pub fn expected_repo_type(mut self, expected: ExpectedRepoType) -> Self {
        self.expected_repo_type = expected;
        self
    }

    /// Allow `url` to name a local filesystem path.
    pub fn update_from_filesystem(mut self, allow: bool) -> Self {
        self.update_from_filesystem = allow;
        self
    }

    /// Append a glob pattern to the excluded-target list.
    pub fn exclude_target(mut self, pattern: impl Into<String>) -> Self {
        self.excluded_target_globs.push(pattern.into());
        self
    }

    /// Treat warnings as errors.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Allow re-clone on a detected non-fast-forward.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Clone target repositories bare.
    pub fn bare(mut self, bare: bool) -> Self {
        self.bare = bare;
        self
    }

    /// Skip the upstream ancestry check on the user's AR.
    pub fn no_upstream(mut self, no_upstream: bool) -> Self {
        self.no_upstream = no_upstream;
        self
    }

    /// Cap how many delegation levels below `targets.json` are walked. Defaults to 8.
    pub fn max_delegation_depth(mut self, depth: u32) -> Self {
        self.max_delegation_depth = depth;
        self
    }

    /// Set the destination path a `clone` invocation should write the validated AR and its
    /// `last_validated_commit` marker to. `update` invocations already pin this via
    /// [`Config::update_builder`]; calling this on an `update` builder overrides that path.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Validate this builder, returning a [`Config`] if every glob pattern parses.
    pub fn finish(self) -> Result<Config, Error> {
        if self.operation == Operation::Update && self.path.is_none() {
            return Err(Error::IllegalArgument(
                "update requires a local AR path".into(),
            ));
        }

        let excluded_target_globs = self
            .excluded_target_globs
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config {
            operation: self.operation,
            url: self.url,
            path: self.path,
            library_dir: self.library_dir,
            expected_repo_type: self.expected_repo_type,
            update_from_filesystem: self.update_from_filesystem,
            excluded_target_globs,
            strict: self.strict,
            force: self.force,
            bare: self.bare,
            no_upstream: self.no_upstream,
            max_delegation_depth: self.max_delegation_depth,
        })
    }
}

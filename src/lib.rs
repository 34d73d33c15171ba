//! A client-side updater for Git-backed TUF authentication repositories.
//!
//! An authentication repository (AR) is a Git repository whose commit history attests, via
//! signed TUF metadata, to the identity and revision of a collection of other Git repositories
//! (the *target repositories*). Every AR commit is a distinct TUF mirror snapshot: metadata must
//! have been valid at the time it was committed, not merely as of now. This crate walks an AR's
//! commit history in order, replaying TUF verification against each commit's own date, and
//! advances the target repositories it attests to only as far as validation succeeds.
//!
//! The entry points are [`orchestrator::clone_repository`] for a fresh AR with no local state,
//! and [`orchestrator::update_repository`] for advancing one that is already checked out;
//! [`config::Config`] (via [`config::Config::clone_builder`] / [`config::Config::update_builder`])
//! configures either call.

pub mod commit_iterator;
pub mod config;
pub mod crypto;
pub mod dependency;
pub mod error;
pub mod git;
pub mod manifest;
pub mod metadata;
pub mod mirror;
pub mod orchestrator;
pub mod target_entry;
pub mod targets_updater;
pub mod trust;
pub mod trusted_state;
pub mod validation_clone;
pub mod verifier;

pub use config::Config;
pub use error::Error;
pub use orchestrator::{clone_repository, update_repository, UpdateReport};

/// Convenience alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, Error>;

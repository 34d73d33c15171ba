//! Cycle detection for nested authentication repositories (`spec.md` §9's "Cyclic AR
//! dependencies"). Replaces the original source's process-wide `repositoriesdb` cache with an
//! explicit context object threaded through the orchestrator's recursive calls.

use std::collections::HashSet;

use crate::error::Error;

/// Tracks the `(AR url, commit)` pairs currently being validated across a chain of nested
/// dependency updates, so a repeat can be rejected as a `DependencyCycle` rather than recursing
/// forever.
#[derive(Debug, Default)]
pub struct DependencyContext {
    in_progress: HashSet<(String, String)>,
}

impl DependencyContext {
    /// A fresh, empty context, as used at the top of an update.
    pub fn new() -> Self {
        DependencyContext::default()
    }

    /// Enter validation of `(url, commit)`, returning a guard that removes the entry again when
    /// dropped. Fails with `DependencyCycle` if this pair is already being validated further up
    /// the call stack.
    pub fn enter(&mut self, url: &str, commit: &str) -> Result<(), Error> {
        let key = (url.to_string(), commit.to_string());
        if !self.in_progress.insert(key) {
            return Err(Error::DependencyCycle(url.to_string(), commit.to_string()));
        }
        Ok(())
    }

    /// Leave validation of `(url, commit)`, allowing it to be entered again (e.g. by a sibling
    /// branch of the dependency tree that isn't actually cyclic).
    pub fn leave(&mut self, url: &str, commit: &str) {
        self.in_progress
            .remove(&(url.to_string(), commit.to_string()));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn detects_direct_cycle() {
        let mut ctx = DependencyContext::new();
        ctx.enter("https://example.com/a.git", "abc123").unwrap();
        let err = ctx.enter("https://example.com/a.git", "abc123");
        assert!(matches!(err, Err(Error::DependencyCycle(_, _))));
    }

    #[test]
    fn allows_reentry_after_leave() {
        let mut ctx = DependencyContext::new();
        ctx.enter("https://example.com/a.git", "abc123").unwrap();
        ctx.leave("https://example.com/a.git", "abc123");
        assert!(ctx.enter("https://example.com/a.git", "abc123").is_ok());
    }
}

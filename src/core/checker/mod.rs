// src/core/checker/mod.rs

//! Checker plugins and the path-to-checker map they are registered in.
//!
//! A checker inspects the response fetched for one path of a target and either
//! reports a structured finding or no match. Checkers are registered under an
//! explicit name, which is what results are tagged with and what `--check`
//! selects on.

pub mod clone_probe;
pub mod firestore;
pub mod git;
pub mod runner;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::fetch::HttpFetcher;
use crate::core::models::{CheckOutcome, CheckerContext};
use crate::error::CheckerError;

use self::clone_probe::CloneProbe;
use self::firestore::FirestoreChecker;
use self::git::GitChecker;

/// The plugin contract. Implementations must not block indefinitely; callers
/// bound the fetches around them, not the checker itself.
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, ctx: &CheckerContext) -> Result<CheckOutcome, CheckerError>;
}

/// A checker together with the name it reports under.
#[derive(Clone)]
pub struct RegisteredChecker {
    pub name: String,
    pub checker: Arc<dyn Checker>,
}

impl RegisteredChecker {
    pub fn new(name: impl Into<String>, checker: Arc<dyn Checker>) -> Self {
        Self {
            name: name.into(),
            checker,
        }
    }
}

impl std::fmt::Debug for RegisteredChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredChecker").field("name", &self.name).finish()
    }
}

/// Ordered mapping from a path suffix (`""` is the origin root) to the
/// checkers evaluated against the response of `origin + "/" + path`.
#[derive(Debug, Clone, Default)]
pub struct CheckerMap {
    entries: Vec<(String, Vec<RegisteredChecker>)>,
}

impl CheckerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `checker` to the list for `path`, creating the entry if needed.
    pub fn register(mut self, path: impl Into<String>, checker: RegisteredChecker) -> Self {
        let path = path.into();
        match self.entries.iter_mut().find(|(p, _)| *p == path) {
            Some((_, checkers)) => checkers.push(checker),
            None => self.entries.push((path, vec![checker])),
        }
        self
    }

    pub fn paths(&self) -> impl Iterator<Item = (&str, &[RegisteredChecker])> {
        self.entries.iter().map(|(p, c)| (p.as_str(), c.as_slice()))
    }

    /// Every registered checker name, deduplicated, in registration order.
    pub fn names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.entries
            .iter()
            .flat_map(|(_, checkers)| checkers.iter())
            .filter(|c| seen.insert(c.name.clone()))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Keeps only the named checkers; paths left without checkers are dropped.
    ///
    /// An unknown name is an error so that a typo never silently scans nothing.
    pub fn select(&self, names: &[String]) -> Result<Self, CheckerError> {
        let known = self.names();
        if let Some(unknown) = names.iter().find(|n| !known.contains(n)) {
            return Err(CheckerError::Unknown(unknown.clone()));
        }
        let entries = self
            .entries
            .iter()
            .filter_map(|(path, checkers)| {
                let kept: Vec<_> = checkers
                    .iter()
                    .filter(|c| names.contains(&c.name))
                    .cloned()
                    .collect();
                (!kept.is_empty()).then(|| (path.clone(), kept))
            })
            .collect();
        Ok(Self { entries })
    }
}

/// Names selected when `--check` is not given.
pub const DEFAULT_CHECKS: &[&str] = &["git"];

/// Builds the full registry of built-in checkers.
pub fn builtin_checkers(
    fetcher: Arc<dyn HttpFetcher>,
    clone_probe: Option<Arc<dyn CloneProbe>>,
    request_timeout: std::time::Duration,
) -> CheckerMap {
    let git = GitChecker::new(Arc::clone(&fetcher), clone_probe, request_timeout);
    let firestore = FirestoreChecker::new(fetcher, request_timeout);
    CheckerMap::new()
        .register(".git/HEAD", RegisteredChecker::new("git", Arc::new(git)))
        .register("", RegisteredChecker::new("firestore", Arc::new(firestore)))
}

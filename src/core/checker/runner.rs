// src/core/checker/runner.rs

//! Per-path execution of checker plugins.
//!
//! A target is checked by fetching every registered path concurrently and
//! running that path's checkers against the buffered body. Fetches share one
//! cancellation token per target, which is cancelled once the per-target
//! budget elapses. The checkers themselves are never cancelled.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CheckerMap, RegisteredChecker};
use crate::core::fetch::{FetchOptions, HttpFetcher};
use crate::core::models::{CheckOutcome, CheckResult, CheckerContext};
use crate::error::FetchError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(4);
pub const DEFAULT_TARGET_BUDGET: Duration = Duration::from_secs(2);

/// Runs a [`CheckerMap`] against origins.
#[derive(Clone)]
pub struct CheckerRunner {
    fetcher: Arc<dyn HttpFetcher>,
    map: CheckerMap,
    request_timeout: Duration,
    budget: Duration,
}

impl CheckerRunner {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, map: CheckerMap) -> Self {
        Self {
            fetcher,
            map,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            budget: DEFAULT_TARGET_BUDGET,
        }
    }

    pub fn with_timeouts(mut self, request_timeout: Duration, budget: Duration) -> Self {
        self.request_timeout = request_timeout;
        self.budget = budget;
        self
    }

    /// Fetches `url` once and runs every checker in `checkers` against the body.
    ///
    /// A failed fetch (timeout, cancellation, non-2xx) is returned as an error
    /// and no checker is invoked. A checker that errors or panics counts as a
    /// no-match for itself only.
    pub async fn exec_check(
        &self,
        url: &str,
        checkers: &[RegisteredChecker],
        cancel: &CancellationToken,
    ) -> Result<Vec<CheckResult>, FetchError> {
        let options = FetchOptions::with_timeout(self.request_timeout).cancelled_by(cancel.clone());
        let body = self.fetcher.get(url, &options).await?;
        let ctx = CheckerContext {
            url: url.to_string(),
            body: Some(body),
        };

        let runs = checkers.iter().map(|registered| run_isolated(registered, &ctx));
        Ok(join_all(runs).await.into_iter().flatten().collect())
    }

    /// Checks every registered path of `origin` and flattens the successes.
    ///
    /// Paths whose fetch fails contribute nothing. Fetches still pending when
    /// the budget runs out are cancelled.
    pub async fn check_url(&self, origin: &str) -> Vec<CheckResult> {
        let cancel = CancellationToken::new();
        let deadline = tokio::spawn({
            let cancel = cancel.clone();
            let budget = self.budget;
            async move {
                tokio::time::sleep(budget).await;
                cancel.cancel();
            }
        });

        let paths = self.map.paths().map(|(path, checkers)| {
            let url = path_url(origin, path);
            let cancel = &cancel;
            async move {
                match self.exec_check(&url, checkers, cancel).await {
                    Ok(results) => results,
                    Err(err) => {
                        debug!(url = %url, error = %err, "Path yielded no results.");
                        Vec::new()
                    }
                }
            }
        });
        let results: Vec<CheckResult> = join_all(paths).await.into_iter().flatten().collect();

        deadline.abort();
        results
    }
}

async fn run_isolated(registered: &RegisteredChecker, ctx: &CheckerContext) -> Option<CheckResult> {
    let outcome = AssertUnwindSafe(registered.checker.check(ctx)).catch_unwind().await;
    match outcome {
        Ok(Ok(CheckOutcome::Match(meta))) => Some(CheckResult {
            checker: registered.name.clone(),
            meta,
        }),
        Ok(Ok(CheckOutcome::NoMatch)) => None,
        Ok(Err(err)) => {
            warn!(checker = %registered.name, url = %ctx.url, error = %err, "Checker failed.");
            None
        }
        Err(_) => {
            warn!(checker = %registered.name, url = %ctx.url, "Checker panicked.");
            None
        }
    }
}

/// `origin + "/" + path`, tolerating a trailing slash on the origin.
pub fn path_url(origin: &str, path: &str) -> String {
    format!("{}/{}", origin.trim_end_matches('/'), path)
}

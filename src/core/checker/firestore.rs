// src/core/checker/firestore.rs

//! Detects pages that load the Firestore client SDK.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::Checker;
use crate::core::fetch::{FetchOptions, HttpFetcher};
use crate::core::models::{CheckOutcome, CheckerContext, Meta};
use crate::error::CheckerError;

const NEEDLE: &str = "firestore";

pub struct FirestoreChecker {
    fetcher: Arc<dyn HttpFetcher>,
    timeout: Duration,
}

impl FirestoreChecker {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, timeout: Duration) -> Self {
        Self { fetcher, timeout }
    }

    async fn script_mentions_firestore(&self, src: &str) -> bool {
        match self.fetcher.text(src, &FetchOptions::with_timeout(self.timeout)).await {
            Ok(body) => body.contains(NEEDLE),
            Err(err) => {
                debug!(url = src, error = %err, "Script could not be fetched.");
                false
            }
        }
    }
}

#[async_trait]
impl Checker for FirestoreChecker {
    async fn check(&self, ctx: &CheckerContext) -> Result<CheckOutcome, CheckerError> {
        if ctx.body.is_none() {
            return Ok(CheckOutcome::NoMatch);
        }
        // The parsed document is not Send, so it must be gone before any await.
        let sources = script_sources(&ctx.text());

        let found = if sources.iter().any(|src| src.contains(NEEDLE)) {
            true
        } else {
            let urls: Vec<String> = sources.iter().filter_map(|src| resolve(&ctx.url, src)).collect();
            let fetched = join_all(urls.iter().map(|url| self.script_mentions_firestore(url))).await;
            fetched.into_iter().any(|hit| hit)
        };

        if !found {
            return Ok(CheckOutcome::NoMatch);
        }
        let mut meta = Meta::new();
        meta.insert("url".into(), ctx.url.as_str().into());
        Ok(CheckOutcome::Match(meta))
    }
}

/// Every `<script src>` value of an HTML document, in document order.
pub fn script_sources(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut sources = Vec::new();
    if let Ok(selector) = Selector::parse("script[src]") {
        for el in document.select(&selector) {
            if let Some(src) = el.value().attr("src") {
                sources.push(src.trim().to_string());
            }
        }
    }
    sources
}

fn resolve(page: &str, src: &str) -> Option<String> {
    let base = Url::parse(page).ok()?;
    base.join(src).ok().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::StubFetcher;

    fn ctx(body: &str) -> CheckerContext {
        CheckerContext {
            url: "https://app.test/".to_string(),
            body: Some(bytes::Bytes::from(body.to_string())),
        }
    }

    fn checker(fetcher: Arc<StubFetcher>) -> FirestoreChecker {
        FirestoreChecker::new(fetcher, Duration::from_secs(4))
    }

    #[test]
    fn collects_script_sources_only() {
        let html = r#"<html><head><script src="/a.js"></script><script>inline()</script>
            <link href="/style.css"></head><body><script src=" https://cdn.test/b.js "></script></body></html>"#;
        assert_eq!(script_sources(html), vec!["/a.js", "https://cdn.test/b.js"]);
    }

    #[tokio::test]
    async fn src_mentioning_firestore_matches_without_fetching() {
        let fetcher = Arc::new(StubFetcher::default());
        let html = r#"<script src="https://www.gstatic.com/firebasejs/9.0.0/firebase-firestore.js"></script>"#;
        let outcome = checker(fetcher.clone()).check(&ctx(html)).await;
        assert!(outcome.map(|o| o.is_success()).unwrap_or(false));
        assert_eq!(
            fetcher.hits("https://www.gstatic.com/firebasejs/9.0.0/firebase-firestore.js"),
            0
        );
    }

    #[tokio::test]
    async fn relative_script_body_is_inspected() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.respond("https://app.test/static/main.js", "initializeFirestore(app)".to_lowercase());
        fetcher.fail("https://app.test/static/vendor.js", 404);
        let html = r#"<script src="static/vendor.js"></script><script src="static/main.js"></script>"#;

        let outcome = checker(fetcher).check(&ctx(html)).await;
        let meta = match outcome {
            Ok(CheckOutcome::Match(meta)) => meta,
            other => panic!("expected a match, got {other:?}"),
        };
        assert_eq!(meta.get("url"), Some(&"https://app.test/".into()));
    }

    #[tokio::test]
    async fn page_without_firestore_does_not_match() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.respond("https://app.test/app.js", "console.log('hi')");
        let outcome = checker(fetcher).check(&ctx(r#"<script src="/app.js"></script>"#)).await;
        assert_eq!(outcome.ok(), Some(CheckOutcome::NoMatch));
    }
}

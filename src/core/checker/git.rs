// src/core/checker/git.rs

//! Exposed `.git` directory detection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ini::Ini;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use super::Checker;
use super::clone_probe::CloneProbe;
use crate::core::fetch::{FetchOptions, HttpFetcher};
use crate::core::models::{CheckOutcome, CheckerContext, Meta};
use crate::error::CheckerError;

/// Raw `.git/HEAD` content starts with this.
const HEAD_SIGNATURE: &str = "ref:";

static DOT_GIT_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^.*/\.git").unwrap());

/// Matches a readable `.git/HEAD`, then probes the rest of the repository.
///
/// Meta keys: `url`, `directoryExposed`, and when a remote is recovered from
/// `.git/config`, `gitRepo` plus (with a clone probe configured) `cloneable`.
pub struct GitChecker {
    fetcher: Arc<dyn HttpFetcher>,
    clone_probe: Option<Arc<dyn CloneProbe>>,
    timeout: Duration,
}

impl GitChecker {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        clone_probe: Option<Arc<dyn CloneProbe>>,
        timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            clone_probe,
            timeout,
        }
    }

    async fn directory_exposed(&self, dot_git: &str) -> bool {
        match self.fetcher.text(dot_git, &FetchOptions::with_timeout(self.timeout)).await {
            Ok(body) => is_directory_listing(&body),
            Err(err) => {
                debug!(url = dot_git, error = %err, "Git directory listing not available.");
                false
            }
        }
    }

    async fn git_repo(&self, dot_git: &str) -> Option<String> {
        let url = format!("{dot_git}/config");
        match self.fetcher.text(&url, &FetchOptions::with_timeout(self.timeout)).await {
            Ok(body) => origin_remote(&body),
            Err(err) => {
                debug!(url = %url, error = %err, "Git config could not be fetched.");
                None
            }
        }
    }
}

#[async_trait]
impl Checker for GitChecker {
    async fn check(&self, ctx: &CheckerContext) -> Result<CheckOutcome, CheckerError> {
        if !ctx.text().starts_with(HEAD_SIGNATURE) {
            return Ok(CheckOutcome::NoMatch);
        }
        let Some(dot_git) = dot_git_url(&ctx.url) else {
            return Ok(CheckOutcome::NoMatch);
        };

        let (directory_exposed, git_repo) =
            tokio::join!(self.directory_exposed(dot_git), self.git_repo(dot_git));

        let mut meta = Meta::new();
        meta.insert("url".into(), ctx.url.as_str().into());
        meta.insert("directoryExposed".into(), directory_exposed.into());

        if let Some(repo) = git_repo {
            if let Some(probe) = &self.clone_probe {
                let cloneable = probe.is_cloneable(&repo).await;
                meta.insert("cloneable".into(), cloneable.into());
            }
            meta.insert("gitRepo".into(), repo.into());
        }

        Ok(CheckOutcome::Match(meta))
    }
}

/// The URL prefix up to and including the last `/.git` segment.
pub fn dot_git_url(url: &str) -> Option<&str> {
    DOT_GIT_URL.find(url).map(|m| m.as_str())
}

/// An HTML index page with both a `HEAD` and an `index` entry.
pub fn is_directory_listing(body: &str) -> bool {
    if !body.contains("<html") {
        return false;
    }
    let document = Html::parse_document(body);
    let mut anchors = Vec::new();
    if let Ok(selector) = Selector::parse("a") {
        anchors.extend(document.select(&selector).map(|a| a.text().collect::<String>().trim().to_string()));
    }
    anchors.iter().any(|t| t == "HEAD") && anchors.iter().any(|t| t == "index")
}

/// `url` of the `remote "origin"` section of a git config file.
pub fn origin_remote(config: &str) -> Option<String> {
    let parsed = Ini::load_from_str(config).ok()?;
    parsed
        .section(Some("remote \"origin\""))
        .and_then(|section| section.get("url"))
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checker::{CheckerMap, RegisteredChecker};
    use crate::core::checker::runner::CheckerRunner;
    use crate::core::models::MetaValue;
    use crate::core::testing::StubFetcher;
    use std::sync::Mutex;

    const CONFIG: &str = "[core]\n\trepositoryformatversion = 0\n\tbare = false\n\
        [remote \"origin\"]\n\turl = https://github.com/myfastquote/site.git\n\
        \tfetch = +refs/heads/*:refs/remotes/origin/*\n";

    const LISTING: &str = "<html><head><title>Index of /.git</title></head><body>\
        <a href=\"HEAD\">HEAD</a><a href=\"config\">config</a><a href=\"index\">index</a>\
        </body></html>";

    #[derive(Default)]
    struct FakeProbe {
        asked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CloneProbe for FakeProbe {
        async fn is_cloneable(&self, url: &str) -> bool {
            self.asked.lock().unwrap().push(url.to_string());
            true
        }
    }

    fn checker(fetcher: Arc<StubFetcher>, probe: Option<Arc<dyn CloneProbe>>) -> GitChecker {
        GitChecker::new(fetcher, probe, Duration::from_secs(4))
    }

    fn ctx(url: &str, body: &'static str) -> CheckerContext {
        CheckerContext {
            url: url.to_string(),
            body: Some(bytes::Bytes::from_static(body.as_bytes())),
        }
    }

    #[tokio::test]
    async fn empty_or_html_bodies_do_not_match() {
        let git = checker(Arc::new(StubFetcher::default()), None);
        let url = "http://example.com/.git/HEAD";
        assert_eq!(git.check(&ctx(url, "")).await.ok(), Some(CheckOutcome::NoMatch));
        assert_eq!(
            git.check(&ctx(url, "<html><body>Not found</body></html>")).await.ok(),
            Some(CheckOutcome::NoMatch)
        );
    }

    #[tokio::test]
    async fn head_without_auxiliary_files_still_matches() {
        let git = checker(Arc::new(StubFetcher::default()), None);
        let outcome = git
            .check(&ctx("http://example.com/.git/HEAD", "ref: refs/heads/main\n"))
            .await;

        let meta = match outcome {
            Ok(CheckOutcome::Match(meta)) => meta,
            other => panic!("expected a match, got {other:?}"),
        };
        assert_eq!(meta.get("directoryExposed"), Some(&MetaValue::Bool(false)));
        assert!(!meta.contains_key("gitRepo"));
        assert!(!meta.contains_key("cloneable"));
    }

    #[tokio::test]
    async fn exposed_repository_end_to_end() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.respond("http://myfastquote.com/.git/HEAD", "ref: refs/heads/master");
        fetcher.respond("http://myfastquote.com/.git", LISTING);
        fetcher.respond("http://myfastquote.com/.git/config", CONFIG);
        let probe = Arc::new(FakeProbe::default());
        let probe_handle: Arc<dyn CloneProbe> = probe.clone();

        let git = checker(fetcher.clone(), Some(probe_handle));
        let map = CheckerMap::new().register(".git/HEAD", RegisteredChecker::new("git", Arc::new(git)));
        let results = CheckerRunner::new(fetcher, map).check_url("http://myfastquote.com").await;

        assert_eq!(results.len(), 1);
        let meta = &results[0].meta;
        assert_eq!(results[0].checker, "git");
        assert_eq!(
            meta.get("url"),
            Some(&MetaValue::Text("http://myfastquote.com/.git/HEAD".into()))
        );
        assert_eq!(meta.get("directoryExposed"), Some(&MetaValue::Bool(true)));
        assert_eq!(
            meta.get("gitRepo"),
            Some(&MetaValue::Text("https://github.com/myfastquote/site.git".into()))
        );
        assert_eq!(meta.get("cloneable"), Some(&MetaValue::Bool(true)));
        assert_eq!(
            *probe.asked.lock().unwrap(),
            vec!["https://github.com/myfastquote/site.git".to_string()]
        );
    }

    #[test]
    fn dot_git_url_cuts_after_the_segment() {
        assert_eq!(
            dot_git_url("http://a.test/app/.git/HEAD"),
            Some("http://a.test/app/.git")
        );
        assert_eq!(dot_git_url("http://a.test/HEAD"), None);
    }

    #[test]
    fn listing_needs_both_anchors() {
        assert!(is_directory_listing(LISTING));
        assert!(!is_directory_listing("<html><a>HEAD</a></html>"));
        assert!(!is_directory_listing("HEAD index"));
    }

    #[test]
    fn origin_remote_reads_the_ini_section() {
        assert_eq!(
            origin_remote(CONFIG).as_deref(),
            Some("https://github.com/myfastquote/site.git")
        );
        assert_eq!(origin_remote("[core]\n\tbare = false\n"), None);
    }
}

// src/core/domains.rs

//! Origin extraction from WARC text archives.
//!
//! Every line starting with the `WARC-Target-URI: ` record marker yields the
//! origin of the captured URL, `www.`-stripped and lowercased. The pipeline
//! walks a dataset's files under its own small concurrency limit, retrying
//! each file independently.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{error, info};

use crate::core::archive::ArchiveStream;
use crate::core::fetch::{RetryPolicy, retry};
use crate::core::models::Progress;
use crate::error::ArchiveError;

pub const RECORD_MARKER: &str = "WARC-Target-URI: ";

static BASE_DOMAIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(https?)://([\w.]+)/?.*$").unwrap());

/// Extracts the normalized origin from one archive line, if it is a target record.
pub fn extract_origin(line: &str) -> Option<String> {
    let target = line.strip_prefix(RECORD_MARKER)?;
    let caps = BASE_DOMAIN.captures(target.trim())?;
    let scheme = caps.get(1)?.as_str();
    let host = caps.get(2)?.as_str().to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        return None;
    }
    Some(format!("{scheme}://{host}"))
}

/// Origins of every target record in a batch of lines, in line order.
pub fn extract_origins<'a>(lines: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    lines.into_iter().filter_map(|l| extract_origin(l)).collect()
}

/// Callbacks of [`stream_domains`].
#[async_trait]
pub trait DomainHandler: Send + Sync {
    /// Fires once, as soon as the list of archive files is known.
    async fn on_calculated_total(&self, _total: usize) {}

    /// A non-empty batch of origins from one chunk of one file.
    async fn on_domains(&self, domains: Vec<String>);

    /// Fires once per archive file, successful or not.
    async fn on_progress(&self, _progress: Progress) {}
}

/// Which archive files to walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlSource {
    /// Every file listed in the dataset manifest.
    Dataset(String),
    /// An explicit list, usually from a batch descriptor file.
    Files(Vec<String>),
}

#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    /// Files skipped from the head of the list, for resuming an import.
    pub skip: usize,
    pub file_concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            skip: 0,
            file_concurrency: 2,
            retry: RetryPolicy::default(),
        }
    }
}

/// Totals of a finished [`stream_domains`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub files: usize,
    pub failed_files: usize,
    pub domains: u64,
}

/// Streams the origins of every file of `source` into `handler`.
///
/// Only a manifest failure aborts the run. A file whose retries are exhausted
/// is logged and skipped.
pub async fn stream_domains(
    archive: &ArchiveStream,
    source: CrawlSource,
    options: StreamOptions,
    handler: Arc<dyn DomainHandler>,
) -> Result<StreamSummary, ArchiveError> {
    let files = match source {
        CrawlSource::Dataset(dataset) => archive.list_manifest(&dataset).await?,
        CrawlSource::Files(files) => files,
    };
    let total = files.len();
    handler.on_calculated_total(total).await;

    let skip = options.skip.min(total);
    if skip > 0 {
        info!(skip, "Skipping already processed files.");
    }

    let mut summary = StreamSummary::default();
    let mut processed = skip;

    let mut outcomes = futures::stream::iter(files.into_iter().skip(skip))
        .map(|path| {
            let handler = Arc::clone(&handler);
            async move {
                let result = retry(options.retry, &path, |_| process_file(archive, &path, &handler)).await;
                (path, result)
            }
        })
        .buffer_unordered(options.file_concurrency.max(1));

    while let Some((path, result)) = outcomes.next().await {
        match result {
            Ok(domains) => summary.domains += domains,
            Err(err) => {
                summary.failed_files += 1;
                error!(path = %path, error = %err, "Giving up on archive file.");
            }
        }
        summary.files += 1;
        processed += 1;
        handler.on_progress(Progress { processed, total }).await;
    }

    Ok(summary)
}

async fn process_file(
    archive: &ArchiveStream,
    path: &str,
    handler: &Arc<dyn DomainHandler>,
) -> Result<u64, ArchiveError> {
    let mut found = 0u64;
    archive
        .read_file(path, |lines| {
            let domains = extract_origins(&lines);
            found += domains.len() as u64;
            let handler = Arc::clone(handler);
            async move {
                if !domains.is_empty() {
                    handler.on_domains(domains).await;
                }
            }
        })
        .await?;
    Ok(found)
}

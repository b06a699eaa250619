// src/core/crawl.rs

//! Common Crawl endpoints and dataset catalog.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::core::fetch::{FetchOptions, HttpFetcher};
use crate::error::ArchiveError;

pub const DATA_HOST: &str = "https://data.commoncrawl.org";
pub const CATALOG_URL: &str = "https://index.commoncrawl.org/collinfo.json";
pub const CATALOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Alias resolved to the newest catalog entry.
pub const LATEST: &str = "latest";

/// One entry of `collinfo.json`. Newest crawl first.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CrawlInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

pub async fn fetch_catalog(fetcher: &dyn HttpFetcher) -> Result<Vec<CrawlInfo>, ArchiveError> {
    let body = fetcher
        .get(CATALOG_URL, &FetchOptions::with_timeout(CATALOG_TIMEOUT))
        .await?;
    let catalog: Vec<CrawlInfo> = serde_json::from_slice(&body)?;
    debug!(datasets = catalog.len(), "Fetched Common Crawl catalog.");
    Ok(catalog)
}

/// Resolves `latest` and validates any other id against the catalog.
pub fn resolve_dataset(catalog: &[CrawlInfo], requested: &str) -> Result<String, ArchiveError> {
    if requested == LATEST {
        let newest = catalog.first().ok_or(ArchiveError::EmptyCatalog)?;
        info!(dataset = %newest.id, "Resolved latest Common Crawl dataset.");
        return Ok(newest.id.clone());
    }
    catalog
        .iter()
        .find(|info| info.id == requested)
        .map(|info| info.id.clone())
        .ok_or_else(|| ArchiveError::UnknownDataset(requested.to_string()))
}

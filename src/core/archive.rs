// src/core/archive.rs

//! Streaming gzip text files from a remote dataset.
//!
//! Bodies are decompressed as they arrive and split into lines. A line that
//! straddles two chunks is carried over and completed by the next chunk, and
//! a final unterminated line is flushed at end of stream.

use std::future::Future;
use std::io;
use std::sync::Arc;

use async_compression::tokio::bufread::GzipDecoder;
use futures::TryStreamExt;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use crate::core::fetch::HttpFetcher;
use crate::error::ArchiveError;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Reassembles logical lines from arbitrarily split byte chunks.
///
/// `\r` is stripped and empty lines are skipped. Works on bytes so that a
/// multi-byte UTF-8 sequence split across chunks is decoded intact.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    /// Feeds one chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        complete
            .split(|b| *b == b'\n')
            .filter_map(decode_line)
            .collect()
    }

    /// Returns the trailing partial line, if any.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest)
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let line: String = String::from_utf8_lossy(raw).chars().filter(|c| *c != '\r').collect();
    (!line.is_empty()).then_some(line)
}

/// Fetches and decompresses gzip text files relative to a base URL.
#[derive(Clone)]
pub struct ArchiveStream {
    fetcher: Arc<dyn HttpFetcher>,
    base_url: String,
}

impl ArchiveStream {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Fetches the manifest of `dataset`: one archive path per line, in order.
    pub async fn list_manifest(&self, dataset: &str) -> Result<Vec<String>, ArchiveError> {
        let path = manifest_path(dataset);
        let mut files = Vec::new();
        self.read_file(&path, |lines| {
            files.extend(lines);
            async {}
        })
        .await?;
        info!(dataset, files = files.len(), "Fetched dataset manifest.");
        Ok(files)
    }

    /// Streams one gzip file, calling `on_lines` with each batch of complete lines.
    ///
    /// Concatenated gzip members (as Common Crawl writes them) are decoded as
    /// one stream. Returns the number of lines delivered.
    pub async fn read_file<F, Fut>(&self, path: &str, mut on_lines: F) -> Result<u64, ArchiveError>
    where
        F: FnMut(Vec<String>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let url = self.url_for(path);
        debug!(url = %url, "Opening archive stream.");
        let body = self.fetcher.stream(&url).await?;

        let reader = StreamReader::new(body.map_err(io::Error::other));
        let mut decoder = GzipDecoder::new(reader);
        decoder.multiple_members(true);

        let mut assembler = LineAssembler::default();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut delivered = 0u64;

        loop {
            let read = decoder.read(&mut buffer).await.map_err(|source| ArchiveError::Decompress {
                path: path.to_string(),
                source,
            })?;
            if read == 0 {
                break;
            }
            let lines = assembler.push(&buffer[..read]);
            if !lines.is_empty() {
                delivered += lines.len() as u64;
                on_lines(lines).await;
            }
        }

        if let Some(last) = assembler.finish() {
            delivered += 1;
            on_lines(vec![last]).await;
        }
        debug!(url = %url, lines = delivered, "Archive stream finished.");
        Ok(delivered)
    }
}

/// Manifest location of a dataset, relative to the data host.
pub fn manifest_path(dataset: &str) -> String {
    format!("crawl-data/{dataset}/wet.paths.gz")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{StubFetcher, gzip};

    #[test]
    fn line_split_across_chunks_is_rebuilt_once() {
        let mut assembler = LineAssembler::default();
        assert!(assembler.push(b"WARC-Target-U").is_empty());
        let lines = assembler.push(b"RI: http://example.com/page\n");
        assert_eq!(lines, vec!["WARC-Target-URI: http://example.com/page".to_string()]);
        assert_eq!(assembler.finish(), None);
    }

    #[test]
    fn crlf_and_blank_lines_are_dropped() {
        let mut assembler = LineAssembler::default();
        let lines = assembler.push(b"a\r\n\r\nb\nc");
        assert_eq!(lines, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(assembler.finish(), Some("c".to_string()));
    }

    #[test]
    fn split_multibyte_character_survives() {
        let mut assembler = LineAssembler::default();
        let word = "caf\u{e9}\n".as_bytes();
        assert!(assembler.push(&word[..4]).is_empty());
        assert_eq!(assembler.push(&word[4..]), vec!["caf\u{e9}".to_string()]);
    }

    #[tokio::test]
    async fn read_file_flushes_final_line_without_newline() {
        let fetcher = Arc::new(StubFetcher::default());
        let body = gzip(b"first\nsecond\nthird");
        fetcher.stream_chunked("https://data.test/a.gz", body, 5);

        let archive = ArchiveStream::new(fetcher, "https://data.test/");
        let mut lines = Vec::new();
        let delivered = archive
            .read_file("a.gz", |batch| {
                lines.extend(batch);
                async {}
            })
            .await;

        assert_eq!(delivered.ok(), Some(3));
        assert_eq!(lines, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn concatenated_members_decode_as_one_stream() {
        let fetcher = Arc::new(StubFetcher::default());
        let mut body = gzip(b"one\ntw");
        body.extend(gzip(b"o\nthree\n"));
        fetcher.stream_chunked("https://data.test/multi.gz", body, 7);

        let archive = ArchiveStream::new(fetcher, "https://data.test");
        let mut lines = Vec::new();
        let result = archive
            .read_file("multi.gz", |batch| {
                lines.extend(batch);
                async {}
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn manifest_lists_paths_in_order() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.stream_chunked(
            "https://data.test/crawl-data/CC-MAIN-2024-10/wet.paths.gz",
            gzip(b"p/1.warc.wet.gz\np/2.warc.wet.gz\n"),
            3,
        );
        let archive = ArchiveStream::new(fetcher, "https://data.test");
        let files = archive.list_manifest("CC-MAIN-2024-10").await;
        assert_eq!(
            files.ok(),
            Some(vec!["p/1.warc.wet.gz".to_string(), "p/2.warc.wet.gz".to_string()])
        );
    }

    #[tokio::test]
    async fn corrupt_body_is_a_decompress_error() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.stream_chunked("https://data.test/bad.gz", b"definitely not gzip".to_vec(), 4);
        let archive = ArchiveStream::new(fetcher, "https://data.test");
        let result = archive.read_file("bad.gz", |_| async {}).await;
        assert!(matches!(result, Err(ArchiveError::Decompress { .. })));
    }
}

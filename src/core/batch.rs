// src/core/batch.rs

//! Batch descriptors for splitting long runs across machines.
//!
//! The `prepare` commands print or write these; the `scan` and `import`
//! commands consume them through `--from-batch-file` and `--batch-id`.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::BatchError;

const IPV4_SPACE: u64 = 1 << 32;

/// Contents of a `--from-batch-file`: a flat file list, or a list of batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchFile {
    Batched(Vec<Vec<String>>),
    Flat(Vec<String>),
}

impl BatchFile {
    pub async fn load(path: &Path) -> Result<Self, BatchError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|source| BatchError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// The files of batch `batch_id`, or every file when no id is given.
    pub fn select(self, batch_id: Option<usize>) -> Result<Vec<String>, BatchError> {
        match (self, batch_id) {
            (BatchFile::Flat(files), None) => Ok(files),
            (BatchFile::Flat(_), Some(id)) => Err(BatchError::NotBatched { id }),
            (BatchFile::Batched(batches), None) => Ok(batches.into_iter().flatten().collect()),
            (BatchFile::Batched(mut batches), Some(id)) => {
                let len = batches.len();
                if id >= len {
                    return Err(BatchError::OutOfRange { id, len });
                }
                Ok(batches.swap_remove(id))
            }
        }
    }
}

/// One contiguous slice of the IPv4 space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Batch {
    pub name: String,
    pub from: Ipv4Addr,
    pub to: Ipv4Addr,
}

/// Splits `0.0.0.0..=255.255.255.255` into `batches` contiguous, gap-free ranges.
pub fn split_ipv4(batches: u32) -> Result<Vec<Ipv4Batch>, BatchError> {
    if batches == 0 {
        return Err(BatchError::ZeroBatches);
    }
    let n = u64::from(batches);
    let bound = |i: u64| -> u32 { u32::try_from(i * IPV4_SPACE / n).unwrap_or(u32::MAX) };
    Ok((0..n)
        .map(|i| {
            let from = bound(i);
            let to = if i + 1 == n { u32::MAX } else { bound(i + 1) - 1 };
            Ipv4Batch {
                name: format!("batch-{i}"),
                from: Ipv4Addr::from(from),
                to: Ipv4Addr::from(to),
            }
        })
        .collect())
}

/// Entry of the `describe-<output>` file written next to a chunked file list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDescriptor {
    pub name: String,
    pub batch_id: usize,
}

pub fn describe(batches: usize) -> Vec<BatchDescriptor> {
    (0..batches)
        .map(|i| BatchDescriptor {
            name: format!("batch-{i}"),
            batch_id: i,
        })
        .collect()
}

/// Path of the descriptor file for `output`: same directory, `describe-` prefix.
pub fn descriptor_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!("describe-{name}"))
}

/// Writes `files` to `output`, chunked by `split_every` when given.
///
/// Chunked lists also get a descriptor file, which is returned.
pub async fn write_file_list(
    output: &Path,
    files: Vec<String>,
    split_every: Option<usize>,
) -> Result<Option<Vec<BatchDescriptor>>, BatchError> {
    match split_every {
        Some(every) if every > 0 => {
            let chunks: Vec<Vec<String>> = files.chunks(every).map(<[String]>::to_vec).collect();
            let descriptors = describe(chunks.len());
            write_json(output, &BatchFile::Batched(chunks)).await?;
            write_json(&descriptor_path(output), &descriptors).await?;
            info!(output = %output.display(), batches = descriptors.len(), "Wrote batched file list.");
            Ok(Some(descriptors))
        }
        _ => {
            info!(output = %output.display(), files = files.len(), "Wrote file list.");
            write_json(output, &BatchFile::Flat(files)).await?;
            Ok(None)
        }
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), BatchError> {
    let body = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, body).await.map_err(|source| BatchError::Write {
        path: path.display().to_string(),
        source,
    })
}

/// An inclusive window of record offsets in a target store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordWindow {
    pub name: String,
    pub from: u64,
    pub to: u64,
}

impl RecordWindow {
    /// `--skip` / `--read` pair covering this window.
    pub fn skip_read(&self) -> (u64, u64) {
        (self.from, self.to - self.from + 1)
    }
}

/// Splits `count` records into at most `batches` windows of `ceil(count / batches)`.
pub fn split_records(count: u64, batches: u64) -> Result<Vec<RecordWindow>, BatchError> {
    if batches == 0 {
        return Err(BatchError::ZeroBatches);
    }
    let size = count.div_ceil(batches);
    Ok((0..batches)
        .take_while(|i| i * size < count)
        .map(|i| RecordWindow {
            name: format!("batch-{i}"),
            from: i * size,
            to: ((i + 1) * size - 1).min(count - 1),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_batches_cover_the_space_without_gaps() {
        let batches = split_ipv4(3).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].from, Ipv4Addr::UNSPECIFIED);
        assert_eq!(batches[2].to, Ipv4Addr::BROADCAST);
        for pair in batches.windows(2) {
            assert_eq!(u32::from(pair[0].to) + 1, u32::from(pair[1].from));
        }
        assert_eq!(batches[1].name, "batch-1");
    }

    #[test]
    fn single_ipv4_batch_is_everything() {
        let batches = split_ipv4(1).unwrap();
        assert_eq!((batches[0].from, batches[0].to), (Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST));
        assert!(matches!(split_ipv4(0), Err(BatchError::ZeroBatches)));
    }

    #[test]
    fn batch_file_shapes() {
        let flat: BatchFile = serde_json::from_str(r#"["a.gz", "b.gz"]"#).unwrap();
        assert_eq!(flat.clone().select(None).unwrap(), vec!["a.gz", "b.gz"]);
        assert!(matches!(flat.select(Some(0)), Err(BatchError::NotBatched { id: 0 })));

        let batched: BatchFile = serde_json::from_str(r#"[["a.gz"], ["b.gz", "c.gz"]]"#).unwrap();
        assert_eq!(batched.clone().select(Some(1)).unwrap(), vec!["b.gz", "c.gz"]);
        assert!(matches!(
            batched.clone().select(Some(2)),
            Err(BatchError::OutOfRange { id: 2, len: 2 })
        ));
        assert_eq!(batched.select(None).unwrap().len(), 3);
    }

    #[test]
    fn record_windows_use_ceiling_division() {
        let windows = split_records(10, 3).unwrap();
        let bounds: Vec<(u64, u64)> = windows.iter().map(|w| (w.from, w.to)).collect();
        assert_eq!(bounds, vec![(0, 3), (4, 7), (8, 9)]);
        assert_eq!(windows[2].skip_read(), (8, 2));

        // Fewer records than batches yields fewer windows.
        assert_eq!(split_records(2, 5).unwrap().len(), 2);
        assert!(split_records(0, 4).unwrap().is_empty());
    }

    #[tokio::test]
    async fn chunked_list_writes_descriptor_next_to_it() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("files.json");
        let files: Vec<String> = (0..5).map(|i| format!("f{i}.gz")).collect();

        let descriptors = write_file_list(&output, files, Some(2)).await.unwrap();
        assert_eq!(descriptors.as_ref().map(Vec::len), Some(3));

        let written = BatchFile::load(&output).await.unwrap();
        assert_eq!(written.select(Some(2)).unwrap(), vec!["f4.gz"]);

        let raw = std::fs::read_to_string(dir.path().join("describe-files.json")).unwrap();
        let parsed: Vec<BatchDescriptor> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed[1], BatchDescriptor { name: "batch-1".into(), batch_id: 1 });
        assert!(raw.contains("\"batchId\""));
    }
}

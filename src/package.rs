//! Output packaging: one `.txt` file per document, optionally zipped.
//!
//! Text files are written atomically (temp file + rename) so a crash never
//! leaves a half-written document behind. Archives are flat, one entry per
//! `<file_id>.txt`, entries sorted by name and stamped with a fixed
//! timestamp, so the same batch always produces byte-identical bytes.

use crate::error::Sheet2MdError;
use crate::output::BatchResult;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Extension used for every written document.
pub const TEXT_EXTENSION: &str = "txt";

enum Location {
    /// Removed when the packager is dropped.
    Staging(TempDir),
    Persistent(PathBuf),
}

/// Writes documents into a directory and bundles them into a zip.
pub struct OutputPackager {
    location: Location,
}

impl OutputPackager {
    /// Package into a fresh temporary directory, removed once the packager
    /// is dropped or consumed by [`OutputPackager::archive`].
    pub fn staging() -> Result<Self, Sheet2MdError> {
        let dir = tempfile::Builder::new()
            .prefix("sheet2md-")
            .tempdir()
            .map_err(|e| Sheet2MdError::Internal(format!("staging dir: {e}")))?;
        Ok(Self {
            location: Location::Staging(dir),
        })
    }

    /// Package into `dir`, creating it if needed. Files stay after drop.
    pub async fn in_dir(dir: impl Into<PathBuf>) -> Result<Self, Sheet2MdError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Sheet2MdError::OutputWriteFailed {
                path: dir.clone(),
                source: e,
            })?;
        Ok(Self {
            location: Location::Persistent(dir),
        })
    }

    pub fn dir(&self) -> &Path {
        match &self.location {
            Location::Staging(tmp) => tmp.path(),
            Location::Persistent(dir) => dir,
        }
    }

    /// Write `text` to `<dir>/<file_id>.txt` and return the path.
    pub async fn write(&self, file_id: &str, text: &str) -> Result<PathBuf, Sheet2MdError> {
        let path = self.dir().join(format!("{file_id}.{TEXT_EXTENSION}"));
        let tmp_path = path.with_extension("txt.tmp");

        tokio::fs::write(&tmp_path, text)
            .await
            .map_err(|e| Sheet2MdError::OutputWriteFailed {
                path: tmp_path.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| Sheet2MdError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;

        debug!("Wrote {} ({} bytes)", path.display(), text.len());
        Ok(path)
    }

    /// Write every document of `batch`, in `file_id` order.
    pub async fn write_batch(&self, batch: &BatchResult) -> Result<Vec<PathBuf>, Sheet2MdError> {
        let mut locations = Vec::with_capacity(batch.len());
        for doc in batch.iter() {
            locations.push(self.write(&doc.file_id, &doc.text).await?);
        }
        Ok(locations)
    }

    /// Zip the files at `locations` into an in-memory archive.
    ///
    /// Consumes the packager: a staging directory is cleaned up once the
    /// archive bytes exist.
    pub async fn archive(self, locations: &[PathBuf]) -> Result<Vec<u8>, Sheet2MdError> {
        let mut entries = Vec::with_capacity(locations.len());
        for path in locations {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    Sheet2MdError::ArchiveFailed(format!("no file name in '{}'", path.display()))
                })?;
            let bytes = tokio::fs::read(path).await.map_err(|e| {
                Sheet2MdError::ArchiveFailed(format!("{}: {e}", path.display()))
            })?;
            entries.push((name, bytes));
        }

        let archive = tokio::task::spawn_blocking(move || build_archive(entries))
            .await
            .map_err(|e| Sheet2MdError::Internal(format!("archive task panicked: {e}")))??;

        info!("Archived {} file(s), {} bytes", locations.len(), archive.len());
        Ok(archive)
    }
}

/// Build a flat zip from `(entry name, contents)` pairs.
///
/// Entries are sorted by name; every entry gets the same timestamp and
/// permissions.
pub fn build_archive(mut entries: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>, Sheet2MdError> {
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        writer
            .start_file(name.as_str(), entry_options())
            .map_err(|e| Sheet2MdError::ArchiveFailed(format!("{name}: {e}")))?;
        writer
            .write_all(&bytes)
            .map_err(|e| Sheet2MdError::ArchiveFailed(format!("{name}: {e}")))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| Sheet2MdError::ArchiveFailed(e.to_string()))?;
    Ok(cursor.into_inner())
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644)
}

/// Stage every document of `batch` and return the zip bytes.
pub async fn package_batch(batch: &BatchResult) -> Result<Vec<u8>, Sheet2MdError> {
    let packager = OutputPackager::staging()?;
    let locations = packager.write_batch(batch).await?;
    packager.archive(&locations).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{aggregate, ExtractionResult, FileOutput, PageOutcome};
    use std::io::Read;

    fn batch(docs: &[(&str, &[&str])]) -> BatchResult {
        let mut batch = BatchResult::default();
        for (id, pages) in docs {
            let results = pages
                .iter()
                .enumerate()
                .map(|(i, t)| ExtractionResult {
                    file_id: id.to_string(),
                    page_index: i,
                    outcome: PageOutcome::Extracted(t.to_string()),
                })
                .collect();
            batch.insert(FileOutput::from_aggregated(
                format!("{id}.pdf"),
                aggregate(id, results),
            ));
        }
        batch
    }

    fn entries(archive: &[u8]) -> Vec<(String, String)> {
        let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
        (0..zip.len())
            .map(|i| {
                let mut f = zip.by_index(i).unwrap();
                let mut s = String::new();
                f.read_to_string(&mut s).unwrap();
                (f.name().to_string(), s)
            })
            .collect()
    }

    #[tokio::test]
    async fn write_is_atomic_and_named_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        let packager = OutputPackager::in_dir(tmp.path().join("out")).await.unwrap();
        let path = packager.write("A", "PAGE0\n---\n").await.unwrap();

        assert_eq!(path, tmp.path().join("out").join("A.txt"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "PAGE0\n---\n");
        assert!(!tmp.path().join("out").join("A.txt.tmp").exists());
    }

    #[tokio::test]
    async fn archive_has_one_flat_entry_per_document() {
        let bytes = package_batch(&batch(&[("B", &["b0"]), ("A", &["a0", "a1"])]))
            .await
            .unwrap();
        assert_eq!(
            entries(&bytes),
            vec![
                ("A.txt".to_string(), "a0\n---\na1\n---\n".to_string()),
                ("B.txt".to_string(), "b0\n---\n".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn identical_batches_give_identical_archives() {
        let b = batch(&[("x", &["1"]), ("y", &["2", "3"])]);
        let first = package_batch(&b).await.unwrap();
        let second = package_batch(&b).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn staging_dir_removed_after_archive() {
        let packager = OutputPackager::staging().unwrap();
        let dir = packager.dir().to_path_buf();
        let loc = packager.write("a", "x").await.unwrap();
        packager.archive(&[loc]).await.unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn missing_location_is_an_archive_error() {
        let packager = OutputPackager::staging().unwrap();
        let missing = packager.dir().join("nope.txt");
        let err = packager.archive(&[missing]).await.unwrap_err();
        assert!(matches!(err, Sheet2MdError::ArchiveFailed(_)));
    }

    #[test]
    fn empty_archive_is_valid() {
        let bytes = build_archive(Vec::new()).unwrap();
        assert!(entries(&bytes).is_empty());
    }
}

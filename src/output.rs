//! Data model flowing through the batch pipeline, and page aggregation.
//!
//! ```text
//! PageUnit ──▶ ExtractionResult ──▶ AggregatedDocument ──▶ FileOutput ──▶ BatchResult
//! (image)      (tagged outcome)     (text + markers)      (maybe optimized)
//! ```
//!
//! A failed page stays a typed [`PageOutcome::Failed`] until [`aggregate`]
//! serialises it; that is the only place an error marker enters the text.

use crate::error::{PageError, RenderError};
use image::DynamicImage;
use serde::Serialize;
use std::collections::BTreeMap;

/// Marker appended after every page in an aggregated document.
///
/// A file with P pages therefore contains exactly P markers.
pub const PAGE_BREAK: &str = "\n---\n";

/// One rasterised page awaiting extraction.
pub struct PageUnit {
    pub file_id: String,
    /// 0-based, in renderer order.
    pub page_index: usize,
    pub image: DynamicImage,
}

/// What came back for one page.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum PageOutcome {
    Extracted(String),
    Failed(PageError),
}

impl PageOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, PageOutcome::Failed(_))
    }

    /// Serialise this outcome for the page at `page_index` (0-based).
    pub fn render(&self, page_index: usize) -> String {
        match self {
            PageOutcome::Extracted(text) => text.clone(),
            PageOutcome::Failed(err) => page_failure_marker(page_index, err),
        }
    }
}

/// The resolved extraction for one (file, page) key.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub file_id: String,
    pub page_index: usize,
    pub outcome: PageOutcome,
}

/// All pages of one file, concatenated in page order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedDocument {
    pub file_id: String,
    pub text: String,
    pub page_count: usize,
    pub failed_pages: usize,
}

/// Delimited marker standing in for a failed page (`page_index` 0-based).
pub fn page_failure_marker(page_index: usize, err: &PageError) -> String {
    format!("[[page {} failed: {}]]", page_index + 1, err.marker_message())
}

/// Whole-document text for a file that could not be rendered.
pub fn render_failure_document(err: &RenderError) -> String {
    format!("[[conversion failed: {err}]]\n")
}

/// Concatenate a file's results in ascending `page_index` order.
///
/// Arrival order is irrelevant: results are sorted by key before joining.
/// Each page is followed by [`PAGE_BREAK`]; zero pages yield an empty string.
pub fn aggregate(file_id: &str, mut results: Vec<ExtractionResult>) -> AggregatedDocument {
    debug_assert!(results.iter().all(|r| r.file_id == file_id));
    results.sort_by_key(|r| r.page_index);

    let mut text = String::new();
    for r in &results {
        text.push_str(&r.outcome.render(r.page_index));
        text.push_str(PAGE_BREAK);
    }

    AggregatedDocument {
        file_id: file_id.to_string(),
        text,
        page_count: results.len(),
        failed_pages: results.iter().filter(|r| r.outcome.is_failed()).count(),
    }
}

/// Result of the optional optimization pass for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum OptimizationStatus {
    /// Optimization disabled for this batch.
    NotRequested,
    /// The optimizer's output replaced the aggregated text.
    Applied,
    /// The optimizer call failed; the aggregated text was kept.
    FellBack(String),
    /// Nothing to optimize (the file failed to render).
    Skipped,
}

/// Final text for one input file, plus what happened on the way.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutput {
    pub file_id: String,
    /// Upload or file name as received.
    pub source_name: String,
    pub text: String,
    pub page_count: usize,
    pub failed_pages: usize,
    pub render_error: Option<RenderError>,
    pub optimization: OptimizationStatus,
}

impl FileOutput {
    /// An explicit error document for a file that never produced pages.
    pub fn render_failed(file_id: String, source_name: String, err: RenderError) -> Self {
        Self {
            file_id,
            source_name,
            text: render_failure_document(&err),
            page_count: 0,
            failed_pages: 0,
            render_error: Some(err),
            optimization: OptimizationStatus::Skipped,
        }
    }

    /// Wrap an aggregated document before any optimization.
    pub fn from_aggregated(source_name: String, doc: AggregatedDocument) -> Self {
        Self {
            file_id: doc.file_id,
            source_name,
            text: doc.text,
            page_count: doc.page_count,
            failed_pages: doc.failed_pages,
            render_error: None,
            optimization: OptimizationStatus::NotRequested,
        }
    }

    /// True when the file failed to render or any page failed.
    pub fn has_failures(&self) -> bool {
        self.render_error.is_some() || self.failed_pages > 0
    }
}

/// Every file of a batch keyed by `file_id`, ready for packaging.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub documents: BTreeMap<String, FileOutput>,
}

impl BatchResult {
    pub fn insert(&mut self, output: FileOutput) {
        debug_assert!(
            !self.documents.contains_key(&output.file_id),
            "file ids are unique within a batch"
        );
        self.documents.insert(output.file_id.clone(), output);
    }

    pub fn get(&self, file_id: &str) -> Option<&FileOutput> {
        self.documents.get(file_id)
    }

    pub fn text(&self, file_id: &str) -> Option<&str> {
        self.get(file_id).map(|d| d.text.as_str())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileOutput> {
        self.documents.values()
    }

    /// Files that failed to render.
    pub fn failed_files(&self) -> usize {
        self.iter().filter(|d| d.render_error.is_some()).count()
    }
}

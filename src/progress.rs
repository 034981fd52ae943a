//! Progress-callback trait for per-file and per-page batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the orchestrator renders files and resolves pages. The CLI uses
//! it to drive a progress bar; the server leaves it unset.
//!
//! # Example
//!
//! ```rust
//! use sheet2md::{BatchProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     pages: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, file_id: &str, page_index: usize, _text_len: usize) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{file_id}: page {} done", page_index + 1);
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { pages: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes a batch.
///
/// Pages of all files resolve concurrently, so every method may be called
/// from several tasks at once. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any file is rendered.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a file has been rasterised into `pages` page images.
    fn on_file_rendered(&self, file_id: &str, pages: usize) {
        let _ = (file_id, pages);
    }

    /// Called when a file could not be rasterised at all.
    fn on_file_failed(&self, file_id: &str, error: &str) {
        let _ = (file_id, error);
    }

    /// Called when a page's extraction call returned text.
    fn on_page_complete(&self, file_id: &str, page_index: usize, text_len: usize) {
        let _ = (file_id, page_index, text_len);
    }

    /// Called when a page's extraction call failed (after retries).
    fn on_page_error(&self, file_id: &str, page_index: usize, error: &str) {
        let _ = (file_id, page_index, error);
    }

    /// Called when a file's final text is ready.
    fn on_file_complete(&self, file_id: &str, failed_pages: usize) {
        let _ = (file_id, failed_pages);
    }

    /// Called once after every file has completed.
    fn on_batch_complete(&self, total_files: usize, failed_files: usize) {
        let _ = (total_files, failed_files);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

//! Streaming conversion API: emit documents as they complete.
//!
//! [`crate::convert::Converter::convert_batch`] returns only once every file
//! is done. [`Converter::convert_stream`] yields each [`FileOutput`] as soon
//! as that file's pages have all come back (and its optimization pass, when
//! enabled), so callers can write or upload finished documents while larger
//! files are still in flight.
//!
//! Documents arrive in completion order. Text inside each document is always
//! in page order.

use crate::convert::Converter;
use crate::output::FileOutput;
use crate::pipeline::input::{assign_file_ids, SourceFile};
use futures::stream::FuturesUnordered;
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of finished documents.
pub type DocumentStream = Pin<Box<dyn Stream<Item = FileOutput> + Send>>;

impl Converter {
    /// Start converting `files`, yielding each document when it is done.
    ///
    /// File ids are assigned up front, so duplicates within `files` are
    /// disambiguated the same way [`Converter::convert_batch`] does it.
    ///
    /// # Example
    /// ```rust,no_run
    /// use futures::StreamExt;
    /// use sheet2md::{Converter, SourceFile};
    ///
    /// # async fn run(converter: Converter, files: Vec<SourceFile>) {
    /// let mut docs = converter.convert_stream(files);
    /// while let Some(doc) = docs.next().await {
    ///     println!("{}: {} page(s)", doc.file_id, doc.page_count);
    /// }
    /// # }
    /// ```
    pub fn convert_stream(&self, files: Vec<SourceFile>) -> DocumentStream {
        info!("Starting batch: {} file(s)", files.len());
        if let Some(ref cb) = self.config().progress_callback {
            cb.on_batch_start(files.len());
        }

        let ids = assign_file_ids(files.iter().map(|f| f.name.as_str()));
        let in_flight: FuturesUnordered<_> = ids
            .into_iter()
            .zip(files)
            .map(|(file_id, file)| {
                let converter = self.clone();
                async move { converter.convert_file(file_id, file).await }
            })
            .collect();

        Box::pin(in_flight)
    }
}

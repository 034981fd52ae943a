//! Batch conversion: the fan-out/fan-in orchestrator.
//!
//! ## Shape of a batch
//!
//! ```text
//! files ──▶ assign file ids
//!   │
//!   ├─ file A ─ render+encode (blocking) ─┬─ page 0 ─ model ─┐
//!   │                                     ├─ page 1 ─ model ─┼─ barrier A ─ aggregate ─ optimize? ─┐
//!   │                                     └─ page 2 ─ model ─┘                                    │
//!   └─ file B ─ render+encode (blocking) ─── page 0 ─ model ─── barrier B ─ aggregate ─ optimize? ─┴─ BatchResult
//! ```
//!
//! Each file has its own barrier: a slow page in file A holds back only
//! file A. Files are joined only when the caller collects the whole batch.
//! Page order is reconstructed from `page_index` at aggregation time, never
//! from arrival order. One semaphore, sized by
//! [`ConversionConfig::concurrency`], bounds every model call the converter
//! makes, extraction and optimization alike.

use crate::config::{ConversionConfig, ModelBackend};
use crate::error::{PageError, RenderError, Sheet2MdError};
use crate::output::{aggregate, BatchResult, ExtractionResult, FileOutput, PageOutcome, PageUnit};
use crate::pipeline::encode::encode_page;
use crate::pipeline::input::{file_id_from_name, list_pdfs, read_local, SourceFile};
use crate::pipeline::llm::{build_client, process_page, ModelClient};
use crate::pipeline::optimize::optimize_document;
use crate::pipeline::render::{check_pdf_magic, PageRenderer, RenderOptions};
use crate::pipeline::request::{build_extraction_request, ChatRequest, ExtractionRequest};
use futures::future::join_all;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// A page ready for dispatch, or the reason it never got that far.
enum PreparedPage {
    Ready {
        page_index: usize,
        request: ChatRequest,
    },
    EncodeFailed {
        page_index: usize,
        error: PageError,
    },
}

/// Drives batches of PDFs through render → extract → aggregate → optimize.
///
/// Cheap to clone; clones share the model client, renderer and the
/// concurrency bound.
#[derive(Clone)]
pub struct Converter {
    client: Arc<dyn ModelClient>,
    renderer: Arc<dyn PageRenderer>,
    config: Arc<ConversionConfig>,
    permits: Arc<Semaphore>,
}

impl Converter {
    pub fn new(
        client: Arc<dyn ModelClient>,
        renderer: Arc<dyn PageRenderer>,
        config: ConversionConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency));
        Self {
            client,
            renderer,
            config: Arc::new(config),
            permits,
        }
    }

    /// Build the model client for `backend` and wrap it.
    pub fn from_backend(
        backend: &ModelBackend,
        renderer: Arc<dyn PageRenderer>,
        config: ConversionConfig,
    ) -> Result<Self, Sheet2MdError> {
        let client = build_client(backend, &config)?;
        Ok(Self::new(client, renderer, config))
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Convert every file and wait for all of them.
    ///
    /// Never fails as a whole: unreadable PDFs become error documents and
    /// failed pages become in-band markers.
    pub async fn convert_batch(&self, files: Vec<SourceFile>) -> BatchResult {
        let start = Instant::now();
        let total = files.len();
        let mut batch = BatchResult::default();

        let mut outputs = self.convert_stream(files);
        while let Some(output) = outputs.next().await {
            batch.insert(output);
        }

        let failed = batch.failed_files();
        info!(
            "Batch complete: {} file(s), {} failed to render, {}ms",
            total,
            failed,
            start.elapsed().as_millis()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_complete(total, failed);
        }
        batch
    }

    /// Convert one upload on its own.
    pub async fn convert_single(&self, file: SourceFile) -> FileOutput {
        let file_id = file_id_from_name(&file.name);
        self.convert_file(file_id, file).await
    }

    /// Read local PDFs and convert them as one batch.
    ///
    /// A file that cannot be read is fatal: it is an I/O failure, not a
    /// conversion failure.
    pub async fn convert_paths(&self, paths: &[PathBuf]) -> Result<BatchResult, Sheet2MdError> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(read_local(path).await?);
        }
        Ok(self.convert_batch(files).await)
    }

    /// Convert every `*.pdf` directly inside `dir`.
    ///
    /// `dir` must already be validated by the caller; see
    /// [`crate::pipeline::input::resolve_sandboxed_dir`].
    pub async fn convert_directory(&self, dir: &Path) -> Result<BatchResult, Sheet2MdError> {
        let paths = list_pdfs(dir).await?;
        self.convert_paths(&paths).await
    }

    /// Full pipeline for one file under an already-assigned `file_id`.
    pub async fn convert_file(&self, file_id: String, source: SourceFile) -> FileOutput {
        let start = Instant::now();
        let SourceFile { name, bytes } = source;
        info!("Converting '{}' as '{}'", name, file_id);

        // ── Render + encode ──────────────────────────────────────────────
        let pages = match self.prepare(&file_id, bytes).await {
            Ok(pages) => pages,
            Err(err) => {
                warn!("'{}' failed to render: {}", file_id, err);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_file_failed(&file_id, &err.to_string());
                }
                return FileOutput::render_failed(file_id, name, err);
            }
        };
        debug!("'{}': {} page(s) prepared", file_id, pages.len());
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_file_rendered(&file_id, pages.len());
        }

        // ── Fan out, then this file's barrier ────────────────────────────
        let results = join_all(pages.into_iter().map(|page| self.extract(&file_id, page))).await;

        // ── Aggregate in page order ──────────────────────────────────────
        let doc = aggregate(&file_id, results);
        let mut output = FileOutput::from_aggregated(name, doc);

        // ── Optional optimization ────────────────────────────────────────
        if self.config.optimize {
            output =
                optimize_document(self.client.as_ref(), &self.permits, output, &self.config).await;
        }

        info!(
            "'{}' done: {} page(s), {} failed, {}ms",
            output.file_id,
            output.page_count,
            output.failed_pages,
            start.elapsed().as_millis()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_file_complete(&output.file_id, output.failed_pages);
        }
        output
    }

    /// Rasterise and encode on the blocking pool.
    async fn prepare(&self, file_id: &str, bytes: Vec<u8>) -> Result<Vec<PreparedPage>, RenderError> {
        let renderer = Arc::clone(&self.renderer);
        let config = Arc::clone(&self.config);
        let file_id = file_id.to_string();

        tokio::task::spawn_blocking(move || {
            prepare_blocking(renderer.as_ref(), &file_id, &bytes, &config)
        })
        .await
        .map_err(|e| RenderError::Internal(format!("render task panicked: {e}")))?
    }

    async fn extract(&self, file_id: &str, page: PreparedPage) -> ExtractionResult {
        match page {
            PreparedPage::Ready {
                page_index,
                request,
            } => {
                process_page(
                    self.client.as_ref(),
                    &self.permits,
                    file_id,
                    page_index,
                    &request,
                    &self.config,
                )
                .await
            }
            PreparedPage::EncodeFailed { page_index, error } => {
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_page_error(file_id, page_index, &error.to_string());
                }
                ExtractionResult {
                    file_id: file_id.to_string(),
                    page_index,
                    outcome: PageOutcome::Failed(error),
                }
            }
        }
    }
}

/// Blocking half of [`Converter::prepare`]: bytes → page units → requests.
fn prepare_blocking(
    renderer: &dyn PageRenderer,
    file_id: &str,
    bytes: &[u8],
    config: &ConversionConfig,
) -> Result<Vec<PreparedPage>, RenderError> {
    check_pdf_magic(bytes)?;

    let options = RenderOptions {
        dpi: config.dpi,
        max_rendered_pixels: config.max_rendered_pixels,
        password: config.password.clone(),
    };
    let images = renderer.render(bytes, &options)?;

    let units = images
        .into_iter()
        .enumerate()
        .map(|(page_index, image)| PageUnit {
            file_id: file_id.to_string(),
            page_index,
            image,
        });

    Ok(units
        .map(|unit| match encode_page(&unit.image, config.jpeg_quality) {
            Ok(image_data_uri) => {
                let req = ExtractionRequest {
                    instructions: config.instructions.clone(),
                    image_data_uri,
                };
                PreparedPage::Ready {
                    page_index: unit.page_index,
                    request: build_extraction_request(&req, config),
                }
            }
            Err(e) => {
                warn!("{} page {}: encoding failed: {}", unit.file_id, unit.page_index + 1, e);
                PreparedPage::EncodeFailed {
                    page_index: unit.page_index,
                    error: PageError::EncodeFailed {
                        page: unit.page_index + 1,
                        detail: e.to_string(),
                    },
                }
            }
        })
        .collect())
}

//! # sheet2md
//!
//! Convert scanned character-sheet PDFs to text using a vision language
//! model, one page at a time.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF(s)
//!  │
//!  ├─ 1. Input      name uploads, assign unique file ids
//!  ├─ 2. Render     rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Encode     JPEG → data:image/jpeg;base64,…
//!  ├─ 4. Extract    one model call per page, all pages of all files in flight
//!  ├─ 5. Aggregate  per-file barrier, pages joined in page order
//!  ├─ 6. Optimize   optional second pass per file, falls back on failure
//!  └─ 7. Package    <file_id>.txt files, optionally zipped
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sheet2md::{ConversionConfig, Converter, ModelBackend, PdfiumRenderer, SourceFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = ModelBackend::openai_from_env(None)?;
//!     let renderer = Arc::new(PdfiumRenderer::new(None)?);
//!     let converter = Converter::from_backend(&backend, renderer, ConversionConfig::default())?;
//!
//!     let bytes = std::fs::read("sheet.pdf")?;
//!     let doc = converter.convert_single(SourceFile::new("sheet.pdf", bytes)).await;
//!     println!("{}", doc.text);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | The `sheet2md` binary (clap, anyhow, tracing-subscriber, indicatif) |
//! | `server` | on      | The axum HTTP surface in [`server`] |
//!
//! Library-only users can turn both off:
//! ```toml
//! sheet2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod package;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, ModelBackend, ServerConfig};
pub use convert::Converter;
pub use error::{ModelError, PageError, RenderError, Sheet2MdError, TIMEOUT_SENTINEL};
pub use output::{
    aggregate, AggregatedDocument, BatchResult, ExtractionResult, FileOutput,
    OptimizationStatus, PageOutcome, PAGE_BREAK,
};
pub use package::{package_batch, OutputPackager};
pub use pipeline::input::SourceFile;
pub use pipeline::llm::{ModelClient, OpenAiClient, ProviderClient};
pub use pipeline::render::{PageRenderer, PdfiumRenderer, RenderOptions};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::DocumentStream;

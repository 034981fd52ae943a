//! Error types for the sheet2md library.
//!
//! Four error types mirror the four granularities at which things fail:
//!
//! * [`Sheet2MdError`]: **Fatal**: the request or process cannot proceed
//!   (missing credential, unreadable directory, output cannot be written).
//!   Returned as `Err(Sheet2MdError)` from the top-level entry points.
//!
//! * [`RenderError`]: **Per file**: one PDF could not be rasterised. The
//!   file becomes an explicit error document; sibling files continue.
//!
//! * [`PageError`]: **Per page**: a single page failed to encode or its
//!   model call failed. Carried inside [`crate::output::PageOutcome`] and
//!   serialised as an in-band marker only when the document text is built.
//!
//! * [`ModelError`]: **Per call**: what a [`crate::pipeline::llm::ModelClient`]
//!   returns. The retry policy inspects it, then folds it into a `PageError`.

use std::path::PathBuf;
use thiserror::Error;

/// Literal text shown in place of a page whose model call timed out.
pub const TIMEOUT_SENTINEL: &str = "Request timed out. Please try again.";

/// All fatal errors returned by the sheet2md library.
///
/// Page-level and file-level failures use [`PageError`] and [`RenderError`]
/// and never surface here.
#[derive(Debug, Error)]
pub enum Sheet2MdError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The model-service credential is absent from the environment.
    #[error("Missing credential: {var} is not set.\nExport it before starting: export {var}=sk-...")]
    MissingCredential { var: &'static str },

    /// A named edgequake-llm provider could not be initialised.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// A requested input directory is outside the sandbox or does not exist.
    #[error("Invalid input directory '{name}': {reason}")]
    InvalidDirectory { name: String, reason: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write an output text file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not assemble the zip archive.
    #[error("Failed to build archive: {0}")]
    ArchiveFailed(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform, or point --pdfium-lib-path\n\
(SHEET2MD_PDFIUM_LIB_PATH) at the directory containing it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why one input file could not be rasterised.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum RenderError {
    /// The bytes do not start with the `%PDF` magic.
    #[error("not a PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF is corrupt: {detail}")]
    CorruptPdf { detail: String },

    /// PDF requires a password but none was configured.
    #[error("PDF is encrypted and requires a password")]
    PasswordRequired,

    /// A password was configured but it is wrong.
    #[error("wrong password for encrypted PDF")]
    WrongPassword,

    /// pdfium returned an error for a specific page (1-indexed).
    #[error("rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The blocking render task panicked or the renderer is unavailable.
    #[error("renderer failure: {0}")]
    Internal(String),
}

/// A failed model call, before the retry policy has looked at it.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// No response within the configured bound.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection-level failure (DNS, TLS, reset, body read).
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success status.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The response body lacked `choices[0].message.content`.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ModelError {
    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Timeouts are excluded: the bound is already long, and repeating it
    /// would multiply the worst-case latency of the whole batch.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Transport(_) => true,
            ModelError::Api { status, .. } => *status == 429 || *status >= 500,
            ModelError::Timeout { .. } | ModelError::MalformedResponse(_) => false,
        }
    }
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::output::PageOutcome::Failed`]. The page still occupies
/// its slot in the aggregated document so page count and order survive.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// JPEG encoding of the rasterised page failed.
    #[error("Page {page}: image encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// The model call exceeded its timeout.
    #[error("Page {page}: model call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The model call failed after retries.
    #[error("Page {page}: model call failed after {retries} retries: {detail}")]
    LlmFailed {
        page: usize,
        retries: u32,
        detail: String,
    },
}

impl PageError {
    /// Build the page error for a model failure on `page` (1-indexed).
    pub fn from_model(page: usize, retries: u32, err: &ModelError) -> Self {
        match err {
            ModelError::Timeout { secs } => PageError::Timeout { page, secs: *secs },
            other => PageError::LlmFailed {
                page,
                retries,
                detail: other.to_string(),
            },
        }
    }

    /// Human-facing message placed inside the in-band page marker.
    pub fn marker_message(&self) -> String {
        match self {
            PageError::Timeout { .. } => TIMEOUT_SENTINEL.to_string(),
            PageError::EncodeFailed { detail, .. } => format!("image encoding failed: {detail}"),
            PageError::LlmFailed { detail, .. } => detail.clone(),
        }
    }
}

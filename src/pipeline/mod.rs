//! Pipeline stages for character-sheet conversion.
//!
//! Each submodule implements exactly one transformation step; the
//! orchestration across files and pages lives in [`crate::convert`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ request ──▶ llm ──▶ (aggregate) ──▶ optimize
//! (uploads)  (pdfium)  (JPEG URI)  (payload)  (VLM)                 (optional)
//! ```
//!
//! 1. [`input`]    derive unique `file_id`s, read local files, sandbox directories
//! 2. [`render`]   rasterise every page; runs in `spawn_blocking`
//! 3. [`encode`]   JPEG-encode and base64-wrap each page as a data URI
//! 4. [`request`]  build the chat payload (instructions, then image)
//! 5. [`llm`]      call the model under timeout, concurrency bound and retry
//! 6. [`optimize`] optional second call per aggregated document, with fallback

pub mod encode;
pub mod input;
pub mod llm;
pub mod optimize;
pub mod render;
pub mod request;

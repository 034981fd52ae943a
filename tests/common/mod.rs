//! Shared fakes for the integration tests.
//!
//! * [`FakeRenderer`] reads a tiny text "PDF" such as `%PDF pages=2 tag=3`
//!   and produces `pages` images; page `i` is `i + 1` pixels wide and `tag`
//!   pixels high. `%PDF broken` yields a corrupt-PDF error.
//! * [`FakeClient`] decodes the JPEG in each extraction request and answers
//!   `PAGE{i}` from the image width. Optimization requests (those with a
//!   system message) echo `OPT:<text>` unless the text contains a configured
//!   substring. Delays can be set per (tag, page) to force arrival order or
//!   timeouts.

#![allow(unused)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, GenericImageView, RgbImage};
use sheet2md::pipeline::encode::split_data_uri;
use sheet2md::pipeline::request::ChatRequest;
use sheet2md::{
    ConversionConfig, Converter, ModelClient, ModelError, PageRenderer, RenderError,
    RenderOptions, SourceFile,
};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Renderer ─────────────────────────────────────────────────────────────────

pub struct FakeRenderer;

impl PageRenderer for FakeRenderer {
    fn render(&self, pdf: &[u8], _options: &RenderOptions) -> Result<Vec<DynamicImage>, RenderError> {
        let text = String::from_utf8_lossy(pdf);
        if text.contains("broken") {
            return Err(RenderError::CorruptPdf {
                detail: "xref table missing".into(),
            });
        }

        let field = |key: &str| -> u32 {
            text.split_whitespace()
                .find_map(|kv| kv.strip_prefix(key).and_then(|v| v.parse().ok()))
                .unwrap_or(1)
        };
        let pages = field("pages=");
        let tag = field("tag=").max(1);

        Ok((0..pages)
            .map(|i| DynamicImage::ImageRgb8(RgbImage::new(i + 1, tag)))
            .collect())
    }
}

/// Bytes for a fake PDF with `pages` pages; `tag` identifies the file.
pub fn fake_pdf(pages: u32, tag: u32) -> Vec<u8> {
    format!("%PDF pages={pages} tag={tag}").into_bytes()
}

pub fn source(name: &str, pages: u32, tag: u32) -> SourceFile {
    SourceFile::new(name, fake_pdf(pages, tag))
}

// ── Model client ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeClient {
    /// Extra latency for (tag, page_index).
    delays: HashMap<(u32, usize), Duration>,
    /// Optimization requests whose text contains this fail.
    fail_optimize_on: Option<String>,
    pub extraction_calls: AtomicUsize,
    pub optimization_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// (tag, page_index) in the order responses were produced.
    pub completion_order: Mutex<Vec<(u32, usize)>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, tag: u32, page_index: usize, d: Duration) -> Self {
        self.delays.insert((tag, page_index), d);
        self
    }

    pub fn fail_optimize_on(mut self, needle: &str) -> Self {
        self.fail_optimize_on = Some(needle.to_string());
        self
    }

    /// Recover (tag, page_index) from the page image in `request`.
    fn decode_page(request: &ChatRequest) -> Result<(u32, usize), ModelError> {
        let uri = request
            .messages
            .iter()
            .flat_map(|m| m.image_urls())
            .next()
            .ok_or_else(|| ModelError::MalformedResponse("no image".into()))?;
        let (_, payload) =
            split_data_uri(uri).ok_or_else(|| ModelError::MalformedResponse("bad uri".into()))?;
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| ModelError::MalformedResponse(e.to_string()))?;
        let img = image::load_from_memory(&bytes)
            .map_err(|e| ModelError::MalformedResponse(e.to_string()))?;
        let (w, h) = img.dimensions();
        Ok((h, (w - 1) as usize))
    }
}

#[async_trait]
impl ModelClient for FakeClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ModelError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = if request.has_system_message() {
            self.optimization_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let text = request.messages[1].text();
            match &self.fail_optimize_on {
                Some(needle) if text.contains(needle.as_str()) => Err(ModelError::Api {
                    status: 400,
                    message: "context length exceeded".into(),
                }),
                _ => Ok(format!("OPT:{text}")),
            }
        } else {
            self.extraction_calls.fetch_add(1, Ordering::SeqCst);
            match Self::decode_page(request) {
                Ok((tag, page)) => {
                    let d = self
                        .delays
                        .get(&(tag, page))
                        .copied()
                        .unwrap_or(Duration::from_millis(5));
                    tokio::time::sleep(d).await;
                    self.completion_order.lock().unwrap().push((tag, page));
                    Ok(format!("PAGE{page}"))
                }
                Err(e) => Err(e),
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ── Builders ─────────────────────────────────────────────────────────────────

/// Config with fast retries and an empty optimizer prompt so the optimizer
/// sees exactly the aggregated text.
pub fn test_config() -> sheet2md::ConversionConfigBuilder {
    ConversionConfig::builder()
        .optimizer_prompt("")
        .retry_backoff_ms(1)
        .api_timeout(Duration::from_secs(5))
}

pub fn converter(client: Arc<FakeClient>, config: ConversionConfig) -> Converter {
    Converter::new(client, Arc::new(FakeRenderer), config)
}

/// Entries of a zip archive as (name, contents), in archive order.
pub fn zip_entries(archive: &[u8]) -> Vec<(String, String)> {
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

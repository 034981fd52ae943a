//! PDF rasterisation: turn PDF bytes into one `DynamicImage` per page.
//!
//! ## Why a trait?
//!
//! The orchestrator only needs "bytes in, ordered page images out". Keeping
//! that behind [`PageRenderer`] lets the batch logic run against an
//! in-process fake in tests, and keeps pdfium's process-wide library binding
//! out of the request path.
//!
//! ## Why blocking?
//!
//! pdfium is CPU-bound and not async-safe. The orchestrator calls
//! [`PageRenderer::render`] from `tokio::task::spawn_blocking`, so
//! implementations are plain synchronous code.

use crate::error::{RenderError, Sheet2MdError};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};

/// Points per inch in PDF user space.
const POINTS_PER_INCH: f32 = 72.0;

/// pdfium is a process-wide library; one document is rasterised at a time.
static PDFIUM_LOCK: Mutex<()> = Mutex::new(());

/// Rasterisation settings passed to every render call.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub dpi: u32,
    pub max_rendered_pixels: Option<u32>,
    pub password: Option<String>,
}

/// Produces an ordered sequence of page images from raw PDF bytes.
pub trait PageRenderer: Send + Sync {
    /// Render every page, index 0 first.
    fn render(&self, pdf: &[u8], options: &RenderOptions) -> Result<Vec<DynamicImage>, RenderError>;
}

/// Check the `%PDF` magic before handing bytes to a renderer.
pub fn check_pdf_magic(pdf: &[u8]) -> Result<(), RenderError> {
    if pdf.starts_with(b"%PDF") {
        Ok(())
    } else {
        Err(RenderError::NotAPdf {
            magic: pdf.iter().take(4).copied().collect(),
        })
    }
}

/// [`PageRenderer`] backed by the pdfium C++ library.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    lib_dir: Option<PathBuf>,
}

impl PdfiumRenderer {
    /// Bind to pdfium once to fail fast when the library is missing.
    ///
    /// `lib_dir` points at the directory containing the platform library
    /// (`libpdfium.so`, `libpdfium.dylib`, `pdfium.dll`); `None` uses the
    /// system search path.
    pub fn new(lib_dir: Option<PathBuf>) -> Result<Self, Sheet2MdError> {
        let renderer = Self { lib_dir };
        renderer
            .bind()
            .map_err(|e| Sheet2MdError::PdfiumBindingFailed(format!("{e:?}")))?;
        info!("pdfium bound ({})", renderer.describe());
        Ok(renderer)
    }

    fn describe(&self) -> String {
        match &self.lib_dir {
            Some(dir) => dir.display().to_string(),
            None => "system library".to_string(),
        }
    }

    fn bind(&self) -> Result<Pdfium, PdfiumError> {
        let bindings = match &self.lib_dir {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))?,
            None => Pdfium::bind_to_system_library()?,
        };
        Ok(Pdfium::new(bindings))
    }
}

impl PageRenderer for PdfiumRenderer {
    fn render(&self, pdf: &[u8], options: &RenderOptions) -> Result<Vec<DynamicImage>, RenderError> {
        let _guard = PDFIUM_LOCK
            .lock()
            .map_err(|_| RenderError::Internal("pdfium lock poisoned".into()))?;
        let pdfium = self
            .bind()
            .map_err(|e| RenderError::Internal(format!("pdfium binding: {e:?}")))?;

        let password = options.password.as_deref();
        let document = pdfium.load_pdf_from_byte_slice(pdf, password).map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    RenderError::WrongPassword
                } else {
                    RenderError::PasswordRequired
                }
            } else {
                RenderError::CorruptPdf { detail: err_str }
            }
        })?;

        let mut render_config =
            PdfRenderConfig::new().scale_page_by_factor(options.dpi as f32 / POINTS_PER_INCH);
        if let Some(max) = options.max_rendered_pixels {
            render_config = render_config
                .set_maximum_width(max as i32)
                .set_maximum_height(max as i32);
        }

        let pages = document.pages();
        let mut images = Vec::with_capacity(pages.len() as usize);

        for (idx, page) in pages.iter().enumerate() {
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                RenderError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                }
            })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px at {} dpi",
                idx + 1,
                image.width(),
                image.height(),
                options.dpi
            );
            images.push(image);
        }

        Ok(images)
    }
}

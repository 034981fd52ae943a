//! Image encoding: `DynamicImage` → `data:image/jpeg;base64,…` URI.
//!
//! Pages are scanned sheets rendered at 300–600 DPI, so a lossless PNG would
//! routinely exceed upload limits. JPEG keeps the request body compact; the
//! quality knob lives in [`crate::config::ConversionConfig::jpeg_quality`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::debug;

/// MIME type of every encoded page.
pub const PAGE_MIME: &str = "image/jpeg";

/// Encode a rasterised page as a base64 JPEG data URI.
///
/// JPEG has no alpha channel, so the page is flattened to RGB first.
pub fn encode_page(img: &DynamicImage, quality: u8) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} page → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(format!("data:{PAGE_MIME};base64,{b64}"))
}

/// Split a `data:<mime>;base64,<payload>` URI into `(mime, payload)`.
pub fn split_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    Some((mime, payload))
}

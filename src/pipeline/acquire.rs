//! Document acquisition: URL → ordered, non-empty list of page images.
//!
//! ## Format detection
//!
//! Bills arrive from blob stores that often lie about (or omit) the content
//! type, and whose URLs carry long signed query strings. Any one of three
//! signals routes a payload to PDF handling, checked in order:
//!
//! 1. the declared `Content-Type`
//! 2. the URL path extension (query string ignored)
//! 3. the `%PDF` signature near the start of the payload
//!
//! ## Fallback ladder
//!
//! ```text
//! PDF:    rasterise every page ──fail──▶ decode bytes as one image ──fail──▶ Err
//! Image:  decode from memory   ──fail──▶ decode from a temp file   ──fail──▶ Err
//! ```
//!
//! The temp-file retry exists because some decoders cope with a seekable
//! file but choke on the same bytes presented as an in-memory stream.

use crate::config::ExtractionConfig;
use crate::error::{AcquisitionError, RenderError};
use crate::pipeline::render;
use crate::pipeline::source::DocumentSource;
use image::DynamicImage;
use std::io::Write;
use tracing::{debug, info, warn};

/// How far into the payload the `%PDF` signature may appear.
///
/// Some generators emit a few junk bytes before the header; readers are
/// required to accept the header anywhere in the first 1024 bytes.
const PDF_SIGNATURE_WINDOW: usize = 1024;

/// One page image with its 1-based physical ordinal.
#[derive(Debug, Clone)]
pub struct Page {
    pub page_no: usize,
    pub image: DynamicImage,
}

/// What the payload was judged to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
}

/// Decide whether a payload is a PDF or an image.
pub fn detect_kind(content_type: Option<&str>, url: &str, bytes: &[u8]) -> DocumentKind {
    if content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("application/pdf")) {
        debug!("Content-Type declares a PDF");
        return DocumentKind::Pdf;
    }
    if url_has_pdf_extension(url) {
        debug!("URL extension declares a PDF");
        return DocumentKind::Pdf;
    }
    if has_pdf_signature(bytes) {
        debug!("Payload carries a %PDF signature");
        return DocumentKind::Pdf;
    }
    DocumentKind::Image
}

/// True if the URL *path* (not the query or fragment) ends in `.pdf`.
fn url_has_pdf_extension(url: &str) -> bool {
    let path = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    path.to_ascii_lowercase().ends_with(".pdf")
}

fn has_pdf_signature(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(PDF_SIGNATURE_WINDOW)];
    window.windows(4).any(|w| w == b"%PDF")
}

/// Fetch `url` through `source` and turn it into page images.
///
/// Never returns `Ok` with an empty list.
pub async fn acquire_pages(
    source: &dyn DocumentSource,
    url: &str,
    config: &ExtractionConfig,
) -> Result<Vec<Page>, AcquisitionError> {
    let fetched = source.fetch(url).await?;
    if fetched.bytes.is_empty() {
        return Err(AcquisitionError::EmptyBody {
            url: url.to_string(),
        });
    }

    let kind = detect_kind(fetched.content_type.as_deref(), url, &fetched.bytes);
    info!("Document detected as {:?} ({} bytes)", kind, fetched.bytes.len());

    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;
    let bytes = fetched.bytes;

    let images = tokio::task::spawn_blocking(move || match kind {
        DocumentKind::Pdf => pdf_to_images(&bytes, dpi, max_pixels),
        DocumentKind::Image => decode_single_image(&bytes).map(|img| vec![img]),
    })
    .await
    .map_err(|e| AcquisitionError::Internal(format!("Decode task panicked: {}", e)))??;

    let pages: Vec<Page> = images
        .into_iter()
        .enumerate()
        .map(|(idx, image)| Page {
            page_no: idx + 1,
            image,
        })
        .collect();

    if pages.is_empty() {
        return Err(AcquisitionError::Undecodable {
            detail: "document produced no pages".into(),
        });
    }

    info!("Acquired {} page(s)", pages.len());
    Ok(pages)
}

/// Rasterise a PDF, falling back to a single-image decode of the same bytes.
fn pdf_to_images(bytes: &[u8], dpi: u32, max_pixels: u32) -> Result<Vec<DynamicImage>, AcquisitionError> {
    match render::rasterize_pdf(bytes, dpi, max_pixels) {
        Ok(images) => Ok(images),
        Err(render_err) => {
            warn!(
                "PDF rasterisation failed ({}); trying the payload as a single image",
                render_err
            );
            decode_single_image(bytes)
                .map(|img| vec![img])
                .map_err(|img_err| AcquisitionError::Undecodable {
                    detail: describe_double_failure(&render_err, &img_err),
                })
        }
    }
}

fn describe_double_failure(render_err: &RenderError, img_err: &AcquisitionError) -> String {
    format!("rasterisation: {render_err}; image decode: {img_err}")
}

/// Decode raw bytes as one image: in memory first, then via a temp file.
pub fn decode_single_image(bytes: &[u8]) -> Result<DynamicImage, AcquisitionError> {
    match image::load_from_memory(bytes) {
        Ok(img) => {
            debug!(
                "Decoded image {}x{} ({:?})",
                img.width(),
                img.height(),
                img.color()
            );
            Ok(img)
        }
        Err(mem_err) => {
            warn!("In-memory image decode failed ({}); retrying from disk", mem_err);
            decode_via_tempfile(bytes).map_err(|disk_err| AcquisitionError::Undecodable {
                detail: format!("in-memory: {mem_err}; from disk: {disk_err}"),
            })
        }
    }
}

fn decode_via_tempfile(bytes: &[u8]) -> Result<DynamicImage, String> {
    let mut tmp = tempfile::NamedTempFile::new().map_err(|e| format!("tempfile: {e}"))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.flush())
        .map_err(|e| format!("tempfile write: {e}"))?;

    image::ImageReader::open(tmp.path())
        .map_err(|e| e.to_string())?
        .with_guessed_format()
        .map_err(|e| e.to_string())?
        .decode()
        .map_err(|e| e.to_string())
    // `tmp` is deleted on drop
}

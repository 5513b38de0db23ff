//! Error types for the edgequake-billx library.
//!
//! Failures are layered by how far they reach:
//!
//! * [`BillError`]: **Document-level**: the request cannot produce a result
//!   (the document could not be fetched or decoded, no page yielded a single
//!   line item, the provider is not configured). Its `Display` text is the
//!   short human-readable message placed in
//!   [`crate::output::ExtractResponse::error`].
//!
//! * [`ExtractionError`]: **Page-level**: one page's vision call or decode
//!   failed. Stored inside [`crate::pipeline::response::ExtractionRecord`];
//!   the page is skipped and the other pages carry on.
//!
//! * [`ItemError`]: **Item-level**: a single raw line item was malformed.
//!   The entry is dropped with a warning and the page continues.
//!
//! [`AcquisitionError`] and [`RenderError`] describe *why* a download failed;
//! they are kept as the `source` of [`BillError::DownloadFailed`] so logs can
//! show the detail while the caller sees the fixed message.

use std::path::PathBuf;
use thiserror::Error;

/// All document-level errors returned by the edgequake-billx library.
#[derive(Debug, Error)]
pub enum BillError {
    // ── Document errors ───────────────────────────────────────────────────
    /// The document could not be fetched or decoded into any page image.
    #[error("Failed to download document from provided URL")]
    DownloadFailed {
        #[source]
        source: AcquisitionError,
    },

    /// Every page failed extraction or yielded zero items.
    #[error("No line items could be extracted from the document")]
    NoLineItems { pages: usize },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AcquisitionError> for BillError {
    fn from(source: AcquisitionError) -> Self {
        BillError::DownloadFailed { source }
    }
}

/// Why a document could not be turned into page images.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// The URL is not an absolute HTTP/HTTPS URL.
    #[error("Invalid document URL '{url}'")]
    InvalidUrl { url: String },

    /// Network-level failure talking to the document origin.
    #[error("Failed to fetch '{url}': {reason}")]
    Fetch { url: String, reason: String },

    /// The fetch exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    Timeout { url: String, secs: u64 },

    /// The origin answered with a non-success status.
    #[error("Fetching '{url}' returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// The origin answered with an empty body.
    #[error("Document at '{url}' is empty")]
    EmptyBody { url: String },

    /// Neither PDF rasterisation nor any image decoder accepted the payload.
    #[error("Document payload could not be decoded as a PDF or image: {detail}")]
    Undecodable { detail: String },

    /// A blocking decode task panicked or could not be scheduled.
    #[error("Internal acquisition failure: {0}")]
    Internal(String),
}

/// Failures from the pdfium rasterisation step.
///
/// Never surfaced directly: the acquirer falls back to decoding the raw bytes
/// as a single image and only reports [`AcquisitionError::Undecodable`] when
/// that fails too.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The pdfium shared library could not be bound.
    #[error("pdfium library unavailable: {0}")]
    PdfiumUnavailable(String),

    /// pdfium could not parse the document.
    #[error("PDF is corrupt: {0}")]
    CorruptPdf(String),

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The document parsed but has no pages.
    #[error("PDF has no pages")]
    NoPages,
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::pipeline::response::ExtractionRecord::error`]. The
/// overall extraction continues unless ALL pages fail.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ExtractionError {
    /// The page image could not be encoded for the request body.
    #[error("image encoding failed: {detail}")]
    Encode { detail: String },

    /// The vision model call itself failed.
    #[error("vision call failed: {detail}")]
    Transport { detail: String },

    /// The vision model call exceeded the configured timeout.
    #[error("vision call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The response was not valid JSON and the repair attempt also failed.
    #[error("JSON parsing error: {detail}")]
    Decode { detail: String },

    /// The repair call failed at the transport level.
    #[error("JSON repair call failed: {detail} (original decode error: {decode})")]
    Repair { decode: String, detail: String },
}

/// Why a single raw line item was dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ItemError {
    /// `item_amount` is absent or null.
    #[error("item_amount is missing")]
    MissingAmount,

    /// `item_amount` is present but not a finite number.
    #[error("item_amount {0} is not a number")]
    InvalidAmount(String),

    /// The entry is not a JSON object.
    #[error("line item is not an object: {0}")]
    NotAnObject(String),
}

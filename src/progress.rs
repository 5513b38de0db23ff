//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline processes each page. The trait is `Send + Sync`
//! because pages are extracted concurrently.
//!
//! # Example
//!
//! ```rust
//! use edgequake_billx::{ExtractionProgressCallback, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct ItemCounter {
//!     items: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for ItemCounter {
//!     fn on_page_complete(&self, _page_no: usize, _total_pages: usize, item_count: usize) {
//!         self.items.fetch_add(item_count, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(ItemCounter { items: AtomicUsize::new(0) });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `on_page_*` may be called concurrently from
/// different tasks; protect shared state accordingly.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once after the document has been acquired.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the VLM request is sent for a page.
    fn on_page_start(&self, page_no: usize, total_pages: usize) {
        let _ = (page_no, total_pages);
    }

    /// Called when a page yielded at least one line item.
    fn on_page_complete(&self, page_no: usize, total_pages: usize, item_count: usize) {
        let _ = (page_no, total_pages, item_count);
    }

    /// Called when a page is skipped: extraction failed or no items survived.
    fn on_page_error(&self, page_no: usize, total_pages: usize, error: &str) {
        let _ = (page_no, total_pages, error);
    }

    /// Called once after all pages have been attempted.
    ///
    /// `success_count` counts pages that contributed line items.
    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

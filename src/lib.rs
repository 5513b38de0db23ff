//! # edgequake-billx
//!
//! Extract itemised line items from bills and invoices with Vision Language
//! Models (VLMs), and reconcile them into one validated total.
//!
//! ## Why this crate?
//!
//! Scanned hospital and pharmacy bills rarely have a text layer, and when
//! they do the table structure is lost. Instead each page is rasterised and
//! read by a VLM, which returns JSON line items. Model output is then treated
//! as untrusted: it is cleaned, decoded leniently, validated item by item and
//! summed deterministically. The total printed on the bill is only ever used
//! as an advisory cross-check.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL
//!  │
//!  ├─ 1. Acquire    download; PDF → one image per page, or a single image
//!  ├─ 2. Normalize  RGB, downscale to ≤ 2048×2048
//!  ├─ 3. Extract    VLM call per page (bounded concurrency), one JSON repair
//!  ├─ 4. Items      drop malformed entries, default the optional fields
//!  ├─ 5. Reconcile  sum amounts, round to 2 dp, compare with printed total
//!  └─ 6. Respond    { is_success, data, error }
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_billx::{extract_bill, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / …
//!     let config = ExtractionConfig::default();
//!     let response = extract_bill("https://example.com/bill.pdf", &config).await;
//!     match response.data {
//!         Some(data) => println!("{} items, total {:.2}",
//!             data.total_item_count, data.reconciled_amount),
//!         None => eprintln!("{}", response.error.unwrap_or_default()),
//!     }
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `billx` binary (clap + anyhow + tracing-subscriber + indicatif + dotenvy) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{AcquisitionError, BillError, ExtractionError, ItemError, RenderError};
pub use extract::{extract_bill, extract_bill_sync, extract_to_file, BillExtractor};
pub use output::{
    ExtractData, ExtractResponse, LineItem, PageResult, PageType, ReconciliationResult,
};
pub use pipeline::acquire::Page;
pub use pipeline::reconcile::{reconcile, validate_extraction};
pub use pipeline::source::{DocumentSource, FetchedDocument, HttpSource};
pub use pipeline::vision::{LlmVisionModel, VisionModel};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};

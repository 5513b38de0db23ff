//! Pipeline stages for bill extraction.
//!
//! Each submodule implements exactly one transformation step, so every
//! stage can be tested without the ones around it.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ acquire ──▶ normalize ──▶ encode ──▶ llm ──▶ items ──▶ reconcile
//! (HTTP)    (pdf/img)    (RGB, ≤2k)    (base64)   (VLM)   (validate) (sum, check)
//! ```
//!
//! 1. [`source`]    fetch raw bytes for a URL ([`source::DocumentSource`])
//! 2. [`acquire`]   detect PDF vs image and fan out into ordered page images;
//!    [`render`] rasterises PDFs via pdfium inside `spawn_blocking`
//! 3. [`normalize`] force RGB and cap the dimensions sent to the model
//! 4. [`encode`]    PNG-encode and base64-wrap for the multimodal request body
//! 5. [`llm`]       one vision call per page plus at most one JSON repair call,
//!    through the [`vision::VisionModel`] seam; [`response`] decodes the text
//! 6. [`items`]     validate raw item entries one by one
//! 7. [`reconcile`] aggregate the document and run the advisory total check

pub mod acquire;
pub mod encode;
pub mod items;
pub mod llm;
pub mod normalize;
pub mod reconcile;
pub mod render;
pub mod response;
pub mod source;
pub mod vision;

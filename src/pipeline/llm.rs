//! Vision Extraction Client: page image → [`ExtractionRecord`].
//!
//! One page costs at most two model calls:
//!
//! ```text
//! prompt + image ──▶ VLM ──▶ clean ──▶ decode ──ok──▶ record
//!                                        │
//!                                      fail
//!                                        ▼
//!               repair prompt ──▶ VLM ──▶ clean ──▶ decode ──ok──▶ record
//!                                                     │
//!                                                   fail ──▶ empty record + error
//! ```
//!
//! There are no other retries: a transport failure, a timeout or a second
//! decode failure all end in [`ExtractionRecord::failed`]. This function never
//! returns an error; callers inspect `record.error` and skip the page.

use crate::error::ExtractionError;
use crate::pipeline::response::{parse_response, ExtractionRecord};
use crate::pipeline::vision::VisionModel;
use crate::prompts::repair_prompt;
use edgequake_llm::ImageData;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How much of a raw response to echo into debug logs.
const LOG_PREVIEW_CHARS: usize = 200;

/// Extract one page.
///
/// `timeout` bounds the primary and the repair call separately.
pub async fn extract_page(
    model: &dyn VisionModel,
    page_no: usize,
    image: &ImageData,
    prompt: &str,
    timeout: Duration,
) -> ExtractionRecord {
    let start = Instant::now();
    info!("Page {}: sending image to vision model", page_no);

    let raw = match call_with_timeout(timeout, model.generate_with_image(prompt, image)).await {
        Ok(text) => text,
        Err(e) => {
            warn!("Page {}: vision call failed — {}", page_no, e);
            return ExtractionRecord::failed(e);
        }
    };
    debug!(
        "Page {}: received response in {:?}: {}",
        page_no,
        start.elapsed(),
        preview(&raw)
    );

    let decode_err = match parse_response(&raw) {
        Ok(record) => {
            debug!(
                "Page {}: decoded {} raw line items",
                page_no,
                record.line_items.len()
            );
            return record;
        }
        Err(e) => e,
    };

    warn!(
        "Page {}: response is not valid JSON ({}); requesting repair",
        page_no, decode_err
    );
    repair(model, page_no, &raw, decode_err, timeout).await
}

/// The single follow-up call asking the model to re-emit valid JSON.
async fn repair(
    model: &dyn VisionModel,
    page_no: usize,
    malformed: &str,
    decode_err: String,
    timeout: Duration,
) -> ExtractionRecord {
    let prompt = repair_prompt(malformed);

    let repaired = match call_with_timeout(timeout, model.generate(&prompt)).await {
        Ok(text) => text,
        Err(e) => {
            warn!("Page {}: repair call failed — {}", page_no, e);
            return ExtractionRecord::failed(ExtractionError::Repair {
                decode: decode_err,
                detail: e.to_string(),
            });
        }
    };

    match parse_response(&repaired) {
        Ok(record) => {
            info!(
                "Page {}: repaired response decoded ({} raw line items)",
                page_no,
                record.line_items.len()
            );
            record
        }
        Err(e) => {
            warn!(
                "Page {}: repaired response still invalid ({}): {}",
                page_no,
                e,
                preview(&repaired)
            );
            ExtractionRecord::failed(ExtractionError::Decode { detail: e })
        }
    }
}

/// Run a model call under `timeout`, mapping both failure modes to
/// [`ExtractionError`].
async fn call_with_timeout<F>(timeout: Duration, call: F) -> Result<String, ExtractionError>
where
    F: Future<Output = Result<String, String>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(detail)) => Err(ExtractionError::Transport { detail }),
        Err(_) => Err(ExtractionError::Timeout {
            secs: timeout.as_secs(),
        }),
    }
}

fn preview(text: &str) -> String {
    let mut p: String = text.chars().take(LOG_PREVIEW_CHARS).collect();
    if text.chars().count() > LOG_PREVIEW_CHARS {
        p.push('…');
    }
    p
}

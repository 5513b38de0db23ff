//! Extraction entry points: document URL → [`ExtractResponse`].
//!
//! ```text
//! URL ──▶ acquire ──▶ per page (≤ concurrency in flight):
//!                       normalize ─▶ encode ─▶ extract ─▶ line items
//!                     ──▶ sort by ordinal ──▶ reconcile ──▶ validate (advisory)
//! ```
//!
//! A page that fails anywhere after acquisition is skipped; only a failed
//! download or a document with no line items at all fails the request.
//! Every public function here returns a well-formed [`ExtractResponse`]
//! (or, for [`extract_to_file`], an error only when the file itself could
//! not be written).

use crate::config::ExtractionConfig;
use crate::error::{BillError, ExtractionError};
use crate::output::{ExtractData, ExtractResponse, PageResult};
use crate::pipeline::acquire::{acquire_pages, Page};
use crate::pipeline::encode::encode_page;
use crate::pipeline::items::normalize_line_items;
use crate::pipeline::llm::extract_page;
use crate::pipeline::normalize::normalize_image;
use crate::pipeline::reconcile::{check_document, check_page, reconcile};
use crate::pipeline::response::ExtractionRecord;
use crate::pipeline::source::{DocumentSource, HttpSource};
use crate::pipeline::vision::{LlmVisionModel, VisionModel};
use edgequake_llm::{ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1-nano";

/// A configured extraction pipeline.
///
/// Holds the vision capability and the document source as trait objects so
/// tests (and embedders with their own transport) can substitute either.
pub struct BillExtractor {
    vision: Arc<dyn VisionModel>,
    source: Arc<dyn DocumentSource>,
    config: ExtractionConfig,
}

impl BillExtractor {
    pub fn new(
        vision: Arc<dyn VisionModel>,
        source: Arc<dyn DocumentSource>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            vision,
            source,
            config,
        }
    }

    /// Build the production pipeline: resolved provider plus an HTTP source.
    pub fn from_config(config: ExtractionConfig) -> Result<Self, BillError> {
        let vision = resolve_vision_model(&config)?;
        let source = HttpSource::new(&config.user_agent, config.download_timeout_secs)
            .map_err(|e| BillError::Internal(e.to_string()))?;
        Ok(Self::new(vision, Arc::new(source), config))
    }

    /// Run the whole pipeline for one document.
    pub async fn extract(&self, url: &str) -> ExtractResponse {
        match self.try_extract(url).await {
            Ok(data) => ExtractResponse::success(data),
            Err(e) => {
                warn!("Extraction failed for {}: {:?}", url, e);
                ExtractResponse::failure(e.to_string())
            }
        }
    }

    /// Like [`extract`](Self::extract) but keeps the typed error.
    pub async fn try_extract(&self, url: &str) -> Result<ExtractData, BillError> {
        info!("Starting extraction: {}", url);
        let pages = acquire_pages(self.source.as_ref(), url, &self.config).await?;
        self.extract_pages(pages).await
    }

    /// Run everything after acquisition on already-decoded pages.
    ///
    /// Pages are reported in `page_no` order regardless of completion order.
    pub async fn extract_pages(&self, pages: Vec<Page>) -> Result<ExtractData, BillError> {
        let start = Instant::now();
        let total = pages.len();

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_start(total);
        }

        let mut results: Vec<(usize, Option<PageResult>)> = stream::iter(
            pages
                .into_iter()
                .map(|page| async move { (page.page_no, self.process_page(page, total).await) }),
        )
        .buffer_unordered(self.config.concurrency)
        .collect()
        .await;

        results.sort_by_key(|(ordinal, _)| *ordinal);
        let page_results: Vec<PageResult> = results.into_iter().filter_map(|(_, r)| r).collect();

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_complete(total, page_results.len());
        }

        if page_results.is_empty() {
            return Err(BillError::NoLineItems { pages: total });
        }

        let totals = reconcile(&page_results);
        check_document(&page_results, &totals, self.config.tolerance_percent);

        info!(
            "Extraction complete: {} items on {}/{} pages, total {:.2}, {:?}",
            totals.total_item_count,
            page_results.len(),
            total,
            totals.reconciled_amount,
            start.elapsed()
        );

        Ok(ExtractData::new(page_results, totals))
    }

    /// Normalize, extract and validate one page. `None` means "skip".
    async fn process_page(&self, page: Page, total: usize) -> Option<PageResult> {
        let page_no = page.page_no;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_page_start(page_no, total);
        }

        let record = match self.prepare_image(page).await {
            Ok(image) => {
                let timeout = Duration::from_secs(self.config.api_timeout_secs);
                extract_page(self.vision.as_ref(), page_no, &image, self.config.prompt(), timeout)
                    .await
            }
            Err(e) => {
                warn!("Page {}: {}", page_no, e);
                ExtractionRecord::failed(e)
            }
        };

        if record.is_failed() {
            let reason = record.error.as_ref().map(ToString::to_string).unwrap_or_default();
            self.page_skipped(page_no, total, &reason);
            return None;
        }

        // The model's page numbering is not trusted across multi-page runs.
        let mut result = normalize_line_items(&record).into_iter().next()?;
        result.page_no = page_no.to_string();

        if result.bill_items.is_empty() {
            warn!("Page {}: no line items extracted; skipping", page_no);
            self.page_skipped(page_no, total, "no line items extracted");
            return None;
        }

        check_page(&result, self.config.tolerance_percent);
        debug!(
            "Page {}: {} items, {:.2}",
            page_no,
            result.item_count(),
            result.amount()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_page_complete(page_no, total, result.item_count());
        }
        Some(result)
    }

    fn page_skipped(&self, page_no: usize, total: usize, reason: &str) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_page_error(page_no, total, reason);
        }
    }

    /// Normalize and encode on the blocking pool; both are CPU-bound.
    async fn prepare_image(&self, page: Page) -> Result<ImageData, ExtractionError> {
        let max = self.config.max_image_dimension;
        tokio::task::spawn_blocking(move || {
            let image = normalize_image(page.image, max);
            encode_page(&image)
        })
        .await
        .map_err(|e| ExtractionError::Encode {
            detail: format!("encode task panicked: {e}"),
        })?
        .map_err(|e| ExtractionError::Encode {
            detail: e.to_string(),
        })
    }
}

/// Extract line items from the bill at `url`.
///
/// This is the primary entry point for the library. It never fails: errors
/// are reported through [`ExtractResponse::error`].
pub async fn extract_bill(url: impl AsRef<str>, config: &ExtractionConfig) -> ExtractResponse {
    match BillExtractor::from_config(config.clone()) {
        Ok(extractor) => extractor.extract(url.as_ref()).await,
        Err(e) => {
            warn!("Could not set up extraction: {}", e);
            ExtractResponse::failure(e.to_string())
        }
    }
}

/// Synchronous wrapper around [`extract_bill`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_bill_sync(url: impl AsRef<str>, config: &ExtractionConfig) -> ExtractResponse {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt.block_on(extract_bill(url, config)),
        Err(e) => ExtractResponse::failure(
            BillError::Internal(format!("Failed to create tokio runtime: {}", e)).to_string(),
        ),
    }
}

/// Extract and write the JSON response to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files. The
/// response is written whether or not the extraction succeeded.
pub async fn extract_to_file(
    url: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractResponse, BillError> {
    let response = extract_bill(url, config).await;
    write_response(&response, output_path.as_ref(), true).await?;
    Ok(response)
}

/// Serialise `response` to `path` atomically.
pub async fn write_response(
    response: &ExtractResponse,
    path: &Path,
    pretty: bool,
) -> Result<(), BillError> {
    let body = if pretty {
        serde_json::to_vec_pretty(response)
    } else {
        serde_json::to_vec(response)
    }
    .map_err(|e| BillError::Internal(format!("Failed to serialise response: {e}")))?;

    let write_err = |source: std::io::Error| BillError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &body).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Resolve the vision capability, from most-specific to least-specific.
///
/// 1. `config.vision_model`: used as-is.
/// 2. `config.provider`: a pre-built `edgequake_llm` provider.
/// 3. `config.provider_name` (+ optional `config.model`).
/// 4. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 5. `GEMINI_API_KEY` → Gemini, then `OPENAI_API_KEY` → OpenAI.
/// 6. `ProviderFactory::from_env` auto-detection.
pub fn resolve_vision_model(config: &ExtractionConfig) -> Result<Arc<dyn VisionModel>, BillError> {
    if let Some(ref vision) = config.vision_model {
        return Ok(Arc::clone(vision));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(LlmVisionModel::new(
        provider,
        config.temperature,
        config.max_tokens,
    )))
}

fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, BillError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config
            .model
            .as_deref()
            .unwrap_or_else(|| default_model_for(name));
        return create_provider(name, model);
    }

    if let (Some(prov), Some(model)) = (
        env_non_empty("EDGEQUAKE_LLM_PROVIDER"),
        env_non_empty("EDGEQUAKE_MODEL"),
    ) {
        return create_provider(&prov, &model);
    }

    for (key, name) in [("GEMINI_API_KEY", "gemini"), ("OPENAI_API_KEY", "openai")] {
        if env_non_empty(key).is_some() {
            let model = config
                .model
                .as_deref()
                .unwrap_or_else(|| default_model_for(name));
            return create_provider(name, model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| BillError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY or OPENAI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;
    Ok(llm_provider)
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, BillError> {
    info!("Using provider '{}' with model '{}'", name, model);
    ProviderFactory::create_llm_provider(name, model).map_err(|e| BillError::ProviderNotConfigured {
        provider: name.to_string(),
        hint: format!("{e}"),
    })
}

fn default_model_for(provider: &str) -> &'static str {
    if provider.eq_ignore_ascii_case("gemini") || provider.eq_ignore_ascii_case("google") {
        DEFAULT_GEMINI_MODEL
    } else {
        DEFAULT_OPENAI_MODEL
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

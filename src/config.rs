//! Configuration types for bill extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across concurrent requests and to log exactly
//! which settings produced a given result.

use crate::error::BillError;
use crate::pipeline::vision::VisionModel;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Client identity sent when fetching documents.
///
/// Some blob stores and CDNs reject requests carrying a library's default
/// user agent, so a browser-like string is used.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Configuration for a bill extraction.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_billx::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(200)
///     .concurrency(4)
///     .model("gemini-2.0-flash")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rasterisation DPI for PDF pages. Range: 72–400. Default: 200.
    ///
    /// Bills are dense with small print (rates, quantities, batch numbers);
    /// 200 DPI keeps digits legible without bloating the request.
    pub dpi: u32,

    /// Hard cap on either edge of a rasterised PDF page, in pixels. Default: 6000.
    ///
    /// Guards memory against oversized page boxes. The Image Normalizer
    /// downscales further to [`Self::max_image_dimension`] before the VLM call.
    pub max_rendered_pixels: u32,

    /// Maximum `(width, height)` of an image sent to the VLM. Default: 2048×2048.
    pub max_image_dimension: (u32, u32),

    /// Number of pages extracted concurrently. Default: 4.
    ///
    /// Pages are independent, but every page is a VLM call; keep this low
    /// enough to stay inside the provider's rate limits.
    pub concurrency: usize,

    /// LLM model identifier, e.g. "gemini-2.0-flash", "gpt-4.1-mini".
    /// If None, a provider-appropriate default is used.
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "anthropic").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed vision capability. Takes precedence over `provider`.
    pub vision_model: Option<Arc<dyn VisionModel>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 8192.
    ///
    /// Pharmacy pages routinely list 60+ items; a low cap truncates the JSON
    /// mid-array and forces the repair path.
    pub max_tokens: usize,

    /// Custom extraction prompt. If None, uses [`crate::prompts::EXTRACTION_PROMPT`].
    pub extraction_prompt: Option<String>,

    /// User-Agent header used when fetching the document.
    pub user_agent: String,

    /// Download timeout in seconds. Default: 30.
    pub download_timeout_secs: u64,

    /// Per-VLM-call timeout in seconds (primary and repair). Default: 120.
    pub api_timeout_secs: u64,

    /// Tolerance, in percent, for the advisory total check. Default: 0.01.
    pub tolerance_percent: f64,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 6000,
            max_image_dimension: (2048, 2048),
            concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            vision_model: None,
            temperature: 0.1,
            max_tokens: 8192,
            extraction_prompt: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            download_timeout_secs: 30,
            api_timeout_secs: 120,
            tolerance_percent: 0.01,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("max_image_dimension", &self.max_image_dimension)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field(
                "vision_model",
                &self.vision_model.as_ref().map(|_| "<dyn VisionModel>"),
            )
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("tolerance_percent", &self.tolerance_percent)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The prompt sent with every page image.
    pub fn prompt(&self) -> &str {
        self.extraction_prompt
            .as_deref()
            .unwrap_or(crate::prompts::EXTRACTION_PROMPT)
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_image_dimension(mut self, width: u32, height: u32) -> Self {
        self.config.max_image_dimension = (width, height);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn vision_model(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.config.vision_model = Some(model);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn tolerance_percent(mut self, pct: f64) -> Self {
        self.config.tolerance_percent = pct;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, BillError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(BillError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(BillError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        let (w, h) = c.max_image_dimension;
        if w == 0 || h == 0 {
            return Err(BillError::InvalidConfig(format!(
                "Max image dimension must be non-zero, got {}x{}",
                w, h
            )));
        }
        if !c.tolerance_percent.is_finite() || c.tolerance_percent < 0.0 {
            return Err(BillError::InvalidConfig(format!(
                "Tolerance must be a non-negative percentage, got {}",
                c.tolerance_percent
            )));
        }
        if c.download_timeout_secs == 0 || c.api_timeout_secs == 0 {
            return Err(BillError::InvalidConfig("Timeouts must be ≥ 1s".into()));
        }
        Ok(self.config)
    }
}

//! The vision capability: "given an image and a prompt, return text".
//!
//! [`VisionModel`] is the seam between the deterministic pipeline and the
//! non-deterministic model. Production code uses [`LlmVisionModel`], a thin
//! adapter over any `edgequake_llm` provider; tests substitute a scripted
//! fake so normalisation, reconciliation and error absorption can be
//! exercised without a live API.

use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Best-effort text in, free text out, may fail.
///
/// Errors are plain strings: the caller only ever records them on the page's
/// extraction record, it never branches on them.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// One single-shot call with a prompt and a page image.
    async fn generate_with_image(&self, prompt: &str, image: &ImageData) -> Result<String, String>;

    /// One single-shot, text-only call (used for JSON repair).
    async fn generate(&self, prompt: &str) -> Result<String, String>;
}

/// [`VisionModel`] backed by an `edgequake_llm` chat provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                ..Default::default()
            },
        }
    }

    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, String> {
        let start = Instant::now();
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| e.to_string())?;
        debug!(
            "VLM call: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    async fn generate_with_image(&self, prompt: &str, image: &ImageData) -> Result<String, String> {
        // The prompt and image travel in one user turn; there is no
        // conversation state between pages.
        self.chat(vec![ChatMessage::user_with_images(
            prompt,
            vec![image.clone()],
        )])
        .await
    }

    async fn generate(&self, prompt: &str) -> Result<String, String> {
        self.chat(vec![ChatMessage::user(prompt)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl VisionModel for Echo {
        async fn generate_with_image(&self, prompt: &str, image: &ImageData) -> Result<String, String> {
            Ok(format!("{}|{}", prompt.len(), image.mime_type))
        }

        async fn generate(&self, prompt: &str) -> Result<String, String> {
            Ok(prompt.to_uppercase())
        }
    }

    #[tokio::test]
    async fn trait_object_dispatch() {
        let model: Arc<dyn VisionModel> = Arc::new(Echo);
        let image = ImageData::new("AAAA".to_string(), "image/png");
        assert_eq!(
            model.generate_with_image("abc", &image).await.unwrap(),
            "3|image/png"
        );
        assert_eq!(model.generate("fix").await.unwrap(), "FIX");
    }
}

//! Document fetching: `fetch(url) -> (bytes, content-type)`.
//!
//! The acquirer only ever talks to a [`DocumentSource`], so tests can feed it
//! in-memory payloads and the production [`HttpSource`] stays a thin reqwest
//! wrapper.

use crate::error::AcquisitionError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// A fetched document payload.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Vec<u8>,
    /// The declared `Content-Type`, if the origin sent one.
    pub content_type: Option<String>,
}

/// Anything that can resolve a URL to raw bytes.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, AcquisitionError>;
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// HTTP(S) source backed by `reqwest`.
pub struct HttpSource {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpSource {
    /// Build a client with a realistic user agent and a bounded timeout.
    pub fn new(user_agent: &str, timeout_secs: u64) -> Result<Self, AcquisitionError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AcquisitionError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }
}

#[async_trait]
impl DocumentSource for HttpSource {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, AcquisitionError> {
        if !is_url(url) {
            return Err(AcquisitionError::InvalidUrl {
                url: url.to_string(),
            });
        }
        info!("Downloading document from: {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AcquisitionError::Timeout {
                    url: url.to_string(),
                    secs: self.timeout_secs,
                }
            } else {
                AcquisitionError::Fetch {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(AcquisitionError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                AcquisitionError::Timeout {
                    url: url.to_string(),
                    secs: self.timeout_secs,
                }
            } else {
                AcquisitionError::Fetch {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        if bytes.is_empty() {
            return Err(AcquisitionError::EmptyBody {
                url: url.to_string(),
            });
        }

        debug!(
            "Downloaded {} bytes (content-type: {:?})",
            bytes.len(),
            content_type
        );

        Ok(FetchedDocument {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

//! Ollama embedding provider.
//!
//! Talks to the `/api/embed` endpoint. The primary device is whatever the
//! server schedules by default (normally the GPU); the fallback device is
//! requested with `num_gpu = 0`, which keeps every layer on the CPU while
//! loading the same weights.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Device, EmbeddingError, EmbeddingProvider};

/// Default Ollama server address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default embedding model.
pub const DEFAULT_MODEL: &str = "nomic-embed-text";

/// Default embedding dimensions (nomic-embed-text).
pub const DEFAULT_DIMENSIONS: usize = 768;

const MAX_RETRIES: u32 = 3;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    truncate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<EmbedOptions>,
}

#[derive(Serialize)]
struct EmbedOptions {
    num_gpu: u32,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Embedding provider backed by a local or remote Ollama server.
pub struct OllamaEmbeddings {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    device: Device,
}

impl OllamaEmbeddings {
    /// Create a provider for `model` served at `base_url`.
    pub fn new(
        base_url: &str,
        model: Option<String>,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Ollama HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/embed", base_url.trim_end_matches('/')),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            dimensions: dimensions.unwrap_or(DEFAULT_DIMENSIONS),
            device: Device::Primary,
        })
    }

    /// Device the next request will run on.
    pub fn device(&self) -> Device {
        self.device
    }

    fn options(&self) -> Option<EmbedOptions> {
        match self.device {
            Device::Primary => None,
            Device::Fallback => Some(EmbedOptions { num_gpu: 0 }),
        }
    }

    /// Send embedding request with retry logic for rate limits.
    async fn send_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let request_body = EmbedRequest {
            model: &self.model,
            input: texts,
            truncate: true,
            options: self.options(),
        };

        let mut retry_count = 0;
        let mut backoff_secs = 1u64;

        loop {
            debug!(
                "Sending embedding request for {} texts to {} on {} device",
                texts.len(),
                self.endpoint,
                self.device
            );

            let response = self
                .client
                .post(&self.endpoint)
                .json(&request_body)
                .send()
                .await
                .map_err(|e| EmbeddingError::NetworkError(e.to_string()))?;

            let status = response.status();

            if status.is_success() {
                let body: EmbedResponse = response
                    .json()
                    .await
                    .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
                return Ok(body.embeddings);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                retry_count += 1;
                if retry_count > MAX_RETRIES {
                    return Err(EmbeddingError::RateLimited(backoff_secs));
                }
                warn!(
                    "Rate limited, retrying after {} seconds (attempt {}/{})",
                    backoff_secs, retry_count, MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                backoff_secs *= 2;
                continue;
            }

            let raw = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ErrorResponse>(&raw)
                .map(|e| e.error)
                .unwrap_or(raw);
            return Err(classify_failure(status, message, self.device));
        }
    }
}

/// Map a failed response to an error, recognising allocator failures.
fn classify_failure(status: StatusCode, message: String, device: Device) -> EmbeddingError {
    if status.is_server_error() && is_memory_exhaustion(&message) {
        EmbeddingError::OutOfMemory {
            device,
            reason: message,
        }
    } else {
        EmbeddingError::ApiError(format!("{} ({})", message, status.as_u16()))
    }
}

fn is_memory_exhaustion(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["out of memory", "cudamalloc failed", "insufficient memory", "failed to allocate"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.send_request(texts).await
    }

    async fn relocate(&mut self, device: Device) -> Result<(), EmbeddingError> {
        if self.device != device {
            info!(model = %self.model, from = %self.device, to = %device, "Relocating embedding model");
            self.device = device;
        }
        Ok(())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

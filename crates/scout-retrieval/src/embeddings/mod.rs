//! Embedding provider trait and implementations.
//!
//! This module defines the interface the encoder drives and the
//! compute-device model it switches between when memory runs out.

pub mod ollama;

pub use ollama::OllamaEmbeddings;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Execution location of an embedding model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// The accelerator the model starts on.
    Primary,
    /// The slower device used once the primary one is exhausted.
    Fallback,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Primary => f.write_str("primary"),
            Device::Fallback => f.write_str("fallback"),
        }
    }
}

/// Errors that can occur during embedding generation.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("out of memory on {device} device: {reason}")]
    OutOfMemory { device: Device, reason: String },

    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("failed to move model to {device} device: {reason}")]
    Relocation { device: Device, reason: String },
}

impl EmbeddingError {
    /// Whether this error signals resource exhaustion on the active device.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, EmbeddingError::OutOfMemory { .. })
    }
}

/// Trait for embedding providers.
///
/// A provider must produce the same output space on every device:
/// relocating changes where the model runs, never what it returns.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single document.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a query. Dual-encoder models override this.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(text).await
    }

    /// Embed multiple documents in one unit of work.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Reconfigure query and document encoding to run on `device`.
    async fn relocate(&mut self, device: Device) -> Result<(), EmbeddingError>;

    /// Free transient memory held after a unit of work.
    fn release_scratch(&self) {}

    /// Get the number of dimensions
    fn dimensions(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the maximum batch size supported.
    fn max_batch_size(&self) -> usize {
        32
    }
}

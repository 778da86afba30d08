//! Batch encoder with one-way device fallback.
//!
//! Documents are embedded sequentially in units of `batch_size`. When the
//! primary device runs out of memory the encoder moves the provider to the
//! fallback device, retries the failing unit there and stays there for the
//! rest of its life. Exhaustion on the fallback device is fatal.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::corpus::Corpus;
use crate::embeddings::{Device, EmbeddingError, EmbeddingProvider};
use crate::observer::{NoopObserver, RetrievalEvent, RetrievalObserver};

/// Unit of work that exhausted the primary device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackTrigger {
    Query,
    /// First document of the failing unit.
    Document(usize),
}

impl std::fmt::Display for FallbackTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackTrigger::Query => write!(f, "query"),
            FallbackTrigger::Document(index) => write!(f, "document {index}"),
        }
    }
}

/// Which device the encoder is using, and since when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderState {
    device: Device,
    trigger: Option<FallbackTrigger>,
}

impl Default for EncoderState {
    fn default() -> Self {
        Self {
            device: Device::Primary,
            trigger: None,
        }
    }
}

impl EncoderState {
    pub fn device(&self) -> Device {
        self.device
    }

    /// What triggered the fallback, if it happened.
    pub fn fallback_trigger(&self) -> Option<FallbackTrigger> {
        self.trigger
    }

    /// Index of the document whose unit triggered the fallback. `None` when
    /// still on the primary device or when the query triggered it.
    pub fn fallback_at(&self) -> Option<usize> {
        match self.trigger {
            Some(FallbackTrigger::Document(index)) => Some(index),
            _ => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.device == Device::Fallback
    }

    /// Switch to the fallback device. Returns `false` if already there.
    fn activate_fallback(&mut self, trigger: FallbackTrigger) -> bool {
        if self.is_fallback() {
            return false;
        }
        self.device = Device::Fallback;
        self.trigger = Some(trigger);
        true
    }
}

/// Configuration for the batch encoder.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Documents per embedding call
    pub batch_size: usize,
    /// Emit a progress event every this many documents
    pub progress_interval: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            progress_interval: 10,
        }
    }
}

/// Fatal encoding failures.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// `index` is the first document of the unit that failed.
    #[error("document {index}: {source}")]
    Embedding {
        index: usize,
        #[source]
        source: EmbeddingError,
    },

    #[error("query: {0}")]
    Query(#[source] EmbeddingError),

    #[error("encoding cancelled")]
    Cancelled,
}

/// Query and document vectors from one encoding pass.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub query: Vec<f32>,
    /// Same order as the corpus documents.
    pub documents: Vec<Vec<f32>>,
    /// Device active when encoding finished.
    pub device: Device,
}

/// Releases provider scratch memory when a unit of work ends.
struct ScratchGuard<'a> {
    provider: &'a dyn EmbeddingProvider,
}

impl<'a> ScratchGuard<'a> {
    fn new(provider: &'a dyn EmbeddingProvider) -> Self {
        Self { provider }
    }
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        self.provider.release_scratch();
    }
}

/// Owns the embedding provider and the device state.
///
/// Encoding takes `&mut self`, so a device switch can never interleave with
/// another encode call on the same binding.
pub struct BatchEncoder {
    provider: Box<dyn EmbeddingProvider>,
    state: EncoderState,
    config: EncoderConfig,
}

impl BatchEncoder {
    pub fn new(provider: Box<dyn EmbeddingProvider>, config: EncoderConfig) -> Self {
        Self {
            provider,
            state: EncoderState::default(),
            config,
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn device(&self) -> Device {
        self.state.device
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    /// Effective unit size: configured size capped by the provider.
    pub fn batch_size(&self) -> usize {
        self.config
            .batch_size
            .clamp(1, self.provider.max_batch_size().max(1))
    }

    /// Embed the query, falling back once on exhaustion.
    pub async fn encode_query(&mut self, text: &str) -> Result<Vec<f32>, EncodeError> {
        self.encode_query_with(text, &NoopObserver).await
    }

    async fn encode_query_with(
        &mut self,
        text: &str,
        observer: &dyn RetrievalObserver,
    ) -> Result<Vec<f32>, EncodeError> {
        loop {
            let result = {
                let _scratch = ScratchGuard::new(self.provider.as_ref());
                self.provider.embed_query(text).await
            };
            match result {
                Ok(vector) => {
                    self.check_dimensions(&vector).map_err(EncodeError::Query)?;
                    return Ok(vector);
                }
                Err(e) if e.is_out_of_memory() && !self.state.is_fallback() => {
                    self.fall_back(FallbackTrigger::Query, &e, observer)
                        .await
                        .map_err(EncodeError::Query)?;
                }
                Err(e) => return Err(EncodeError::Query(e)),
            }
        }
    }

    /// Embed `texts` in order. The result has one vector per input.
    pub async fn encode_documents(
        &mut self,
        texts: &[&str],
        cancel: &CancellationToken,
        observer: &dyn RetrievalObserver,
    ) -> Result<Vec<Vec<f32>>, EncodeError> {
        let total = texts.len();
        let batch_size = self.batch_size();
        let interval = self.config.progress_interval.max(1);
        let mut vectors = Vec::with_capacity(total);

        observer.on_event(&RetrievalEvent::EncodingStarted { documents: total });

        for (batch_index, batch) in texts.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(EncodeError::Cancelled);
            }

            let start = batch_index * batch_size;
            let owned: Vec<String> = batch.iter().map(|t| t.to_string()).collect();
            let embedded = self.encode_unit(start, &owned, observer).await?;
            vectors.extend(embedded);

            let completed = start + batch.len();
            if completed % interval < batch.len() || completed == total {
                observer.on_event(&RetrievalEvent::EncodeProgress { completed, total });
            }
        }

        observer.on_event(&RetrievalEvent::EncodingFinished {
            device: self.state.device,
        });
        Ok(vectors)
    }

    /// Embed one unit, retrying it once on the fallback device.
    async fn encode_unit(
        &mut self,
        start: usize,
        texts: &[String],
        observer: &dyn RetrievalObserver,
    ) -> Result<Vec<Vec<f32>>, EncodeError> {
        loop {
            let result = {
                let _scratch = ScratchGuard::new(self.provider.as_ref());
                self.provider.embed_batch(texts).await
            };

            match result {
                Ok(vectors) if vectors.len() == texts.len() => {
                    for (offset, vector) in vectors.iter().enumerate() {
                        self.check_dimensions(vector)
                            .map_err(|source| EncodeError::Embedding {
                                index: start + offset,
                                source,
                            })?;
                    }
                    return Ok(vectors);
                }
                Ok(vectors) => {
                    return Err(EncodeError::Embedding {
                        index: start,
                        source: EmbeddingError::InvalidResponse(format!(
                            "expected {} embeddings, got {}",
                            texts.len(),
                            vectors.len()
                        )),
                    })
                }
                Err(e) if e.is_out_of_memory() && !self.state.is_fallback() => {
                    self.fall_back(FallbackTrigger::Document(start), &e, observer)
                        .await
                        .map_err(|source| EncodeError::Embedding {
                            index: start,
                            source,
                        })?;
                }
                Err(source) => {
                    return Err(EncodeError::Embedding {
                        index: start,
                        source,
                    })
                }
            }
        }
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), EmbeddingError> {
        let expected = self.provider.dimensions();
        if vector.len() != expected {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {expected} dimensions, got {}",
                vector.len()
            )));
        }
        Ok(())
    }

    /// Move the provider to the fallback device. The state only changes once
    /// the provider has actually moved, so a failed relocation leaves the
    /// encoder on the primary device.
    async fn fall_back(
        &mut self,
        trigger: FallbackTrigger,
        cause: &EmbeddingError,
        observer: &dyn RetrievalObserver,
    ) -> Result<(), EmbeddingError> {
        let from = self.state.device;
        if self.state.is_fallback() {
            return Ok(());
        }
        warn!(%trigger, error = %cause, "Out of memory on {}, moving model to fallback device", from);
        self.provider.relocate(Device::Fallback).await?;
        self.state.activate_fallback(trigger);
        observer.on_event(&RetrievalEvent::DeviceFallback {
            trigger,
            from,
            to: Device::Fallback,
        });
        Ok(())
    }

    /// Encode the query and every document of `corpus`.
    pub async fn encode(
        &mut self,
        query: &str,
        corpus: &Corpus,
        cancel: &CancellationToken,
        observer: &dyn RetrievalObserver,
    ) -> Result<Encoded, EncodeError> {
        let query_vector = self.encode_query_with(query, observer).await?;
        debug!(dimensions = query_vector.len(), "Encoded query");

        let documents = self
            .encode_documents(&corpus.contents(), cancel, observer)
            .await?;

        Ok(Encoded {
            query: query_vector,
            documents,
            device: self.state.device,
        })
    }
}

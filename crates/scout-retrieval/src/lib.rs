//! Retrieval-augmented file selection for scout.
//!
//! This crate provides:
//! - Corpus extraction honouring `.gitignore`, virtual-environment markers
//!   and an extension allow-list
//! - Sequential batch embedding with one-way fallback from the primary
//!   device when it runs out of memory
//! - Dot-product or cosine ranking with stable top-K selection
//! - Per-file summaries through a pluggable summarizer (Ollama by default)

pub mod corpus;
pub mod embeddings;
pub mod encoder;
pub mod error;
pub mod observer;
pub mod ranker;
pub mod retriever;
pub mod summarizer;

// Re-exports
pub use corpus::{Corpus, CorpusExtractor, Document, ExtractorConfig, IgnoreSpec};
pub use embeddings::{Device, EmbeddingError, EmbeddingProvider, OllamaEmbeddings};
pub use encoder::{
    BatchEncoder, EncodeError, Encoded, EncoderConfig, EncoderState, FallbackTrigger,
};
pub use error::{RetrievalError, Stage};
pub use observer::{NoopObserver, RetrievalEvent, RetrievalObserver, TracingObserver};
pub use ranker::{rank, rank_paths, RankError, RankedDocument, Similarity};
pub use retriever::{Retriever, RetrieverConfig, ScoredResult, Summary, SummaryFailurePolicy};
pub use summarizer::{OllamaSummarizer, Summarizer};
pub use tokio_util::sync::CancellationToken;

/// Default number of files returned.
pub const DEFAULT_TOP_K: usize = 5;

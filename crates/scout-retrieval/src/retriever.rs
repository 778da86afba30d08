//! Retrieval orchestrator.
//!
//! The Retriever coordinates the corpus extractor, the batch encoder, the
//! ranker and the summarizer to answer "which files matter for this
//! problem?".

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::corpus::{Corpus, CorpusExtractor, ExtractorConfig};
use crate::embeddings::Device;
use crate::encoder::{BatchEncoder, EncodeError};
use crate::error::{RetrievalError, Stage};
use crate::observer::{RetrievalEvent, RetrievalObserver, TracingObserver};
use crate::ranker::{rank, Similarity};
use crate::summarizer::Summarizer;

/// What to do when a selected file cannot be summarized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryFailurePolicy {
    /// Keep the result with a failure marker and continue.
    #[default]
    Placeholder,
    /// Abort the whole call on the first failure.
    Abort,
}

/// Configuration for the retriever.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub extractor: ExtractorConfig,
    pub similarity: Similarity,
    /// Whether to ask the summarizer about selected files
    pub summarize: bool,
    pub summary_failure: SummaryFailurePolicy,
    /// Upper bound on a single summary call
    pub summary_timeout: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            extractor: ExtractorConfig::default(),
            similarity: Similarity::Dot,
            summarize: true,
            summary_failure: SummaryFailurePolicy::Placeholder,
            summary_timeout: Duration::from_secs(120),
        }
    }
}

/// Summary attached to a ranked file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Summary {
    Generated { text: String },
    Failed { reason: String },
    Skipped,
}

impl Summary {
    pub fn text(&self) -> Option<&str> {
        match self {
            Summary::Generated { text } => Some(text),
            _ => None,
        }
    }
}

/// One ranked file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    /// Path relative to the retrieval root
    pub path: String,
    pub score: f32,
    pub summary: Summary,
}

/// Selects the top-K files of a tree for a query.
pub struct Retriever {
    config: RetrieverConfig,
    extractor: CorpusExtractor,
    encoder: BatchEncoder,
    summarizer: Arc<dyn Summarizer>,
    observer: Arc<dyn RetrievalObserver>,
}

impl Retriever {
    pub fn new(
        config: RetrieverConfig,
        encoder: BatchEncoder,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        let extractor = CorpusExtractor::new(config.extractor.clone());
        Self {
            config,
            extractor,
            encoder,
            summarizer,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the default tracing observer.
    pub fn with_observer(mut self, observer: Arc<dyn RetrievalObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Device the encoder will use for the next call.
    pub fn device(&self) -> Device {
        self.encoder.device()
    }

    /// Rank the files under `root` against `query` and summarize the best `k`.
    pub async fn retrieve(
        &mut self,
        root: &Path,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredResult>, RetrievalError> {
        self.retrieve_with_cancel(root, query, k, &CancellationToken::new())
            .await
    }

    /// [`retrieve`](Self::retrieve) with a cancellation signal checked between documents.
    pub async fn retrieve_with_cancel(
        &mut self,
        root: &Path,
        query: &str,
        k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredResult>, RetrievalError> {
        let start = Instant::now();
        info!("Starting retrieval for {:?}", root);

        let corpus = self
            .extractor
            .extract_with(root, cancel, self.observer.as_ref())?;
        if corpus.is_empty() {
            info!("Corpus is empty, nothing to rank");
            self.observer
                .on_event(&RetrievalEvent::RetrievalFinished { results: 0 });
            return Ok(Vec::new());
        }

        let encoded = self
            .encoder
            .encode(query, &corpus, cancel, self.observer.as_ref())
            .await
            .map_err(|e| encode_error(e, &corpus))?;

        let ranked = rank(
            &encoded.query,
            &encoded.documents,
            k,
            self.config.similarity,
        )?;
        debug!(selected = ranked.len(), device = %encoded.device, "Ranked documents");

        let total = ranked.len();
        let mut results = Vec::with_capacity(total);
        for (position, hit) in ranked.into_iter().enumerate() {
            let document = &corpus.documents[hit.index];
            let summary = if self.config.summarize {
                if cancel.is_cancelled() {
                    return Err(RetrievalError::Cancelled {
                        stage: Stage::Summarization,
                    });
                }
                self.observer.on_event(&RetrievalEvent::SummaryStarted {
                    index: position,
                    total,
                    path: document.relative_path.clone(),
                });
                self.summarize(&document.relative_path, &document.content)
                    .await?
            } else {
                Summary::Skipped
            };

            results.push(ScoredResult {
                path: document.relative_path.clone(),
                score: hit.score,
                summary,
            });
        }

        info!(
            "Retrieval complete: {} results in {}ms",
            results.len(),
            start.elapsed().as_millis()
        );
        self.observer.on_event(&RetrievalEvent::RetrievalFinished {
            results: results.len(),
        });
        Ok(results)
    }

    async fn summarize(&self, path: &str, content: &str) -> Result<Summary, RetrievalError> {
        let timeout = self.config.summary_timeout;
        let reason = match tokio::time::timeout(timeout, self.summarizer.summarize(content)).await
        {
            Ok(Ok(text)) => return Ok(Summary::Generated { text }),
            Ok(Err(e)) => format!("{e:#}"),
            Err(_) => format!("timed out after {}s", timeout.as_secs()),
        };

        match self.config.summary_failure {
            SummaryFailurePolicy::Abort => Err(RetrievalError::Summarization {
                path: path.to_string(),
                reason,
            }),
            SummaryFailurePolicy::Placeholder => {
                self.observer.on_event(&RetrievalEvent::SummaryFailed {
                    path: path.to_string(),
                    reason: reason.clone(),
                });
                Ok(Summary::Failed { reason })
            }
        }
    }
}

fn encode_error(error: EncodeError, corpus: &Corpus) -> RetrievalError {
    match error {
        EncodeError::Embedding { index, source } => RetrievalError::Encoding {
            index,
            path: corpus
                .documents
                .get(index)
                .map(|d| d.relative_path.clone())
                .unwrap_or_default(),
            source,
        },
        EncodeError::Query(source) => RetrievalError::QueryEncoding { source },
        EncodeError::Cancelled => RetrievalError::Cancelled {
            stage: Stage::Encoding,
        },
    }
}

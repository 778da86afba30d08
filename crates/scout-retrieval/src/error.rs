//! Error types for the retrieval pipeline.
//!
//! Every fatal error names the stage it came from so the caller can tell an
//! extraction problem from an encoding or ranking one.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::embeddings::EmbeddingError;
use crate::ranker::RankError;

/// Pipeline stage in which a fatal error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extraction,
    Encoding,
    Ranking,
    Summarization,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extraction => "extraction",
            Stage::Encoding => "encoding",
            Stage::Ranking => "ranking",
            Stage::Summarization => "summarization",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by [`Retriever::retrieve`](crate::Retriever::retrieve).
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("extraction failed for {root}: {reason}")]
    Extraction { root: PathBuf, reason: String },

    #[error("failed to encode query: {source}")]
    QueryEncoding {
        #[source]
        source: EmbeddingError,
    },

    #[error("failed to encode document {index} ({path}): {source}")]
    Encoding {
        index: usize,
        path: String,
        #[source]
        source: EmbeddingError,
    },

    #[error("ranking failed: {0}")]
    Ranking(#[from] RankError),

    #[error("failed to summarize {path}: {reason}")]
    Summarization { path: String, reason: String },

    #[error("retrieval cancelled during {stage}")]
    Cancelled { stage: Stage },
}

impl RetrievalError {
    /// The stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            RetrievalError::Extraction { .. } => Stage::Extraction,
            RetrievalError::QueryEncoding { .. } | RetrievalError::Encoding { .. } => {
                Stage::Encoding
            }
            RetrievalError::Ranking(_) => Stage::Ranking,
            RetrievalError::Summarization { .. } => Stage::Summarization,
            RetrievalError::Cancelled { stage } => *stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::Device;

    #[test]
    fn test_encoding_error_names_document() {
        let err = RetrievalError::Encoding {
            index: 3,
            path: "src/model.py".to_string(),
            source: EmbeddingError::OutOfMemory {
                device: Device::Fallback,
                reason: "allocation of 512MiB failed".to_string(),
            },
        };
        let message = err.to_string();
        assert!(message.contains("src/model.py"));
        assert!(message.contains("document 3"));
        assert_eq!(err.stage(), Stage::Encoding);
    }

    #[test]
    fn test_cancelled_keeps_stage() {
        let err = RetrievalError::Cancelled {
            stage: Stage::Summarization,
        };
        assert_eq!(err.stage(), Stage::Summarization);
        assert_eq!(err.to_string(), "retrieval cancelled during summarization");
    }
}

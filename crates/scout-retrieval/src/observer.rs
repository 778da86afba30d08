//! Progress events emitted while a retrieval runs.
//!
//! The pipeline never prints. It reports what it is doing through a
//! [`RetrievalObserver`], which the caller can route to logs, a progress bar,
//! or nowhere at all.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::embeddings::Device;
use crate::encoder::FallbackTrigger;

/// A point of interest in a retrieval call.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalEvent {
    ExtractionStarted { root: PathBuf },
    ExtractionFinished { documents: usize, skipped: usize },
    /// A file could not be read and was left out of the corpus.
    FileSkipped { path: PathBuf, reason: String },
    EncodingStarted { documents: usize },
    EncodeProgress { completed: usize, total: usize },
    /// The encoder moved to the fallback device after `trigger` exhausted
    /// the primary one.
    DeviceFallback {
        trigger: FallbackTrigger,
        from: Device,
        to: Device,
    },
    EncodingFinished { device: Device },
    SummaryStarted { index: usize, total: usize, path: String },
    SummaryFailed { path: String, reason: String },
    RetrievalFinished { results: usize },
}

/// Receives [`RetrievalEvent`]s.
pub trait RetrievalObserver: Send + Sync {
    fn on_event(&self, event: &RetrievalEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RetrievalObserver for NoopObserver {
    fn on_event(&self, _event: &RetrievalEvent) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RetrievalObserver for TracingObserver {
    fn on_event(&self, event: &RetrievalEvent) {
        match event {
            RetrievalEvent::ExtractionStarted { root } => {
                info!(root = %root.display(), "Extracting file contents");
            }
            RetrievalEvent::ExtractionFinished { documents, skipped } => {
                info!(documents, skipped, "Extraction complete");
            }
            RetrievalEvent::FileSkipped { path, reason } => {
                debug!(path = %path.display(), reason = %reason, "File left out of corpus");
            }
            RetrievalEvent::EncodingStarted { documents } => {
                info!(documents, "Encoding documents");
            }
            RetrievalEvent::EncodeProgress { completed, total } => {
                debug!(completed, total, "Encoding progress");
            }
            RetrievalEvent::DeviceFallback { trigger, from, to } => {
                warn!(
                    trigger = %trigger,
                    from = %from,
                    to = %to,
                    "Out of memory, switching device for remaining work"
                );
            }
            RetrievalEvent::EncodingFinished { device } => {
                info!(device = %device, "Finished encoding");
            }
            RetrievalEvent::SummaryStarted { index, total, path } => {
                info!(path = %path, "Summarizing file {}/{}", index + 1, total);
            }
            RetrievalEvent::SummaryFailed { path, reason } => {
                warn!(path = %path, reason = %reason, "Summary unavailable");
            }
            RetrievalEvent::RetrievalFinished { results } => {
                info!(results, "Retrieval complete");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Collects every event for later inspection.
    #[derive(Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<RetrievalEvent>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<RetrievalEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl RetrievalObserver for RecordingObserver {
        fn on_event(&self, event: &RetrievalEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}

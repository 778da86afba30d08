//! Terminal progress for long encoding passes.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use scout_retrieval::{RetrievalEvent, RetrievalObserver, TracingObserver};

/// Drives a progress bar while documents are encoded and forwards every
/// event to the tracing log without tearing the bar.
pub struct ProgressObserver {
    bar: ProgressBar,
    log: TracingObserver,
}

impl ProgressObserver {
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg} [{bar:40}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self {
            bar,
            log: TracingObserver,
        }
    }

    /// Progress bar that never draws.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            log: TracingObserver,
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl RetrievalObserver for ProgressObserver {
    fn on_event(&self, event: &RetrievalEvent) {
        match event {
            RetrievalEvent::EncodingStarted { documents } => {
                self.bar.set_length(*documents as u64);
                self.bar.set_position(0);
                self.bar.set_message("Encoding");
            }
            RetrievalEvent::EncodeProgress { completed, .. } => {
                self.bar.set_position(*completed as u64);
            }
            RetrievalEvent::EncodingFinished { .. } => {
                self.bar.finish_and_clear();
            }
            _ => {}
        }
        self.bar.suspend(|| self.log.on_event(event));
    }
}

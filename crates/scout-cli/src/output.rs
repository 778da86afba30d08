//! Rendering of ranked results.

use anyhow::{Context, Result};
use scout_retrieval::{ScoredResult, Summary};

/// Plain-text blocks, one per file, best first.
pub fn render_text(results: &[ScoredResult]) -> String {
    let mut out = String::new();
    for result in results {
        out.push_str(&format!("Score: {}\nFile: {}\n", result.score, result.path));
        match &result.summary {
            Summary::Generated { text } => out.push_str(&format!("Description: {}\n", text)),
            Summary::Failed { reason } => {
                out.push_str(&format!("Description: <unavailable: {}>\n", reason))
            }
            Summary::Skipped => {}
        }
        out.push('\n');
    }
    out
}

pub fn render_json(results: &[ScoredResult]) -> Result<String> {
    serde_json::to_string_pretty(results).context("failed to serialize results")
}

//! Summarizer module for producing a short description of a selected file.
//!
//! Supports Ollama's chat endpoint (`/api/chat`, non-streaming). Any other
//! backend can be plugged in through the [`Summarizer`] trait.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default chat model for summaries.
pub const DEFAULT_SUMMARY_MODEL: &str = "llama3";

const PROMPT_PREFIX: &str = "Generate a brief summary for the following file content:\n\n";

/// Trait for summarization backends.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize the full text of a file.
    async fn summarize(&self, text: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Build the summary prompt, keeping at most `max_chars` characters of content.
pub fn summary_prompt(content: &str, max_chars: Option<usize>) -> String {
    match max_chars {
        Some(limit) => {
            let truncated: String = content.chars().take(limit).collect();
            format!("{PROMPT_PREFIX}{truncated}")
        }
        None => format!("{PROMPT_PREFIX}{content}"),
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Chat-based summarizer for an Ollama server.
pub struct OllamaSummarizer {
    client: Client,
    endpoint: String,
    model: String,
    max_input_chars: Option<usize>,
}

impl OllamaSummarizer {
    pub fn new(base_url: &str, model: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Ollama HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            model: model.unwrap_or_else(|| DEFAULT_SUMMARY_MODEL.to_string()),
            max_input_chars: None,
        })
    }

    /// Send at most `limit` characters of each file to the model.
    pub fn with_max_input_chars(mut self, limit: Option<usize>) -> Self {
        self.max_input_chars = limit;
        self
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize(&self, text: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: summary_prompt(text, self.max_input_chars),
            }],
            stream: false,
        };

        debug!(model = %self.model, chars = text.len(), "Requesting summary");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .context("summary request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("summarizer error ({}): {}", status.as_u16(), body);
        }

        let completion: ChatResponse = response
            .json()
            .await
            .context("failed to parse summarizer response")?;
        Ok(completion.message.content.trim().to_string())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_full_content() {
        let prompt = summary_prompt("def train(): pass", None);
        assert_eq!(
            prompt,
            "Generate a brief summary for the following file content:\n\ndef train(): pass"
        );
    }

    #[test]
    fn test_prompt_truncates_by_chars() {
        let prompt = summary_prompt("héllo world", Some(5));
        assert!(prompt.ends_with("\n\nhéllo"));
    }

    #[test]
    fn test_summarizer_new() {
        let summarizer =
            OllamaSummarizer::new("http://localhost:11434/", None, Duration::from_secs(30))
                .unwrap()
                .with_max_input_chars(Some(4000));
        assert_eq!(summarizer.endpoint, "http://localhost:11434/api/chat");
        assert_eq!(summarizer.model_name(), "llama3");
        assert_eq!(summarizer.max_input_chars, Some(4000));
    }

    #[test]
    fn test_parse_chat_response() {
        let raw = r#"{"model":"llama3","message":{"role":"assistant","content":"  Trains a model.\n"},"done":true}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.message.content.trim(), "Trains a model.");
    }
}

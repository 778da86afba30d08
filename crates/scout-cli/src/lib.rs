//! Command-line interface for scout.
//!
//! Parses arguments, layers them over the loaded configuration, wires the
//! Ollama-backed capabilities into a [`Retriever`] and prints the ranked files.

pub mod output;
pub mod progress;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use scout_config::{expand_path, Config};
use scout_retrieval::{
    BatchEncoder, CancellationToken, EncoderConfig, ExtractorConfig, OllamaEmbeddings,
    OllamaSummarizer, RetrievalObserver, Retriever, RetrieverConfig, Similarity,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::progress::ProgressObserver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SimilarityArg {
    Dot,
    Cosine,
}

/// Find the files in a source tree that matter for a problem description.
#[derive(Debug, Parser)]
#[command(name = "scout", version, about)]
pub struct Cli {
    /// Directory to search
    #[arg(required_unless_present = "print_config")]
    pub root: Option<String>,

    /// Problem description (read from stdin when neither this nor --query-file is given)
    #[arg(short, long)]
    pub query: Option<String>,

    /// Read the problem description from a file
    #[arg(long, conflicts_with = "query")]
    pub query_file: Option<PathBuf>,

    /// Number of files to return
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Similarity measure used for ranking
    #[arg(long, value_enum)]
    pub similarity: Option<SimilarityArg>,

    /// Rank only, without summaries
    #[arg(long)]
    pub no_summary: bool,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub print_config: bool,
}

impl Cli {
    /// Fold command-line overrides into `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(k) = self.top_k {
            config.retrieval.top_k = k;
        }
        if let Some(similarity) = self.similarity {
            config.retrieval.similarity = match similarity {
                SimilarityArg::Dot => Similarity::Dot,
                SimilarityArg::Cosine => Similarity::Cosine,
            };
        }
        if self.no_summary {
            config.retrieval.summarize = false;
        }
    }
}

/// Map the file configuration onto the retriever's settings.
pub fn retriever_config(config: &Config) -> RetrieverConfig {
    let retrieval = &config.retrieval;
    RetrieverConfig {
        extractor: ExtractorConfig {
            extensions: retrieval.extensions.clone(),
            excluded_dir_markers: retrieval.excluded_dir_markers.clone(),
            ignore_file: retrieval.ignore_file.clone(),
            extra_ignore_patterns: retrieval.extra_ignore_patterns.clone(),
        },
        similarity: retrieval.similarity,
        summarize: retrieval.summarize,
        summary_failure: retrieval.summary_failure,
        summary_timeout: Duration::from_secs(retrieval.summary_timeout_secs),
    }
}

/// Build a retriever backed by the configured Ollama servers.
pub fn build_retriever(config: &Config, observer: Arc<dyn RetrievalObserver>) -> Result<Retriever> {
    let embeddings = OllamaEmbeddings::new(
        &config.embeddings.base_url,
        Some(config.embeddings.model.clone()),
        Some(config.embeddings.dimensions),
        Duration::from_secs(config.embeddings.timeout_secs),
    )?;
    let encoder = BatchEncoder::new(
        Box::new(embeddings),
        EncoderConfig {
            batch_size: config.retrieval.batch_size,
            progress_interval: config.retrieval.progress_interval,
        },
    );

    let summarizer = OllamaSummarizer::new(
        &config.summarizer.base_url,
        Some(config.summarizer.model.clone()),
        Duration::from_secs(config.summarizer.timeout_secs),
    )?
    .with_max_input_chars(config.summarizer.max_input_chars());

    Ok(Retriever::new(retriever_config(config), encoder, Arc::new(summarizer)).with_observer(observer))
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "scout=debug,scout_cli=debug,scout_retrieval=debug"
    } else {
        "scout=info,scout_cli=info,scout_retrieval=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn read_query(cli: &Cli) -> Result<String> {
    let query = match (&cli.query, &cli.query_file) {
        (Some(query), _) => query.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read query file {}", path.display()))?,
        (None, None) => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read query from stdin")?;
            buffer
        }
    };
    anyhow::ensure!(!query.trim().is_empty(), "query is empty");
    Ok(query)
}

fn resolve_root(raw: &str) -> Result<PathBuf> {
    let root = expand_path(raw)?;
    anyhow::ensure!(
        Path::new(&root).is_dir(),
        "{} is not a directory",
        root.display()
    );
    Ok(root)
}

/// Entry point used by the `scout` binary.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let raw_root = cli
        .root
        .as_deref()
        .context("a directory to search is required")?;
    let root = resolve_root(raw_root)?;
    let query = read_query(&cli)?;
    debug!(root = %root.display(), top_k = config.retrieval.top_k, "Starting scout");

    let mut retriever = build_retriever(&config, Arc::new(ProgressObserver::new()))?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current document");
            signal_token.cancel();
        }
    });

    let results = retriever
        .retrieve_with_cancel(&root, &query, config.retrieval.top_k, &cancel)
        .await
        .map_err(|e| {
            let stage = e.stage();
            anyhow::Error::new(e).context(format!("retrieval failed during {stage}"))
        })?;

    if cli.json {
        println!("{}", output::render_json(&results)?);
    } else {
        print!("{}", output::render_text(&results));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_retrieval::SummaryFailurePolicy;

    #[test]
    fn test_cli_parses_overrides() {
        let cli = Cli::try_parse_from([
            "scout",
            "~/repo",
            "--query",
            "decision tree image missing",
            "-k",
            "3",
            "--similarity",
            "cosine",
            "--no-summary",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.retrieval.similarity, Similarity::Cosine);
        assert!(!config.retrieval.summarize);
        assert_eq!(cli.root.as_deref(), Some("~/repo"));
    }

    #[test]
    fn test_negative_k_is_rejected() {
        assert!(Cli::try_parse_from(["scout", ".", "-q", "x", "-k", "-1"]).is_err());
    }

    #[test]
    fn test_query_and_query_file_conflict() {
        assert!(
            Cli::try_parse_from(["scout", ".", "-q", "x", "--query-file", "issue.md"]).is_err()
        );
    }

    #[test]
    fn test_root_optional_for_print_config() {
        let cli = Cli::try_parse_from(["scout", "--print-config"]).unwrap();
        assert!(cli.root.is_none());
        assert!(Cli::try_parse_from(["scout"]).is_err());
    }

    #[test]
    fn test_retriever_config_mapping() {
        let mut config = Config::default();
        config.retrieval.similarity = Similarity::Cosine;
        config.retrieval.summary_failure = SummaryFailurePolicy::Abort;
        config.retrieval.extra_ignore_patterns = vec!["docs/".to_string()];

        let mapped = retriever_config(&config);
        assert_eq!(mapped.similarity, Similarity::Cosine);
        assert_eq!(mapped.summary_failure, SummaryFailurePolicy::Abort);
        assert_eq!(mapped.extractor.extra_ignore_patterns, vec!["docs/"]);
        assert_eq!(mapped.summary_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_query_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issue.md");
        std::fs::write(&path, "**Summary**\nThe image is not generated.").unwrap();

        let cli = Cli::try_parse_from([
            "scout".to_string(),
            ".".to_string(),
            "--query-file".to_string(),
            path.display().to_string(),
        ])
        .unwrap();
        assert!(read_query(&cli).unwrap().contains("not generated"));
    }

    #[test]
    fn test_resolve_root_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.py");
        std::fs::write(&file, "x").unwrap();
        assert!(resolve_root(&file.display().to_string()).is_err());
        assert!(resolve_root(&dir.path().display().to_string()).is_ok());
    }

    #[test]
    fn test_build_retriever_from_defaults() {
        let retriever =
            build_retriever(&Config::default(), Arc::new(ProgressObserver::hidden())).unwrap();
        assert_eq!(retriever.device(), scout_retrieval::Device::Primary);
        assert_eq!(retriever.config().summary_timeout, Duration::from_secs(120));
    }
}

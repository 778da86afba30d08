//! Corpus extraction.
//!
//! Walks a source tree and returns the text of every file that survives the
//! ignore file, the excluded-directory markers and the extension allow-list.

use std::fs;
use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{RetrievalError, Stage};
use crate::observer::{NoopObserver, RetrievalEvent, RetrievalObserver};

/// File name suffixes included by default.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".py", ".js", ".java", ".cpp", ".c", ".h", ".md"];

/// Directory path substrings that are always skipped (virtual environments).
pub const DEFAULT_EXCLUDED_DIR_MARKERS: &[&str] = &["venv", "env"];

/// Ignore file read from the corpus root.
pub const DEFAULT_IGNORE_FILE: &str = ".gitignore";

/// A source file pulled into the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Root joined with the relative path. Unique within a corpus.
    pub path: PathBuf,
    /// Path relative to the corpus root.
    pub relative_path: String,
    /// Full text, with undecodable bytes replaced.
    pub content: String,
}

/// Documents in traversal order.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub documents: Vec<Document>,
    /// Files or entries that could not be read.
    pub skipped: usize,
}

impl Corpus {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn contents(&self) -> Vec<&str> {
        self.documents.iter().map(|d| d.content.as_str()).collect()
    }
}

/// Configuration for corpus extraction.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// File name suffixes to include
    pub extensions: Vec<String>,
    /// Directories whose relative path contains one of these are skipped
    pub excluded_dir_markers: Vec<String>,
    /// Name of the ignore file at the root
    pub ignore_file: String,
    /// Patterns applied after the ignore file's own lines
    pub extra_ignore_patterns: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            excluded_dir_markers: DEFAULT_EXCLUDED_DIR_MARKERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore_file: DEFAULT_IGNORE_FILE.to_string(),
            extra_ignore_patterns: Vec::new(),
        }
    }
}

/// Gitignore patterns plus the fixed excluded-directory markers.
pub struct IgnoreSpec {
    matcher: Gitignore,
    markers: Vec<String>,
}

impl IgnoreSpec {
    /// Load `<root>/<ignore_file>` and append `extra_patterns`.
    ///
    /// A missing ignore file yields an empty pattern set.
    pub fn load(
        root: &Path,
        ignore_file: &str,
        extra_patterns: &[String],
        markers: &[String],
    ) -> Self {
        let mut builder = GitignoreBuilder::new(root);

        let ignore_path = root.join(ignore_file);
        if ignore_path.is_file() {
            if let Some(e) = builder.add(&ignore_path) {
                warn!(path = %ignore_path.display(), error = %e, "Ignoring malformed ignore patterns");
            }
        } else {
            debug!(path = %ignore_path.display(), "No ignore file, using empty ignore set");
        }

        for pattern in extra_patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                warn!(pattern = %pattern, error = %e, "Skipping invalid ignore pattern");
            }
        }

        let matcher = builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build ignore matcher, ignoring nothing");
            Gitignore::empty()
        });

        Self {
            matcher,
            markers: markers.to_vec(),
        }
    }

    /// Whether `relative` (or any of its parents) matches an ignore pattern.
    pub fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        self.matcher
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }

    /// Whether the directory at `relative` must be skipped entirely.
    pub fn excludes_dir(&self, relative: &Path) -> bool {
        let rel = relative.to_string_lossy();
        self.markers.iter().any(|m| rel.contains(m.as_str())) || self.is_ignored(relative, true)
    }

    /// Number of patterns loaded.
    pub fn len(&self) -> usize {
        self.matcher.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matcher.is_empty()
    }
}

/// Reads the corpus for a retrieval call.
#[derive(Debug, Clone, Default)]
pub struct CorpusExtractor {
    config: ExtractorConfig,
}

impl CorpusExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Whether a file name ends with an allow-listed suffix.
    pub fn is_allowed(&self, file_name: &str) -> bool {
        self.config
            .extensions
            .iter()
            .any(|ext| file_name.ends_with(ext.as_str()))
    }

    /// Extract every eligible file under `root`.
    pub fn extract(&self, root: &Path) -> Result<Corpus, RetrievalError> {
        self.extract_with(root, &CancellationToken::new(), &NoopObserver)
    }

    /// Extract with cancellation checks between entries and progress events.
    pub fn extract_with(
        &self,
        root: &Path,
        cancel: &CancellationToken,
        observer: &dyn RetrievalObserver,
    ) -> Result<Corpus, RetrievalError> {
        if !root.is_dir() {
            return Err(RetrievalError::Extraction {
                root: root.to_path_buf(),
                reason: "not a readable directory".to_string(),
            });
        }

        observer.on_event(&RetrievalEvent::ExtractionStarted {
            root: root.to_path_buf(),
        });

        let spec = IgnoreSpec::load(
            root,
            &self.config.ignore_file,
            &self.config.extra_ignore_patterns,
            &self.config.excluded_dir_markers,
        );

        let mut corpus = Corpus::default();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                match entry.path().strip_prefix(root) {
                    Ok(rel) => !spec.excludes_dir(rel),
                    Err(_) => false,
                }
            });

        for entry in walker {
            if cancel.is_cancelled() {
                return Err(RetrievalError::Cancelled {
                    stage: Stage::Extraction,
                });
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    corpus.skipped += 1;
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };

            if spec.is_ignored(rel, false) {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            if !self.is_allowed(&file_name) {
                continue;
            }

            match fs::read(path) {
                Ok(bytes) => {
                    debug!(path = %rel.display(), "Reading file");
                    corpus.documents.push(Document {
                        path: path.to_path_buf(),
                        relative_path: rel.to_string_lossy().into_owned(),
                        content: String::from_utf8_lossy(&bytes).into_owned(),
                    });
                }
                Err(e) => {
                    warn!(path = %rel.display(), error = %e, "Skipping unreadable file");
                    corpus.skipped += 1;
                    observer.on_event(&RetrievalEvent::FileSkipped {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Extracted contents of {} files ({} skipped)",
            corpus.len(),
            corpus.skipped
        );
        observer.on_event(&RetrievalEvent::ExtractionFinished {
            documents: corpus.len(),
            skipped: corpus.skipped,
        });

        Ok(corpus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn relative_paths(corpus: &Corpus) -> Vec<&str> {
        corpus
            .documents
            .iter()
            .map(|d| d.relative_path.as_str())
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = ExtractorConfig::default();
        assert_eq!(config.extensions.len(), 7);
        assert_eq!(config.excluded_dir_markers, vec!["venv", "env"]);
        assert_eq!(config.ignore_file, ".gitignore");
    }

    #[test]
    fn test_allow_list_is_suffix_match() {
        let extractor = CorpusExtractor::default();
        assert!(extractor.is_allowed("main.py"));
        assert!(extractor.is_allowed("README.md"));
        assert!(extractor.is_allowed("vector.h"));
        assert!(!extractor.is_allowed("lib.rs"));
        assert!(!extractor.is_allowed("image.png"));
        assert!(!extractor.is_allowed("py"));
    }

    #[test]
    fn test_extracts_in_sorted_order() {
        let dir = tempdir().unwrap();
        write(dir.path(), "b.py", b"print('b')");
        write(dir.path(), "a.md", b"# a");
        write(dir.path(), "src/c.js", b"let c = 1;");
        write(dir.path(), "src/skip.rs", b"fn main() {}");

        let corpus = CorpusExtractor::default().extract(dir.path()).unwrap();
        assert_eq!(relative_paths(&corpus), vec!["a.md", "b.py", "src/c.js"]);
        assert_eq!(corpus.documents[1].content, "print('b')");
        assert_eq!(corpus.documents[1].path, dir.path().join("b.py"));
    }

    #[test]
    fn test_gitignore_filters_files_and_directories() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".gitignore", b"build/\n*.log.md\nsecret.py\n");
        write(dir.path(), "app.py", b"app");
        write(dir.path(), "secret.py", b"token");
        write(dir.path(), "notes.log.md", b"log");
        write(dir.path(), "build/out.py", b"generated");
        write(dir.path(), "build/nested/deep.py", b"generated");

        let corpus = CorpusExtractor::default().extract(dir.path()).unwrap();
        assert_eq!(relative_paths(&corpus), vec!["app.py"]);
    }

    #[test]
    fn test_negated_pattern_reincludes_file() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".gitignore", b"*.md\n!KEEP.md\n");
        write(dir.path(), "KEEP.md", b"keep");
        write(dir.path(), "drop.md", b"drop");

        let corpus = CorpusExtractor::default().extract(dir.path()).unwrap();
        assert_eq!(relative_paths(&corpus), vec!["KEEP.md"]);
    }

    #[test]
    fn test_virtual_environment_markers_skip_directories() {
        let dir = tempdir().unwrap();
        write(dir.path(), "venv/lib/site.py", b"x");
        write(dir.path(), ".env/tool.py", b"x");
        write(dir.path(), "src/environment/config.py", b"x");
        write(dir.path(), "src/main.py", b"x");
        // Markers apply to directories only.
        write(dir.path(), "env_setup.py", b"x");

        let corpus = CorpusExtractor::default().extract(dir.path()).unwrap();
        assert_eq!(relative_paths(&corpus), vec!["env_setup.py", "src/main.py"]);
    }

    #[test]
    fn test_custom_markers_and_extra_patterns() {
        let dir = tempdir().unwrap();
        write(dir.path(), "vendor/lib.py", b"x");
        write(dir.path(), "venv/ok.py", b"x");
        write(dir.path(), "tests/test_a.py", b"x");
        write(dir.path(), "a.py", b"x");

        let extractor = CorpusExtractor::new(ExtractorConfig {
            excluded_dir_markers: vec!["vendor".to_string()],
            extra_ignore_patterns: vec!["tests/".to_string()],
            ..ExtractorConfig::default()
        });
        let corpus = extractor.extract(dir.path()).unwrap();
        assert_eq!(relative_paths(&corpus), vec!["a.py", "venv/ok.py"]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let dir = tempdir().unwrap();
        write(dir.path(), "bin.py", b"ok \xff\xfe done");

        let corpus = CorpusExtractor::default().extract(dir.path()).unwrap();
        assert_eq!(corpus.len(), 1);
        assert!(corpus.documents[0].content.starts_with("ok "));
        assert!(corpus.documents[0].content.ends_with(" done"));
        assert!(corpus.documents[0].content.contains('\u{FFFD}'));
    }

    #[test]
    fn test_empty_directory_is_empty_corpus() {
        let dir = tempdir().unwrap();
        let corpus = CorpusExtractor::default().extract(dir.path()).unwrap();
        assert!(corpus.is_empty());
        assert_eq!(corpus.skipped, 0);
    }

    #[test]
    fn test_missing_root_is_extraction_error() {
        let dir = tempdir().unwrap();
        let err = CorpusExtractor::default()
            .extract(&dir.path().join("missing"))
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Extraction);
    }

    #[test]
    fn test_cancelled_before_walk() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", b"x");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = CorpusExtractor::default()
            .extract_with(dir.path(), &cancel, &NoopObserver)
            .unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Cancelled {
                stage: Stage::Extraction
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        use crate::observer::testing::RecordingObserver;

        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", b"print('a')");
        write(dir.path(), "locked.py", b"secret");
        let locked = dir.path().join("locked.py");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not apply to root.
        if fs::read(&locked).is_ok() {
            return;
        }

        let observer = RecordingObserver::default();
        let corpus = CorpusExtractor::default()
            .extract_with(dir.path(), &CancellationToken::new(), &observer)
            .unwrap();

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.documents[0].relative_path, "a.py");
        assert_eq!(corpus.skipped, 1);

        let events = observer.events();
        assert!(events.iter().any(|e| matches!(
            e,
            RetrievalEvent::FileSkipped { path, .. } if path == &locked
        )));
        assert!(events.contains(&RetrievalEvent::ExtractionFinished {
            documents: 1,
            skipped: 1,
        }));
    }

    #[test]
    fn test_ignore_spec_without_file() {
        let dir = tempdir().unwrap();
        let spec = IgnoreSpec::load(dir.path(), ".gitignore", &[], &[]);
        assert!(spec.is_empty());
        assert!(!spec.is_ignored(Path::new("anything.py"), false));
        assert!(!spec.excludes_dir(Path::new("src")));
    }
}

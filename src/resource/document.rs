//! Document resource: text and markdown files under a directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use walkdir::WalkDir;

use super::{Resource, ResourceError, ResourceKind};
use crate::llm::LmBackend;
use crate::util::keywords;

const EXTENSIONS: &[&str] = &["txt", "md", "markdown", "rst"];
const TOP_PASSAGES: usize = 5;

#[derive(Debug, Clone)]
struct Passage {
    source: String,
    text: String,
    terms: Vec<String>,
}

/// Answers questions from the most relevant passages of a document set.
pub struct DocumentResource {
    unique_name: String,
    name: String,
    passages: Vec<Passage>,
    backend: LmBackend,
    overview: OnceCell<String>,
}

impl DocumentResource {
    /// Load every text file under `dir`. Paragraphs (blank-line separated)
    /// become passages.
    pub fn load(
        unique_name: impl Into<String>,
        dir: &Path,
        backend: LmBackend,
    ) -> Result<Self, ResourceError> {
        let unique_name = unique_name.into();
        if !dir.is_dir() {
            return Err(ResourceError::unavailable(
                &unique_name,
                format!("{} is not a directory", dir.display()),
            ));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| ResourceError::unavailable(&unique_name, e))?;
            if !entry.file_type().is_file() || !has_text_extension(entry.path()) {
                continue;
            }
            match std::fs::read_to_string(entry.path()) {
                Ok(text) => {
                    let relative = entry
                        .path()
                        .strip_prefix(dir)
                        .map(PathBuf::from)
                        .unwrap_or_else(|_| entry.path().to_path_buf());
                    files.push((relative.display().to_string(), text));
                }
                Err(e) => tracing::warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }

        tracing::info!(
            "Loaded {} documents for {} from {}",
            files.len(),
            unique_name,
            dir.display()
        );
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| unique_name.clone());
        Ok(Self::from_texts(unique_name, files, backend).with_name(name))
    }

    /// Build from in-memory `(source, text)` pairs.
    pub fn from_texts(
        unique_name: impl Into<String>,
        texts: Vec<(String, String)>,
        backend: LmBackend,
    ) -> Self {
        let unique_name = unique_name.into();
        let passages = texts
            .into_iter()
            .flat_map(|(source, text)| {
                text.split("\n\n")
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(|p| Passage {
                        source: source.clone(),
                        text: p.to_string(),
                        terms: keywords(p),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        Self {
            name: unique_name.clone(),
            unique_name,
            passages,
            backend,
            overview: OnceCell::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn passage_count(&self) -> usize {
        self.passages.len()
    }

    /// Passages sharing at least one keyword with `question`, best first.
    fn retrieve(&self, question: &str) -> Vec<&Passage> {
        let wanted = keywords(question);
        let mut scored: Vec<(usize, usize, &Passage)> = self
            .passages
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let score = wanted.iter().filter(|w| p.terms.contains(w)).count();
                (score, i, p)
            })
            .filter(|(score, _, _)| *score > 0)
            .collect();
        // Higher score first, then document order.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored
            .into_iter()
            .take(TOP_PASSAGES)
            .map(|(_, _, p)| p)
            .collect()
    }
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[async_trait]
impl Resource for DocumentResource {
    fn unique_name(&self) -> &str {
        &self.unique_name
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Document
    }

    async fn answer(&self, question: &str, n_words: usize) -> Result<String, ResourceError> {
        let passages = self.retrieve(question);
        if passages.is_empty() {
            return Ok(format!(
                "No passage in the {} documents relates to the question.",
                self.name
            ));
        }

        let context = passages
            .iter()
            .map(|p| format!("[{}]\n{}", p.source, p.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Using only the passages below, answer the question within {n_words} words. \
             If the passages do not contain the answer, say so.\n\n\
             PASSAGES:\n{context}\n\nQUESTION:\n{question}\n"
        );
        self.backend
            .complete(&prompt)
            .await
            .map_err(|e| ResourceError::unavailable(&self.unique_name, e))
    }

    async fn summarize(&self) -> Result<String, ResourceError> {
        if self.passages.is_empty() {
            return Ok(format!("{} holds no readable documents.", self.name));
        }
        let sample = self
            .passages
            .iter()
            .take(TOP_PASSAGES * 2)
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "In two or three sentences, describe what kind of information the \
             following document excerpts contain:\n\n{sample}\n"
        );
        self.backend
            .complete(&prompt)
            .await
            .map_err(|e| ResourceError::unavailable(&self.unique_name, e))
    }

    async fn overview(&self) -> Result<String, ResourceError> {
        self.overview
            .get_or_try_init(|| self.summarize())
            .await
            .cloned()
    }
}

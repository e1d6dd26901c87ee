//! Rebuilds the retrievable index from the editable KB text.
//!
//! Validation happens before the live index is touched: malformed text never
//! discards the previous snapshot, and an embedding outage leaves it intact.
//! In-flight incidents keep their already-bound `kb_reference` regardless.

use std::path::PathBuf;
use std::sync::Arc;

use tickethive_schema::{Error, Result};

use crate::embedding::EmbeddingProvider;
use crate::index::{IndexedEntry, KbIndex};
use crate::parser::parse_kb_text;

#[derive(Debug, Clone)]
pub struct ReindexOutcome {
    pub chunk_count: usize,
    pub generation: u64,
}

pub struct KbIndexer {
    index: Arc<KbIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    kb_path: PathBuf,
}

impl KbIndexer {
    pub fn new(
        index: Arc<KbIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        kb_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            index,
            embedder,
            kb_path: kb_path.into(),
        }
    }

    /// Parse, embed, and atomically publish a replacement snapshot.
    pub async fn reindex(&self, full_text: &str) -> Result<ReindexOutcome> {
        let entries = parse_kb_text(full_text);
        if entries.is_empty() {
            return Err(Error::validation(
                "knowledge base text contains no well-formed entries",
            ));
        }

        let texts: Vec<String> = entries.iter().map(embedding_text).collect();
        let embedded = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| Error::capability(format!("embedding failed during reindex: {e}")))?;
        if embedded.embeddings.len() != entries.len() {
            return Err(Error::capability(format!(
                "embedding count mismatch: expected {}, got {}",
                entries.len(),
                embedded.embeddings.len()
            )));
        }

        let indexed: Vec<IndexedEntry> = entries
            .into_iter()
            .zip(embedded.embeddings)
            .map(|(entry, embedding)| IndexedEntry { entry, embedding })
            .collect();

        let chunk_count = indexed.len();
        let generation = self.index.publish(indexed);
        tracing::info!(chunk_count, generation, "published KB index snapshot");

        Ok(ReindexOutcome {
            chunk_count,
            generation,
        })
    }

    /// Full admin edit: validate + reindex, then persist the raw text so the
    /// next startup rebuilds the same set.
    pub async fn update_knowledge_base(&self, full_text: &str) -> Result<ReindexOutcome> {
        let outcome = self.reindex(full_text).await?;

        if let Some(parent) = self.kb_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::Internal(e.into()))?;
            }
        }
        tokio::fs::write(&self.kb_path, full_text)
            .await
            .map_err(|e| Error::Internal(e.into()))?;
        tracing::info!(path = %self.kb_path.display(), "knowledge base file updated");

        Ok(outcome)
    }

    /// Startup load. A missing file is not an error: the system starts with
    /// an empty index and every incident routes to admin review.
    pub async fn load_from_disk(&self) -> Result<usize> {
        let text = match tokio::fs::read_to_string(&self.kb_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.kb_path.display(), "no KB file found, starting with empty index");
                return Ok(0);
            }
            Err(e) => return Err(Error::Internal(e.into())),
        };
        let outcome = self.reindex(&text).await?;
        Ok(outcome.chunk_count)
    }

    /// The raw editable text, for the admin surface.
    pub async fn kb_text(&self) -> Result<String> {
        match tokio::fs::read_to_string(&self.kb_path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(Error::Internal(e.into())),
        }
    }
}

/// The text a KB entry is embedded under: use case carries most of the
/// signal, required fields and solution add discriminating vocabulary.
fn embedding_text(entry: &tickethive_schema::KbEntry) -> String {
    let mut parts = vec![entry.use_case.clone()];
    parts.extend(entry.required_info.iter().cloned());
    parts.push(entry.solution_steps.clone());
    parts.join("\n")
}

//! One-shot semantic lookup of the closest known issue.
//!
//! Pure read over the current index snapshot. The dialogue engine enforces
//! the at-most-once-per-incident contract by checking the incident's
//! `kb_reference` before calling.

use std::sync::Arc;

use tickethive_schema::{Error, KbEntry, Result};

use crate::embedding::EmbeddingProvider;
use crate::index::{cosine_similarity, KbIndex};

#[derive(Debug, Clone)]
pub struct RetrievedEntry {
    pub entry: KbEntry,
    pub score: f32,
    /// Generation of the snapshot the match came from.
    pub generation: u64,
}

pub struct KbRetriever {
    index: Arc<KbIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    threshold: f32,
}

impl KbRetriever {
    pub fn new(index: Arc<KbIndex>, embedder: Arc<dyn EmbeddingProvider>, threshold: f32) -> Self {
        Self {
            index,
            embedder,
            threshold,
        }
    }

    /// Top match above the acceptance threshold, or `None` for "no matching
    /// known issue".
    pub async fn retrieve(&self, query: &str) -> Result<Option<RetrievedEntry>> {
        let snapshot = self.index.snapshot();
        if snapshot.entries.is_empty() {
            return Ok(None);
        }

        let embedded = self
            .embedder
            .embed(&[query.to_owned()])
            .await
            .map_err(|e| Error::capability(format!("query embedding failed: {e}")))?;
        let query_embedding = embedded
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::capability("embedding provider returned empty query embedding"))?;

        let mut best: Option<RetrievedEntry> = None;
        for indexed in &snapshot.entries {
            let score = cosine_similarity(&query_embedding, &indexed.embedding);
            if best.as_ref().map(|b| score > b.score).unwrap_or(true) {
                best = Some(RetrievedEntry {
                    entry: indexed.entry.clone(),
                    score,
                    generation: snapshot.generation,
                });
            }
        }

        match best {
            Some(candidate) if candidate.score >= self.threshold => {
                tracing::debug!(
                    kb_id = %candidate.entry.kb_id,
                    score = candidate.score,
                    "KB match accepted"
                );
                Ok(Some(candidate))
            }
            Some(candidate) => {
                tracing::debug!(
                    kb_id = %candidate.entry.kb_id,
                    score = candidate.score,
                    threshold = self.threshold,
                    "best KB candidate below threshold"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Re-hydrate the entry a running incident is bound to.
    pub fn entry_by_id(&self, kb_id: &str) -> Option<KbEntry> {
        self.index.entry_by_id(kb_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::StubEmbeddingProvider;
    use crate::index::IndexedEntry;

    async fn seeded_retriever(threshold: f32) -> (Arc<KbIndex>, KbRetriever) {
        let embedder = Arc::new(StubEmbeddingProvider::new(16));
        let index = Arc::new(KbIndex::new());

        let vpn = KbEntry {
            kb_id: "KB_VPN_01".into(),
            use_case: "VPN will not connect".into(),
            required_info: vec!["OS version".into(), "error message".into()],
            solution_steps: "Reset the adapter.".into(),
        };
        let printer = KbEntry {
            kb_id: "KB_PRINTER_02".into(),
            use_case: "Printer jams".into(),
            required_info: vec!["printer model".into()],
            solution_steps: "Clear the path.".into(),
        };

        let texts = vec!["vpn issue".to_string(), "printer issue".to_string()];
        let embedded = embedder.embed(&texts).await.unwrap();
        index.publish(vec![
            IndexedEntry {
                entry: vpn,
                embedding: embedded.embeddings[0].clone(),
            },
            IndexedEntry {
                entry: printer,
                embedding: embedded.embeddings[1].clone(),
            },
        ]);

        let retriever = KbRetriever::new(index.clone(), embedder, threshold);
        (index, retriever)
    }

    #[tokio::test]
    async fn identical_text_is_a_perfect_match() {
        let (_, retriever) = seeded_retriever(0.99).await;
        // the stub embedder is deterministic, so the exact indexed text
        // scores ~1.0
        let hit = retriever.retrieve("vpn issue").await.unwrap().unwrap();
        assert_eq!(hit.entry.kb_id, "KB_VPN_01");
        assert!(hit.score > 0.99);
        assert_eq!(hit.generation, 1);
    }

    #[tokio::test]
    async fn below_threshold_returns_none() {
        let (_, retriever) = seeded_retriever(0.99).await;
        let miss = retriever.retrieve("completely unrelated text").await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn empty_index_returns_none_without_embedding() {
        let index = Arc::new(KbIndex::new());
        let retriever = KbRetriever::new(index, Arc::new(StubEmbeddingProvider::new(4)), 0.4);
        assert!(retriever.retrieve("anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn entry_by_id_reads_current_snapshot() {
        let (_, retriever) = seeded_retriever(0.4).await;
        assert!(retriever.entry_by_id("KB_PRINTER_02").is_some());
        assert!(retriever.entry_by_id("KB_NOPE").is_none());
    }
}

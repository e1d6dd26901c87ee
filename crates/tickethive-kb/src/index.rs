//! Atomically swappable, immutable KB index snapshot.
//!
//! Readers always dereference a consistent snapshot; `reindex` publishes a
//! whole replacement without in-place mutation, so a retrieval running
//! concurrently with a reindex sees either the old complete set or the new
//! complete set, never a mix.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tickethive_schema::KbEntry;

#[derive(Debug, Clone)]
pub struct IndexedEntry {
    pub entry: KbEntry,
    pub embedding: Vec<f32>,
}

#[derive(Debug)]
pub struct KbSnapshot {
    /// Monotonically increasing across publishes.
    pub generation: u64,
    pub entries: Vec<IndexedEntry>,
}

impl KbSnapshot {
    pub fn empty() -> Self {
        Self {
            generation: 0,
            entries: Vec::new(),
        }
    }
}

pub struct KbIndex {
    current: ArcSwap<KbSnapshot>,
    next_generation: AtomicU64,
}

impl KbIndex {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(KbSnapshot::empty()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// The current snapshot. The returned Arc stays valid (and unchanged)
    /// across any number of subsequent publishes.
    pub fn snapshot(&self) -> Arc<KbSnapshot> {
        self.current.load_full()
    }

    /// Publish a complete replacement set. Returns the new generation.
    pub fn publish(&self, entries: Vec<IndexedEntry>) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.current.store(Arc::new(KbSnapshot {
            generation,
            entries,
        }));
        generation
    }

    pub fn entry_by_id(&self, kb_id: &str) -> Option<KbEntry> {
        self.snapshot()
            .entries
            .iter()
            .find(|indexed| indexed.entry.kb_id == kb_id)
            .map(|indexed| indexed.entry.clone())
    }

    pub fn len(&self) -> usize {
        self.snapshot().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for KbIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kb_id: &str) -> IndexedEntry {
        IndexedEntry {
            entry: KbEntry {
                kb_id: kb_id.to_string(),
                use_case: "case".to_string(),
                required_info: vec![],
                solution_steps: "fix".to_string(),
            },
            embedding: vec![1.0, 0.0],
        }
    }

    #[test]
    fn empty_index_has_generation_zero() {
        let index = KbIndex::new();
        let snap = index.snapshot();
        assert_eq!(snap.generation, 0);
        assert!(index.is_empty());
    }

    #[test]
    fn publish_bumps_generation_monotonically() {
        let index = KbIndex::new();
        assert_eq!(index.publish(vec![entry("a")]), 1);
        assert_eq!(index.publish(vec![entry("b")]), 2);
        assert_eq!(index.snapshot().generation, 2);
    }

    #[test]
    fn held_snapshot_survives_publish() {
        let index = KbIndex::new();
        index.publish(vec![entry("old")]);
        let held = index.snapshot();

        index.publish(vec![entry("new_1"), entry("new_2")]);

        // The held snapshot is the complete old set, untouched.
        assert_eq!(held.entries.len(), 1);
        assert_eq!(held.entries[0].entry.kb_id, "old");
        // Fresh reads see the complete new set.
        let fresh = index.snapshot();
        assert_eq!(fresh.entries.len(), 2);
        assert_eq!(fresh.entries[0].entry.kb_id, "new_1");
    }

    #[test]
    fn entry_by_id_finds_and_misses() {
        let index = KbIndex::new();
        index.publish(vec![entry("a"), entry("b")]);
        assert_eq!(index.entry_by_id("b").map(|e| e.kb_id), Some("b".into()));
        assert!(index.entry_by_id("c").is_none());
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}

//! Slide index capability and its in-memory implementation.
//!
//! The index is produced offline by the PDF/NLP pipeline and consumed
//! read-only here. [`SlideIndex`] is the minimal capability the matcher
//! needs, so any backing store (trie + tf-idf, vector database, linear scan)
//! can be swapped in; [`InMemorySlideIndex`] deserializes the JSON document
//! the pipeline exports.

use std::collections::HashMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Identifier of one slide within a presentation (1-based page number).
pub type SlideId = u32;

/// One inverted-index posting: where a keyword occurs and how much it weighs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Posting {
    pub slide_id: SlideId,
    /// Character position of the keyword within the slide text.
    pub position: usize,
    /// tf-idf weight of the keyword on this slide.
    pub weight: f64,
}

/// Per-slide metadata the combiner needs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SlideMetadata {
    /// Character span of the slide title within the slide text.
    pub title_span: (usize, usize),
    /// Total slide text length in characters.
    pub text_length: usize,
}

/// Read-only alignment data for one presentation.
///
/// All methods must be cheap and thread-safe: the index is shared across
/// sessions and queried on every final utterance.
pub trait SlideIndex: Send + Sync {
    /// Postings for an exact keyword, empty if unknown.
    fn lookup(&self, keyword: &str) -> Vec<Posting>;

    /// Flat `(slide_id, keyword)` list for fuzzy scanning.
    fn keywords_flat(&self) -> &[(SlideId, String)];

    /// Flat `(slide_id, phonetic reading)` list, empty if unavailable.
    fn readings_flat(&self) -> &[(SlideId, String)];

    /// Embeds an utterance into the slide vector space.
    /// `None` disables the semantic signal.
    fn embed(&self, text: &str) -> Option<Vec<f32>>;

    /// Dense slide embeddings, `None` if the index carries none.
    fn embeddings(&self) -> Option<&[(SlideId, Vec<f32>)]>;

    /// Metadata for one slide.
    fn metadata(&self, slide_id: SlideId) -> Option<SlideMetadata>;

    /// Number of slides in the presentation.
    fn slide_count(&self) -> usize;
}

/// Serialized form of the offline pipeline's index export.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InMemorySlideIndex {
    /// keyword → postings.
    inverted_index: HashMap<String, Vec<Posting>>,
    /// Flat keyword list per slide.
    keywords: Vec<(SlideId, String)>,
    /// Flat phonetic reading list per slide.
    #[serde(default)]
    readings: Vec<(SlideId, String)>,
    /// Dense slide embeddings, if the pipeline generated them.
    #[serde(default)]
    embeddings: Option<Vec<(SlideId, Vec<f32>)>>,
    /// Per-slide metadata.
    metadata: HashMap<SlideId, SlideMetadata>,
    slide_count: usize,
}

impl InMemorySlideIndex {
    /// Parses an index from the pipeline's JSON export.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Builder used by tests and embedders that construct indexes directly.
    #[must_use]
    pub fn builder() -> InMemorySlideIndexBuilder {
        InMemorySlideIndexBuilder::default()
    }
}

impl SlideIndex for InMemorySlideIndex {
    fn lookup(&self, keyword: &str) -> Vec<Posting> {
        self.inverted_index
            .get(keyword)
            .cloned()
            .unwrap_or_default()
    }

    fn keywords_flat(&self) -> &[(SlideId, String)] {
        &self.keywords
    }

    fn readings_flat(&self) -> &[(SlideId, String)] {
        &self.readings
    }

    fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        // The in-memory index stores precomputed slide vectors but has no
        // text encoder of its own; embedding-capable deployments wrap it
        // with an encoder-backed implementation.
        None
    }

    fn embeddings(&self) -> Option<&[(SlideId, Vec<f32>)]> {
        self.embeddings.as_deref()
    }

    fn metadata(&self, slide_id: SlideId) -> Option<SlideMetadata> {
        self.metadata.get(&slide_id).copied()
    }

    fn slide_count(&self) -> usize {
        self.slide_count
    }
}

/// Incremental builder for [`InMemorySlideIndex`].
#[derive(Debug, Default)]
pub struct InMemorySlideIndexBuilder {
    index: InMemorySlideIndex,
}

impl InMemorySlideIndexBuilder {
    /// Adds a keyword posting and the flat-list entry for it.
    #[must_use]
    pub fn keyword(
        mut self,
        keyword: &str,
        slide_id: SlideId,
        position: usize,
        weight: f64,
    ) -> Self {
        self.index
            .inverted_index
            .entry(keyword.to_string())
            .or_default()
            .push(Posting {
                slide_id,
                position,
                weight,
            });
        self.index.keywords.push((slide_id, keyword.to_string()));
        self
    }

    /// Adds a phonetic reading for fuzzy matching.
    #[must_use]
    pub fn reading(mut self, reading: &str, slide_id: SlideId) -> Self {
        self.index.readings.push((slide_id, reading.to_string()));
        self
    }

    /// Sets a slide's metadata.
    #[must_use]
    pub fn slide(mut self, slide_id: SlideId, title_span: (usize, usize), text_length: usize) -> Self {
        self.index.metadata.insert(
            slide_id,
            SlideMetadata {
                title_span,
                text_length,
            },
        );
        self.index.slide_count = self.index.slide_count.max(slide_id as usize);
        self
    }

    /// Attaches dense embeddings.
    #[must_use]
    pub fn embeddings(mut self, embeddings: Vec<(SlideId, Vec<f32>)>) -> Self {
        self.index.embeddings = Some(embeddings);
        self
    }

    #[must_use]
    pub fn build(self) -> InMemorySlideIndex {
        self.index
    }
}

/// Registry of preloaded indexes keyed by presentation id.
///
/// Indexes are read-only after registration and shared across sessions.
#[derive(Default)]
pub struct SlideIndexRegistry {
    indexes: DashMap<String, std::sync::Arc<dyn SlideIndex>>,
}

impl SlideIndexRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an index for a presentation, replacing any previous one.
    pub fn register(&self, presentation_id: &str, index: std::sync::Arc<dyn SlideIndex>) {
        self.indexes.insert(presentation_id.to_string(), index);
        log::info!("[Matching] Slide index registered for {}", presentation_id);
    }

    /// Looks up the index for a presentation.
    #[must_use]
    pub fn get(&self, presentation_id: &str) -> Option<std::sync::Arc<dyn SlideIndex>> {
        self.indexes
            .get(presentation_id)
            .map(|r| std::sync::Arc::clone(r.value()))
    }

    /// Removes the index for a presentation.
    pub fn remove(&self, presentation_id: &str) {
        self.indexes.remove(presentation_id);
    }

    /// Number of registered presentations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    /// Returns true if no indexes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_lookupable_index() {
        let index = InMemorySlideIndex::builder()
            .keyword("rust", 1, 0, 2.0)
            .keyword("rust", 3, 10, 1.0)
            .slide(1, (0, 8), 120)
            .slide(3, (0, 12), 300)
            .build();

        let postings = index.lookup("rust");
        assert_eq!(postings.len(), 2);
        assert_eq!(postings[0].slide_id, 1);
        assert!(index.lookup("python").is_empty());
        assert_eq!(index.slide_count(), 3);
    }

    #[test]
    fn json_round_trip_preserves_postings() {
        let index = InMemorySlideIndex::builder()
            .keyword("テスト", 2, 5, 2.0)
            .reading("てすと", 2)
            .slide(2, (0, 4), 80)
            .build();

        let json = serde_json::to_string(&index).unwrap();
        let back = InMemorySlideIndex::from_json(&json).unwrap();
        assert_eq!(back.lookup("テスト").len(), 1);
        assert_eq!(back.readings_flat().len(), 1);
        assert_eq!(back.metadata(2).unwrap().text_length, 80);
    }

    #[test]
    fn index_loads_from_exported_file() {
        let index = InMemorySlideIndex::builder()
            .keyword("lectern", 1, 0, 3.0)
            .slide(1, (0, 7), 60)
            .build();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, serde_json::to_string(&index).unwrap()).unwrap();

        let loaded =
            InMemorySlideIndex::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.lookup("lectern").len(), 1);
    }

    #[test]
    fn missing_embeddings_disable_semantic_signal() {
        let index = InMemorySlideIndex::builder().slide(1, (0, 1), 10).build();
        assert!(index.embeddings().is_none());
        assert!(index.embed("anything").is_none());
    }

    #[test]
    fn registry_register_and_get() {
        let registry = SlideIndexRegistry::new();
        assert!(registry.get("p1").is_none());

        let index = std::sync::Arc::new(InMemorySlideIndex::builder().slide(1, (0, 1), 10).build());
        registry.register("p1", index);
        assert!(registry.get("p1").is_some());
        assert_eq!(registry.len(), 1);

        registry.remove("p1");
        assert!(registry.get("p1").is_none());
    }
}

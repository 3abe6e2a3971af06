//! Semantic signal: cosine similarity between the utterance embedding and
//! precomputed slide vectors.
//!
//! The signal is zero whenever the index carries no embeddings or cannot
//! embed the utterance — degradation, never failure.

use std::collections::HashMap;

use super::index::{SlideId, SlideIndex};

/// Semantic evidence for one slide.
#[derive(Debug, Clone, Copy)]
pub struct SemanticMatch {
    /// Cosine similarity in [0, 1] (negative similarities are discarded).
    pub similarity: f64,
}

/// Runs the semantic signal: top-k slides by cosine similarity above the
/// threshold.
pub fn match_semantic(
    index: &dyn SlideIndex,
    text: &str,
    threshold: f64,
    top_k: usize,
) -> HashMap<SlideId, SemanticMatch> {
    let Some(query) = index.embed(text) else {
        return HashMap::new();
    };
    let Some(embeddings) = index.embeddings() else {
        return HashMap::new();
    };

    let mut scored: Vec<(SlideId, f64)> = embeddings
        .iter()
        .filter_map(|(slide_id, vector)| {
            let similarity = cosine_similarity(&query, vector)?;
            (similarity >= threshold).then_some((*slide_id, similarity))
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(top_k);

    scored
        .into_iter()
        .map(|(slide_id, similarity)| (slide_id, SemanticMatch { similarity }))
        .collect()
}

/// Cosine similarity of two vectors; `None` for mismatched or zero vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        dot += x as f64 * y as f64;
        norm_a += x as f64 * x as f64;
        norm_b += y as f64 * y as f64;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::index::{InMemorySlideIndex, SlideIndex, SlideMetadata};

    /// Index wrapper with a trivial bag-of-dimensions encoder for tests.
    struct EncodingIndex {
        inner: InMemorySlideIndex,
    }

    impl SlideIndex for EncodingIndex {
        fn lookup(&self, keyword: &str) -> Vec<crate::matching::index::Posting> {
            self.inner.lookup(keyword)
        }
        fn keywords_flat(&self) -> &[(SlideId, String)] {
            self.inner.keywords_flat()
        }
        fn readings_flat(&self) -> &[(SlideId, String)] {
            self.inner.readings_flat()
        }
        fn embed(&self, text: &str) -> Option<Vec<f32>> {
            // Toy encoder: axis 0 counts "cat", axis 1 counts "dog".
            let cats = text.matches("cat").count() as f32;
            let dogs = text.matches("dog").count() as f32;
            Some(vec![cats, dogs])
        }
        fn embeddings(&self) -> Option<&[(SlideId, Vec<f32>)]> {
            self.inner.embeddings()
        }
        fn metadata(&self, slide_id: SlideId) -> Option<SlideMetadata> {
            self.inner.metadata(slide_id)
        }
        fn slide_count(&self) -> usize {
            self.inner.slide_count()
        }
    }

    #[test]
    fn picks_the_aligned_slide() {
        let idx = EncodingIndex {
            inner: InMemorySlideIndex::builder()
                .slide(1, (0, 4), 100)
                .slide(2, (0, 4), 100)
                .embeddings(vec![(1, vec![1.0, 0.0]), (2, vec![0.0, 1.0])])
                .build(),
        };
        let matches = match_semantic(&idx, "cat cat cat", 0.7, 5);
        assert!(matches.contains_key(&1));
        assert!(!matches.contains_key(&2));
        assert!((matches[&1].similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn no_embeddings_yields_empty_signal() {
        let idx = InMemorySlideIndex::builder().slide(1, (0, 4), 100).build();
        assert!(match_semantic(&idx, "anything", 0.7, 5).is_empty());
    }

    #[test]
    fn top_k_limits_candidates() {
        let idx = EncodingIndex {
            inner: InMemorySlideIndex::builder()
                .slide(1, (0, 4), 100)
                .embeddings(vec![
                    (1, vec![1.0, 0.1]),
                    (2, vec![1.0, 0.2]),
                    (3, vec![1.0, 0.3]),
                ])
                .build(),
        };
        let matches = match_semantic(&idx, "cat", 0.1, 2);
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
    }

    #[test]
    fn cosine_rejects_mismatched_lengths() {
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_none());
    }
}

//! Fuzzy keyword signal: normalized edit-distance against slide keywords and
//! phonetic readings.
//!
//! Only utterance keywords that missed the inverted index are considered —
//! an exact hit already contributes at full weight, so fuzzing it would
//! double-count. Accepted pairs contribute `similarity × discount`.

use std::collections::HashMap;

use strsim::normalized_levenshtein;

use super::index::{SlideId, SlideIndex};

/// Accumulated fuzzy-match evidence for one slide.
#[derive(Debug, Clone, Default)]
pub struct FuzzyMatches {
    /// Sum of discounted similarities.
    pub score: f64,
    /// Slide-side keywords/readings that were close enough.
    pub matched_keywords: Vec<String>,
}

/// Runs the fuzzy signal for the utterance keywords that missed exactly.
pub fn match_fuzzy(
    index: &dyn SlideIndex,
    missed_keywords: &[String],
    threshold: f64,
    discount: f64,
) -> HashMap<SlideId, FuzzyMatches> {
    let mut per_slide: HashMap<SlideId, FuzzyMatches> = HashMap::new();

    for query in missed_keywords {
        scan(query, index.keywords_flat(), threshold, discount, &mut per_slide);
        scan(query, index.readings_flat(), threshold, discount, &mut per_slide);
    }

    per_slide
}

fn scan(
    query: &str,
    candidates: &[(SlideId, String)],
    threshold: f64,
    discount: f64,
    per_slide: &mut HashMap<SlideId, FuzzyMatches>,
) {
    for (slide_id, candidate) in candidates {
        let similarity = normalized_levenshtein(query, candidate);
        if similarity >= threshold {
            let entry = per_slide.entry(*slide_id).or_default();
            entry.score += similarity * discount;
            entry.matched_keywords.push(candidate.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::index::InMemorySlideIndex;

    fn index() -> InMemorySlideIndex {
        InMemorySlideIndex::builder()
            .keyword("transcription", 1, 0, 2.0)
            .keyword("alignment", 2, 0, 2.0)
            .reading("とらんすくりぷしょん", 1)
            .slide(1, (0, 10), 100)
            .slide(2, (0, 10), 100)
            .build()
    }

    #[test]
    fn near_miss_matches_with_discount() {
        // Two substitutions away from "transcription" (13 chars):
        // similarity 11/13 ~ 0.846, discounted to ~0.59.
        let missed = vec!["transcriptoin".to_string()];
        let matches = match_fuzzy(&index(), &missed, 0.8, 0.7);
        let slide1 = &matches[&1];
        assert_eq!(slide1.matched_keywords, vec!["transcription"]);
        assert!(
            slide1.score > 0.55 && slide1.score < 0.65,
            "score {}",
            slide1.score
        );
    }

    #[test]
    fn distant_keywords_are_rejected() {
        let missed = vec!["banana".to_string()];
        let matches = match_fuzzy(&index(), &missed, 0.8, 0.7);
        assert!(matches.is_empty());
    }

    #[test]
    fn phonetic_readings_participate() {
        let missed = vec!["とらんすくりぷしよん".to_string()];
        let matches = match_fuzzy(&index(), &missed, 0.8, 0.7);
        assert!(matches.contains_key(&1));
    }

    #[test]
    fn threshold_is_inclusive() {
        // Identical strings score 1.0, clearly above any threshold.
        let missed = vec!["alignment".to_string()];
        let matches = match_fuzzy(&index(), &missed, 1.0, 0.7);
        assert_eq!(matches[&2].score, 0.7);
    }
}

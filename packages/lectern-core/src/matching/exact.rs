//! Exact keyword signal: inverted-index lookup with tf-idf scoring.

use std::collections::HashMap;

use super::index::{SlideId, SlideIndex};

/// Accumulated exact-match evidence for one slide.
#[derive(Debug, Clone, Default)]
pub struct ExactMatches {
    /// Sum of tf-idf weights of matched keywords.
    pub score: f64,
    /// Keywords that matched on this slide.
    pub matched_keywords: Vec<String>,
    /// Character positions of the matches (used for the title boost).
    pub positions: Vec<usize>,
}

/// Output of the exact signal: per-slide evidence plus the set of utterance
/// keywords that found at least one posting (the fuzzy signal only considers
/// the rest).
#[derive(Debug, Default)]
pub struct ExactSignal {
    pub per_slide: HashMap<SlideId, ExactMatches>,
    pub found_keywords: Vec<String>,
}

/// Runs the exact signal for one utterance's keywords.
pub fn match_exact(index: &dyn SlideIndex, keywords: &[String]) -> ExactSignal {
    let mut signal = ExactSignal::default();

    for keyword in keywords {
        let postings = index.lookup(keyword);
        if postings.is_empty() {
            continue;
        }
        signal.found_keywords.push(keyword.clone());

        for posting in postings {
            let entry = signal.per_slide.entry(posting.slide_id).or_default();
            entry.score += posting.weight;
            entry.matched_keywords.push(keyword.clone());
            entry.positions.push(posting.position);
        }
    }

    signal
}

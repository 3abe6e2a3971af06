//! Slide matching: align each final utterance to the slide it most likely
//! describes.
//!
//! Three signals are computed independently (exact tf-idf, fuzzy
//! edit-distance/phonetic, semantic embedding similarity) and combined with
//! temporal smoothing. Any signal may be unavailable; missing signals
//! contribute zero and the matcher degrades to "no match" rather than
//! failing. Target latency is p95 < 200 ms per utterance.

pub mod combiner;
pub mod exact;
pub mod fuzzy;
pub mod index;
pub mod semantic;

pub use combiner::{MatchResult, MatchSignal, ScoreCombiner};
pub use index::{
    InMemorySlideIndex, Posting, SlideId, SlideIndex, SlideIndexRegistry, SlideMetadata,
};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::state::MatchingConfig;

/// Minimum keyword length kept by the extractor.
const MIN_KEYWORD_LENGTH: usize = 2;

/// Extracts matching keywords from an utterance.
///
/// The same extractor runs at index time, so tokens compare exactly: runs of
/// word characters (ASCII alphanumerics plus the Japanese hiragana, katakana
/// and unified CJK ranges) are kept, pure-ASCII words are lowercased, and
/// duplicates are removed preserving first occurrence.
#[must_use]
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut keywords = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if is_word_char(ch) {
            current.push(ch);
        } else {
            flush_token(&mut current, &mut keywords);
        }
    }
    flush_token(&mut current, &mut keywords);

    let mut seen = std::collections::HashSet::new();
    keywords.retain(|k: &String| seen.insert(k.clone()));
    keywords
}

fn flush_token(current: &mut String, keywords: &mut Vec<String>) {
    if current.chars().count() >= MIN_KEYWORD_LENGTH {
        let token = if current.chars().all(|c| c.is_ascii_alphabetic()) {
            current.to_lowercase()
        } else {
            current.clone()
        };
        keywords.push(token);
    }
    current.clear();
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || ch == '_'
        || ('\u{3040}'..='\u{309F}').contains(&ch) // hiragana
        || ('\u{30A0}'..='\u{30FF}').contains(&ch) // katakana
        || ('\u{4E00}'..='\u{9FAF}').contains(&ch) // unified CJK
}

/// Aligns final utterances of one session against one preloaded index.
///
/// Thin facade over the signal matchers and the combiner; holds the
/// combiner's temporal state behind a mutex so the result handler can call
/// it from the reader task.
pub struct SlideMatcher {
    index: Arc<dyn SlideIndex>,
    config: MatchingConfig,
    combiner: Mutex<ScoreCombiner>,
}

impl SlideMatcher {
    #[must_use]
    pub fn new(index: Arc<dyn SlideIndex>, config: MatchingConfig) -> Self {
        Self {
            index,
            config,
            combiner: Mutex::new(ScoreCombiner::new(config)),
        }
    }

    /// Matches one utterance, updating the temporal state.
    ///
    /// Returns `None` when no slide clears the minimum score.
    pub fn match_segment(&self, text: &str) -> Option<MatchResult> {
        let keywords = extract_keywords(text);
        if keywords.is_empty() {
            return None;
        }

        let exact = exact::match_exact(self.index.as_ref(), &keywords);

        let missed: Vec<String> = keywords
            .iter()
            .filter(|k| !exact.found_keywords.contains(k))
            .cloned()
            .collect();
        let fuzzy = fuzzy::match_fuzzy(
            self.index.as_ref(),
            &missed,
            self.config.fuzzy_threshold,
            self.config.fuzzy_discount,
        );

        let semantic = semantic::match_semantic(
            self.index.as_ref(),
            text,
            self.config.semantic_threshold,
            self.config.semantic_top_k,
        );

        self.combiner
            .lock()
            .combine(self.index.as_ref(), &exact.per_slide, &fuzzy, &semantic)
    }

    /// The slide currently considered active.
    #[must_use]
    pub fn current_slide_id(&self) -> Option<SlideId> {
        self.combiner.lock().current_slide_id()
    }

    /// Total matches this matcher has reported.
    #[must_use]
    pub fn matches_reported(&self) -> u64 {
        self.combiner.lock().matches_reported()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_lowercases_english() {
        assert_eq!(
            extract_keywords("The Rust Compiler, again: COMPILER!"),
            vec!["the", "rust", "compiler", "again"]
        );
    }

    #[test]
    fn keeps_japanese_as_is() {
        assert_eq!(
            extract_keywords("これはテストです"),
            vec!["これはテストです"]
        );
    }

    #[test]
    fn splits_on_punctuation_and_whitespace() {
        assert_eq!(
            extract_keywords("テスト、データ。モデル"),
            vec!["テスト", "データ", "モデル"]
        );
    }

    #[test]
    fn drops_single_character_tokens() {
        assert_eq!(extract_keywords("a bc d 字"), vec!["bc"]);
    }

    #[test]
    fn mixed_alphanumerics_keep_case() {
        // Tokens with digits are not pure-ASCII words and keep their case.
        assert_eq!(extract_keywords("IPv6 GPT4"), vec!["IPv6", "GPT4"]);
    }

    #[test]
    fn matcher_end_to_end_exact_hit() {
        let index: Arc<dyn SlideIndex> = Arc::new(
            InMemorySlideIndex::builder()
                .keyword("テスト", 2, 0, 2.0)
                .slide(2, (0, 4), 80)
                .build(),
        );
        let matcher = SlideMatcher::new(index, MatchingConfig::default());

        let result = matcher.match_segment("テスト").unwrap();
        assert_eq!(result.slide_id, 2);
        assert_eq!(result.matched_keywords, vec!["テスト"]);
        assert_eq!(matcher.current_slide_id(), Some(2));
    }

    #[test]
    fn matcher_reports_none_for_unknown_text() {
        let index: Arc<dyn SlideIndex> = Arc::new(
            InMemorySlideIndex::builder()
                .keyword("cats", 1, 0, 2.0)
                .slide(1, (0, 4), 80)
                .build(),
        );
        let matcher = SlideMatcher::new(index, MatchingConfig::default());

        assert!(matcher.match_segment("xyzzy").is_none());
        assert!(matcher.current_slide_id().is_none());
    }

    #[test]
    fn fuzzy_only_runs_for_missed_keywords() {
        // "cats" hits exactly; a slightly misheard "purrr" still lands on
        // slide 1 through the fuzzy signal.
        let index: Arc<dyn SlideIndex> = Arc::new(
            InMemorySlideIndex::builder()
                .keyword("cats", 1, 0, 2.0)
                .keyword("purr", 1, 20, 1.5)
                .slide(1, (0, 10), 100)
                .build(),
        );
        let matcher = SlideMatcher::new(index, MatchingConfig::default());

        let result = matcher.match_segment("cats purrr").unwrap();
        assert_eq!(result.slide_id, 1);
        assert!(result.signals.contains(&MatchSignal::Exact));
        assert!(result.signals.contains(&MatchSignal::Fuzzy));
    }
}

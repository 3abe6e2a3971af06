//! Score combination and temporal smoothing.
//!
//! Combines the three signals into one score per slide, normalizes by slide
//! length, and applies the smoothing policy that keeps the matcher from
//! flickering between slides on borderline evidence.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::exact::ExactMatches;
use super::fuzzy::FuzzyMatches;
use super::index::{SlideId, SlideIndex};
use super::semantic::SemanticMatch;
use crate::state::MatchingConfig;

/// Which signals contributed to a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSignal {
    Exact,
    Fuzzy,
    Semantic,
}

/// Final alignment of one utterance to one slide.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub slide_id: SlideId,
    /// Combined, length-normalized score.
    pub score: f64,
    /// `min(score / 10, 1.0)`.
    pub confidence: f64,
    /// Distinct keywords that matched (exact and fuzzy).
    pub matched_keywords: Vec<String>,
    /// Signals that contributed to the winning slide.
    pub signals: Vec<MatchSignal>,
}

/// Combined per-slide evidence before smoothing.
#[derive(Debug, Clone, Default)]
struct CandidateScore {
    score: f64,
    matched_keywords: Vec<String>,
    signals: Vec<MatchSignal>,
}

/// Combines signals and applies temporal smoothing across calls.
///
/// Holds the `current_slide_id` state for one session; all other inputs are
/// read-only, so identical inputs with identical prior state yield identical
/// results.
pub struct ScoreCombiner {
    config: MatchingConfig,
    current_slide_id: Option<SlideId>,
    matches_reported: u64,
}

impl ScoreCombiner {
    #[must_use]
    pub fn new(config: MatchingConfig) -> Self {
        Self {
            config,
            current_slide_id: None,
            matches_reported: 0,
        }
    }

    /// Returns the slide currently considered active, if any.
    #[must_use]
    pub fn current_slide_id(&self) -> Option<SlideId> {
        self.current_slide_id
    }

    /// Total matches reported by this combiner.
    #[must_use]
    pub fn matches_reported(&self) -> u64 {
        self.matches_reported
    }

    /// Clears the temporal state (new stream of utterances).
    pub fn reset(&mut self) {
        self.current_slide_id = None;
    }

    /// Combines the three signals and picks at most one slide.
    pub fn combine(
        &mut self,
        index: &dyn SlideIndex,
        exact: &HashMap<SlideId, ExactMatches>,
        fuzzy: &HashMap<SlideId, FuzzyMatches>,
        semantic: &HashMap<SlideId, SemanticMatch>,
    ) -> Option<MatchResult> {
        let mut candidates: HashMap<SlideId, CandidateScore> = HashMap::new();

        for (&slide_id, evidence) in exact {
            let entry = candidates.entry(slide_id).or_default();
            entry.score += evidence.score * self.config.exact_weight;
            entry.matched_keywords.extend(evidence.matched_keywords.iter().cloned());
            if evidence.score > 0.0 {
                entry.signals.push(MatchSignal::Exact);
            }
        }
        for (&slide_id, evidence) in fuzzy {
            let entry = candidates.entry(slide_id).or_default();
            entry.score += evidence.score * self.config.fuzzy_weight;
            entry.matched_keywords.extend(evidence.matched_keywords.iter().cloned());
            if evidence.score > 0.0 {
                entry.signals.push(MatchSignal::Fuzzy);
            }
        }
        for (&slide_id, evidence) in semantic {
            let entry = candidates.entry(slide_id).or_default();
            entry.score += evidence.similarity * self.config.semantic_weight;
            if evidence.similarity > 0.0 {
                entry.signals.push(MatchSignal::Semantic);
            }
        }

        if candidates.is_empty() {
            return None;
        }

        // Title boost and length normalization per slide.
        for (&slide_id, candidate) in candidates.iter_mut() {
            let metadata = index.metadata(slide_id);

            if let Some(meta) = metadata {
                let title_matched = exact.get(&slide_id).is_some_and(|e| {
                    e.positions
                        .iter()
                        .any(|&p| p >= meta.title_span.0 && p < meta.title_span.1)
                });
                if title_matched {
                    candidate.score *= self.config.title_boost;
                }

                let divisor = (meta.text_length as f64 / 100.0).max(1.0);
                candidate.score /= divisor;
            }

            dedupe_preserving_order(&mut candidate.matched_keywords);
        }

        self.apply_temporal_smoothing(candidates)
    }

    /// Picks the winner under the smoothing policy.
    ///
    /// The current slide gets a small additive boost during comparison only;
    /// a challenger must clear both the minimum score and the switch
    /// multiplier against the incumbent's raw score.
    fn apply_temporal_smoothing(
        &mut self,
        candidates: HashMap<SlideId, CandidateScore>,
    ) -> Option<MatchResult> {
        let effective = |slide_id: SlideId, score: f64| {
            if Some(slide_id) == self.current_slide_id {
                score + self.config.temporal_boost
            } else {
                score
            }
        };

        let best_id = candidates
            .iter()
            .max_by(|a, b| {
                effective(*a.0, a.1.score)
                    .total_cmp(&effective(*b.0, b.1.score))
                    // Ties: more distinct matched keywords wins, then the
                    // lower slide id.
                    .then_with(|| a.1.matched_keywords.len().cmp(&b.1.matched_keywords.len()))
                    .then_with(|| b.0.cmp(a.0))
            })
            .map(|(slide_id, _)| *slide_id)?;

        let best_score = candidates[&best_id].score;
        if best_score < self.config.min_score {
            log::debug!(
                "[Matching] Best score {:.2} below threshold {:.2}",
                best_score,
                self.config.min_score
            );
            return None;
        }

        let chosen = match self.current_slide_id {
            Some(current) if current != best_id => {
                let current_score = candidates.get(&current).map_or(0.0, |c| c.score);
                if best_score >= self.config.switch_multiplier * current_score {
                    log::info!(
                        "[Matching] Switching slide: {} -> {} (score {:.2})",
                        current,
                        best_id,
                        best_score
                    );
                    best_id
                } else {
                    current
                }
            }
            _ => best_id,
        };

        self.current_slide_id = Some(chosen);
        self.matches_reported += 1;

        let candidate = candidates.get(&chosen);
        let score = candidate.map_or(0.0, |c| c.score);
        Some(MatchResult {
            slide_id: chosen,
            score,
            confidence: (score / 10.0).min(1.0),
            matched_keywords: candidate.map(|c| c.matched_keywords.clone()).unwrap_or_default(),
            signals: candidate.map(|c| c.signals.clone()).unwrap_or_default(),
        })
    }
}

fn dedupe_preserving_order(keywords: &mut Vec<String>) {
    let mut seen = HashSet::new();
    keywords.retain(|k| seen.insert(k.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::exact::match_exact;
    use crate::matching::index::InMemorySlideIndex;

    fn config() -> MatchingConfig {
        MatchingConfig::default()
    }

    fn index() -> InMemorySlideIndex {
        InMemorySlideIndex::builder()
            .keyword("cats", 1, 0, 2.0)
            .keyword("purr", 1, 30, 1.5)
            .keyword("dogs", 2, 0, 2.0)
            .keyword("bark", 2, 30, 1.5)
            .slide(1, (0, 10), 100)
            .slide(2, (0, 10), 100)
            .build()
    }

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    fn combine_exact_only(
        combiner: &mut ScoreCombiner,
        index: &InMemorySlideIndex,
        words: &[&str],
    ) -> Option<MatchResult> {
        let exact = match_exact(index, &kw(words));
        combiner.combine(index, &exact.per_slide, &HashMap::new(), &HashMap::new())
    }

    #[test]
    fn exact_match_with_title_boost_wins() {
        let index = index();
        let mut combiner = ScoreCombiner::new(config());

        // "cats" sits at position 0, inside slide 1's title span, so the
        // tf-idf 2.0 is doubled and survives length normalization.
        let result = combine_exact_only(&mut combiner, &index, &["cats"]).unwrap();
        assert_eq!(result.slide_id, 1);
        assert_eq!(result.score, 4.0);
        assert_eq!(result.matched_keywords, vec!["cats"]);
        assert_eq!(result.signals, vec![MatchSignal::Exact]);
        assert_eq!(result.confidence, 0.4);
    }

    #[test]
    fn below_min_score_reports_no_match() {
        let index = InMemorySlideIndex::builder()
            .keyword("faint", 1, 50, 0.5)
            .slide(1, (0, 10), 100)
            .build();
        let mut combiner = ScoreCombiner::new(config());

        let result = combine_exact_only(&mut combiner, &index, &["faint"]);
        assert!(result.is_none());
        assert!(combiner.current_slide_id().is_none());
    }

    #[test]
    fn incumbent_retained_until_switch_multiplier_cleared() {
        let index = index();
        let mut combiner = ScoreCombiner::new(config());

        // Establish slide 1 with both its keywords (score 7.0 after boost).
        let first = combine_exact_only(&mut combiner, &index, &["cats", "purr"]).unwrap();
        assert_eq!(first.slide_id, 1);

        // Next utterance mentions both slides; slide 2's evidence does not
        // beat slide 1 by the required 1.1 factor, so slide 1 is retained.
        let second = combine_exact_only(&mut combiner, &index, &["cats", "purr", "dogs", "bark"]);
        assert_eq!(second.unwrap().slide_id, 1);

        // Pure slide-2 evidence has nothing competing; the incumbent scores
        // zero and the challenger takes over.
        let third = combine_exact_only(&mut combiner, &index, &["dogs", "bark"]).unwrap();
        assert_eq!(third.slide_id, 2);
        assert_eq!(combiner.current_slide_id(), Some(2));
    }

    #[test]
    fn challenger_below_multiplier_is_held_off_then_wins() {
        // Slide 2 scores 1.05x slide 1 on the shared utterance - not enough
        // to displace the incumbent. With stronger evidence (1.5x) it flips.
        let index = InMemorySlideIndex::builder()
            .keyword("cats", 1, 0, 2.0)
            .keyword("dogs", 2, 0, 2.1)
            .keyword("loudly", 2, 5, 0.9)
            .slide(1, (0, 10), 100)
            .slide(2, (0, 10), 100)
            .build();
        let mut combiner = ScoreCombiner::new(config());

        let first = combine_exact_only(&mut combiner, &index, &["cats"]).unwrap();
        assert_eq!(first.slide_id, 1);

        let second = combine_exact_only(&mut combiner, &index, &["cats", "dogs"]).unwrap();
        assert_eq!(second.slide_id, 1);
        assert_eq!(second.score, 4.0);

        let third =
            combine_exact_only(&mut combiner, &index, &["cats", "dogs", "loudly"]).unwrap();
        assert_eq!(third.slide_id, 2);
        assert_eq!(third.score, 6.0);
    }

    #[test]
    fn no_match_leaves_current_slide_unchanged() {
        let index = index();
        let mut combiner = ScoreCombiner::new(config());

        combine_exact_only(&mut combiner, &index, &["cats"]).unwrap();
        assert_eq!(combiner.current_slide_id(), Some(1));

        let result = combine_exact_only(&mut combiner, &index, &["xyzzy"]);
        assert!(result.is_none());
        assert_eq!(combiner.current_slide_id(), Some(1));
    }

    #[test]
    fn ties_break_by_keyword_count_then_lower_id() {
        let index = InMemorySlideIndex::builder()
            .keyword("alpha", 1, 0, 2.0)
            .keyword("beta", 2, 0, 1.0)
            .keyword("gamma", 2, 5, 1.0)
            .slide(1, (0, 10), 100)
            .slide(2, (0, 10), 100)
            .build();
        let mut combiner = ScoreCombiner::new(config());

        // Both slides end up at 4.0 after title boost; slide 2 matched two
        // distinct keywords and takes the tie.
        let result =
            combine_exact_only(&mut combiner, &index, &["alpha", "beta", "gamma"]).unwrap();
        assert_eq!(result.slide_id, 2);
    }

    #[test]
    fn equal_evidence_ties_break_by_lower_slide_id() {
        let index = InMemorySlideIndex::builder()
            .keyword("shared", 3, 0, 2.0)
            .keyword("shared", 7, 0, 2.0)
            .slide(3, (0, 10), 100)
            .slide(7, (0, 10), 100)
            .build();
        let mut combiner = ScoreCombiner::new(config());

        let result = combine_exact_only(&mut combiner, &index, &["shared"]).unwrap();
        assert_eq!(result.slide_id, 3);
    }

    #[test]
    fn length_normalization_penalizes_long_slides() {
        let index = InMemorySlideIndex::builder()
            .keyword("topic", 1, 50, 2.0)
            .keyword("topic", 2, 50, 2.0)
            .slide(1, (0, 10), 100)
            .slide(2, (0, 10), 400)
            .build();
        let mut combiner = ScoreCombiner::new(config());

        let result = combine_exact_only(&mut combiner, &index, &["topic"]).unwrap();
        assert_eq!(result.slide_id, 1);
        assert_eq!(result.score, 2.0);
    }

    #[test]
    fn reset_clears_temporal_state() {
        let index = index();
        let mut combiner = ScoreCombiner::new(config());
        combine_exact_only(&mut combiner, &index, &["cats"]).unwrap();
        combiner.reset();
        assert!(combiner.current_slide_id().is_none());
    }

    #[test]
    fn idempotent_given_frozen_state() {
        let index = index();
        let words = ["cats", "purr"];

        let mut a = ScoreCombiner::new(config());
        let mut b = ScoreCombiner::new(config());
        let ra = combine_exact_only(&mut a, &index, &words).unwrap();
        let rb = combine_exact_only(&mut b, &index, &words).unwrap();
        assert_eq!(ra.slide_id, rb.slide_id);
        assert_eq!(ra.score, rb.score);
        assert_eq!(ra.matched_keywords, rb.matched_keywords);
    }
}

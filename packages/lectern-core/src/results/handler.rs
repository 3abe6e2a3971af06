//! Result state machine for one session.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::matching::SlideMatcher;
use crate::utils::now_millis;

use super::{RecognitionEvent, ResultSink, SlideAnnotation, TranscriptionResult};

/// Rolling counters for result processing.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResultMetrics {
    pub total_interim_results: u64,
    pub total_final_results: u64,
    /// Rolling mean confidence over final results.
    pub avg_confidence: f64,
    pub interim_to_final_ratio: f64,
    pub last_result_at_ms: u64,
}

/// Summary exported when the session closes.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptSummary {
    pub full_transcript: String,
    pub segments: Vec<TranscriptionResult>,
    pub metrics: ResultMetrics,
}

struct HandlerState {
    current_interim: Option<TranscriptionResult>,
    final_results: Vec<TranscriptionResult>,
    metrics: ResultMetrics,
    confidence_sum: f64,
}

/// Classifies recognition events and dispatches them to the sink.
///
/// One handler per session. Calls are serialized on an internal lock, so
/// sink invocations for a session never interleave even while an old and a
/// new recognizer stream briefly overlap during renewal.
pub struct ResultHandler {
    session_id: String,
    presentation_id: String,
    matcher: Option<Arc<SlideMatcher>>,
    sink: Arc<dyn ResultSink>,
    state: Mutex<HandlerState>,
}

impl ResultHandler {
    #[must_use]
    pub fn new(
        session_id: String,
        presentation_id: String,
        matcher: Option<Arc<SlideMatcher>>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        if matcher.is_none() {
            log::info!(
                "[Results] No slide index for presentation {}; results will carry no slide annotation",
                presentation_id
            );
        }
        Self {
            session_id,
            presentation_id,
            matcher,
            sink,
            state: Mutex::new(HandlerState {
                current_interim: None,
                final_results: Vec::new(),
                metrics: ResultMetrics::default(),
                confidence_sum: 0.0,
            }),
        }
    }

    /// Processes one recognition event in receipt order.
    pub fn handle_event(&self, event: RecognitionEvent) {
        if event.is_final {
            self.handle_final(event);
        } else {
            self.handle_interim(event);
        }
    }

    fn handle_interim(&self, event: RecognitionEvent) {
        let result = TranscriptionResult {
            text: event.text,
            is_final: false,
            confidence: event.confidence,
            timestamp: event.received_at_ms,
            words: event.words,
            session_id: self.session_id.clone(),
            presentation_id: self.presentation_id.clone(),
            slide: None,
        };

        let mut state = self.state.lock();
        state.current_interim = Some(result.clone());
        state.metrics.total_interim_results += 1;
        state.metrics.last_result_at_ms = now_millis();
        update_ratio(&mut state.metrics);

        // Dispatch while the lock is held so invocations stay serialized.
        self.dispatch(|sink| sink.on_interim(&result));
        drop(state);
    }

    fn handle_final(&self, event: RecognitionEvent) {
        let slide: Option<SlideAnnotation> = self
            .matcher
            .as_ref()
            .and_then(|m| m.match_segment(&event.text))
            .map(Into::into);

        let result = TranscriptionResult {
            text: event.text,
            is_final: true,
            confidence: event.confidence,
            timestamp: event.received_at_ms,
            words: event.words,
            session_id: self.session_id.clone(),
            presentation_id: self.presentation_id.clone(),
            slide,
        };

        let mut state = self.state.lock();
        state.current_interim = None;
        state.final_results.push(result.clone());
        state.confidence_sum += result.confidence;
        state.metrics.total_final_results += 1;
        state.metrics.avg_confidence =
            state.confidence_sum / state.metrics.total_final_results as f64;
        state.metrics.last_result_at_ms = now_millis();
        update_ratio(&mut state.metrics);

        if let Some(ref annotation) = result.slide {
            log::info!(
                "[Results] Final #{} for {} -> slide {} (score {:.2})",
                state.metrics.total_final_results,
                self.session_id,
                annotation.slide_id,
                annotation.score
            );
        }

        self.dispatch(|sink| sink.on_final(&result));
        drop(state);
    }

    /// Invokes the sink and converts panics into log entries so they never
    /// unwind into the reader loop. Callers hold the state lock, which is
    /// what serializes invocations per session.
    fn dispatch<F>(&self, call: F)
    where
        F: FnOnce(&dyn ResultSink),
    {
        let outcome = catch_unwind(AssertUnwindSafe(|| call(self.sink.as_ref())));
        if outcome.is_err() {
            log::error!(
                "[Results] Result sink panicked for session {}; continuing",
                self.session_id
            );
        }
    }

    /// Clears the outstanding interim (the new stream after a renewal will
    /// produce its own).
    pub fn clear_interim(&self) {
        self.state.lock().current_interim = None;
    }

    /// The current interim result, if one is outstanding.
    #[must_use]
    pub fn current_interim(&self) -> Option<TranscriptionResult> {
        self.state.lock().current_interim.clone()
    }

    /// Number of final results committed so far.
    #[must_use]
    pub fn final_count(&self) -> u64 {
        self.state.lock().metrics.total_final_results
    }

    /// The accumulated transcript, space-joined over final results.
    #[must_use]
    pub fn full_transcript(&self) -> String {
        let state = self.state.lock();
        state
            .final_results
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Current metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> ResultMetrics {
        self.state.lock().metrics
    }

    /// Exports the transcript and metrics for the session summary.
    #[must_use]
    pub fn export_summary(&self) -> TranscriptSummary {
        let state = self.state.lock();
        TranscriptSummary {
            full_transcript: state
                .final_results
                .iter()
                .map(|r| r.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            segments: state.final_results.clone(),
            metrics: state.metrics,
        }
    }
}

fn update_ratio(metrics: &mut ResultMetrics) {
    if metrics.total_final_results > 0 {
        metrics.interim_to_final_ratio =
            metrics.total_interim_results as f64 / metrics.total_final_results as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{InMemorySlideIndex, SlideIndex};
    use crate::results::RecognitionEvent;
    use crate::state::MatchingConfig;
    use parking_lot::Mutex as PlMutex;

    /// Sink that records every invocation for assertions.
    #[derive(Default)]
    struct RecordingSink {
        calls: PlMutex<Vec<(bool, String)>>,
    }

    impl ResultSink for RecordingSink {
        fn on_interim(&self, result: &TranscriptionResult) {
            self.calls.lock().push((false, result.text.clone()));
        }
        fn on_final(&self, result: &TranscriptionResult) {
            self.calls.lock().push((true, result.text.clone()));
        }
    }

    struct PanickingSink;

    impl ResultSink for PanickingSink {
        fn on_interim(&self, _result: &TranscriptionResult) {
            panic!("interim sink blew up");
        }
        fn on_final(&self, _result: &TranscriptionResult) {
            panic!("final sink blew up");
        }
    }

    fn event(text: &str, is_final: bool, confidence: f64) -> RecognitionEvent {
        RecognitionEvent {
            text: text.to_string(),
            is_final,
            confidence,
            words: Vec::new(),
            received_at_ms: now_millis(),
        }
    }

    fn handler_with_sink(sink: Arc<dyn ResultSink>) -> ResultHandler {
        ResultHandler::new("s1".into(), "p1".into(), None, sink)
    }

    #[test]
    fn interim_results_replace_each_other() {
        let sink = Arc::new(RecordingSink::default());
        let handler = handler_with_sink(sink.clone());

        handler.handle_event(event("こん", false, 0.4));
        handler.handle_event(event("こんに", false, 0.6));

        assert_eq!(handler.current_interim().unwrap().text, "こんに");
        assert_eq!(handler.final_count(), 0);
        assert_eq!(sink.calls.lock().len(), 2);
    }

    #[test]
    fn final_clears_interim_and_appends() {
        let sink = Arc::new(RecordingSink::default());
        let handler = handler_with_sink(sink.clone());

        handler.handle_event(event("こん", false, 0.4));
        handler.handle_event(event("こんに", false, 0.6));
        handler.handle_event(event("こんにちは", true, 0.95));

        assert!(handler.current_interim().is_none());
        assert_eq!(handler.final_count(), 1);
        assert_eq!(handler.full_transcript(), "こんにちは");

        let calls = sink.calls.lock();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2], (true, "こんにちは".to_string()));
    }

    #[test]
    fn transcript_joins_finals_with_spaces() {
        let handler = handler_with_sink(Arc::new(NoopTestSink));
        handler.handle_event(event("hello", true, 0.9));
        handler.handle_event(event("world", true, 0.8));
        assert_eq!(handler.full_transcript(), "hello world");
    }

    struct NoopTestSink;
    impl ResultSink for NoopTestSink {
        fn on_interim(&self, _result: &TranscriptionResult) {}
        fn on_final(&self, _result: &TranscriptionResult) {}
    }

    #[test]
    fn rolling_confidence_is_averaged() {
        let handler = handler_with_sink(Arc::new(NoopTestSink));
        handler.handle_event(event("a b", true, 0.8));
        handler.handle_event(event("c d", true, 0.6));
        let metrics = handler.metrics();
        assert!((metrics.avg_confidence - 0.7).abs() < 1e-9);
        assert_eq!(metrics.total_final_results, 2);
    }

    #[test]
    fn sink_panics_are_contained() {
        let handler = handler_with_sink(Arc::new(PanickingSink));
        handler.handle_event(event("boom", false, 0.5));
        handler.handle_event(event("boom", true, 0.5));
        // State still advanced despite the panicking sink.
        assert_eq!(handler.final_count(), 1);
    }

    #[test]
    fn finals_carry_slide_annotation_when_index_matches() {
        let index: Arc<dyn SlideIndex> = Arc::new(
            InMemorySlideIndex::builder()
                .keyword("テスト", 2, 0, 2.0)
                .slide(2, (0, 4), 80)
                .build(),
        );
        let matcher = Arc::new(SlideMatcher::new(index, MatchingConfig::default()));
        let sink = Arc::new(RecordingSink::default());
        let handler = ResultHandler::new("s1".into(), "p1".into(), Some(matcher), sink);

        handler.handle_event(event("テスト", true, 0.9));

        let summary = handler.export_summary();
        let annotation = summary.segments[0].slide.as_ref().expect("slide annotation");
        assert_eq!(annotation.slide_id, 2);
        assert_eq!(annotation.matched_keywords, vec!["テスト"]);
    }

    #[test]
    fn no_match_omits_slide_annotation() {
        let index: Arc<dyn SlideIndex> = Arc::new(
            InMemorySlideIndex::builder()
                .keyword("cats", 1, 0, 2.0)
                .slide(1, (0, 4), 80)
                .build(),
        );
        let matcher = Arc::new(SlideMatcher::new(index, MatchingConfig::default()));
        let handler =
            ResultHandler::new("s1".into(), "p1".into(), Some(matcher), Arc::new(NoopTestSink));

        handler.handle_event(event("xyzzy", true, 0.9));
        assert!(handler.export_summary().segments[0].slide.is_none());
    }

    #[test]
    fn clear_interim_drops_outstanding_interim() {
        let handler = handler_with_sink(Arc::new(NoopTestSink));
        handler.handle_event(event("partial", false, 0.4));
        handler.clear_interim();
        assert!(handler.current_interim().is_none());
    }

    #[test]
    fn serialized_json_matches_protocol_shape() {
        let handler = handler_with_sink(Arc::new(NoopTestSink));
        handler.handle_event(event("hello", true, 0.9));
        let summary = handler.export_summary();
        let json = serde_json::to_value(&summary.segments[0]).unwrap();
        assert_eq!(json["text"], "hello");
        assert_eq!(json["is_final"], true);
        assert_eq!(json["session_id"], "s1");
        assert!(json.get("slide").is_none());
        assert!(json.get("words").is_none());
    }
}

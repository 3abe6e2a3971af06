//! Recognition results: classification, state and dispatch.
//!
//! The recognizer produces a stream of [`RecognitionEvent`]s; the
//! [`ResultHandler`] classifies them into interim and final
//! [`TranscriptionResult`]s, keeps the rolling session state (at most one
//! outstanding interim, an append-only final log), aligns finals to slides
//! and forwards everything to a [`ResultSink`].

mod handler;

pub use handler::{ResultHandler, ResultMetrics, TranscriptSummary};

use serde::Serialize;

use crate::matching::{MatchResult, SlideId};

/// Word-level timing attached to a recognition event, when the backend
/// provides it.
#[derive(Debug, Clone, Serialize)]
pub struct WordTiming {
    pub word: String,
    pub start_secs: f64,
    pub end_secs: f64,
    pub confidence: f64,
}

/// One event produced by the recognizer stream.
#[derive(Debug, Clone)]
pub struct RecognitionEvent {
    pub text: String,
    pub is_final: bool,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub words: Vec<WordTiming>,
    /// Receipt timestamp (Unix ms), assigned when the event leaves the
    /// adapter's reader loop.
    pub received_at_ms: u64,
}

/// Slide annotation attached to final results when a match exists.
#[derive(Debug, Clone, Serialize)]
pub struct SlideAnnotation {
    pub slide_id: SlideId,
    pub score: f64,
    pub confidence: f64,
    pub matched_keywords: Vec<String>,
}

impl From<MatchResult> for SlideAnnotation {
    fn from(result: MatchResult) -> Self {
        Self {
            slide_id: result.slide_id,
            score: result.score,
            confidence: result.confidence,
            matched_keywords: result.matched_keywords,
        }
    }
}

/// A classified transcription result delivered to consumers.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub is_final: bool,
    pub confidence: f64,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<WordTiming>,
    pub session_id: String,
    pub presentation_id: String,
    /// Present on finals that matched a slide.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slide: Option<SlideAnnotation>,
}

/// Consumer of classified results.
///
/// Implementations must be panic-safe from the caller's point of view: the
/// handler catches panics at this boundary, logs them and keeps the reader
/// loop alive.
pub trait ResultSink: Send + Sync {
    /// A transient partial transcription; supersedes the previous interim.
    fn on_interim(&self, result: &TranscriptionResult);

    /// A confirmed segment; delivered exactly once, in receipt order.
    fn on_final(&self, result: &TranscriptionResult);
}

/// Sink that discards everything. Useful for tests and headless tools.
pub struct NoopSink;

impl ResultSink for NoopSink {
    fn on_interim(&self, _result: &TranscriptionResult) {}
    fn on_final(&self, _result: &TranscriptionResult) {}
}

/// Fans results out to several sinks in order.
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn ResultSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new(sinks: Vec<std::sync::Arc<dyn ResultSink>>) -> Self {
        Self { sinks }
    }
}

impl ResultSink for FanoutSink {
    fn on_interim(&self, result: &TranscriptionResult) {
        for sink in &self.sinks {
            sink.on_interim(result);
        }
    }

    fn on_final(&self, result: &TranscriptionResult) {
        for sink in &self.sinks {
            sink.on_final(result);
        }
    }
}

//! The recognizer seam: one bidirectional stream against the external
//! speech-recognition backend.
//!
//! The backend itself is out of scope — the core sees an opaque stream with
//! well-defined framing: the client opens a stream with one configuration
//! message, sends framed audio until it half-closes, and reads
//! [`RecognitionEvent`](crate::results::RecognitionEvent)s until the service
//! ends the stream (nominally after ~300 s of audio or ~60 s of silence).
//!
//! [`RecognizerClient`] is the injection point; production deployments wire
//! their backend's client at bootstrap, tests and local development use
//! [`fake::ScriptedRecognizer`].

pub mod adapter;
pub mod fake;

pub use adapter::StreamAdapter;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::RecognizerResult;
use crate::protocol_constants::SAMPLE_RATE;
use crate::results::RecognitionEvent;

/// Configuration sent in the stream's opening message.
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    /// Language selector, passed through opaquely (e.g. "ja-JP").
    pub language: String,
    /// Model selector, passed through opaquely (e.g. "latest_long").
    pub model: String,
    /// Whether the backend should emit interim results.
    pub interim_results: bool,
    /// Sample rate of the framed audio (always the canonical 16 kHz).
    pub sample_rate: u32,
    /// Credentials location, if the backend needs one.
    pub credentials_path: Option<String>,
    /// Upstream project identifier, if the backend needs one.
    pub project_id: Option<String>,
}

impl RecognizerConfig {
    #[must_use]
    pub fn new(language: impl Into<String>, model: impl Into<String>, interim_results: bool) -> Self {
        Self {
            language: language.into(),
            model: model.into(),
            interim_results,
            sample_rate: SAMPLE_RATE,
            credentials_path: None,
            project_id: None,
        }
    }
}

/// Both halves of one opened bidirectional stream.
pub struct RecognizerStreamParts {
    /// Sending half, consumed by the session's writer.
    pub sink: Box<dyn RecognizerSink>,
    /// Receiving half, consumed by the adapter's reader loop.
    pub events: Box<dyn RecognizerEvents>,
}

/// Factory for recognizer streams. The only thing the core knows about the
/// backend.
#[async_trait]
pub trait RecognizerClient: Send + Sync {
    /// Opens a stream: sends the configuration message and returns both
    /// halves. Fails with transport or configuration errors.
    async fn open(&self, config: &RecognizerConfig) -> RecognizerResult<RecognizerStreamParts>;
}

/// Sending half of a recognizer stream.
#[async_trait]
pub trait RecognizerSink: Send {
    /// Sends one audio frame. Fails if the stream is broken.
    async fn send_frame(&mut self, frame: Bytes) -> RecognizerResult<()>;

    /// Half-closes the sending side. The backend finishes processing what it
    /// received and then ends the event stream.
    async fn finish(&mut self) -> RecognizerResult<()>;
}

/// Receiving half of a recognizer stream.
#[async_trait]
pub trait RecognizerEvents: Send {
    /// Next event, `None` at end of stream, `Some(Err(_))` on a mid-stream
    /// transport failure (the stream is dead afterwards).
    async fn next_event(&mut self) -> Option<RecognizerResult<RecognitionEvent>>;
}

//! Lectern Core - real-time lecture transcription with slide alignment.
//!
//! This crate provides the streaming session core for Lectern: speakers
//! stream microphone audio over a WebSocket, the core drives a bidirectional
//! recognition stream against a pluggable speech backend, and listeners
//! receive interim and confirmed transcript fragments annotated with the
//! slide each utterance most likely describes.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`audio`]: Chunk normalization into recognizer-sized PCM frames
//! - [`recognizer`]: The opaque bidirectional stream seam to the backend
//! - [`results`]: Interim/final classification and consumer dispatch
//! - [`matching`]: Three-signal slide alignment with temporal smoothing
//! - [`session`]: Session lifecycle, registry and stream renewal
//! - [`metrics`]: Collection and threshold-based alerting
//! - [`api`]: HTTP/WebSocket transport adapter
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! Three seams decouple the core from its collaborators:
//!
//! - [`RecognizerClient`](recognizer::RecognizerClient): the speech backend
//! - [`SlideIndex`](matching::SlideIndex): the offline-built alignment index
//! - [`ResultSink`](results::ResultSink): the consumer of classified results
//!
//! Production deployments inject implementations at bootstrap;
//! [`recognizer::fake`] ships a deterministic backend for tests and local
//! development.

#![warn(clippy::all)]

pub mod api;
pub mod audio;
pub mod bootstrap;
pub mod error;
pub mod matching;
pub mod metrics;
pub mod protocol_constants;
pub mod recognizer;
pub mod results;
pub mod session;
pub mod state;
pub mod utils;
pub mod webhook;

// Re-export commonly used types at the crate root
pub use api::{start_server, AppState, ServerError};
pub use bootstrap::{bootstrap_services, CoreServices};
pub use error::{ErrorCode, LecternError, LecternResult, RecognizerError, RecognizerResult};
pub use state::{AudioConfig, BackendConfig, Config, MatchingConfig, RenewalConfig};
pub use utils::now_millis;

// Re-export the core domain types
pub use audio::{AudioFrame, ChunkNormalizer};
pub use matching::{
    InMemorySlideIndex, MatchResult, SlideId, SlideIndex, SlideIndexRegistry, SlideMatcher,
};
pub use recognizer::{RecognizerClient, RecognizerConfig, StreamAdapter};
pub use results::{RecognitionEvent, ResultHandler, ResultSink, TranscriptionResult};
pub use session::{
    CreateSessionRequest, RenewalEvent, Session, SessionManager, SessionRenewer, SessionStatus,
    SessionSummary,
};

pub use metrics::{Alert, AlertManager, MetricsCollector};

//! Audio ingest: canonical frame type, chunk normalization and optional
//! preprocessing.
//!
//! All audio in the core is LINEAR16 PCM at 16 kHz mono. The transport hands
//! raw byte blobs to [`ChunkNormalizer`], which repairs and re-frames them
//! into [`AudioFrame`]s sized for the recognizer.

pub mod normalizer;
pub mod preprocess;

pub use normalizer::{ChunkNormalizer, NormalizerMetrics};
pub use preprocess::{AgcConfig, AudioActivity, AudioPreprocessor, VadConfig};

use bytes::Bytes;

use crate::protocol_constants::{MAX_FRAME_BYTES, MIN_FRAME_BYTES};

/// One normalized audio chunk in the canonical PCM format.
///
/// Immutable payload plus a monotonic sequence number assigned on ingress.
/// Frames produced by the normalizer always have an even byte count; every
/// frame except at most one tail frame on close satisfies
/// `MIN_FRAME_BYTES <= len <= MAX_FRAME_BYTES`.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Monotonic per-session sequence number.
    pub seq: u64,
    /// PCM payload. `Bytes` keeps clones through channels and buffers O(1).
    pub data: Bytes,
}

impl AudioFrame {
    /// Returns the payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if the frame satisfies the steady-state size invariant.
    #[must_use]
    pub fn within_limits(&self) -> bool {
        let len = self.data.len();
        len % 2 == 0 && (MIN_FRAME_BYTES..=MAX_FRAME_BYTES).contains(&len)
    }
}

//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external contracts (the canonical PCM format,
//! the upstream recognizer's hard limits) and changing them would break
//! interoperability with clients and the recognition backend.

// ─────────────────────────────────────────────────────────────────────────────
// Canonical Audio Format (LINEAR16, 16 kHz, mono)
// ─────────────────────────────────────────────────────────────────────────────

/// Sample rate of the canonical audio format (Hz).
pub const SAMPLE_RATE: u32 = 16_000;

/// Bytes per sample (16-bit signed little-endian PCM).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Number of audio channels (mono).
pub const CHANNELS: u16 = 1;

/// Minimum frame size in bytes (100 ms: 16000 samples/s × 0.1 s × 2 bytes).
pub const MIN_FRAME_BYTES: usize = 3200;

/// Optimal frame size in bytes (200 ms). Oversized chunks are sliced into
/// frames of this size.
pub const OPTIMAL_FRAME_BYTES: usize = 6400;

/// Maximum frame size in bytes (300 ms: tolerance for browser audio buffers).
pub const MAX_FRAME_BYTES: usize = 9600;

/// Magic bytes of a RIFF/WAV container header.
pub const WAV_HEADER_MAGIC: &[u8; 4] = b"RIFF";

/// Standard WAV header size stripped from a container-wrapped first chunk.
pub const WAV_HEADER_SIZE: usize = 44;

// ─────────────────────────────────────────────────────────────────────────────
// Upstream Recognizer Limits
// ─────────────────────────────────────────────────────────────────────────────

/// Hard upstream limit on continuous audio per stream (seconds).
pub const MAX_AUDIO_DURATION_SECS: u64 = 300;

/// Hard upstream limit on silence before the stream is closed (seconds).
pub const MAX_SILENCE_DURATION_SECS: u64 = 60;

/// Stream age at which a session becomes eligible for renewal (seconds).
///
/// 270 s (4.5 min) leaves comfortable margin before the 300 s upstream cut.
pub const RENEWAL_THRESHOLD_SECS: u64 = 270;

/// Minimum gap between completed renewals of the same session (seconds).
pub const RENEWAL_COOLDOWN_SECS: u64 = 10;

/// Interval between renewal eligibility scans (seconds).
pub const RENEWAL_SCAN_INTERVAL_SECS: u64 = 1;

/// Grace period after half-closing the old stream for trailing events (ms).
pub const FINAL_DRAIN_MS: u64 = 500;

// ─────────────────────────────────────────────────────────────────────────────
// Session Channels and Timeouts
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of a session's audio channel in frames.
///
/// Sized so roughly one second of audio fits at the smallest frame size
/// (100 ms frames → 10 frames/s, with headroom).
pub const AUDIO_CHANNEL_CAPACITY: usize = 16;

/// Capacity of the renewal hand-off buffer in frames (~5 s of audio at the
/// optimal 200 ms frame size).
pub const RENEWAL_BUFFER_CAPACITY: usize = 32;

/// Timeout for enqueueing a frame into a full audio channel (ms).
/// On expiry the frame is dropped and counted, never silently lost.
pub const SEND_TIMEOUT_MS: u64 = 1000;

/// Time `close()` waits for the reader to drain before cancelling (ms).
pub const CLOSE_GRACE_MS: u64 = 5000;

// ─────────────────────────────────────────────────────────────────────────────
// Metrics & Alerting
// ─────────────────────────────────────────────────────────────────────────────

/// Number of samples retained in each latency/confidence ring buffer.
pub const METRIC_RING_CAPACITY: usize = 1000;

/// Interval between alert threshold evaluations (seconds).
pub const ALERT_CHECK_INTERVAL_SECS: u64 = 30;

/// Number of alerts retained for introspection.
pub const ALERT_RING_CAPACITY: usize = 256;

/// Upstream recognizer price per hour of audio (USD), used for cost tracking.
pub const COST_PER_AUDIO_HOUR_USD: f64 = 2.16;

// ─────────────────────────────────────────────────────────────────────────────
// Webhook
// ─────────────────────────────────────────────────────────────────────────────

/// Timeout for the outgoing final-result webhook (seconds).
pub const WEBHOOK_TIMEOUT_SECS: u64 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in logs and the health endpoint.
pub const APP_NAME: &str = "Lectern";

/// Service identifier returned by the health endpoint.
pub const SERVICE_ID: &str = "lectern";

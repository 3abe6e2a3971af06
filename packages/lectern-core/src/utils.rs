//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Duration of a PCM byte count at the canonical format, in milliseconds.
#[must_use]
pub fn pcm_duration_ms(byte_len: usize) -> f64 {
    let samples = byte_len / crate::protocol_constants::BYTES_PER_SAMPLE;
    samples as f64 * 1000.0 / crate::protocol_constants::SAMPLE_RATE as f64
}

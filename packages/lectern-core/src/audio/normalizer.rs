//! Chunk normalization: repair and re-frame raw transport blobs.
//!
//! The transport delivers audio in whatever chunk sizes the client's encoder
//! produces. The normalizer turns that into uniform recognizer frames:
//!
//! - a RIFF/WAV container header on the very first chunk is stripped once
//! - odd-length chunks are zero-padded to preserve 16-bit sample alignment
//! - oversized chunks are sliced into optimal (~200 ms) frames
//! - undersized chunks accumulate until a minimum (~100 ms) frame is ready
//!
//! Pure state machine: no I/O, no blocking. Malformed input is repaired, not
//! rejected — unless strict mode is enabled, which surfaces an
//! [`LecternError::InvalidFrame`] instead.

use bytes::{Bytes, BytesMut};
use serde::Serialize;

use crate::error::{LecternError, LecternResult};
use crate::protocol_constants::{
    MAX_FRAME_BYTES, MIN_FRAME_BYTES, OPTIMAL_FRAME_BYTES, WAV_HEADER_MAGIC, WAV_HEADER_SIZE,
};

use super::AudioFrame;

/// Counters exposed to the metrics collector.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct NormalizerMetrics {
    /// Raw chunks received from the transport.
    pub chunks_in: u64,
    /// Frames emitted toward the recognizer.
    pub frames_out: u64,
    /// Raw bytes received.
    pub bytes_in: u64,
    /// Bytes emitted in frames.
    pub bytes_out: u64,
}

/// Normalizes raw audio chunks into recognizer-sized [`AudioFrame`]s.
pub struct ChunkNormalizer {
    accumulator: BytesMut,
    /// Latched after the first chunk, whether or not a header was found.
    header_handled: bool,
    strict: bool,
    next_seq: u64,
    metrics: NormalizerMetrics,
}

impl ChunkNormalizer {
    /// Creates a normalizer. `strict` surfaces invalid input as errors
    /// instead of repairing it.
    #[must_use]
    pub fn new(strict: bool) -> Self {
        Self {
            accumulator: BytesMut::new(),
            header_handled: false,
            strict,
            next_seq: 0,
            metrics: NormalizerMetrics::default(),
        }
    }

    /// Processes one raw chunk, returning zero or more ready frames.
    ///
    /// Returns an error only in strict mode; in normal mode malformed chunks
    /// are repaired (padded) or skipped (empty).
    pub fn push(&mut self, chunk: &[u8]) -> LecternResult<Vec<AudioFrame>> {
        self.metrics.chunks_in += 1;
        self.metrics.bytes_in += chunk.len() as u64;

        if chunk.is_empty() {
            if self.strict {
                return Err(LecternError::InvalidFrame("empty audio chunk".into()));
            }
            log::warn!("[Audio] Empty audio chunk received");
            return Ok(Vec::new());
        }

        let chunk = self.strip_header_once(chunk);
        if chunk.is_empty() {
            return Ok(Vec::new());
        }

        if self.strict && chunk.len() % 2 != 0 {
            return Err(LecternError::InvalidFrame(format!(
                "chunk size {} not aligned to 16-bit samples",
                chunk.len()
            )));
        }

        let mut frames = Vec::new();

        // Oversized input is sliced into optimal frames; the tail goes back
        // through the accumulate/normal path below.
        let mut offset = 0;
        while chunk.len() - offset > MAX_FRAME_BYTES {
            let slice = &chunk[offset..offset + OPTIMAL_FRAME_BYTES];
            self.ingest_piece(slice, &mut frames);
            offset += OPTIMAL_FRAME_BYTES;
        }
        self.ingest_piece(&chunk[offset..], &mut frames);

        Ok(frames)
    }

    /// Flushes the accumulator, called when the session is closing.
    ///
    /// May emit one short final frame, still zero-padded to even length.
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.accumulator.is_empty() {
            return None;
        }
        if self.accumulator.len() % 2 != 0 {
            self.accumulator.extend_from_slice(&[0]);
        }
        let data = self.accumulator.split().freeze();
        log::debug!("[Audio] Force flushed accumulator: {} bytes", data.len());
        Some(self.emit(data))
    }

    /// Returns the number of bytes currently held in the accumulator.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.accumulator.len()
    }

    /// Returns the current counters.
    #[must_use]
    pub fn metrics(&self) -> NormalizerMetrics {
        self.metrics
    }

    /// Routes one within-max piece through the accumulate/normal path.
    fn ingest_piece(&mut self, piece: &[u8], frames: &mut Vec<AudioFrame>) {
        if piece.is_empty() {
            return;
        }

        // Repair odd length before sizing decisions.
        let padded;
        let piece: &[u8] = if piece.len() % 2 != 0 {
            log::warn!(
                "[Audio] Chunk size {} not aligned, padding with zero",
                piece.len()
            );
            padded = {
                let mut v = Vec::with_capacity(piece.len() + 1);
                v.extend_from_slice(piece);
                v.push(0);
                v
            };
            &padded
        } else {
            piece
        };

        // While the accumulator holds older bytes, everything is routed
        // through it so byte order is preserved end to end. In the common
        // steady state (empty accumulator, normal-sized piece) the piece is
        // emitted whole.
        if piece.len() < MIN_FRAME_BYTES || !self.accumulator.is_empty() {
            self.accumulator.extend_from_slice(piece);
            self.drain_accumulator(frames);
            return;
        }

        frames.push(self.emit(Bytes::copy_from_slice(piece)));
    }

    /// Emits MIN-sized frames while the accumulator holds enough data.
    fn drain_accumulator(&mut self, frames: &mut Vec<AudioFrame>) {
        while self.accumulator.len() >= MIN_FRAME_BYTES {
            let data = self.accumulator.split_to(MIN_FRAME_BYTES).freeze();
            frames.push(self.emit(data));
        }
    }

    fn emit(&mut self, data: Bytes) -> AudioFrame {
        let frame = AudioFrame {
            seq: self.next_seq,
            data,
        };
        self.next_seq += 1;
        self.metrics.frames_out += 1;
        self.metrics.bytes_out += frame.len() as u64;
        frame
    }

    /// Strips a WAV wrapper from the first chunk of the session, once.
    ///
    /// The header-handled state is latched after the first chunk either way,
    /// so raw PCM that happens to start with the magic mid-stream is never
    /// misinterpreted.
    fn strip_header_once<'a>(&mut self, chunk: &'a [u8]) -> &'a [u8] {
        if self.header_handled {
            return chunk;
        }
        self.header_handled = true;

        if chunk.len() >= WAV_HEADER_SIZE && &chunk[..4] == WAV_HEADER_MAGIC {
            log::warn!(
                "[Audio] Detected WAV header in first chunk, removing {} bytes",
                WAV_HEADER_SIZE
            );
            return &chunk[WAV_HEADER_SIZE..];
        }
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> ChunkNormalizer {
        ChunkNormalizer::new(false)
    }

    #[test]
    fn exact_min_frame_passes_through() {
        let mut n = normalizer();
        let frames = n.push(&vec![1u8; MIN_FRAME_BYTES]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), MIN_FRAME_BYTES);
        assert_eq!(n.pending_bytes(), 0);
    }

    #[test]
    fn small_chunks_accumulate_to_one_min_frame() {
        let mut n = normalizer();
        // MIN-1 twice: one MIN frame out, MIN-2 bytes retained.
        assert!(n.push(&vec![1u8; MIN_FRAME_BYTES - 1]).unwrap().is_empty());
        let frames = n.push(&vec![2u8; MIN_FRAME_BYTES - 1]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), MIN_FRAME_BYTES);
        assert_eq!(n.pending_bytes(), MIN_FRAME_BYTES - 2);
    }

    #[test]
    fn oversized_chunk_is_split_within_limits() {
        let mut n = normalizer();
        let frames = n.push(&vec![0u8; 2 * MAX_FRAME_BYTES + 100]).unwrap();
        // Two optimal slices, then the remainder fits below MAX and is
        // emitted whole.
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].len(), OPTIMAL_FRAME_BYTES);
        assert_eq!(frames[1].len(), OPTIMAL_FRAME_BYTES);
        assert_eq!(frames[2].len(), 2 * MAX_FRAME_BYTES + 100 - 2 * OPTIMAL_FRAME_BYTES);
        for frame in &frames {
            assert!(frame.within_limits(), "frame of {} bytes", frame.len());
        }
        assert_eq!(n.pending_bytes(), 0);
    }

    #[test]
    fn odd_length_chunks_emit_even_frames() {
        let mut n = normalizer();
        let frames = n.push(&vec![0u8; MIN_FRAME_BYTES + 1]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len() % 2, 0);
    }

    #[test]
    fn wav_header_stripped_exactly_once() {
        let mut n = normalizer();
        let mut first = Vec::new();
        first.extend_from_slice(b"RIFF");
        first.extend_from_slice(&vec![0u8; WAV_HEADER_SIZE - 4]);
        first.extend_from_slice(&vec![7u8; MIN_FRAME_BYTES]);

        let frames = n.push(&first).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), MIN_FRAME_BYTES);
        assert!(frames[0].data.iter().all(|&b| b == 7));

        // A later chunk starting with the magic is raw samples, not a header.
        let mut second = Vec::new();
        second.extend_from_slice(b"RIFF");
        second.extend_from_slice(&vec![0u8; MIN_FRAME_BYTES - 4]);
        let frames = n.push(&second).unwrap();
        assert_eq!(frames[0].len(), MIN_FRAME_BYTES);
        assert_eq!(&frames[0].data[..4], b"RIFF");
    }

    #[test]
    fn header_state_latches_without_header() {
        let mut n = normalizer();
        // First chunk has no header; nothing must be stripped from it.
        let frames = n.push(&vec![3u8; MIN_FRAME_BYTES]).unwrap();
        assert_eq!(frames[0].len(), MIN_FRAME_BYTES);
    }

    #[test]
    fn flush_emits_even_padded_tail() {
        let mut n = normalizer();
        n.push(&vec![1u8; 101]).unwrap();
        let tail = n.flush().expect("tail frame");
        assert_eq!(tail.len(), 102);
        assert_eq!(tail.len() % 2, 0);
        assert!(n.flush().is_none());
    }

    #[test]
    fn empty_chunk_is_skipped_in_normal_mode() {
        let mut n = normalizer();
        assert!(n.push(&[]).unwrap().is_empty());
    }

    #[test]
    fn empty_chunk_errors_in_strict_mode() {
        let mut n = ChunkNormalizer::new(true);
        assert!(n.push(&[]).is_err());
    }

    #[test]
    fn odd_chunk_errors_in_strict_mode() {
        let mut n = ChunkNormalizer::new(true);
        assert!(n.push(&vec![0u8; MIN_FRAME_BYTES + 1]).is_err());
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let mut n = normalizer();
        let a = n.push(&vec![0u8; MIN_FRAME_BYTES]).unwrap();
        let b = n.push(&vec![0u8; MIN_FRAME_BYTES]).unwrap();
        assert_eq!(a[0].seq, 0);
        assert_eq!(b[0].seq, 1);
    }

    #[test]
    fn metrics_account_for_all_bytes() {
        let mut n = normalizer();
        n.push(&vec![0u8; MIN_FRAME_BYTES]).unwrap();
        n.push(&vec![0u8; 100]).unwrap();
        let m = n.metrics();
        assert_eq!(m.chunks_in, 2);
        assert_eq!(m.bytes_in, (MIN_FRAME_BYTES + 100) as u64);
        // Accumulator still holds the 100-byte tail.
        assert_eq!(m.bytes_out + n.pending_bytes() as u64, m.bytes_in);
    }

    #[test]
    fn frame_order_preserved_across_accumulation() {
        let mut n = normalizer();
        // Small chunk then a normal chunk: the accumulated bytes must come
        // out before the normal chunk's frame.
        n.push(&vec![9u8; MIN_FRAME_BYTES / 2]).unwrap();
        let frames = n
            .push(&vec![5u8; MIN_FRAME_BYTES + MIN_FRAME_BYTES / 2])
            .unwrap();
        assert_eq!(frames.len(), 2);
        // First frame starts with the earlier (9-filled) bytes.
        assert_eq!(frames[0].data[0], 9);
        assert_eq!(frames[1].data[0], 5);
    }
}

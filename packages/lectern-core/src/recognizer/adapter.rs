//! Stream adapter: feed one recognizer stream and drain its events.
//!
//! Owns the sending half behind an async mutex and a spawned reader task
//! that forwards every event to the session's [`ResultHandler`]. Buffering
//! beyond what the transport requires is deliberately absent here — that
//! responsibility belongs to the session's audio channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::audio::AudioFrame;
use crate::error::{RecognizerError, RecognizerResult};
use crate::metrics::MetricsCollector;
use crate::results::ResultHandler;
use crate::utils::now_millis;

use super::RecognizerStreamParts;

/// One live recognizer stream bound to a session.
pub struct StreamAdapter {
    session_id: String,
    sink: Mutex<Box<dyn super::RecognizerSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    opened_at: Instant,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    /// Set by the reader on a mid-stream transport error.
    broken: Arc<AtomicBool>,
    /// Unix ms of the most recent frame send, for event latency tracking.
    last_frame_at_ms: Arc<AtomicU64>,
}

impl StreamAdapter {
    /// Wraps freshly opened stream halves and spawns the reader loop.
    #[must_use]
    pub fn spawn(
        session_id: String,
        parts: RecognizerStreamParts,
        handler: Arc<ResultHandler>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let broken = Arc::new(AtomicBool::new(false));
        let last_frame_at_ms = Arc::new(AtomicU64::new(0));

        let reader = tokio::spawn(reader_loop(
            session_id.clone(),
            parts.events,
            handler,
            metrics,
            Arc::clone(&broken),
            Arc::clone(&last_frame_at_ms),
        ));

        Self {
            session_id,
            sink: Mutex::new(parts.sink),
            reader: Mutex::new(Some(reader)),
            opened_at: Instant::now(),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            broken,
            last_frame_at_ms,
        }
    }

    /// Sends one frame to the backend.
    pub async fn send_frame(&self, frame: &AudioFrame) -> RecognizerResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(RecognizerError::Broken("reader reported failure".into()));
        }
        let mut sink = self.sink.lock().await;
        sink.send_frame(frame.data.clone()).await?;
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(frame.len() as u64, Ordering::Relaxed);
        self.last_frame_at_ms.store(now_millis(), Ordering::Relaxed);
        Ok(())
    }

    /// Half-closes the sending side.
    pub async fn finish(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.finish().await {
            log::debug!(
                "[Recognizer] finish() on {} reported: {}",
                self.session_id,
                e
            );
        }
    }

    /// Waits up to `limit` for the reader to reach end of stream.
    ///
    /// Returns true if the reader finished in time.
    pub async fn drain(&self, limit: Duration) -> bool {
        let mut guard = self.reader.lock().await;
        let Some(handle) = guard.as_mut() else {
            return true;
        };
        match timeout(limit, &mut *handle).await {
            Ok(_) => {
                guard.take();
                true
            }
            Err(_) => false,
        }
    }

    /// Half-closes, waits up to `grace` for the reader to drain, then cancels.
    pub async fn close(&self, grace: Duration) {
        self.finish().await;
        if !self.drain(grace).await {
            log::warn!(
                "[Recognizer] Reader for {} did not drain within {:?}, cancelling",
                self.session_id,
                grace
            );
            if let Some(handle) = self.reader.lock().await.take() {
                handle.abort();
            }
        }
    }

    /// Age of the stream (drives renewal eligibility).
    #[must_use]
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Frames forwarded on this stream.
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Bytes forwarded on this stream.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Whether the reader observed a mid-stream failure.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }
}

/// Forwards events to the handler until the stream ends.
async fn reader_loop(
    session_id: String,
    mut events: Box<dyn super::RecognizerEvents>,
    handler: Arc<ResultHandler>,
    metrics: Arc<MetricsCollector>,
    broken: Arc<AtomicBool>,
    last_frame_at_ms: Arc<AtomicU64>,
) {
    log::debug!("[Recognizer] Reader started for {}", session_id);

    while let Some(next) = events.next_event().await {
        match next {
            Ok(event) => {
                let latency_ms = {
                    let sent = last_frame_at_ms.load(Ordering::Relaxed);
                    if sent == 0 {
                        0.0
                    } else {
                        event.received_at_ms.saturating_sub(sent) as f64
                    }
                };
                metrics.on_event_received(&session_id, event.is_final, event.confidence, latency_ms);
                handler.handle_event(event);
            }
            Err(e) => {
                log::error!("[Recognizer] Stream error for {}: {}", session_id, e);
                broken.store(true, Ordering::SeqCst);
                metrics.on_error(crate::error::ErrorCode::code(&e), &e.to_string());
                break;
            }
        }
    }

    log::debug!("[Recognizer] Reader stopped for {}", session_id);
}

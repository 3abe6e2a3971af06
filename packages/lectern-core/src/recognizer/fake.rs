//! Deterministic in-process recognizer for tests and local development.
//!
//! Plays back a scripted sequence of recognition events keyed to how many
//! frames the stream has received, and records every frame per stream so
//! tests can assert ordering and replay behavior. No network involved.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{RecognizerError, RecognizerResult};
use crate::results::RecognitionEvent;
use crate::utils::now_millis;

use super::{RecognizerClient, RecognizerConfig, RecognizerEvents, RecognizerSink,
    RecognizerStreamParts};

/// When a scripted event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// After the stream has received this many frames (1-based).
    AfterFrames(u64),
    /// When the sending side half-closes.
    OnFinish,
}

/// One scripted recognition event.
#[derive(Debug, Clone)]
pub struct ScriptedEvent {
    pub trigger: Trigger,
    pub text: String,
    pub is_final: bool,
    pub confidence: f64,
}

impl ScriptedEvent {
    #[must_use]
    pub fn interim(trigger: Trigger, text: &str, confidence: f64) -> Self {
        Self {
            trigger,
            text: text.to_string(),
            is_final: false,
            confidence,
        }
    }

    #[must_use]
    pub fn final_result(trigger: Trigger, text: &str, confidence: f64) -> Self {
        Self {
            trigger,
            text: text.to_string(),
            is_final: true,
            confidence,
        }
    }
}

type EventTx = mpsc::UnboundedSender<RecognizerResult<RecognitionEvent>>;

/// Scripted recognizer backend.
///
/// Each `open()` starts a fresh stream that replays the same script. Frames
/// received are recorded per stream; `fail_next_opens` makes the next N
/// opens fail (renewal failure paths); `close_after_frames` simulates the
/// upstream hard cut by ending the event stream after N frames.
pub struct ScriptedRecognizer {
    script: Mutex<Vec<ScriptedEvent>>,
    streams: Mutex<Vec<Arc<StreamRecord>>>,
    opens: AtomicU32,
    fail_next_opens: AtomicU32,
    close_after_frames: AtomicU64,
    /// Artificial latency for `open()`, in milliseconds.
    open_delay_ms: AtomicU64,
}

/// Everything recorded about one opened stream.
pub struct StreamRecord {
    pub frames: Mutex<Vec<Bytes>>,
    events_tx: Mutex<Option<EventTx>>,
    frames_seen: AtomicU64,
}

impl StreamRecord {
    /// Bytes received on this stream, across all frames.
    #[must_use]
    pub fn bytes_received(&self) -> usize {
        self.frames.lock().iter().map(|f| f.len()).sum()
    }

    /// Number of frames received on this stream.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Pushes an ad-hoc event into this stream, outside the script.
    pub fn push_event(&self, text: &str, is_final: bool, confidence: f64) {
        if let Some(tx) = self.events_tx.lock().as_ref() {
            let _ = tx.send(Ok(RecognitionEvent {
                text: text.to_string(),
                is_final,
                confidence,
                words: Vec::new(),
                received_at_ms: now_millis(),
            }));
        }
    }

    /// Ends the event stream (as the upstream service would on its hard cut).
    pub fn end_events(&self) {
        self.events_tx.lock().take();
    }
}

impl Default for ScriptedRecognizer {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ScriptedRecognizer {
    #[must_use]
    pub fn new(script: Vec<ScriptedEvent>) -> Self {
        Self {
            script: Mutex::new(script),
            streams: Mutex::new(Vec::new()),
            opens: AtomicU32::new(0),
            fail_next_opens: AtomicU32::new(0),
            close_after_frames: AtomicU64::new(0),
            open_delay_ms: AtomicU64::new(0),
        }
    }

    /// Makes `open()` take this long, so tests can interleave work with an
    /// in-flight renewal.
    pub fn set_open_delay_ms(&self, ms: u64) {
        self.open_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Makes the next `n` `open()` calls fail with a transport error.
    pub fn fail_next_opens(&self, n: u32) {
        self.fail_next_opens.store(n, Ordering::SeqCst);
    }

    /// Ends each stream's events after it has received `n` frames,
    /// simulating the upstream hard time limit.
    pub fn close_after_frames(&self, n: u64) {
        self.close_after_frames.store(n, Ordering::SeqCst);
    }

    /// Number of streams opened so far.
    #[must_use]
    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Record of the `i`-th opened stream.
    #[must_use]
    pub fn stream(&self, i: usize) -> Option<Arc<StreamRecord>> {
        self.streams.lock().get(i).cloned()
    }

    /// Record of the most recently opened stream.
    #[must_use]
    pub fn last_stream(&self) -> Option<Arc<StreamRecord>> {
        self.streams.lock().last().cloned()
    }

    /// All frames received, concatenated across streams in open order.
    #[must_use]
    pub fn all_frames(&self) -> Vec<Bytes> {
        self.streams
            .lock()
            .iter()
            .flat_map(|s| s.frames.lock().clone())
            .collect()
    }
}

#[async_trait]
impl RecognizerClient for ScriptedRecognizer {
    async fn open(&self, _config: &RecognizerConfig) -> RecognizerResult<RecognizerStreamParts> {
        let delay = self.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }

        let remaining = self.fail_next_opens.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_opens.store(remaining - 1, Ordering::SeqCst);
            return Err(RecognizerError::Open("scripted open failure".into()));
        }

        self.opens.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let record = Arc::new(StreamRecord {
            frames: Mutex::new(Vec::new()),
            events_tx: Mutex::new(Some(tx)),
            frames_seen: AtomicU64::new(0),
        });
        self.streams.lock().push(Arc::clone(&record));

        let sink = ScriptedSink {
            record: Arc::clone(&record),
            script: self.script.lock().clone().into(),
            close_after_frames: self.close_after_frames.load(Ordering::SeqCst),
        };
        let events = ScriptedEvents { rx };

        Ok(RecognizerStreamParts {
            sink: Box::new(sink),
            events: Box::new(events),
        })
    }
}

struct ScriptedSink {
    record: Arc<StreamRecord>,
    script: VecDeque<ScriptedEvent>,
    close_after_frames: u64,
}

impl ScriptedSink {
    fn emit_due(&mut self, finished: bool) {
        let seen = self.record.frames_seen.load(Ordering::SeqCst);
        while let Some(event) = self.script.front() {
            let due = match event.trigger {
                Trigger::AfterFrames(n) => seen >= n,
                Trigger::OnFinish => finished,
            };
            if !due {
                break;
            }
            let event = self.script.pop_front().expect("checked front");
            self.record.push_event(&event.text, event.is_final, event.confidence);
        }
    }
}

#[async_trait]
impl RecognizerSink for ScriptedSink {
    async fn send_frame(&mut self, frame: Bytes) -> RecognizerResult<()> {
        if self.record.events_tx.lock().is_none() {
            return Err(RecognizerError::Broken("stream already ended".into()));
        }
        self.record.frames.lock().push(frame);
        let seen = self.record.frames_seen.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit_due(false);

        if self.close_after_frames > 0 && seen >= self.close_after_frames {
            log::debug!("[Fake] Hard cut after {} frames", seen);
            self.record.end_events();
        }
        Ok(())
    }

    async fn finish(&mut self) -> RecognizerResult<()> {
        self.emit_due(true);
        self.record.end_events();
        Ok(())
    }
}

struct ScriptedEvents {
    rx: mpsc::UnboundedReceiver<RecognizerResult<RecognitionEvent>>,
}

#[async_trait]
impl RecognizerEvents for ScriptedEvents {
    async fn next_event(&mut self) -> Option<RecognizerResult<RecognitionEvent>> {
        self.rx.recv().await
    }
}

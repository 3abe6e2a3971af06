//! One logical transcription session.
//!
//! Concurrency model: public methods may be called from any task; internal
//! state sits behind one short-lived mutex that is never held across I/O.
//! Two long-lived tasks serve each session — the writer, which drains the
//! bounded audio channel into the current recognizer stream, and the reader
//! inside [`StreamAdapter`], which forwards recognition events to the
//! result handler.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::audio::preprocess::PreprocessStats;
use crate::audio::{
    AgcConfig, AudioFrame, AudioPreprocessor, ChunkNormalizer, NormalizerMetrics, VadConfig,
};
use crate::error::{ErrorCode, LecternError, LecternResult, RecognizerResult};
use crate::metrics::MetricsCollector;
use crate::recognizer::{RecognizerClient, RecognizerConfig, StreamAdapter};
use crate::results::{ResultHandler, TranscriptSummary};
use crate::state::{AudioConfig, RenewalConfig};
use crate::utils::now_millis;

use super::renewer::{RenewalEvent, RenewalStatus};
use super::SessionStatus;

/// Per-session recognition parameters supplied by the client.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub language: String,
    pub model: String,
    pub interim_results: bool,
    /// External lecture identifier carried through to the webhook.
    pub lecture_id: Option<i64>,
}

/// Message consumed by the writer task.
enum WriterMsg {
    Frame(AudioFrame),
    /// Sentinel released on close; the writer drains everything before it.
    Shutdown,
}

/// Counters shared between the session and its writer task.
#[derive(Default)]
struct WriterCounters {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

/// State guarded by the session lock.
struct SessionCore {
    status: SessionStatus,
    normalizer: ChunkNormalizer,
    /// Optional VAD/AGC stage ahead of normalization.
    preprocessor: Option<AudioPreprocessor>,
    /// Engaged while Renewing: frames land here instead of the channel.
    renewal_buffer: Option<VecDeque<AudioFrame>>,
    /// Configured frame cap of the engaged buffer.
    renewal_capacity: usize,
    last_renewal_done: Option<Instant>,
    /// Cached on first successful close; later closes return it unchanged.
    summary: Option<SessionSummary>,
}

/// Summary returned by `close()`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub presentation_id: String,
    pub status: SessionStatus,
    pub duration_secs: f64,
    pub renewal_count: u32,
    pub total_frames_sent: u64,
    pub total_bytes_sent: u64,
    pub dropped_frames: u64,
    pub interim_results: u64,
    pub final_results: u64,
    pub transcript: TranscriptSummary,
    pub audio: NormalizerMetrics,
    /// Present when the VAD/AGC stage was enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preprocess: Option<PreprocessStats>,
}

/// Introspection row for the sessions endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub presentation_id: String,
    pub status: SessionStatus,
    pub age_secs: f64,
    pub renewal_count: u32,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub dropped_frames: u64,
    pub secs_since_last_audio: Option<f64>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("presentation_id", &self.presentation_id)
            .finish()
    }
}

/// One logical transcription session.
pub struct Session {
    session_id: String,
    presentation_id: String,
    config: SessionConfig,
    recognizer_config: RecognizerConfig,
    recognizer: Arc<dyn RecognizerClient>,
    handler: Arc<ResultHandler>,
    metrics: Arc<MetricsCollector>,

    core: Mutex<SessionCore>,
    /// Slot holding the current recognizer stream. Only one stream sends
    /// frames at any instant; the renewal swap is ordered through this lock.
    stream: Arc<RwLock<Option<Arc<StreamAdapter>>>>,

    audio_tx: mpsc::Sender<WriterMsg>,
    audio_rx: Mutex<Option<mpsc::Receiver<WriterMsg>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<WriterCounters>,

    created_at: Instant,
    last_audio_at_ms: AtomicU64,
    renewal_count: AtomicU32,
    frames_dropped: AtomicU64,
    starting: AtomicBool,

    send_timeout: Duration,
    close_grace: Duration,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        presentation_id: String,
        config: SessionConfig,
        recognizer_config: RecognizerConfig,
        recognizer: Arc<dyn RecognizerClient>,
        handler: Arc<ResultHandler>,
        metrics: Arc<MetricsCollector>,
        audio: &AudioConfig,
        close_grace: Duration,
    ) -> Arc<Self> {
        let (audio_tx, audio_rx) = mpsc::channel(audio.channel_capacity);

        Arc::new(Self {
            session_id,
            presentation_id,
            config,
            recognizer_config,
            recognizer,
            handler,
            metrics,
            core: Mutex::new(SessionCore {
                status: SessionStatus::Initializing,
                normalizer: ChunkNormalizer::new(audio.strict),
                preprocessor: audio
                    .preprocessing
                    .then(|| AudioPreprocessor::new(VadConfig::default(), AgcConfig::default())),
                renewal_buffer: None,
                renewal_capacity: 0,
                last_renewal_done: None,
                summary: None,
            }),
            stream: Arc::new(RwLock::new(None)),
            audio_tx,
            audio_rx: Mutex::new(Some(audio_rx)),
            writer: Mutex::new(None),
            counters: Arc::new(WriterCounters::default()),
            created_at: Instant::now(),
            last_audio_at_ms: AtomicU64::new(0),
            renewal_count: AtomicU32::new(0),
            frames_dropped: AtomicU64::new(0),
            starting: AtomicBool::new(false),
            send_timeout: audio.send_timeout,
            close_grace,
        })
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn presentation_id(&self) -> &str {
        &self.presentation_id
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.core.lock().status
    }

    #[must_use]
    pub fn renewal_count(&self) -> u32 {
        self.renewal_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<ResultHandler> {
        &self.handler
    }

    /// Age of the current recognizer stream, if one is open.
    pub async fn stream_age(&self) -> Option<Duration> {
        self.stream.read().await.as_ref().map(|s| s.age())
    }

    #[must_use]
    pub fn info(&self) -> SessionInfo {
        let last_audio = self.last_audio_at_ms.load(Ordering::Relaxed);
        SessionInfo {
            session_id: self.session_id.clone(),
            presentation_id: self.presentation_id.clone(),
            status: self.status(),
            age_secs: self.created_at.elapsed().as_secs_f64(),
            renewal_count: self.renewal_count(),
            frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            dropped_frames: self.frames_dropped(),
            secs_since_last_audio: (last_audio > 0)
                .then(|| now_millis().saturating_sub(last_audio) as f64 / 1000.0),
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Opens the first recognizer stream and starts the writer.
    ///
    /// Audio accepted while Initializing is already queued in the channel
    /// and is replayed to the new stream in order, before anything accepted
    /// after this call returns.
    pub async fn start(self: &Arc<Self>) -> LecternResult<()> {
        if self.starting.swap(true, Ordering::SeqCst) {
            return Err(LecternError::IllegalState {
                operation: "start",
                status: self.status(),
            });
        }
        {
            let core = self.core.lock();
            if core.status != SessionStatus::Initializing {
                return Err(LecternError::IllegalState {
                    operation: "start",
                    status: core.status,
                });
            }
        }

        match self.open_adapter().await {
            Ok(adapter) => {
                *self.stream.write().await = Some(Arc::new(adapter));
                self.spawn_writer();
                self.core.lock().status = SessionStatus::Active;
                log::info!(
                    "[Session] {} started (language={}, model={})",
                    self.session_id,
                    self.config.language,
                    self.config.model
                );
                Ok(())
            }
            Err(e) => {
                self.core.lock().status = SessionStatus::Failed;
                self.metrics.on_error(e.code(), &e.to_string());
                log::error!("[Session] {} failed to start: {}", self.session_id, e);
                Err(e.into())
            }
        }
    }

    /// Normalizes a raw chunk and enqueues the resulting frames.
    ///
    /// Accepted while Initializing (queued for replay), Active, and
    /// Renewing (held in the hand-off buffer); rejected otherwise. A full
    /// channel drops frames after `send_timeout` — counted, never silent.
    pub async fn send_audio(&self, chunk: &[u8]) -> LecternResult<()> {
        let frames = {
            let mut core = self.core.lock();
            if !core.status.accepts_audio() {
                return Err(LecternError::IllegalState {
                    operation: "send_audio",
                    status: core.status,
                });
            }

            // Optional VAD/AGC stage: normalize level in place and skip
            // chunks classified as sustained silence.
            let mut processed: Vec<u8>;
            let chunk: &[u8] = match core.preprocessor.as_mut() {
                Some(preprocessor) => {
                    processed = chunk.to_vec();
                    let activity = preprocessor.process(&mut processed);
                    if !preprocessor.should_send(activity) {
                        drop(core);
                        self.last_audio_at_ms.store(now_millis(), Ordering::Relaxed);
                        return Ok(());
                    }
                    &processed
                }
                None => chunk,
            };

            let frames = core.normalizer.push(chunk)?;

            if core.status == SessionStatus::Renewing {
                let capacity = core.renewal_capacity;
                let mut overflow = 0u64;
                if let Some(buffer) = core.renewal_buffer.as_mut() {
                    for frame in frames {
                        if buffer.len() < capacity {
                            buffer.push_back(frame);
                        } else {
                            overflow += 1;
                        }
                    }
                }
                drop(core);

                if overflow > 0 {
                    log::warn!(
                        "[Session] {} renewal buffer full, dropped {} frame(s)",
                        self.session_id,
                        overflow
                    );
                    self.frames_dropped.fetch_add(overflow, Ordering::Relaxed);
                    for _ in 0..overflow {
                        self.metrics.on_frame_dropped(&self.session_id);
                    }
                }
                self.last_audio_at_ms.store(now_millis(), Ordering::Relaxed);
                return Ok(());
            }

            frames
        };

        self.last_audio_at_ms.store(now_millis(), Ordering::Relaxed);
        for frame in frames {
            self.enqueue(frame).await;
        }
        Ok(())
    }

    /// Closes the session and returns its summary. Idempotent: a second
    /// call returns the cached summary without touching anything.
    pub async fn close(&self) -> LecternResult<SessionSummary> {
        let tail_frames = {
            let mut core = self.core.lock();
            match core.status {
                SessionStatus::Closed => {
                    return core.summary.clone().ok_or_else(|| {
                        LecternError::Internal("closed session lost its summary".into())
                    });
                }
                SessionStatus::Closing => {
                    return Err(LecternError::IllegalState {
                        operation: "close",
                        status: SessionStatus::Closing,
                    });
                }
                SessionStatus::Failed => {
                    return Err(LecternError::IllegalState {
                        operation: "close",
                        status: SessionStatus::Failed,
                    });
                }
                _ => {}
            }
            core.status = SessionStatus::Closing;

            // Anything still in the renewal buffer goes out first, then the
            // normalizer tail (may be one short, even-length frame).
            let mut frames: Vec<AudioFrame> = core
                .renewal_buffer
                .take()
                .map(Into::into)
                .unwrap_or_default();
            if let Some(tail) = core.normalizer.flush() {
                frames.push(tail);
            }
            frames
        };

        for frame in tail_frames {
            self.enqueue(frame).await;
        }

        // Sentinel releases the writer once the queue is drained.
        if timeout(self.close_grace, self.audio_tx.send(WriterMsg::Shutdown))
            .await
            .is_err()
        {
            log::warn!(
                "[Session] {} could not deliver shutdown sentinel in time",
                self.session_id
            );
        }
        let writer = self.writer.lock().take();
        if let Some(mut writer) = writer {
            if timeout(self.close_grace, &mut writer).await.is_err() {
                log::warn!("[Session] {} writer did not drain, aborting", self.session_id);
                writer.abort();
            }
        }

        if let Some(adapter) = self.stream.write().await.take() {
            adapter.close(self.close_grace).await;
        }

        let summary = self.build_summary(SessionStatus::Closed);
        {
            let mut core = self.core.lock();
            core.status = SessionStatus::Closed;
            core.summary = Some(summary.clone());
        }

        let audio_seconds =
            crate::utils::pcm_duration_ms(summary.total_bytes_sent as usize) / 1000.0;
        self.metrics.on_session_closed(&self.session_id, audio_seconds);

        log::info!(
            "[Session] {} closed (duration {:.1}s, {} frames)",
            self.session_id,
            summary.duration_secs,
            summary.total_frames_sent
        );
        Ok(summary)
    }

    // ─── Renewal ─────────────────────────────────────────────────────────

    /// Whether the renewer should act on this session.
    pub async fn eligible_for_renewal(&self, config: &RenewalConfig) -> bool {
        if self.status() != SessionStatus::Active {
            return false;
        }
        match self.stream_age().await {
            Some(age) if age >= config.threshold => {}
            _ => return false,
        }
        match self.core.lock().last_renewal_done {
            Some(done) => done.elapsed() >= config.cooldown,
            None => true,
        }
    }

    /// Swaps the recognizer stream underneath the session.
    ///
    /// Returns `None` if the session was not Active when the swap began.
    /// On failure the session returns to Active with the old (half-closed)
    /// stream still in place; it keeps running until the upstream actually
    /// closes it and the next scan retries after the cooldown.
    pub async fn renew(self: &Arc<Self>, config: &RenewalConfig) -> Option<RenewalEvent> {
        let renewal_started = Instant::now();
        let old_stream_age = self.stream_age().await.unwrap_or_default();

        // The event walks the phases of the operation: Preparing while the
        // old stream winds down, InProgress during the swap, then a terminal
        // Completed or Failed.
        let mut event = RenewalEvent {
            session_id: self.session_id.clone(),
            status: RenewalStatus::Preparing,
            old_stream_age_secs: old_stream_age.as_secs_f64(),
            buffered_frames: 0,
            duration_ms: 0,
            at_ms: now_millis(),
            error: None,
        };

        {
            let mut core = self.core.lock();
            if core.status != SessionStatus::Active {
                return None;
            }
            core.renewal_buffer = Some(VecDeque::with_capacity(config.buffer_capacity));
            core.renewal_capacity = config.buffer_capacity;
            core.status = SessionStatus::Renewing;
        }

        log::info!(
            "[Session] {} renewal #{} starting (stream age {:.1}s)",
            self.session_id,
            self.renewal_count() + 1,
            old_stream_age.as_secs_f64()
        );

        // Half-close the old stream and give trailing events a brief window.
        let old = self.stream.read().await.clone();
        if let Some(old) = &old {
            old.finish().await;
            old.drain(config.final_drain).await;
        }

        event.status = RenewalStatus::InProgress;

        match self.open_adapter().await {
            Ok(new_adapter) => {
                if self.status() != SessionStatus::Renewing {
                    // Closed underneath us; discard the fresh stream.
                    new_adapter.close(Duration::ZERO).await;
                    event.status = RenewalStatus::Failed;
                    event.error = Some("session left Renewing during swap".into());
                } else {
                    *self.stream.write().await = Some(Arc::new(new_adapter));
                    if let Some(old) = old {
                        let grace = self.close_grace;
                        tokio::spawn(async move { old.close(grace).await });
                    }

                    // The new stream produces its own interims.
                    self.handler.clear_interim();

                    event.buffered_frames = self.drain_renewal_buffer().await;
                    self.renewal_count.fetch_add(1, Ordering::Relaxed);
                    self.core.lock().last_renewal_done = Some(Instant::now());
                    event.status = RenewalStatus::Completed;

                    log::info!(
                        "[Session] {} renewal completed ({} buffered frames, {:?})",
                        self.session_id,
                        event.buffered_frames,
                        renewal_started.elapsed()
                    );
                }
            }
            Err(e) => {
                event.buffered_frames = self.drain_renewal_buffer().await;
                event.status = RenewalStatus::Failed;
                event.error = Some(e.to_string());
                self.metrics.on_error("renewal_failed", &e.to_string());
                log::error!(
                    "[Session] {} renewal failed ({} buffered frames flushed): {}",
                    self.session_id,
                    event.buffered_frames,
                    e
                );
            }
        }

        event.duration_ms = renewal_started.elapsed().as_millis() as u64;
        event.at_ms = now_millis();
        Some(event)
    }

    // ─── Internals ───────────────────────────────────────────────────────

    async fn open_adapter(&self) -> RecognizerResult<StreamAdapter> {
        let parts = self.recognizer.open(&self.recognizer_config).await?;
        Ok(StreamAdapter::spawn(
            self.session_id.clone(),
            parts,
            Arc::clone(&self.handler),
            Arc::clone(&self.metrics),
        ))
    }

    fn spawn_writer(&self) {
        let Some(rx) = self.audio_rx.lock().take() else {
            return;
        };
        let handle = tokio::spawn(writer_loop(
            self.session_id.clone(),
            rx,
            Arc::clone(&self.stream),
            Arc::clone(&self.counters),
            Arc::clone(&self.metrics),
        ));
        *self.writer.lock() = Some(handle);
    }

    async fn enqueue(&self, frame: AudioFrame) {
        let len = frame.len();
        match self
            .audio_tx
            .send_timeout(WriterMsg::Frame(frame), self.send_timeout)
            .await
        {
            Ok(()) => {}
            Err(_) => {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.on_frame_dropped(&self.session_id);
                log::warn!(
                    "[Session] {} audio channel full, dropped frame of {} bytes",
                    self.session_id,
                    len
                );
            }
        }
    }

    /// Moves buffered frames into the channel in FIFO order, then flips the
    /// session back to Active. Frames arriving mid-drain append to the
    /// buffer and are still ordered ahead of post-renewal audio.
    async fn drain_renewal_buffer(&self) -> u64 {
        let mut drained = 0u64;
        loop {
            let frame = {
                let mut core = self.core.lock();
                match core.renewal_buffer.as_mut().and_then(VecDeque::pop_front) {
                    Some(frame) => Some(frame),
                    None => {
                        core.renewal_buffer = None;
                        if core.status == SessionStatus::Renewing {
                            core.status = SessionStatus::Active;
                        }
                        None
                    }
                }
            };
            match frame {
                Some(frame) => {
                    self.enqueue(frame).await;
                    drained += 1;
                }
                None => break,
            }
        }
        drained
    }

    fn build_summary(&self, status: SessionStatus) -> SessionSummary {
        let handler_metrics = self.handler.metrics();
        let (audio, preprocess) = {
            let core = self.core.lock();
            (
                core.normalizer.metrics(),
                core.preprocessor.as_ref().map(AudioPreprocessor::stats),
            )
        };
        SessionSummary {
            session_id: self.session_id.clone(),
            presentation_id: self.presentation_id.clone(),
            status,
            duration_secs: self.created_at.elapsed().as_secs_f64(),
            renewal_count: self.renewal_count(),
            total_frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
            total_bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            dropped_frames: self.frames_dropped(),
            interim_results: handler_metrics.total_interim_results,
            final_results: handler_metrics.total_final_results,
            transcript: self.handler.export_summary(),
            audio,
            preprocess,
        }
    }
}

/// Drains the audio channel into the current stream until the sentinel.
async fn writer_loop(
    session_id: String,
    mut rx: mpsc::Receiver<WriterMsg>,
    stream: Arc<RwLock<Option<Arc<StreamAdapter>>>>,
    counters: Arc<WriterCounters>,
    metrics: Arc<MetricsCollector>,
) {
    log::debug!("[Session] Writer started for {}", session_id);

    while let Some(msg) = rx.recv().await {
        let frame = match msg {
            WriterMsg::Shutdown => break,
            WriterMsg::Frame(frame) => frame,
        };

        let adapter = stream.read().await.as_ref().map(Arc::clone);
        let Some(adapter) = adapter else {
            log::warn!("[Session] {} has no open stream, frame skipped", session_id);
            continue;
        };

        match adapter.send_frame(&frame).await {
            Ok(()) => {
                counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                counters
                    .bytes_sent
                    .fetch_add(frame.len() as u64, Ordering::Relaxed);
                metrics.on_frame_sent(&session_id, frame.len());
            }
            Err(e) => {
                // The session keeps running on a broken stream until the
                // client closes it or a renewal replaces the stream.
                metrics.on_error(e.code(), &e.to_string());
                log::warn!("[Session] {} frame send failed: {}", session_id, e);
            }
        }
    }

    log::debug!("[Session] Writer stopped for {}", session_id);
}

//! WebSocket endpoint carrying the session control protocol.
//!
//! One connection drives at most one session at a time. Text frames carry
//! JSON commands (`start`, `stop`), binary frames carry raw PCM. Outgoing
//! text frames are `session_started`, `transcription`, `session_closed` and
//! `error` events. Binary audio that arrives before `start` is buffered and
//! replayed into the session once it exists.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::api::AppState;
use crate::results::{FanoutSink, ResultSink, TranscriptionResult};
use crate::session::{CreateSessionRequest, SessionManager, SessionSummary};
use crate::webhook::BackendPublisher;

/// Binary chunks buffered before `start` arrives. Beyond this the oldest
/// chunks are discarded (and logged) rather than growing without bound.
const MAX_PENDING_CHUNKS: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Session Guard (RAII cleanup)
// ─────────────────────────────────────────────────────────────────────────────

/// Ensures the session is closed when the connection goes away, however it
/// goes away. Disarmed after an explicit `stop` so the session is not closed
/// twice.
struct SessionGuard {
    session_id: String,
    manager: Arc<SessionManager>,
    armed: bool,
}

impl SessionGuard {
    fn new(session_id: String, manager: Arc<SessionManager>) -> Self {
        Self {
            session_id,
            manager,
            armed: true,
        }
    }

    fn id(&self) -> &str {
        &self.session_id
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let manager = Arc::clone(&self.manager);
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.close(&session_id).await {
                log::warn!("[WS] Cleanup close for {} failed: {}", session_id, e);
            } else {
                log::info!("[WS] Session cleanup: {}", session_id);
            }
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Message Types
// ─────────────────────────────────────────────────────────────────────────────

/// Incoming control commands.
#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum WsCommand {
    Start(StartCommand),
    Stop,
}

/// Payload of the `start` command.
#[derive(Deserialize)]
struct StartCommand {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    presentation_id: Option<String>,
    lecture_id: Option<i64>,
    #[serde(default)]
    language_code: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default = "default_interim")]
    enable_interim_results: bool,
}

fn default_interim() -> bool {
    true
}

/// Outgoing events.
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WsEvent {
    SessionStarted {
        session_id: String,
        presentation_id: String,
        language_code: String,
        model: String,
    },
    Transcription {
        result: TranscriptionResult,
    },
    SessionClosed {
        session_id: String,
        summary: SessionSummary,
    },
    Error {
        message: String,
    },
}

impl WsEvent {
    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self)
            .ok()
            .map(|s| Message::Text(s.into()))
    }

    fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Sink forwarding classified results into the connection's event queue.
struct WsResultSink {
    events: mpsc::UnboundedSender<WsEvent>,
}

impl ResultSink for WsResultSink {
    fn on_interim(&self, result: &TranscriptionResult) {
        let _ = self.events.send(WsEvent::Transcription {
            result: result.clone(),
        });
    }

    fn on_final(&self, result: &TranscriptionResult) {
        let _ = self.events.send(WsEvent::Transcription {
            result: result.clone(),
        });
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: WsEvent) -> bool {
    match event.to_message() {
        Some(message) => sender.send(message).await.is_ok(),
        None => true,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Main connection loop.
async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<WsEvent>();

    let mut guard: Option<SessionGuard> = None;
    let mut pending_audio: Vec<Bytes> = Vec::new();

    log::info!("[WS] Connection established");

    loop {
        tokio::select! {
            // Results and errors produced by the session's reader loop.
            Some(event) = events_rx.recv() => {
                if !send_event(&mut sender, event).await {
                    break;
                }
            }
            // Client traffic.
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let command = match serde_json::from_str::<WsCommand>(&text) {
                            Ok(command) => command,
                            Err(_) => {
                                if !send_event(&mut sender, WsEvent::error("JSON payload is invalid.")).await {
                                    break;
                                }
                                continue;
                            }
                        };
                        match command {
                            WsCommand::Start(start) => {
                                handle_start(
                                    &state,
                                    start,
                                    &events_tx,
                                    &mut guard,
                                    &mut pending_audio,
                                    &mut sender,
                                )
                                .await;
                            }
                            WsCommand::Stop => {
                                match guard.take() {
                                    Some(active) => {
                                        let session_id = active.id().to_string();
                                        match state.session_manager.close(&session_id).await {
                                            Ok(summary) => {
                                                active.disarm();
                                                pending_audio.clear();
                                                let closed = WsEvent::SessionClosed { session_id, summary };
                                                if !send_event(&mut sender, closed).await {
                                                    break;
                                                }
                                            }
                                            Err(e) => {
                                                active.disarm();
                                                let message = format!("Failed to close session: {e}");
                                                if !send_event(&mut sender, WsEvent::error(message)).await {
                                                    break;
                                                }
                                            }
                                        }
                                    }
                                    None => {
                                        if !send_event(&mut sender, WsEvent::error("No active session to close.")).await {
                                            break;
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        match &guard {
                            Some(active) => {
                                if let Ok(session) = state.session_manager.get(active.id()) {
                                    if let Err(e) = session.send_audio(&data).await {
                                        let _ = events_tx.send(WsEvent::error(format!(
                                            "Failed to process audio stream: {e}"
                                        )));
                                    }
                                }
                            }
                            None => buffer_pending(&mut pending_audio, data),
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    // SessionGuard's Drop closes any session left behind.
    log::info!("[WS] Connection closed");
}

/// Buffers a pre-start chunk, discarding the oldest when the cap is hit.
fn buffer_pending(pending: &mut Vec<Bytes>, data: Bytes) {
    if pending.len() >= MAX_PENDING_CHUNKS {
        pending.remove(0);
        log::warn!("[WS] Pre-start audio buffer full, oldest chunk discarded");
    }
    pending.push(data);
}

/// Handles the `start` command: create the session, replay buffered audio,
/// open the recognizer stream.
async fn handle_start(
    state: &AppState,
    start: StartCommand,
    events_tx: &mpsc::UnboundedSender<WsEvent>,
    guard: &mut Option<SessionGuard>,
    pending_audio: &mut Vec<Bytes>,
    sender: &mut SplitSink<WebSocket, Message>,
) {
    if guard.is_some() {
        let _ = send_event(
            sender,
            WsEvent::error("A session is already active; stop it first."),
        )
        .await;
        return;
    }

    let Some(lecture_id) = start.lecture_id else {
        let _ = send_event(
            sender,
            WsEvent::error("lecture_id is required to start transcription."),
        )
        .await;
        return;
    };

    let ws_sink = Arc::new(WsResultSink {
        events: events_tx.clone(),
    });
    let sink: Arc<dyn ResultSink> =
        match BackendPublisher::from_config(&state.config.backend, Some(lecture_id)) {
            Some(publisher) => Arc::new(FanoutSink::new(vec![ws_sink, publisher])),
            None => ws_sink,
        };

    let request = CreateSessionRequest {
        session_id: start.session_id,
        presentation_id: start
            .presentation_id
            .unwrap_or_else(|| "unknown".to_string()),
        lecture_id: Some(lecture_id),
        language: start.language_code,
        model: start.model,
        interim_results: start.enable_interim_results,
    };

    let session = match state.session_manager.create(request, sink) {
        Ok(session) => session,
        Err(e) => {
            let _ = send_event(sender, WsEvent::error(format!("Failed to start session: {e}"))).await;
            return;
        }
    };
    let session_id = session.session_id().to_string();

    // Replay audio that arrived before the start command; it is queued in
    // the session's channel and reaches the recognizer ahead of anything
    // accepted after start() returns.
    if !pending_audio.is_empty() {
        log::info!(
            "[WS] Replaying {} buffered chunk(s) for session {}",
            pending_audio.len(),
            session_id
        );
        for chunk in pending_audio.drain(..) {
            if let Err(e) = session.send_audio(&chunk).await {
                log::warn!("[WS] Buffered chunk rejected for {}: {}", session_id, e);
            }
        }
    }

    match session.start().await {
        Ok(()) => {
            *guard = Some(SessionGuard::new(
                session_id.clone(),
                Arc::clone(&state.session_manager),
            ));
            let started = WsEvent::SessionStarted {
                session_id,
                presentation_id: session.presentation_id().to_string(),
                language_code: session.config().language.clone(),
                model: session.config().model.clone(),
            };
            let _ = send_event(sender, started).await;
        }
        Err(e) => {
            state.session_manager.discard(&session_id);
            let _ = send_event(sender, WsEvent::error(format!("Failed to start session: {e}"))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_command_parses_protocol_fields() {
        let json = r#"{
            "action": "start",
            "session_id": "s1",
            "presentation_id": "p1",
            "lecture_id": 42,
            "language_code": "ja-JP",
            "model": "latest_long",
            "enable_interim_results": true
        }"#;
        match serde_json::from_str::<WsCommand>(json).unwrap() {
            WsCommand::Start(start) => {
                assert_eq!(start.session_id.as_deref(), Some("s1"));
                assert_eq!(start.lecture_id, Some(42));
                assert!(start.enable_interim_results);
            }
            WsCommand::Stop => panic!("parsed as stop"),
        }
    }

    #[test]
    fn stop_command_parses() {
        assert!(matches!(
            serde_json::from_str::<WsCommand>(r#"{"action":"stop"}"#).unwrap(),
            WsCommand::Stop
        ));
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(serde_json::from_str::<WsCommand>(r#"{"action":"pause"}"#).is_err());
    }

    #[test]
    fn interim_results_default_to_enabled() {
        let json = r#"{"action": "start", "lecture_id": 1}"#;
        match serde_json::from_str::<WsCommand>(json).unwrap() {
            WsCommand::Start(start) => assert!(start.enable_interim_results),
            WsCommand::Stop => panic!("parsed as stop"),
        }
    }

    #[test]
    fn events_serialize_with_event_tag() {
        let event = WsEvent::error("boom");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["message"], "boom");
    }

    #[test]
    fn pending_buffer_is_bounded() {
        let mut pending = Vec::new();
        for i in 0..(MAX_PENDING_CHUNKS + 5) {
            buffer_pending(&mut pending, Bytes::from(vec![i as u8]));
        }
        assert_eq!(pending.len(), MAX_PENDING_CHUNKS);
        // Oldest chunks were discarded.
        assert_eq!(pending[0][0], 5);
    }
}

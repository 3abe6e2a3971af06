//! Outgoing webhook: POST each final result to the configured backend.
//!
//! Fire-and-forget with a bounded timeout. Failures are logged and counted,
//! never surfaced to the client connection.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use crate::results::{ResultSink, TranscriptionResult};
use crate::state::BackendConfig;

/// Wire payload of one published final result.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    lecture_id: Option<i64>,
    session_id: &'a str,
    presentation_id: &'a str,
    text: &'a str,
    confidence: f64,
    timestamp: u64,
    is_final: bool,
    slide_number: Option<u32>,
    slide_score: f64,
    slide_confidence: f64,
    matched_keywords: &'a [String],
}

/// Publishes final results to the backend. Interims are ignored.
pub struct BackendPublisher {
    client: Client,
    base_url: String,
    service_token: Option<String>,
    lecture_id: Option<i64>,
}

impl BackendPublisher {
    /// Builds a publisher, or `None` when no backend URL is configured.
    #[must_use]
    pub fn from_config(config: &BackendConfig, lecture_id: Option<i64>) -> Option<Arc<Self>> {
        if !config.enabled() {
            return None;
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .ok()?;
        Some(Arc::new(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_token: config.service_token.clone(),
            lecture_id,
        }))
    }

    fn publish(&self, result: &TranscriptionResult) {
        let payload = WebhookPayload {
            lecture_id: self.lecture_id,
            session_id: &result.session_id,
            presentation_id: &result.presentation_id,
            text: &result.text,
            confidence: result.confidence,
            timestamp: result.timestamp,
            is_final: result.is_final,
            slide_number: result.slide.as_ref().map(|s| s.slide_id),
            slide_score: result.slide.as_ref().map_or(0.0, |s| s.score),
            slide_confidence: result.slide.as_ref().map_or(0.0, |s| s.confidence),
            matched_keywords: result
                .slide
                .as_ref()
                .map_or(&[][..], |s| &s.matched_keywords),
        };

        let body = match serde_json::to_value(&payload) {
            Ok(body) => body,
            Err(e) => {
                log::error!("[Webhook] Failed to serialize payload: {}", e);
                return;
            }
        };

        let url = format!("{}/api/transcriptions", self.base_url);
        let session_id = result.session_id.clone();
        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.service_token {
            request = request.bearer_auth(token);
        }

        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    log::error!(
                        "[Webhook] Backend rejected transcription for {}: HTTP {}",
                        session_id,
                        response.status()
                    );
                }
                Err(e) => {
                    log::error!(
                        "[Webhook] Failed to publish transcription for {}: {}",
                        session_id,
                        e
                    );
                }
            }
        });
    }
}

impl ResultSink for BackendPublisher {
    fn on_interim(&self, _result: &TranscriptionResult) {}

    fn on_final(&self, result: &TranscriptionResult) {
        self.publish(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_base_url() {
        let config = BackendConfig::default();
        assert!(BackendPublisher::from_config(&config, None).is_none());
    }

    #[test]
    fn enabled_with_base_url() {
        let config = BackendConfig {
            base_url: "http://localhost:8080".into(),
            service_token: Some("token".into()),
            timeout_secs: 5,
        };
        assert!(BackendPublisher::from_config(&config, Some(1)).is_some());
    }

    #[test]
    fn payload_shape_matches_contract() {
        let payload = WebhookPayload {
            lecture_id: Some(42),
            session_id: "s1",
            presentation_id: "p1",
            text: "hello",
            confidence: 0.9,
            timestamp: 123,
            is_final: true,
            slide_number: Some(3),
            slide_score: 2.5,
            slide_confidence: 0.25,
            matched_keywords: &["hello".to_string()],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["lecture_id"], 42);
        assert_eq!(json["slide_number"], 3);
        assert_eq!(json["matched_keywords"][0], "hello");
        assert_eq!(json["is_final"], true);
    }
}

//! Core configuration types.
//!
//! Provides the application [`Config`] and its nested sections. Every section
//! has sensible defaults; [`Config::from_env`] applies the recognized
//! environment overrides (unknown environment keys are ignored).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    ALERT_CHECK_INTERVAL_SECS, AUDIO_CHANNEL_CAPACITY, CLOSE_GRACE_MS, FINAL_DRAIN_MS,
    RENEWAL_BUFFER_CAPACITY, RENEWAL_COOLDOWN_SECS, RENEWAL_SCAN_INTERVAL_SECS,
    RENEWAL_THRESHOLD_SECS, SEND_TIMEOUT_MS, WEBHOOK_TIMEOUT_SECS,
};

/// Configuration for audio ingest behavior.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    /// Surface invalid-frame errors instead of auto-repairing malformed input.
    pub strict: bool,

    /// Enable the optional VAD/AGC preprocessing stage.
    pub preprocessing: bool,

    /// Capacity of a session's audio channel in frames (~1 s of audio).
    pub channel_capacity: usize,

    /// Timeout for enqueueing a frame into a full channel.
    #[serde(with = "duration_millis")]
    pub send_timeout: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            strict: false,
            preprocessing: false,
            channel_capacity: AUDIO_CHANNEL_CAPACITY,
            send_timeout: Duration::from_millis(SEND_TIMEOUT_MS),
        }
    }
}

/// Configuration for session renewal around the upstream time limit.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RenewalConfig {
    /// Stream age at which a session becomes eligible for renewal.
    #[serde(with = "duration_millis")]
    pub threshold: Duration,

    /// Minimum gap between completed renewals of the same session.
    #[serde(with = "duration_millis")]
    pub cooldown: Duration,

    /// Interval between eligibility scans.
    #[serde(with = "duration_millis")]
    pub scan_interval: Duration,

    /// Grace period for trailing events after half-closing the old stream.
    #[serde(with = "duration_millis")]
    pub final_drain: Duration,

    /// Capacity of the hand-off buffer in frames (~5 s of audio).
    pub buffer_capacity: usize,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(RENEWAL_THRESHOLD_SECS),
            cooldown: Duration::from_secs(RENEWAL_COOLDOWN_SECS),
            scan_interval: Duration::from_secs(RENEWAL_SCAN_INTERVAL_SECS),
            final_drain: Duration::from_millis(FINAL_DRAIN_MS),
            buffer_capacity: RENEWAL_BUFFER_CAPACITY,
        }
    }
}

/// Weights and thresholds for the three-signal slide matcher.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct MatchingConfig {
    /// Weight for exact keyword matches.
    pub exact_weight: f64,
    /// Weight for fuzzy (edit-distance / phonetic) matches.
    pub fuzzy_weight: f64,
    /// Weight for semantic (embedding) matches.
    pub semantic_weight: f64,
    /// Multiplier applied when a matched keyword lies within the title span.
    pub title_boost: f64,
    /// Additive boost for the current slide, applied during comparison only.
    pub temporal_boost: f64,
    /// Minimum combined score to report a match at all.
    pub min_score: f64,
    /// A challenger must beat the current slide by this factor to take over.
    pub switch_multiplier: f64,
    /// Minimum normalized similarity for a fuzzy pair to count.
    pub fuzzy_threshold: f64,
    /// Score multiplier for accepted fuzzy pairs.
    pub fuzzy_discount: f64,
    /// Minimum cosine similarity for a semantic candidate.
    pub semantic_threshold: f64,
    /// Number of semantic candidates kept per utterance.
    pub semantic_top_k: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            exact_weight: 1.0,
            fuzzy_weight: 0.7,
            semantic_weight: 0.7,
            title_boost: 2.0,
            temporal_boost: 0.05,
            min_score: 1.5,
            switch_multiplier: 1.1,
            fuzzy_threshold: 0.8,
            fuzzy_discount: 0.7,
            semantic_threshold: 0.7,
            semantic_top_k: 5,
        }
    }
}

/// Configuration for the outgoing final-result webhook.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct BackendConfig {
    /// Base URL of the backend receiving final results. Empty disables the webhook.
    pub base_url: String,

    /// Bearer token attached to webhook requests, if any.
    pub service_token: Option<String>,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl BackendConfig {
    /// Returns true if a backend URL is configured.
    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.base_url.is_empty()
    }
}

/// Alert thresholds evaluated by the periodic alert check.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct AlertThresholds {
    /// Final-result latency p95 warning threshold (ms).
    pub latency_p95_warning_ms: f64,
    /// Final-result latency p95 critical threshold (ms).
    pub latency_p95_critical_ms: f64,
    /// Error rate warning threshold (percent of results).
    pub error_rate_warning_pct: f64,
    /// Error rate critical threshold (percent of results).
    pub error_rate_critical_pct: f64,
    /// Rolling mean confidence warning threshold.
    pub confidence_warning: f64,
    /// Rolling mean confidence critical threshold.
    pub confidence_critical: f64,
    /// Active session count considered saturated.
    pub max_active_sessions: usize,
    /// Session age after which a session is flagged as possibly stuck (seconds).
    pub stuck_session_secs: u64,
    /// Cost rate warning threshold (USD per hour of uptime).
    pub cost_per_hour_warning: f64,
    /// Cost rate critical threshold (USD per hour of uptime).
    pub cost_per_hour_critical: f64,
    /// Interval between checks (seconds).
    pub check_interval_secs: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            latency_p95_warning_ms: 800.0,
            latency_p95_critical_ms: 1500.0,
            error_rate_warning_pct: 5.0,
            error_rate_critical_pct: 10.0,
            confidence_warning: 0.7,
            confidence_critical: 0.5,
            max_active_sessions: 100,
            stuck_session_secs: 600,
            cost_per_hour_warning: 50.0,
            cost_per_hour_critical: 100.0,
            check_interval_secs: ALERT_CHECK_INTERVAL_SECS,
        }
    }
}

/// Configuration for the Lectern core.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Preferred port for the HTTP/WS server (0 = auto-allocate).
    pub preferred_port: u16,

    /// Default recognition language when the client does not specify one.
    pub default_language: String,

    /// Default recognition model when the client does not specify one.
    pub default_model: String,

    /// Path to recognizer credentials, passed through to the injected client.
    pub credentials_path: Option<String>,

    /// Upstream project identifier, passed through to the injected client.
    pub project_id: Option<String>,

    /// Audio ingest configuration.
    #[serde(default)]
    pub audio: AudioConfig,

    /// Session renewal configuration.
    #[serde(default)]
    pub renewal: RenewalConfig,

    /// Slide matching weights and thresholds.
    #[serde(default)]
    pub matching: MatchingConfig,

    /// Outgoing webhook configuration.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Alerting thresholds.
    #[serde(default)]
    pub alerts: AlertThresholds,

    /// Time `close()` waits for the reader to drain before cancelling.
    #[serde(with = "duration_millis")]
    pub close_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_port: 0,
            default_language: "ja-JP".to_string(),
            default_model: "latest_long".to_string(),
            credentials_path: None,
            project_id: None,
            audio: AudioConfig::default(),
            renewal: RenewalConfig::default(),
            matching: MatchingConfig::default(),
            backend: BackendConfig {
                timeout_secs: WEBHOOK_TIMEOUT_SECS,
                ..BackendConfig::default()
            },
            alerts: AlertThresholds::default(),
            close_grace: Duration::from_millis(CLOSE_GRACE_MS),
        }
    }
}

impl Config {
    /// Applies recognized environment overrides onto defaults.
    ///
    /// Recognized keys: `BACKEND_BASE_URL`, `BACKEND_CALLBACK_TIMEOUT`,
    /// `BACKEND_SERVICE_TOKEN`, `LECTERN_CREDENTIALS_PATH`,
    /// `LECTERN_PROJECT_ID`, `LECTERN_LANGUAGE`, `LECTERN_MODEL`.
    /// Unknown keys are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("BACKEND_BASE_URL") {
            config.backend.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(timeout) = std::env::var("BACKEND_CALLBACK_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                config.backend.timeout_secs = secs;
            }
        }
        if let Ok(token) = std::env::var("BACKEND_SERVICE_TOKEN") {
            if !token.is_empty() {
                config.backend.service_token = Some(token);
            }
        }
        if let Ok(path) = std::env::var("LECTERN_CREDENTIALS_PATH") {
            config.credentials_path = Some(path);
        }
        if let Ok(project) = std::env::var("LECTERN_PROJECT_ID") {
            config.project_id = Some(project);
        }
        if let Ok(language) = std::env::var("LECTERN_LANGUAGE") {
            config.default_language = language;
        }
        if let Ok(model) = std::env::var("LECTERN_MODEL") {
            config.default_model = model;
        }
        config
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.audio.channel_capacity == 0 {
            return Err("audio.channel_capacity must be >= 1".to_string());
        }
        if self.renewal.buffer_capacity == 0 {
            return Err("renewal.buffer_capacity must be >= 1".to_string());
        }
        if self.renewal.threshold.is_zero() {
            return Err("renewal.threshold must be > 0".to_string());
        }
        if self.matching.switch_multiplier < 1.0 {
            return Err("matching.switch_multiplier must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.matching.fuzzy_threshold) {
            return Err("matching.fuzzy_threshold must be within [0, 1]".to_string());
        }
        Ok(())
    }
}

/// Serde helper for `Duration` fields expressed in milliseconds.
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn default_matching_weights_match_spec() {
        let m = MatchingConfig::default();
        assert_eq!(m.exact_weight, 1.0);
        assert_eq!(m.fuzzy_weight, 0.7);
        assert_eq!(m.semantic_weight, 0.7);
        assert_eq!(m.title_boost, 2.0);
        assert_eq!(m.min_score, 1.5);
        assert_eq!(m.switch_multiplier, 1.1);
    }

    #[test]
    fn zero_channel_capacity_rejected() {
        let mut config = Config::default();
        config.audio.channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn switch_multiplier_below_one_rejected() {
        let mut config = Config::default();
        config.matching.switch_multiplier = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn backend_disabled_without_url() {
        let backend = BackendConfig::default();
        assert!(!backend.enabled());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.default_language, "ja-JP");
        assert_eq!(back.audio.send_timeout, Duration::from_millis(1000));
    }
}

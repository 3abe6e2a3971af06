//! Metrics collection for streaming sessions.
//!
//! One [`MetricsCollector`] per deployment, created at bootstrap and handed
//! to components by reference — there is no ambient global. All hooks are
//! cheap and internally synchronized; they are called from session writers,
//! reader loops and the transport without further coordination.

pub mod alerting;

pub use alerting::{Alert, AlertManager, AlertSeverity};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::protocol_constants::{COST_PER_AUDIO_HOUR_USD, METRIC_RING_CAPACITY};
use crate::session::RenewalEvent;
use crate::utils::now_millis;

/// Percentile summary over a bounded sample ring.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl Percentiles {
    fn from_samples(samples: &VecDeque<f64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted: Vec<f64> = samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let at = |q: f64| sorted[((n as f64 * q) as usize).min(n - 1)];
        Self {
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
            avg: sorted.iter().sum::<f64>() / n as f64,
            min: sorted[0],
            max: sorted[n - 1],
        }
    }
}

/// Rolling confidence summary.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ConfidenceStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// Per-session totals kept while the session is active.
#[derive(Debug, Clone, Serialize)]
pub struct SessionTotals {
    pub presentation_id: String,
    pub started_at_ms: u64,
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    pub results_received: u64,
}

/// Aggregated renewal statistics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RenewalStats {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub avg_duration_ms: f64,
    pub avg_buffered_frames: f64,
}

/// Full metrics snapshot served by the introspection API.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub timestamp_ms: u64,
    pub uptime_seconds: f64,
    pub sessions: SessionCounts,
    pub latency_ms: LatencySummary,
    pub errors: ErrorSummary,
    pub confidence: ConfidenceStats,
    pub cost: CostSummary,
    pub throughput: ThroughputSummary,
    pub renewals: RenewalStats,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionCounts {
    pub active: usize,
    pub completed: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LatencySummary {
    pub interim: Percentiles,
    pub r#final: Percentiles,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorSummary {
    pub total: u64,
    pub by_kind: HashMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<LastError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastError {
    pub at_ms: u64,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CostSummary {
    pub total_audio_seconds: f64,
    pub total_cost_usd: f64,
    pub cost_per_session_usd: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ThroughputSummary {
    pub total_chunks: u64,
    pub total_bytes: u64,
    pub interim_results: u64,
    pub final_results: u64,
    pub dropped_frames: u64,
    pub chunks_per_second: f64,
    pub bytes_per_second: f64,
    pub results_per_second: f64,
}

/// Thread-safe collector tapped by all components via fixed hooks.
pub struct MetricsCollector {
    started_at: Instant,
    active_sessions: DashMap<String, SessionTotals>,
    completed_sessions: AtomicU64,
    total_sessions: AtomicU64,

    latency_interim: Mutex<VecDeque<f64>>,
    latency_final: Mutex<VecDeque<f64>>,
    confidence: Mutex<VecDeque<f64>>,

    error_counts: Mutex<HashMap<String, u64>>,
    total_errors: AtomicU64,
    last_error: Mutex<Option<LastError>>,

    total_chunks: AtomicU64,
    total_bytes: AtomicU64,
    interim_results: AtomicU64,
    final_results: AtomicU64,
    dropped_frames: AtomicU64,

    total_audio_seconds: Mutex<f64>,

    renewal_total: AtomicU64,
    renewal_completed: AtomicU64,
    renewal_failed: AtomicU64,
    renewal_duration_ms_sum: Mutex<f64>,
    renewal_buffered_sum: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            active_sessions: DashMap::new(),
            completed_sessions: AtomicU64::new(0),
            total_sessions: AtomicU64::new(0),
            latency_interim: Mutex::new(VecDeque::with_capacity(METRIC_RING_CAPACITY)),
            latency_final: Mutex::new(VecDeque::with_capacity(METRIC_RING_CAPACITY)),
            confidence: Mutex::new(VecDeque::with_capacity(METRIC_RING_CAPACITY)),
            error_counts: Mutex::new(HashMap::new()),
            total_errors: AtomicU64::new(0),
            last_error: Mutex::new(None),
            total_chunks: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            interim_results: AtomicU64::new(0),
            final_results: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            total_audio_seconds: Mutex::new(0.0),
            renewal_total: AtomicU64::new(0),
            renewal_completed: AtomicU64::new(0),
            renewal_failed: AtomicU64::new(0),
            renewal_duration_ms_sum: Mutex::new(0.0),
            renewal_buffered_sum: AtomicU64::new(0),
        }
    }

    // ─── Hooks ───────────────────────────────────────────────────────────

    pub fn on_session_created(&self, session_id: &str, presentation_id: &str) {
        self.active_sessions.insert(
            session_id.to_string(),
            SessionTotals {
                presentation_id: presentation_id.to_string(),
                started_at_ms: now_millis(),
                chunks_sent: 0,
                bytes_sent: 0,
                results_received: 0,
            },
        );
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_session_closed(&self, session_id: &str, audio_seconds: f64) {
        self.active_sessions.remove(session_id);
        self.completed_sessions.fetch_add(1, Ordering::Relaxed);
        *self.total_audio_seconds.lock() += audio_seconds;
    }

    pub fn on_frame_sent(&self, session_id: &str, bytes: usize) {
        if let Some(mut entry) = self.active_sessions.get_mut(session_id) {
            entry.chunks_sent += 1;
            entry.bytes_sent += bytes as u64;
        }
        self.total_chunks.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn on_frame_dropped(&self, session_id: &str) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
        log::warn!("[Metrics] Frame dropped under backpressure for {}", session_id);
    }

    pub fn on_event_received(
        &self,
        session_id: &str,
        is_final: bool,
        confidence: f64,
        latency_ms: f64,
    ) {
        if let Some(mut entry) = self.active_sessions.get_mut(session_id) {
            entry.results_received += 1;
        }
        if is_final {
            self.final_results.fetch_add(1, Ordering::Relaxed);
            push_bounded(&mut self.latency_final.lock(), latency_ms);
        } else {
            self.interim_results.fetch_add(1, Ordering::Relaxed);
            push_bounded(&mut self.latency_interim.lock(), latency_ms);
        }
        if (0.0..=1.0).contains(&confidence) {
            push_bounded(&mut self.confidence.lock(), confidence);
        }
    }

    pub fn on_error(&self, kind: &str, message: &str) {
        *self.error_counts.lock().entry(kind.to_string()).or_insert(0) += 1;
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(LastError {
            at_ms: now_millis(),
            kind: kind.to_string(),
            message: message.to_string(),
        });
        log::warn!("[Metrics] Error recorded: {} - {}", kind, message);
    }

    pub fn on_renewal(&self, event: &RenewalEvent) {
        self.renewal_total.fetch_add(1, Ordering::Relaxed);
        if event.succeeded() {
            self.renewal_completed.fetch_add(1, Ordering::Relaxed);
            *self.renewal_duration_ms_sum.lock() += event.duration_ms as f64;
            self.renewal_buffered_sum
                .fetch_add(event.buffered_frames, Ordering::Relaxed);
        } else {
            self.renewal_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn active_session_count(&self) -> usize {
        self.active_sessions.len()
    }

    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Per-session totals for one active session.
    #[must_use]
    pub fn session_totals(&self, session_id: &str) -> Option<SessionTotals> {
        self.active_sessions.get(session_id).map(|r| r.value().clone())
    }

    /// Sessions older than `threshold_secs`, for stuck-session detection.
    #[must_use]
    pub fn sessions_older_than(&self, threshold_secs: u64) -> Vec<(String, u64)> {
        let now = now_millis();
        self.active_sessions
            .iter()
            .filter_map(|entry| {
                let age_secs = now.saturating_sub(entry.value().started_at_ms) / 1000;
                (age_secs >= threshold_secs).then(|| (entry.key().clone(), age_secs))
            })
            .collect()
    }

    /// Full snapshot.
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        let uptime = self.started_at.elapsed().as_secs_f64();
        let completed = self.completed_sessions.load(Ordering::Relaxed);
        let total_sessions = self.total_sessions.load(Ordering::Relaxed);
        let total_audio_seconds = *self.total_audio_seconds.lock();
        let total_cost = total_audio_seconds / 3600.0 * COST_PER_AUDIO_HOUR_USD;

        let confidence = {
            let samples = self.confidence.lock();
            if samples.is_empty() {
                ConfidenceStats::default()
            } else {
                ConfidenceStats {
                    avg: samples.iter().sum::<f64>() / samples.len() as f64,
                    min: samples.iter().copied().fold(f64::INFINITY, f64::min),
                    max: samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                }
            }
        };

        let interim = self.interim_results.load(Ordering::Relaxed);
        let finals = self.final_results.load(Ordering::Relaxed);
        let chunks = self.total_chunks.load(Ordering::Relaxed);
        let bytes = self.total_bytes.load(Ordering::Relaxed);
        let rate = |count: u64| {
            if uptime > 0.0 {
                count as f64 / uptime
            } else {
                0.0
            }
        };

        let renewal_completed = self.renewal_completed.load(Ordering::Relaxed);
        let renewals = RenewalStats {
            total: self.renewal_total.load(Ordering::Relaxed),
            completed: renewal_completed,
            failed: self.renewal_failed.load(Ordering::Relaxed),
            avg_duration_ms: if renewal_completed > 0 {
                *self.renewal_duration_ms_sum.lock() / renewal_completed as f64
            } else {
                0.0
            },
            avg_buffered_frames: if renewal_completed > 0 {
                self.renewal_buffered_sum.load(Ordering::Relaxed) as f64
                    / renewal_completed as f64
            } else {
                0.0
            },
        };

        MetricsSummary {
            timestamp_ms: now_millis(),
            uptime_seconds: uptime,
            sessions: SessionCounts {
                active: self.active_sessions.len(),
                completed,
                total: total_sessions,
            },
            latency_ms: LatencySummary {
                interim: Percentiles::from_samples(&self.latency_interim.lock()),
                r#final: Percentiles::from_samples(&self.latency_final.lock()),
            },
            errors: ErrorSummary {
                total: self.total_errors.load(Ordering::Relaxed),
                by_kind: self.error_counts.lock().clone(),
                last: self.last_error.lock().clone(),
            },
            confidence,
            cost: CostSummary {
                total_audio_seconds,
                total_cost_usd: total_cost,
                cost_per_session_usd: if total_sessions > 0 {
                    total_cost / total_sessions as f64
                } else {
                    0.0
                },
            },
            throughput: ThroughputSummary {
                total_chunks: chunks,
                total_bytes: bytes,
                interim_results: interim,
                final_results: finals,
                dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
                chunks_per_second: rate(chunks),
                bytes_per_second: rate(bytes),
                results_per_second: rate(interim + finals),
            },
            renewals,
        }
    }
}

fn push_bounded(ring: &mut VecDeque<f64>, sample: f64) {
    if ring.len() >= METRIC_RING_CAPACITY {
        ring.pop_front();
    }
    ring.push_back(sample);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_lifecycle_is_counted() {
        let metrics = MetricsCollector::new();
        metrics.on_session_created("s1", "p1");
        assert_eq!(metrics.active_session_count(), 1);

        metrics.on_session_closed("s1", 12.5);
        assert_eq!(metrics.active_session_count(), 0);

        let summary = metrics.summary();
        assert_eq!(summary.sessions.completed, 1);
        assert_eq!(summary.sessions.total, 1);
        assert!((summary.cost.total_audio_seconds - 12.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn frame_hooks_update_per_session_totals() {
        let metrics = MetricsCollector::new();
        metrics.on_session_created("s1", "p1");
        metrics.on_frame_sent("s1", 3200);
        metrics.on_frame_sent("s1", 6400);

        let totals = metrics.session_totals("s1").unwrap();
        assert_eq!(totals.chunks_sent, 2);
        assert_eq!(totals.bytes_sent, 9600);

        let summary = metrics.summary();
        assert_eq!(summary.throughput.total_chunks, 2);
        assert_eq!(summary.throughput.total_bytes, 9600);
    }

    #[tokio::test]
    async fn latency_percentiles_split_by_finality() {
        let metrics = MetricsCollector::new();
        metrics.on_session_created("s1", "p1");
        for i in 0..100 {
            metrics.on_event_received("s1", true, 0.9, i as f64);
        }
        metrics.on_event_received("s1", false, 0.5, 1000.0);

        let summary = metrics.summary();
        assert!(summary.latency_ms.r#final.p95 >= 90.0);
        assert_eq!(summary.latency_ms.interim.max, 1000.0);
        assert_eq!(summary.throughput.final_results, 100);
        assert_eq!(summary.throughput.interim_results, 1);
    }

    #[tokio::test]
    async fn latency_ring_is_bounded() {
        let metrics = MetricsCollector::new();
        for i in 0..(METRIC_RING_CAPACITY + 100) {
            metrics.on_event_received("s1", true, 0.9, i as f64);
        }
        // Oldest samples fell off: the minimum reflects the bounded window.
        let summary = metrics.summary();
        assert_eq!(summary.latency_ms.r#final.min, 100.0);
    }

    #[tokio::test]
    async fn errors_are_counted_by_kind() {
        let metrics = MetricsCollector::new();
        metrics.on_error("upstream_transport_error", "broken pipe");
        metrics.on_error("upstream_transport_error", "reset");
        metrics.on_error("backpressure_drop", "queue full");

        let summary = metrics.summary();
        assert_eq!(summary.errors.total, 3);
        assert_eq!(summary.errors.by_kind["upstream_transport_error"], 2);
        assert_eq!(summary.errors.last.as_ref().unwrap().kind, "backpressure_drop");
    }

    #[tokio::test]
    async fn out_of_range_confidence_is_ignored() {
        let metrics = MetricsCollector::new();
        metrics.on_event_received("s1", true, 1.5, 10.0);
        metrics.on_event_received("s1", true, 0.5, 10.0);
        let summary = metrics.summary();
        assert_eq!(summary.confidence.avg, 0.5);
    }

    #[tokio::test]
    async fn stuck_session_detection_uses_age() {
        let metrics = MetricsCollector::new();
        metrics.on_session_created("s1", "p1");
        assert!(metrics.sessions_older_than(0).iter().any(|(id, _)| id == "s1"));
        assert!(metrics.sessions_older_than(3600).is_empty());
    }
}

//! Background session renewal around the upstream hard time limit.
//!
//! One task scans active sessions once a second. A session whose stream is
//! old enough (and outside the post-renewal cooldown) gets its stream
//! swapped seamlessly: audio accepted during the swap is buffered and
//! replayed to the new stream in order, ahead of anything newer.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::metrics::MetricsCollector;
use crate::state::RenewalConfig;

use super::manager::SessionManager;

/// Renewal events retained for introspection.
const RENEWAL_HISTORY_CAPACITY: usize = 256;

/// Phases of one renewal operation.
///
/// An in-flight event moves Preparing (winding down the old stream) →
/// InProgress (opening the replacement) → Completed or Failed; only
/// terminal events are recorded in the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalStatus {
    Preparing,
    InProgress,
    Completed,
    Failed,
}

/// Record of one renewal attempt.
#[derive(Debug, Clone, Serialize)]
pub struct RenewalEvent {
    pub session_id: String,
    pub status: RenewalStatus,
    /// Age of the replaced stream when the swap began.
    pub old_stream_age_secs: f64,
    /// Frames held in the hand-off buffer during the swap.
    pub buffered_frames: u64,
    /// Wall time the swap took.
    pub duration_ms: u64,
    /// Unix ms when the attempt finished.
    pub at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RenewalEvent {
    /// Whether the attempt completed successfully.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == RenewalStatus::Completed
    }
}

/// Monitors active sessions and performs renewals.
pub struct SessionRenewer {
    manager: Arc<SessionManager>,
    config: RenewalConfig,
    metrics: Arc<MetricsCollector>,
    history: Mutex<VecDeque<RenewalEvent>>,
    cancel: CancellationToken,
}

impl SessionRenewer {
    #[must_use]
    pub fn new(
        manager: Arc<SessionManager>,
        config: RenewalConfig,
        metrics: Arc<MetricsCollector>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            manager,
            config,
            metrics,
            history: Mutex::new(VecDeque::with_capacity(RENEWAL_HISTORY_CAPACITY)),
            cancel,
        }
    }

    /// Starts the scan task on the ambient runtime.
    pub fn start(self: &Arc<Self>) {
        let renewer = Arc::clone(self);
        let interval = self.config.scan_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = renewer.cancel.cancelled() => break,
                    _ = ticker.tick() => renewer.scan_once().await,
                }
            }
            log::info!("[Renewer] Monitoring stopped");
        });
        log::info!(
            "[Renewer] Monitoring started (threshold {:?}, cooldown {:?})",
            self.config.threshold,
            self.config.cooldown
        );
    }

    /// One scan over the active sessions; renews every eligible one.
    pub async fn scan_once(&self) {
        for session in self.manager.list_active() {
            if !session.eligible_for_renewal(&self.config).await {
                continue;
            }
            log::info!(
                "[Renewer] Session {} approaching upstream limit, renewing",
                session.session_id()
            );
            if let Some(event) = session.renew(&self.config).await {
                self.metrics.on_renewal(&event);
                self.record(event);
            }
        }
    }

    /// Renewal history, optionally filtered by session.
    #[must_use]
    pub fn history(&self, session_id: Option<&str>) -> Vec<RenewalEvent> {
        let history = self.history.lock();
        history
            .iter()
            .filter(|e| session_id.map_or(true, |id| e.session_id == id))
            .cloned()
            .collect()
    }

    fn record(&self, event: RenewalEvent) {
        let mut history = self.history.lock();
        if history.len() >= RENEWAL_HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(event);
    }
}

//! Threshold-based alerting over the metrics collector.
//!
//! A periodic task evaluates the configured thresholds against the current
//! metrics summary. Alerts are retained in a bounded ring for introspection
//! and optionally forwarded to a callback (pager, chat webhook, test probe).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::metrics::{MetricsCollector, MetricsSummary};
use crate::protocol_constants::ALERT_RING_CAPACITY;
use crate::state::AlertThresholds;
use crate::utils::now_millis;

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// One fired alert.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub alert_type: &'static str,
    pub message: String,
    pub timestamp_ms: u64,
    pub metric_value: f64,
    pub threshold: f64,
}

type AlertCallback = Box<dyn Fn(&Alert) + Send + Sync>;

/// Evaluates thresholds and retains fired alerts.
pub struct AlertManager {
    metrics: Arc<MetricsCollector>,
    thresholds: AlertThresholds,
    alerts: Mutex<VecDeque<Alert>>,
    callback: Mutex<Option<AlertCallback>>,
    cancel: CancellationToken,
}

impl AlertManager {
    #[must_use]
    pub fn new(
        metrics: Arc<MetricsCollector>,
        thresholds: AlertThresholds,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            metrics,
            thresholds,
            alerts: Mutex::new(VecDeque::with_capacity(ALERT_RING_CAPACITY)),
            callback: Mutex::new(None),
            cancel,
        }
    }

    /// Installs the alert callback, replacing any previous one.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        *self.callback.lock() = Some(Box::new(callback));
    }

    /// Starts the periodic check task on the ambient runtime.
    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let interval = Duration::from_secs(self.thresholds.check_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = ticker.tick() => manager.check_once(),
                }
            }
            log::info!("[Alerts] Alert monitor stopped");
        });
        log::info!(
            "[Alerts] Alert monitor started (interval {}s)",
            self.thresholds.check_interval_secs
        );
    }

    /// Runs one evaluation pass over the current metrics summary.
    pub fn check_once(&self) {
        let summary = self.metrics.summary();
        self.check_latency(&summary);
        self.check_error_rate(&summary);
        self.check_confidence(&summary);
        self.check_sessions(&summary);
        self.check_cost(&summary);
    }

    /// Most recent alerts, newest last.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        let alerts = self.alerts.lock();
        alerts
            .iter()
            .skip(alerts.len().saturating_sub(limit))
            .cloned()
            .collect()
    }

    fn check_latency(&self, summary: &MetricsSummary) {
        let p95 = summary.latency_ms.r#final.p95;
        if p95 <= 0.0 {
            return;
        }
        if p95 >= self.thresholds.latency_p95_critical_ms {
            self.fire(
                AlertSeverity::Critical,
                "high_latency_p95",
                format!("Final result latency p95 critically high: {p95:.1}ms"),
                p95,
                self.thresholds.latency_p95_critical_ms,
            );
        } else if p95 >= self.thresholds.latency_p95_warning_ms {
            self.fire(
                AlertSeverity::Warning,
                "high_latency_p95",
                format!("Final result latency p95 elevated: {p95:.1}ms"),
                p95,
                self.thresholds.latency_p95_warning_ms,
            );
        }
    }

    fn check_error_rate(&self, summary: &MetricsSummary) {
        let results = summary.throughput.interim_results + summary.throughput.final_results;
        if results == 0 {
            return;
        }
        let rate = summary.errors.total as f64 / results as f64 * 100.0;
        if rate >= self.thresholds.error_rate_critical_pct {
            self.fire(
                AlertSeverity::Critical,
                "high_error_rate",
                format!("Error rate critically high: {rate:.1}%"),
                rate,
                self.thresholds.error_rate_critical_pct,
            );
        } else if rate >= self.thresholds.error_rate_warning_pct {
            self.fire(
                AlertSeverity::Warning,
                "high_error_rate",
                format!("Error rate elevated: {rate:.1}%"),
                rate,
                self.thresholds.error_rate_warning_pct,
            );
        }
    }

    fn check_confidence(&self, summary: &MetricsSummary) {
        let avg = summary.confidence.avg;
        if avg == 0.0 {
            return;
        }
        if avg <= self.thresholds.confidence_critical {
            self.fire(
                AlertSeverity::Critical,
                "low_confidence",
                format!("Average confidence critically low: {avg:.3}"),
                avg,
                self.thresholds.confidence_critical,
            );
        } else if avg <= self.thresholds.confidence_warning {
            self.fire(
                AlertSeverity::Warning,
                "low_confidence",
                format!("Average confidence low: {avg:.3}"),
                avg,
                self.thresholds.confidence_warning,
            );
        }
    }

    fn check_sessions(&self, summary: &MetricsSummary) {
        let active = summary.sessions.active;
        if active >= self.thresholds.max_active_sessions {
            self.fire(
                AlertSeverity::Warning,
                "max_sessions",
                format!("Maximum active sessions reached: {active}"),
                active as f64,
                self.thresholds.max_active_sessions as f64,
            );
        }

        for (session_id, age_secs) in self
            .metrics
            .sessions_older_than(self.thresholds.stuck_session_secs)
        {
            self.fire(
                AlertSeverity::Warning,
                "stuck_session",
                format!("Session possibly stuck: {session_id} (age: {age_secs}s)"),
                age_secs as f64,
                self.thresholds.stuck_session_secs as f64,
            );
        }
    }

    fn check_cost(&self, summary: &MetricsSummary) {
        let uptime_hours = summary.uptime_seconds / 3600.0;
        if uptime_hours <= 0.0 {
            return;
        }
        let per_hour = summary.cost.total_cost_usd / uptime_hours;
        if per_hour >= self.thresholds.cost_per_hour_critical {
            self.fire(
                AlertSeverity::Critical,
                "high_cost",
                format!("Cost rate critically high: ${per_hour:.2}/hour"),
                per_hour,
                self.thresholds.cost_per_hour_critical,
            );
        } else if per_hour >= self.thresholds.cost_per_hour_warning {
            self.fire(
                AlertSeverity::Warning,
                "high_cost",
                format!("Cost rate elevated: ${per_hour:.2}/hour"),
                per_hour,
                self.thresholds.cost_per_hour_warning,
            );
        }
    }

    fn fire(
        &self,
        severity: AlertSeverity,
        alert_type: &'static str,
        message: String,
        metric_value: f64,
        threshold: f64,
    ) {
        let alert = Alert {
            severity,
            alert_type,
            message,
            timestamp_ms: now_millis(),
            metric_value,
            threshold,
        };

        match severity {
            AlertSeverity::Critical => log::error!("[Alerts] {}", alert.message),
            AlertSeverity::Warning => log::warn!("[Alerts] {}", alert.message),
            AlertSeverity::Info => log::info!("[Alerts] {}", alert.message),
        }

        {
            let mut alerts = self.alerts.lock();
            if alerts.len() >= ALERT_RING_CAPACITY {
                alerts.pop_front();
            }
            alerts.push_back(alert.clone());
        }

        if let Some(callback) = self.callback.lock().as_ref() {
            callback(&alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(thresholds: AlertThresholds) -> (Arc<MetricsCollector>, AlertManager) {
        let metrics = Arc::new(MetricsCollector::new());
        let manager = AlertManager::new(Arc::clone(&metrics), thresholds, CancellationToken::new());
        (metrics, manager)
    }

    #[tokio::test]
    async fn quiet_metrics_fire_no_alerts() {
        let (_metrics, manager) = manager_with(AlertThresholds::default());
        manager.check_once();
        assert!(manager.recent(10).is_empty());
    }

    #[tokio::test]
    async fn high_latency_fires_warning_then_critical() {
        let (metrics, manager) = manager_with(AlertThresholds::default());
        metrics.on_session_created("s1", "p1");
        for _ in 0..20 {
            metrics.on_event_received("s1", true, 0.9, 900.0);
        }
        manager.check_once();
        let alerts = manager.recent(10);
        assert!(alerts
            .iter()
            .any(|a| a.alert_type == "high_latency_p95" && a.severity == AlertSeverity::Warning));

        for _ in 0..1000 {
            metrics.on_event_received("s1", true, 0.9, 2000.0);
        }
        manager.check_once();
        assert!(manager
            .recent(10)
            .iter()
            .any(|a| a.alert_type == "high_latency_p95" && a.severity == AlertSeverity::Critical));
    }

    #[tokio::test]
    async fn low_confidence_fires() {
        let (metrics, manager) = manager_with(AlertThresholds::default());
        metrics.on_session_created("s1", "p1");
        for _ in 0..10 {
            metrics.on_event_received("s1", true, 0.3, 50.0);
        }
        manager.check_once();
        assert!(manager
            .recent(10)
            .iter()
            .any(|a| a.alert_type == "low_confidence" && a.severity == AlertSeverity::Critical));
    }

    #[tokio::test]
    async fn stuck_session_fires_with_zero_threshold() {
        let mut thresholds = AlertThresholds::default();
        thresholds.stuck_session_secs = 0;
        let (metrics, manager) = manager_with(thresholds);
        metrics.on_session_created("s1", "p1");
        manager.check_once();
        assert!(manager.recent(10).iter().any(|a| a.alert_type == "stuck_session"));
    }

    #[tokio::test]
    async fn callback_receives_alerts() {
        let mut thresholds = AlertThresholds::default();
        thresholds.stuck_session_secs = 0;
        let (metrics, manager) = manager_with(thresholds);
        metrics.on_session_created("s1", "p1");

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        manager.set_callback(move |alert| {
            received_clone.lock().push(alert.alert_type);
        });

        manager.check_once();
        assert!(received.lock().contains(&"stuck_session"));
    }

    #[tokio::test]
    async fn alert_ring_is_bounded() {
        let mut thresholds = AlertThresholds::default();
        thresholds.stuck_session_secs = 0;
        let (metrics, manager) = manager_with(thresholds);
        metrics.on_session_created("s1", "p1");
        for _ in 0..(ALERT_RING_CAPACITY + 10) {
            manager.check_once();
        }
        assert_eq!(manager.recent(usize::MAX).len(), ALERT_RING_CAPACITY);
    }
}

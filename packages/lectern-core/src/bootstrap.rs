//! Application bootstrap and dependency wiring.
//!
//! The composition root: the single place where services are instantiated
//! and wired together. The recognizer client is injected here — the core
//! never constructs a backend on its own — and every collector/monitor that
//! the original design reached through module globals is an explicit
//! dependency with init and shutdown.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::error::{LecternError, LecternResult};
use crate::matching::SlideIndexRegistry;
use crate::metrics::{AlertManager, MetricsCollector};
use crate::recognizer::RecognizerClient;
use crate::session::{SessionManager, SessionRenewer};
use crate::state::Config;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct CoreServices {
    /// Registry of live transcription sessions.
    pub session_manager: Arc<SessionManager>,
    /// Metrics collector tapped by all components.
    pub metrics: Arc<MetricsCollector>,
    /// Threshold-based alerting over the collector.
    pub alert_manager: Arc<AlertManager>,
    /// Background stream renewal.
    pub renewer: Arc<SessionRenewer>,
    /// Preloaded slide indexes keyed by presentation id.
    pub index_registry: Arc<SlideIndexRegistry>,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    config: Arc<Config>,
}

impl CoreServices {
    /// Starts the background monitors (renewal scan, alert checks).
    pub fn start_background_tasks(&self) {
        self.renewer.start();
        self.alert_manager.start();
    }

    /// Builds the API layer's shared state.
    #[must_use]
    pub fn app_state(&self) -> AppState {
        AppState {
            session_manager: Arc::clone(&self.session_manager),
            metrics: Arc::clone(&self.metrics),
            alert_manager: Arc::clone(&self.alert_manager),
            renewer: Arc::clone(&self.renewer),
            config: Arc::clone(&self.config),
        }
    }

    /// Initiates graceful shutdown: stops monitors, closes every session.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel_token.cancel();
        self.session_manager.close_all().await;
        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Bootstraps all services with their dependencies.
///
/// Wiring order follows the dependency graph: metrics first, then the
/// index registry, the session manager, and finally the monitors that
/// observe them.
///
/// # Errors
///
/// Returns an error if the configuration fails validation.
pub fn bootstrap_services(
    config: &Config,
    recognizer: Arc<dyn RecognizerClient>,
) -> LecternResult<CoreServices> {
    config
        .validate()
        .map_err(LecternError::Configuration)?;

    let cancel_token = CancellationToken::new();

    let metrics = Arc::new(MetricsCollector::new());
    let index_registry = Arc::new(SlideIndexRegistry::new());

    let session_manager = Arc::new(SessionManager::new(
        recognizer,
        Arc::clone(&index_registry),
        Arc::clone(&metrics),
        config.clone(),
    ));

    let renewer = Arc::new(SessionRenewer::new(
        Arc::clone(&session_manager),
        config.renewal.clone(),
        Arc::clone(&metrics),
        cancel_token.child_token(),
    ));

    let alert_manager = Arc::new(AlertManager::new(
        Arc::clone(&metrics),
        config.alerts,
        cancel_token.child_token(),
    ));

    Ok(CoreServices {
        session_manager,
        metrics,
        alert_manager,
        renewer,
        index_registry,
        cancel_token,
        config: Arc::new(config.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::fake::ScriptedRecognizer;

    #[tokio::test]
    async fn bootstrap_wires_services() {
        let services =
            bootstrap_services(&Config::default(), Arc::new(ScriptedRecognizer::default()))
                .unwrap();
        assert_eq!(services.session_manager.count(), 0);
        assert_eq!(services.metrics.active_session_count(), 0);
        assert!(services.index_registry.is_empty());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = Config::default();
        config.audio.channel_capacity = 0;
        assert!(
            bootstrap_services(&config, Arc::new(ScriptedRecognizer::default())).is_err()
        );
    }

    #[tokio::test]
    async fn shutdown_cancels_background_tasks() {
        let services =
            bootstrap_services(&Config::default(), Arc::new(ScriptedRecognizer::default()))
                .unwrap();
        services.start_background_tasks();
        services.shutdown().await;
        assert!(services.cancel_token.is_cancelled());
    }
}

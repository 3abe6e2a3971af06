//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for introspection data.

use axum::extract::{Query, State};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::protocol_constants::{APP_NAME, SERVICE_ID};

/// Query parameters for the alerts endpoint.
#[derive(Deserialize)]
struct AlertsQuery {
    #[serde(default = "default_alert_limit")]
    limit: usize,
}

fn default_alert_limit() -> usize {
    20
}

/// Query parameters for the renewals endpoint.
#[derive(Deserialize)]
struct RenewalsQuery {
    session_id: Option<String>,
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "name": APP_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics(State(state): State<AppState>) -> Json<crate::metrics::MetricsSummary> {
    Json(state.metrics.summary())
}

async fn sessions(State(state): State<AppState>) -> Json<Vec<crate::session::SessionInfo>> {
    Json(state.session_manager.list_info())
}

async fn alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Json<Vec<crate::metrics::Alert>> {
    Json(state.alert_manager.recent(query.limit))
}

async fn renewals(
    State(state): State<AppState>,
    Query(query): Query<RenewalsQuery>,
) -> Json<Vec<crate::session::RenewalEvent>> {
    Json(state.renewer.history(query.session_id.as_deref()))
}

/// Builds the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/sessions", get(sessions))
        .route("/alerts", get(alerts))
        .route("/renewals", get(renewals))
        .route("/transcribe", any(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

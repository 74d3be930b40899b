//! HTTP surface: webhook ingress, outbound send client, background
//! worker/sweep/config-reload tasks, and a small operator surface.

mod brand_config;
mod send;
mod webhook;
/// Background worker loop, crash-recovery sweep, config hot-reload.
pub mod worker;

pub use brand_config::KvBrandConfigProvider;
pub use send::HttpOutboundSender;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use wecom_mediator_core::{AlertSink, KEY_PREFIX, MonitoringSink, RuntimeConfig};
use wecom_mediator_service::{BurstAggregator, DedupStore, FilterConfig, HistoryStore};
use wecom_mediator_storage::{JobQueue, KvStore, StorageBackend};

/// Shared state handed to every Axum handler and background task.
pub struct AppState {
    /// Combined KV store and job queue backend.
    pub storage: Arc<StorageBackend>,
    /// Ordered rejection/record-only/pass rules (§4.E).
    pub filter: Arc<FilterConfig>,
    /// Dedup marker store (§4.C).
    pub dedup: Arc<DedupStore>,
    /// Conversation history store (§4.D).
    pub history: Arc<HistoryStore>,
    /// Per-conversation coalescing state machine (§4.F).
    pub aggregator: Arc<BurstAggregator>,
    /// Lifecycle event sink (§4.J).
    pub monitoring: Arc<dyn MonitoringSink>,
    /// Human-intervention alert sink (§4.I).
    pub alerts: Arc<dyn AlertSink>,
    /// Publishing half of the hot-reloadable runtime config channel (§5, §6).
    pub runtime_config_tx: watch::Sender<RuntimeConfig>,
}

/// Builds the Axum router: webhook ingress plus a small operator surface.
#[must_use]
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook::webhook))
        .route("/healthz", get(health))
        .route("/queue/stats", get(queue_stats))
        .route("/config", get(config_view))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// First-page sample of how many chats currently have messages buffered
/// for coalescing. Not exhaustive — a full count would require draining
/// the cursor to completion, which this endpoint intentionally avoids.
async fn queue_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let glob = format!("{KEY_PREFIX}pending:*");
    match state.storage.scan("", &glob, 200).await {
        Ok((next_cursor, keys)) => Json(serde_json::json!({
            "pending_chats_sampled": keys.len(),
            "more_pending_chats": !next_cursor.is_empty(),
        })),
        Err(source) => Json(serde_json::json!({ "status": "error", "detail": source.to_string() })),
    }
}

async fn config_view(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let config = state.runtime_config_tx.borrow().clone();
    Json(serde_json::json!({
        "merge_window_ms": config.merge_window_ms,
        "max_merged_messages": config.max_merged_messages,
        "typing_delay_per_char_ms": config.typing_delay_per_char_ms,
        "paragraph_gap_ms": config.paragraph_gap_ms,
        "typing_speed_chars_per_sec": config.typing_speed_chars_per_sec,
        "typing_min_delay_ms": config.typing_min_delay_ms,
        "typing_max_delay_ms": config.typing_max_delay_ms,
        "typing_random_variation": config.typing_random_variation,
        "worker_concurrency": config.worker_concurrency,
    }))
}

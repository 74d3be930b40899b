//! Builds the full collaborator graph and runs the HTTP server (§4, §5, §6).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use wecom_mediator_agent::{AgentClient, AgentGateway, FallbackProvider};
use wecom_mediator_core::{MediatorConfig, RuntimeConfig, TracingAlertSink, TracingMonitoringSink, config_key};
use wecom_mediator_http::{AppState, HttpOutboundSender, KvBrandConfigProvider, create_router, worker};
use wecom_mediator_service::{BurstAggregator, DedupStore, DeliveryPacer, FilterConfig, HistoryStore, Pipeline};
use wecom_mediator_storage::{JobQueue, KvStore, StorageBackend};

use crate::storage::create_storage;

/// Builds every collaborator, spawns the background tasks, and serves
/// the HTTP surface until the process is terminated.
pub async fn run(config: MediatorConfig, host: String, port: u16) -> Result<()> {
    let backend: Arc<StorageBackend> = Arc::new(create_storage(&config.storage_url).await?);
    let kv: Arc<dyn KvStore> = backend.clone();
    let queue: Arc<dyn JobQueue> = backend.clone();

    let (runtime_config_tx, runtime_config_rx) = watch::channel(RuntimeConfig::default());

    let monitoring = Arc::new(TracingMonitoringSink);
    let alerts = Arc::new(TracingAlertSink);

    let history = Arc::new(HistoryStore::new(kv.clone(), config.history_ttl_secs));
    let dedup = Arc::new(DedupStore::new(kv.clone(), config.dedup_window_secs));
    let filter = Arc::new(FilterConfig::new(
        kv.clone(),
        config_key("paused_users"),
        config_key("group_blacklist"),
        std::env::var("WECOM_MEDIATOR_BLOCKED_ENTERPRISE_GROUP_ID").ok(),
        Duration::from_secs(30),
    ));

    let agent_client = AgentClient::new(config.agent_api_key.clone(), config.agent_base_url.clone());
    let fallback = FallbackProvider::new(std::env::var("WECOM_MEDIATOR_FALLBACK_REPLY").ok());
    let brand_config = Arc::new(KvBrandConfigProvider::new(kv.clone()));
    let agent = Arc::new(AgentGateway::new(agent_client, fallback.clone(), monitoring.clone(), brand_config));

    let sender = Arc::new(HttpOutboundSender::new(config.send_endpoint_base.clone()));
    let pacer = Arc::new(DeliveryPacer::new(sender, monitoring.clone(), runtime_config_rx.clone()));

    let pipeline = Arc::new(Pipeline::new(
        history.clone(),
        dedup.clone(),
        agent,
        pacer,
        fallback,
        monitoring.clone(),
        alerts.clone(),
    ));

    let aggregator =
        Arc::new(BurstAggregator::new(kv.clone(), queue, runtime_config_rx, pipeline, config.pending_ttl_secs));

    let state = Arc::new(AppState {
        storage: backend,
        filter,
        dedup,
        history,
        aggregator,
        monitoring,
        alerts,
        runtime_config_tx,
    });

    tokio::spawn(worker::worker_loop(state.clone()));
    tokio::spawn(worker::sweep_loop(state.clone(), config.sweep_interval_secs));
    tokio::spawn(worker::config_reload_loop(state.clone(), config.sweep_interval_secs));

    let router = create_router(state);
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "wecom-mediator listening");
    axum::serve(listener, router).await.context("serving http")?;

    Ok(())
}

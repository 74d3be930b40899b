//! Background tasks: job-queue worker loop, crash-recovery sweep, and
//! config hot-reload (§4.B, §4.F, §5, §6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use wecom_mediator_core::RuntimeConfig;
use wecom_mediator_storage::{JobQueue, KvError, KvStore};

use crate::AppState;

const QUEUE_NAME: &str = "process";
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(200);
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Polls the job queue and runs ready jobs through the burst aggregator,
/// bounded by a semaphore whose permit count tracks `worker_concurrency`
/// and is rebuilt whenever a config reload changes it (§4.B, §5).
pub async fn worker_loop(state: Arc<AppState>) {
    let runtime_config = state.runtime_config_tx.subscribe();
    let mut capacity = runtime_config.borrow().worker_concurrency;
    let mut semaphore = Arc::new(Semaphore::new(capacity.max(1)));

    loop {
        let desired = runtime_config.borrow().worker_concurrency;
        if desired != capacity {
            capacity = desired;
            semaphore = Arc::new(Semaphore::new(capacity.max(1)));
        }

        let jobs = match state.storage.claim_ready(QUEUE_NAME, capacity.max(1)).await {
            Ok(jobs) => jobs,
            Err(source) => {
                tracing::warn!(%source, "claim_ready failed");
                tokio::time::sleep(ERROR_BACKOFF).await;
                continue;
            },
        };

        if jobs.is_empty() {
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            continue;
        }

        for job in jobs {
            let state = state.clone();
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else { return };
                let chat_id =
                    job.payload.get("chat_id").and_then(serde_json::Value::as_str).unwrap_or_default().to_owned();

                match state.aggregator.process(&chat_id).await {
                    Ok(()) => {
                        if let Err(source) = state.storage.complete(&job.job_id).await {
                            tracing::warn!(%source, job_id = %job.job_id, "failed to mark job complete");
                        }
                    },
                    Err(source) => {
                        let reason = source.to_string();
                        tracing::warn!(reason = %reason, job_id = %job.job_id, "job processing failed");
                        if let Err(source) = state.storage.fail(&job.job_id, &reason).await {
                            tracing::warn!(%source, job_id = %job.job_id, "failed to mark job failed");
                        }
                    },
                }
            });
        }
    }
}

/// Periodically runs the burst aggregator's crash-recovery sweep (§4.F).
pub async fn sweep_loop(state: Arc<AppState>, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        ticker.tick().await;
        if let Err(source) = state.aggregator.sweep().await {
            tracing::warn!(%source, "pending-buffer sweep failed");
        }
    }
}

/// The [`RuntimeConfig`] field names an operator may override via a
/// `wecom:config:<name>` string key (§5, §6).
const RUNTIME_CONFIG_FIELDS: [&str; 9] = [
    "merge_window_ms",
    "max_merged_messages",
    "typing_delay_per_char_ms",
    "paragraph_gap_ms",
    "typing_speed_chars_per_sec",
    "typing_min_delay_ms",
    "typing_max_delay_ms",
    "typing_random_variation",
    "worker_concurrency",
];

/// Periodically rereads the known `wecom:config:<field>` string keys and
/// republishes [`RuntimeConfig`] over the hot-reload watch channel (§5, §6).
///
/// Reads each field by its known key rather than scanning the
/// `CONFIG_KEY_PREFIX` namespace: [`KvStore::scan`] only enumerates list
/// keys (it backs the pending-buffer and history sweeps), so it cannot
/// discover scalar config overrides written as plain strings.
pub async fn config_reload_loop(state: Arc<AppState>, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        ticker.tick().await;
        match read_runtime_config(state.storage.as_ref()).await {
            Ok(config) => {
                let _ = state.runtime_config_tx.send_if_modified(|current| {
                    if *current == config {
                        false
                    } else {
                        *current = config.clone();
                        true
                    }
                });
            },
            Err(source) => tracing::warn!(%source, "config reload failed"),
        }
    }
}

async fn read_runtime_config(kv: &dyn KvStore) -> Result<RuntimeConfig, KvError> {
    let mut map = HashMap::new();
    for field in RUNTIME_CONFIG_FIELDS {
        if let Some(value) = kv.get(&wecom_mediator_core::config_key(field)).await? {
            map.insert(field.to_owned(), value);
        }
    }
    Ok(RuntimeConfig::from_kv_map(&map))
}

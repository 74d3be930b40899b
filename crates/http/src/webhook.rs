//! Webhook ingress (§4.I steps 1-7): normalize, filter, dedup precheck,
//! history append, monitoring, handoff to the burst aggregator.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde_json::Value;
use wecom_mediator_core::wire::normalize;
use wecom_mediator_core::{HistoryEntry, HistoryMeta, MessagePayload, MonitoringEvent, Role};
use wecom_mediator_service::{FilterOutcome, extract_content};

use crate::AppState;

/// Scenario name recorded on [`MonitoringEvent::Received`]. Mirrors the
/// literal the pipeline uses when invoking the Agent for the same message.
const SCENARIO: &str = "CANDIDATE_CONSULTATION";

/// Axum handler for both the enterprise and group webhook shapes.
///
/// Always responds `200 OK` with `{success: true, message}` — webhook
/// handlers never propagate exceptions to the caller (§7); a failure is
/// folded into `message` rather than flipping `success` to `false`.
pub async fn webhook(State(state): State<Arc<AppState>>, Json(raw): Json<Value>) -> Json<Value> {
    let message = match handle(&state, &raw).await {
        Ok(message) => message,
        Err(message) => {
            tracing::warn!(%message, "webhook handling failed");
            message
        },
    };
    Json(serde_json::json!({ "success": true, "message": message }))
}

async fn handle(state: &AppState, raw: &Value) -> Result<String, String> {
    let normalized = normalize(raw).map_err(|source| source.to_string())?;
    let record = normalized.record;

    if record.is_self {
        let content = extract_content(&record.payload).unwrap_or_default();
        let entry = HistoryEntry::new(Role::Assistant, content, history_meta(&normalized.org_id, &record));
        state.history.append(&record.chat_id, &entry).await.map_err(|source| source.to_string())?;
        return Ok("self-sent message recorded to history".to_owned());
    }

    match state.filter.classify(&record).await.map_err(|source| source.to_string())? {
        FilterOutcome::Reject(reason) => Ok(format!("message rejected: {reason}")),
        FilterOutcome::RecordOnly => {
            let content = extract_content(&record.payload).unwrap_or_default();
            let entry = HistoryEntry::new(Role::User, content, history_meta(&normalized.org_id, &record));
            state.history.append(&record.chat_id, &entry).await.map_err(|source| source.to_string())?;
            Ok("message recorded to history only".to_owned())
        },
        FilterOutcome::Pass { content } => {
            if state.dedup.is_processed(&record.message_id).await.map_err(|source| source.to_string())? {
                return Ok("duplicate message ignored".to_owned());
            }

            let entry = HistoryEntry::new(Role::User, content.clone(), history_meta(&normalized.org_id, &record));
            state.history.append(&record.chat_id, &entry).await.map_err(|source| source.to_string())?;

            state
                .monitoring
                .record(MonitoringEvent::Received {
                    message_id: record.message_id.clone(),
                    chat_id: record.chat_id.clone(),
                    contact_id: record.contact_id.clone(),
                    contact_name: record.contact_name.clone(),
                    content,
                    scenario: SCENARIO.to_owned(),
                })
                .await;

            state.aggregator.add(&record).await.map_err(|source| source.to_string())?;
            Ok("message queued".to_owned())
        },
    }
}

fn history_meta(org_id: &str, record: &wecom_mediator_core::InboundRecord) -> HistoryMeta {
    HistoryMeta {
        message_id: Some(record.message_id.clone()),
        candidate_name: record.contact_name.clone(),
        org_id: Some(org_id.to_owned()),
        bot_id: Some(record.bot_id.clone()),
        message_type: Some(record.payload.message_type_code()),
        source: Some(record.source.as_str().to_owned()),
        is_room: record.is_room(),
        payload: match &record.payload {
            MessagePayload::Other { raw, .. } => Some(raw.clone()),
            _ => None,
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::handle;
    use crate::AppState;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;
    use wecom_mediator_core::{Alert, AlertSink, MonitoringEvent, MonitoringSink, RuntimeConfig};
    use wecom_mediator_service::{BatchProcessor, BurstAggregator, DedupStore, FilterConfig, HistoryStore};
    use wecom_mediator_storage::{KvStore, SqliteStore, StorageBackend};

    struct NoopProcessor;

    #[async_trait::async_trait]
    impl BatchProcessor for NoopProcessor {
        async fn process_batch(
            &self,
            _chat_id: &str,
            _messages: Vec<wecom_mediator_core::InboundRecord>,
        ) -> Result<(), wecom_mediator_service::PipelineError> {
            Ok(())
        }
    }

    struct NullSink;

    #[async_trait::async_trait]
    impl MonitoringSink for NullSink {
        async fn record(&self, _event: MonitoringEvent) {}
    }

    #[async_trait::async_trait]
    impl AlertSink for NullSink {
        async fn raise(&self, _alert: Alert) {}
    }

    async fn state() -> AppState {
        let backend = Arc::new(StorageBackend::Sqlite(SqliteStore::open_in_memory().unwrap()));
        let kv: Arc<dyn KvStore> = backend.clone();
        let (_tx, rx) = watch::channel(RuntimeConfig::default());
        let filter = Arc::new(FilterConfig::new(
            kv.clone(),
            wecom_mediator_core::config_key("paused_users"),
            wecom_mediator_core::config_key("group_blacklist"),
            None,
            Duration::from_secs(5),
        ));
        let dedup = Arc::new(DedupStore::new(kv.clone(), 300));
        let history = Arc::new(HistoryStore::new(kv.clone(), 7200));
        let aggregator =
            Arc::new(BurstAggregator::new(kv.clone(), backend.clone(), rx.clone(), Arc::new(NoopProcessor), 300));
        let (runtime_config_tx, _) = watch::channel(RuntimeConfig::default());

        AppState {
            storage: backend,
            filter,
            dedup,
            history,
            aggregator,
            monitoring: Arc::new(NullSink),
            alerts: Arc::new(NullSink),
            runtime_config_tx,
        }
    }

    #[tokio::test]
    async fn enterprise_text_message_is_queued() {
        let state = state().await;
        let raw = serde_json::json!({
            "orgId": "org1",
            "token": "tok",
            "messageType": 7,
            "timestamp": "1700000000000",
            "imBotId": "b1",
            "imContactId": "u1",
            "source": "MOBILE_PUSH",
            "contactType": "PERSONAL_WECHAT",
            "messageId": "m1",
            "payload": {"content": "想咨询岗位"},
        });
        let message = handle(&state, &raw).await.unwrap();
        assert_eq!(message, "message queued");
    }

    #[tokio::test]
    async fn self_sent_message_is_recorded_not_queued() {
        let state = state().await;
        let raw = serde_json::json!({
            "orgId": "org1",
            "token": "tok",
            "messageType": 7,
            "timestamp": "1700000000000",
            "imBotId": "b1",
            "imContactId": "u1",
            "source": "SELF_SENT",
            "isSelf": true,
            "contactType": "PERSONAL_WECHAT",
            "messageId": "m2",
            "payload": {"content": "已处理"},
        });
        let message = handle(&state, &raw).await.unwrap();
        assert_eq!(message, "self-sent message recorded to history");
    }

    #[tokio::test]
    async fn unrecognized_shape_is_reported_in_message_not_panic() {
        let state = state().await;
        let raw = serde_json::json!({"foo": "bar"});
        assert!(handle(&state, &raw).await.is_err());
    }

    #[tokio::test]
    async fn webhook_handler_always_reports_success_true() {
        let state = Arc::new(state().await);
        let raw = serde_json::json!({"foo": "bar"});
        let response = super::webhook(axum::extract::State(state), axum::Json(raw)).await;
        assert_eq!(response.0["success"], serde_json::json!(true));
    }
}

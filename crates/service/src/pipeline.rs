//! Worker pipeline (§4.I): turns a drained batch of messages into one
//! Agent invocation and one paced delivery.

use std::sync::Arc;

use async_trait::async_trait;
use wecom_mediator_agent::{AgentGateway, FallbackProvider, InvokeRequest, SimpleMessage};
use wecom_mediator_core::{AlertKind, AlertLevel, Alert, AlertSink, InboundRecord, MonitoringEvent, MonitoringSink, SuccessMetadata};

use crate::aggregator::BatchProcessor;
use crate::dedup::DedupStore;
use crate::error::PipelineError;
use crate::filter::extract_content;
use crate::history::HistoryStore;
use crate::pacer::{DeliveryContext, DeliveryPacer};

const SCENARIO: &str = "CANDIDATE_CONSULTATION";

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn delivery_context(record: &InboundRecord) -> DeliveryContext {
    DeliveryContext {
        api_variant: record.api_variant,
        bot_id: record.bot_id.clone(),
        contact_id: record.contact_id.clone(),
        room_id: record.room_id.clone(),
        token: record.token.clone(),
        message_id: record.message_id.clone(),
    }
}

/// Orchestrates a coalesced batch through history, the Agent, and delivery
/// (§4.I worker steps 3-9). Implements [`BatchProcessor`] so a
/// [`crate::aggregator::BurstAggregator`] can hand it drained batches.
pub struct Pipeline {
    history: Arc<HistoryStore>,
    dedup: Arc<DedupStore>,
    agent: Arc<AgentGateway>,
    pacer: Arc<DeliveryPacer>,
    fallback: FallbackProvider,
    monitoring: Arc<dyn MonitoringSink>,
    alerts: Arc<dyn AlertSink>,
}

impl Pipeline {
    /// Builds a pipeline over the given collaborators.
    #[must_use]
    pub fn new(
        history: Arc<HistoryStore>,
        dedup: Arc<DedupStore>,
        agent: Arc<AgentGateway>,
        pacer: Arc<DeliveryPacer>,
        fallback: FallbackProvider,
        monitoring: Arc<dyn MonitoringSink>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self { history, dedup, agent, pacer, fallback, monitoring, alerts }
    }

    /// Happy-path body: history, Agent invocation, delivery, success events.
    /// Returns `Err` as soon as the Agent call fails or delivery totally
    /// fails, leaving the single fallback attempt to [`Self::handle_failure`].
    async fn run_batch(&self, chat_id: &str, last: &InboundRecord, messages: &[InboundRecord]) -> Result<(), PipelineError> {
        let history = self.history.get_for_context(chat_id, Some(&last.message_id)).await?;
        let user_message = extract_content(&last.payload).unwrap_or_default();

        let invoke_request = InvokeRequest {
            conversation_id: chat_id.to_owned(),
            user_message,
            history: history.into_iter().map(|(role, content)| SimpleMessage { role, content }).collect(),
            scenario: SCENARIO.to_owned(),
            message_id: last.message_id.clone(),
            base_context: serde_json::json!({ "candidate_name": last.contact_name }),
        };

        let reply = self.agent.invoke(&invoke_request).await?;

        if reply.is_fallback {
            self.alerts
                .raise(Alert {
                    kind: AlertKind::Agent,
                    level: AlertLevel::Error,
                    title: "🆘 小蛋糕出错了，需人工介入".to_owned(),
                    detail: format!("chat {chat_id}: agent responded in fallback mode"),
                })
                .await;
        }

        let ctx = delivery_context(last);
        let delivery = self.pacer.deliver(&reply.reply_text, &ctx).await;

        if delivery.segment_count > 0 && delivery.failed_segments == delivery.segment_count {
            return Err(PipelineError::DeliveryTotal(format!("chat {chat_id}: all segments failed")));
        }
        if !delivery.success {
            self.alerts
                .raise(Alert {
                    kind: AlertKind::Delivery,
                    level: AlertLevel::Warning,
                    title: "部分消息投递失败".to_owned(),
                    detail: format!(
                        "chat {chat_id}: {}/{} segments failed",
                        delivery.failed_segments, delivery.segment_count
                    ),
                })
                .await;
        }

        let last_index = messages.len().saturating_sub(1);
        for (index, message) in messages.iter().enumerate() {
            self.dedup.mark_processed(&message.message_id).await?;
            let metadata = SuccessMetadata {
                reply_preview: truncate(&reply.reply_text, 120),
                tools_used: reply.tools_used.clone(),
                usage: reply.usage.clone(),
                segment_count: delivery.segment_count,
                is_fallback: reply.is_fallback,
                is_primary: index == last_index,
                raw: Some(reply.raw.clone()),
                ..Default::default()
            };
            self.monitoring.record(MonitoringEvent::Success { message_id: message.message_id.clone(), metadata }).await;
        }

        Ok(())
    }

    /// Generic failure path (§4.I step 8): classify, emit `failure` for
    /// every batch member, raise the matching alert, then attempt one
    /// fallback delivery; a second failure there escalates to Critical
    /// (§4.I: "the user received nothing").
    async fn handle_failure(
        &self,
        chat_id: &str,
        last: &InboundRecord,
        messages: &[InboundRecord],
        error: PipelineError,
    ) -> Result<(), PipelineError> {
        let (alert_kind, alert_level) = error.classify();
        let reason = error.to_string();

        for message in messages {
            self.monitoring
                .record(MonitoringEvent::Failure { message_id: message.message_id.clone(), reason: reason.clone(), alert_kind })
                .await;
        }

        let diagnostics_suffix = match &error {
            PipelineError::Agent(source) => source.diagnostics().map(|diagnostics| {
                format!(
                    " | request diagnostics: api_key={}, headers={:?}, body={}",
                    diagnostics.masked_api_key, diagnostics.headers, diagnostics.body
                )
            }),
            _ => None,
        }
        .unwrap_or_default();

        self.alerts
            .raise(Alert {
                kind: alert_kind,
                level: alert_level,
                title: "小蛋糕处理消息失败".to_owned(),
                detail: format!("chat {chat_id}: {reason}{diagnostics_suffix}"),
            })
            .await;

        let fallback_text = self.fallback.pick();
        let ctx = delivery_context(last);
        let fallback_delivery = self.pacer.deliver(&fallback_text, &ctx).await;

        if !fallback_delivery.success {
            self.alerts
                .raise(Alert {
                    kind: AlertKind::Delivery,
                    level: AlertLevel::Critical,
                    title: "🆘 用户未收到任何回复，需人工介入".to_owned(),
                    detail: format!("chat {chat_id}: fallback delivery also failed after: {reason}"),
                })
                .await;
        }

        Err(error)
    }
}

#[async_trait]
impl BatchProcessor for Pipeline {
    async fn process_batch(&self, chat_id: &str, messages: Vec<InboundRecord>) -> Result<(), PipelineError> {
        let Some(last) = messages.last().cloned() else { return Ok(()) };
        match self.run_batch(chat_id, &last, &messages).await {
            Ok(()) => Ok(()),
            Err(error) => self.handle_failure(chat_id, &last, &messages, error).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Pipeline;
    use crate::aggregator::BatchProcessor;
    use crate::dedup::DedupStore;
    use crate::history::HistoryStore;
    use crate::pacer::{DeliveryContext, DeliveryPacer, OutboundSender};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::watch;
    use wecom_mediator_agent::{AgentClient, AgentGateway, BrandConfigProvider, FallbackProvider};
    use wecom_mediator_core::{
        Alert, AlertSink, ApiVariant, ContactType, InboundRecord, MessagePayload, MonitoringEvent, MonitoringSink,
        RuntimeConfig, Source, TracingMonitoringSink,
    };
    use wecom_mediator_storage::{SqliteStore, StorageBackend};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct AlwaysFailSender;

    #[async_trait]
    impl OutboundSender for AlwaysFailSender {
        async fn send(&self, _ctx: &DeliveryContext, _text: &str) -> Result<(), String> {
            Err("send refused".to_owned())
        }
    }

    struct AlwaysOkSender {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl OutboundSender for AlwaysOkSender {
        async fn send(&self, _ctx: &DeliveryContext, _text: &str) -> Result<(), String> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct EmptyBrandConfig;

    #[async_trait]
    impl BrandConfigProvider for EmptyBrandConfig {
        async fn fetch(&self) -> Result<serde_json::Value, wecom_mediator_agent::AgentError> {
            Ok(serde_json::json!({}))
        }
    }

    struct RecordingAlertSink {
        raised: std::sync::Mutex<Vec<Alert>>,
    }

    #[async_trait]
    impl AlertSink for RecordingAlertSink {
        async fn raise(&self, alert: Alert) {
            self.raised.lock().unwrap().push(alert);
        }
    }

    fn record(chat_id: &str, message_id: &str, text: &str) -> InboundRecord {
        InboundRecord {
            message_id: message_id.to_owned(),
            chat_id: chat_id.to_owned(),
            contact_id: "u1".to_owned(),
            bot_id: "b1".to_owned(),
            token: "tok".to_owned(),
            room_id: None,
            contact_name: Some("李雷".to_owned()),
            is_self: false,
            source: Source::MobilePush,
            contact_type: ContactType::PersonalWechat,
            timestamp: 0,
            payload: MessagePayload::Text { text: text.to_owned() },
            api_variant: ApiVariant::Enterprise,
        }
    }

    fn stores() -> (Arc<HistoryStore>, Arc<DedupStore>) {
        let backend: Arc<dyn wecom_mediator_storage::KvStore> =
            Arc::new(StorageBackend::Sqlite(SqliteStore::open_in_memory().unwrap()));
        (Arc::new(HistoryStore::new(backend.clone(), 7200)), Arc::new(DedupStore::new(backend, 300)))
    }

    async fn gateway(server_uri: &str) -> Arc<AgentGateway> {
        let client = AgentClient::new("test-key".to_owned(), server_uri.to_owned());
        Arc::new(AgentGateway::new(
            client,
            FallbackProvider::new(None),
            Arc::new(TracingMonitoringSink),
            Arc::new(EmptyBrandConfig),
        ))
    }

    fn pacer(sender: Arc<dyn OutboundSender>) -> Arc<DeliveryPacer> {
        let (_tx, rx) = watch::channel(RuntimeConfig::default());
        Arc::new(DeliveryPacer::new(sender, Arc::new(TracingMonitoringSink), rx))
    }

    #[tokio::test]
    async fn successful_batch_marks_every_message_processed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": {
                    "messages": [
                        {"role": "user", "parts": [{"type": "text", "text": "你好"}]},
                        {"role": "assistant", "parts": [{"type": "text", "text": "岗位还在招聘哦"}]}
                    ],
                    "usage": null,
                    "tools": {"used": [], "skipped": []}
                }
            })))
            .mount(&server)
            .await;

        let (history, dedup) = stores();
        let sender = Arc::new(AlwaysOkSender { sent: AtomicUsize::new(0) });
        let pipeline = Pipeline::new(
            history,
            dedup.clone(),
            gateway(&server.uri()).await,
            pacer(sender.clone()),
            FallbackProvider::new(None),
            Arc::new(TracingMonitoringSink),
            Arc::new(RecordingAlertSink { raised: std::sync::Mutex::new(Vec::new()) }),
        );

        let messages = vec![record("c1", "m1", "你好")];
        pipeline.process_batch("c1", messages).await.unwrap();

        assert!(dedup.is_processed("m1").await.unwrap());
        assert!(sender.sent.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn total_delivery_failure_falls_back_and_raises_critical_when_fallback_also_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": {
                    "messages": [
                        {"role": "assistant", "parts": [{"type": "text", "text": "岗位详情在这里"}]}
                    ],
                    "usage": null,
                    "tools": {"used": [], "skipped": []}
                }
            })))
            .mount(&server)
            .await;

        let (history, dedup) = stores();
        let alerts = Arc::new(RecordingAlertSink { raised: std::sync::Mutex::new(Vec::new()) });
        let pipeline = Pipeline::new(
            history,
            dedup.clone(),
            gateway(&server.uri()).await,
            pacer(Arc::new(AlwaysFailSender)),
            FallbackProvider::new(Some("稍等，我确认一下~".to_owned())),
            Arc::new(TracingMonitoringSink),
            alerts.clone(),
        );

        let messages = vec![record("c1", "m1", "岗位详情")];
        let result = pipeline.process_batch("c1", messages).await;

        assert!(result.is_err());
        assert!(!dedup.is_processed("m1").await.unwrap());
        let raised = alerts.raised.lock().unwrap();
        assert!(raised.iter().any(|a| a.level == wecom_mediator_core::AlertLevel::Critical));
    }

    #[tokio::test]
    async fn agent_error_before_any_delivery_still_attempts_fallback_send() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let (history, dedup) = stores();
        let sender = Arc::new(AlwaysOkSender { sent: AtomicUsize::new(0) });
        let alerts = Arc::new(RecordingAlertSink { raised: std::sync::Mutex::new(Vec::new()) });
        let pipeline = Pipeline::new(
            history,
            dedup.clone(),
            gateway(&server.uri()).await,
            pacer(sender.clone()),
            FallbackProvider::new(None),
            Arc::new(TracingMonitoringSink),
            alerts.clone(),
        );

        let messages = vec![record("c1", "m1", "岗位详情")];
        let result = pipeline.process_batch("c1", messages).await;

        assert!(result.is_err());
        assert!(sender.sent.load(Ordering::SeqCst) > 0);
        assert!(!dedup.is_processed("m1").await.unwrap());
        let raised = alerts.raised.lock().unwrap();
        assert!(raised.iter().any(|a| a.kind == wecom_mediator_core::AlertKind::Agent));
    }
}

//! Agent gateway: profile lookup, context assembly, invocation, reply
//! extraction (§4.G).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{Datelike, FixedOffset, Timelike, Utc};
use tokio::sync::RwLock;
use tracing::{error, warn};
use wecom_mediator_core::{MonitoringEvent, MonitoringSink};

use crate::client::AgentClient;
use crate::error::AgentError;
use crate::fallback::FallbackProvider;
use crate::profile::Scenario;
use crate::types::{AgentReply, AgentRequest, InvokeRequest};

/// Fixed UTC+8 offset standing in for Asia/Shanghai (§4.G step 3).
///
/// Avoids pulling in `chrono-tz` for a single always-UTC+8 timezone; China
/// does not observe daylight saving time, so the offset never changes.
fn china_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("8h is a valid UTC offset")
}

const CHINESE_WEEKDAYS: [&str; 7] =
    ["星期一", "星期二", "星期三", "星期四", "星期五", "星期六", "星期日"];

/// Formats the current time as `YYYY-MM-DD HH:MM 星期X` in China time.
fn current_time_string() -> String {
    let now = Utc::now().with_timezone(&china_offset());
    let weekday = CHINESE_WEEKDAYS[now.weekday().num_days_from_monday() as usize];
    format!("{:04}-{:02}-{:02} {:02}:{:02} {}", now.year(), now.month(), now.day(), now.hour(), now.minute(), weekday)
}

/// Substitutes `{{CURRENT_TIME}}` in a system prompt template.
fn substitute_current_time(template: &str) -> String {
    template.replace("{{CURRENT_TIME}}", &current_time_string())
}

/// Supplies brand-level configuration (`config_data`, `reply_prompts`) to
/// merge into every Agent request's context (§4.G step 2).
///
/// Implemented outside this crate (backed by the KV store); the gateway
/// only needs the fetch contract and keeps its own last-known-good cache
/// for when the backing store is briefly unreachable.
#[async_trait]
pub trait BrandConfigProvider: Send + Sync {
    /// Fetches the current brand config blob. Expected to contain
    /// `system_prompt`, `config_data`, `reply_prompts` keys (shape is
    /// opaque to the gateway beyond that).
    async fn fetch(&self) -> Result<serde_json::Value, AgentError>;
}

/// Wraps the Agent HTTP client with profile validation, context assembly,
/// monitoring, and reply extraction/normalization (§4.G).
pub struct AgentGateway {
    client: AgentClient,
    fallback: FallbackProvider,
    monitoring: Arc<dyn MonitoringSink>,
    brand_config: Arc<dyn BrandConfigProvider>,
    last_known_good: RwLock<Option<serde_json::Value>>,
}

impl AgentGateway {
    /// Builds a new gateway.
    #[must_use]
    pub fn new(
        client: AgentClient,
        fallback: FallbackProvider,
        monitoring: Arc<dyn MonitoringSink>,
        brand_config: Arc<dyn BrandConfigProvider>,
    ) -> Self {
        Self { client, fallback, monitoring, brand_config, last_known_good: RwLock::new(None) }
    }

    /// Runs the full Agent invocation (§4.G steps 1-10).
    pub async fn invoke(&self, request: &InvokeRequest) -> Result<AgentReply, AgentError> {
        let scenario = Scenario::parse(&request.scenario)?;
        scenario.validate_context(&request.base_context)?;

        let (merged_context, system_prompt, synced) = self.assemble_context(request).await;
        if !synced {
            warn!(message_id = %request.message_id, "brand config cache unsynced, using fallback/empty config");
        }

        self.monitoring.record(MonitoringEvent::AiStart { message_id: request.message_id.clone() }).await;
        let started = Instant::now();
        let result = self.call_and_extract(request, merged_context, system_prompt).await;
        self.monitoring.record(MonitoringEvent::AiEnd { message_id: request.message_id.clone() }).await;

        result.map(|mut reply| {
            reply.processing_time_ms = started.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
            reply
        })
    }

    /// Builds the merged context and substituted system prompt (§4.G step 2-3).
    async fn assemble_context(&self, request: &InvokeRequest) -> (serde_json::Value, Option<String>, bool) {
        let (config_value, synced) = match self.brand_config.fetch().await {
            Ok(config) => {
                *self.last_known_good.write().await = Some(config.clone());
                (config, true)
            },
            Err(source) => {
                warn!(%source, "brand config fetch failed, falling back to last known good");
                match self.last_known_good.read().await.clone() {
                    Some(config) => (config, true),
                    None => (serde_json::json!({}), false),
                }
            },
        };

        let mut merged = request.base_context.clone();
        let system_prompt_template =
            config_value.get("system_prompt").and_then(serde_json::Value::as_str).map(str::to_owned);

        if let (Some(merged_obj), Some(config_obj)) = (merged.as_object_mut(), config_value.as_object()) {
            for (key, value) in config_obj {
                if key != "system_prompt" {
                    merged_obj.insert(key.clone(), value.clone());
                }
            }
        }

        let system_prompt = system_prompt_template.map(|template| substitute_current_time(&template));
        (merged, system_prompt, synced)
    }

    /// POSTs the request and extracts/normalizes the reply (§4.G steps 5, 7-10).
    async fn call_and_extract(
        &self,
        request: &InvokeRequest,
        context: serde_json::Value,
        system_prompt: Option<String>,
    ) -> Result<AgentReply, AgentError> {
        let agent_request = AgentRequest {
            conversation_id: request.conversation_id.clone(),
            user_message: request.user_message.clone(),
            messages: request.history.clone(),
            model: None,
            system_prompt,
            prompt_type: request.scenario.clone(),
            allowed_tools: None,
            context,
            tool_context: None,
            context_strategy: None,
            prune: None,
            prune_options: None,
        };

        let api_response = match self.client.invoke(&agent_request).await {
            Ok(response) => response,
            Err(source) => {
                error!(message_id = %request.message_id, %source, "agent invocation failed");
                return Err(source);
            },
        };

        if !api_response.success {
            let message = api_response.error.unwrap_or_else(|| "agent reported failure".to_owned());
            return Err(AgentError::InvocationError {
                code: "other".to_owned(),
                message,
                retryable: false,
                diagnostics: self.client.request_diagnostics(&agent_request),
            });
        }

        let data = api_response.data.ok_or(AgentError::EmptyReply)?;
        let raw = serde_json::to_value(&data).unwrap_or(serde_json::Value::Null);
        let is_fallback = data.fallback_info.is_some();
        if let Some(info) = &data.fallback_info {
            warn!(message_id = %request.message_id, reason = %info.reason, "agent responded in fallback mode");
        }

        let extracted = extract_reply_text(&data.messages);
        let reply_text = match (extracted, is_fallback) {
            (Some(text), _) => crate::normalize::normalize_reply(&text),
            (None, true) => self.fallback.pick(),
            (None, false) => return Err(AgentError::EmptyReply),
        };

        Ok(AgentReply {
            reply_text,
            usage: data.usage,
            tools_used: data.tools.used,
            is_fallback,
            processing_time_ms: 0,
            raw,
        })
    }
}

/// Extracts the last assistant message's text parts, joined by a blank
/// line (§4.G step 9). Returns `None` if there is no assistant message or
/// its text is empty after trimming.
fn extract_reply_text(messages: &[crate::types::ResponseMessage]) -> Option<String> {
    let last_assistant = messages.iter().rev().find(|m| m.role == "assistant")?;
    let text = last_assistant
        .parts
        .iter()
        .filter(|part| part.part_type == "text")
        .filter_map(|part| part.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n\n");
    let trimmed = text.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_owned()) }
}

#[cfg(test)]
mod tests {
    use super::{extract_reply_text, substitute_current_time};
    use crate::types::{MessagePart, ResponseMessage};

    fn text_part(text: &str) -> MessagePart {
        MessagePart {
            part_type: "text".to_owned(),
            text: Some(text.to_owned()),
            tool_name: None,
            state: None,
            input: None,
            output: None,
        }
    }

    #[test]
    fn substitutes_current_time_placeholder() {
        let rendered = substitute_current_time("now: {{CURRENT_TIME}}");
        assert!(rendered.starts_with("now: "));
        assert!(!rendered.contains("{{CURRENT_TIME}}"));
        assert!(rendered.contains("星期"));
    }

    #[test]
    fn extracts_last_assistant_message_joined_by_blank_line() {
        let messages = vec![
            ResponseMessage { role: "user".to_owned(), parts: vec![text_part("hi")] },
            ResponseMessage {
                role: "assistant".to_owned(),
                parts: vec![text_part("first part"), text_part("second part")],
            },
        ];
        assert_eq!(extract_reply_text(&messages).unwrap(), "first part\n\nsecond part");
    }

    #[test]
    fn returns_none_when_no_assistant_message() {
        let messages = vec![ResponseMessage { role: "user".to_owned(), parts: vec![text_part("hi")] }];
        assert!(extract_reply_text(&messages).is_none());
    }

    #[test]
    fn returns_none_when_assistant_text_is_empty() {
        let messages =
            vec![ResponseMessage { role: "assistant".to_owned(), parts: vec![text_part("   ")] }];
        assert!(extract_reply_text(&messages).is_none());
    }
}

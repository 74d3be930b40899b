//! Agent HTTP API request/response shapes (§6).

use serde::{Deserialize, Serialize};
use wecom_mediator_core::TokenUsage;

/// A single prior turn, as sent to the Agent in `messages` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleMessage {
    /// `"user"` or `"assistant"`.
    pub role: String,
    /// Turn text.
    pub content: String,
}

/// Request body sent to the Agent HTTP API (§6).
#[derive(Debug, Clone, Serialize)]
#[non_exhaustive]
pub struct AgentRequest {
    /// Conversation id (the `chat_id`).
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    /// The current turn's text, passed separately from `messages` (§4.G, §4.D).
    #[serde(rename = "userMessage")]
    pub user_message: String,
    /// Prior turns, oldest first.
    pub messages: Vec<SimpleMessage>,
    /// Model override, if the profile specifies one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// System prompt with `{{CURRENT_TIME}}` already substituted (§4.G step 3).
    #[serde(rename = "systemPrompt", skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Scenario / profile selector (§4.G step 1).
    #[serde(rename = "promptType")]
    pub prompt_type: String,
    /// Tool allowlist, if the profile restricts tools.
    #[serde(rename = "allowedTools", skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    /// Merged context (§4.G step 2), internal flags already stripped.
    pub context: serde_json::Value,
    /// Tool-specific context, if any.
    #[serde(rename = "toolContext", skip_serializing_if = "Option::is_none")]
    pub tool_context: Option<serde_json::Value>,
    /// Context pruning strategy name, if configured.
    #[serde(rename = "contextStrategy", skip_serializing_if = "Option::is_none")]
    pub context_strategy: Option<String>,
    /// Whether the Agent should prune context before replying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prune: Option<bool>,
    /// Pruning options, if `prune` is set.
    #[serde(rename = "pruneOptions", skip_serializing_if = "Option::is_none")]
    pub prune_options: Option<serde_json::Value>,
}

/// One part of an Agent message (§6 `ChatResponse.messages[].parts`).
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct MessagePart {
    /// Part discriminant, e.g. `"text"` or `"tool"`.
    #[serde(rename = "type")]
    pub part_type: String,
    /// Present for `type = "text"`.
    pub text: Option<String>,
    /// Present for `type = "tool"`.
    #[serde(rename = "toolName")]
    pub tool_name: Option<String>,
    /// Tool execution state, if applicable.
    pub state: Option<String>,
    /// Tool input, if applicable.
    pub input: Option<serde_json::Value>,
    /// Tool output, if applicable.
    pub output: Option<serde_json::Value>,
}

/// One message in `ChatResponse.messages` (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    /// `"user"` or `"assistant"`.
    pub role: String,
    /// The message's constituent parts.
    pub parts: Vec<MessagePart>,
}

/// Tool usage summary reported by the Agent (§6).
#[derive(Debug, Clone, Default, Deserialize)]
#[non_exhaustive]
pub struct ToolsSummary {
    /// Tools the Agent actually invoked.
    #[serde(default)]
    pub used: Vec<String>,
    /// Tools the Agent considered but skipped.
    #[serde(default)]
    pub skipped: Vec<String>,
}

/// Degraded-mode marker the Agent sets when it cannot produce a normal reply (§4.G step 8).
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct FallbackInfo {
    /// Human-readable reason the Agent fell back (e.g. `"rate limited"`, S4).
    pub reason: String,
}

/// The `data` payload of a successful Agent response (§6).
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct ChatResponse {
    /// Conversation turns, including the new assistant reply.
    pub messages: Vec<ResponseMessage>,
    /// Token usage for this invocation.
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    /// Tool usage summary.
    #[serde(default)]
    pub tools: ToolsSummary,
    /// Set when the Agent is responding in degraded mode (§4.G step 8).
    #[serde(rename = "fallbackInfo", default)]
    pub fallback_info: Option<FallbackInfo>,
}

/// The envelope every Agent HTTP response is wrapped in (§6).
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct ApiResponse {
    /// Whether the call succeeded at the transport/application level.
    pub success: bool,
    /// Present when `success` is true.
    pub data: Option<ChatResponse>,
    /// Present when `success` is false.
    pub error: Option<String>,
    /// Correlates this response with upstream logs.
    #[serde(rename = "correlationId", default)]
    pub correlation_id: Option<String>,
}

/// The normalized result of one [`crate::gateway::AgentGateway::invoke`] call (§4.G).
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AgentReply {
    /// Extracted and normalized reply text, ready for the delivery pacer.
    pub reply_text: String,
    /// Token usage, if reported.
    pub usage: Option<TokenUsage>,
    /// Tools the Agent used while producing this reply.
    pub tools_used: Vec<String>,
    /// Whether this reply came from fallback handling rather than a real Agent turn.
    pub is_fallback: bool,
    /// Wall-clock time the invocation took, milliseconds.
    pub processing_time_ms: u64,
    /// Raw response payload, kept for analytics passthrough.
    pub raw: serde_json::Value,
}

/// Input to [`crate::gateway::AgentGateway::invoke`] (§4.G).
///
/// Built by callers, so unlike the other types in this module it is not
/// `#[non_exhaustive]`.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Conversation id.
    pub conversation_id: String,
    /// The current (last, coalesced) message's text.
    pub user_message: String,
    /// Prior turns, oldest first, current turn excluded.
    pub history: Vec<SimpleMessage>,
    /// Which scenario profile to use (§4.G step 1).
    pub scenario: String,
    /// The message id driving this invocation (the batch's last message), for monitoring.
    pub message_id: String,
    /// Caller-supplied context (candidate/job fields, etc.), merged with
    /// brand config before being sent to the Agent (§4.G step 2).
    pub base_context: serde_json::Value,
}

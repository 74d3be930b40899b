//! Lifecycle events emitted by the pipeline (§4.J) and the sinks that consume them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Token usage reported by the Agent for a single invocation (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TokenUsage {
    /// Tokens in the request.
    pub input_tokens: u64,
    /// Tokens in the response.
    pub output_tokens: u64,
    /// Sum of input and output tokens.
    pub total_tokens: u64,
}

/// Metadata shared by every `success` event for a coalesced batch (§4.I step 7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct SuccessMetadata {
    /// Leading slice of the delivered reply, for log/analytics readability.
    pub reply_preview: String,
    /// Tool names the Agent invoked while producing the reply.
    pub tools_used: Vec<String>,
    /// Token usage, when the Agent reported one.
    pub usage: Option<TokenUsage>,
    /// Number of segments the pacer split the reply into.
    pub segment_count: usize,
    /// Whether the reply text was a fallback phrase rather than a real Agent reply.
    pub is_fallback: bool,
    /// True only for the last message in a coalesced batch (§4.I step 7).
    pub is_primary: bool,
    /// Raw Agent response payload, for analytics passthrough.
    pub raw: Option<serde_json::Value>,
}

/// Lifecycle event emitted at each pipeline stage for one `message_id` (§3, §4.J).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum MonitoringEvent {
    /// A message cleared the filter and dedup precheck and was handed to the aggregator.
    Received {
        /// Message id.
        message_id: String,
        /// Conversation id.
        chat_id: String,
        /// Contact id.
        contact_id: String,
        /// Contact display name, if known.
        contact_name: Option<String>,
        /// Extracted text content.
        content: String,
        /// Agent profile scenario this message will be routed to.
        scenario: String,
    },
    /// The Agent gateway is about to invoke the Agent.
    AiStart {
        /// Message id (the batch's primary/last message).
        message_id: String,
    },
    /// The Agent gateway invocation has returned (success, error, or fallback).
    AiEnd {
        /// Message id (the batch's primary/last message).
        message_id: String,
    },
    /// The delivery pacer is about to send the first segment.
    SendStart {
        /// Message id (the batch's primary/last message).
        message_id: String,
    },
    /// The delivery pacer has finished sending (or giving up on) every segment.
    SendEnd {
        /// Message id (the batch's primary/last message).
        message_id: String,
    },
    /// Terminal success for one message in a batch (§3 invariant 1, 5).
    Success {
        /// Message id.
        message_id: String,
        /// Shared batch metadata.
        metadata: SuccessMetadata,
    },
    /// Terminal failure for one message in a batch (§3 invariant 1, §7).
    Failure {
        /// Message id.
        message_id: String,
        /// Human-readable failure reason.
        reason: String,
        /// Alert kind this failure maps to, for correlation with the raised alert.
        alert_kind: AlertKind,
    },
}

impl MonitoringEvent {
    /// The `message_id` this event pertains to.
    #[must_use]
    pub fn message_id(&self) -> &str {
        match self {
            Self::Received { message_id, .. }
            | Self::AiStart { message_id }
            | Self::AiEnd { message_id }
            | Self::SendStart { message_id }
            | Self::SendEnd { message_id }
            | Self::Success { message_id, .. }
            | Self::Failure { message_id, .. } => message_id,
        }
    }
}

/// What subsystem an [`Alert`] concerns (§4.I, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum AlertKind {
    /// Raised by the Agent gateway (auth, rate limit, config, context, fallback).
    Agent,
    /// Raised by the delivery pacer (partial or total send failure).
    Delivery,
    /// Any other uncaught pipeline failure.
    Message,
}

/// Severity of an [`Alert`] (§4.I).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum AlertLevel {
    /// Self-recovers; no human action required.
    Warning,
    /// Needs human action (credentials, config).
    Error,
    /// The user received nothing; needs immediate human attention.
    Critical,
}

/// A human-intervention request raised by the pipeline (§4.I, §7).
///
/// Built by callers to pass to an [`AlertSink`], so unlike the other types
/// in this module it is not `#[non_exhaustive]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// What subsystem this concerns.
    pub kind: AlertKind,
    /// Severity.
    pub level: AlertLevel,
    /// Short human-readable title.
    pub title: String,
    /// Longer detail, including masked diagnostics where applicable.
    pub detail: String,
}

/// Narrow interface the pipeline calls at each lifecycle point (§4.J).
///
/// Implementations must return quickly — no call may block the pipeline
/// for more than a few milliseconds. The default [`TracingMonitoringSink`]
/// satisfies this by doing nothing but a `tracing::info!` call.
#[async_trait]
pub trait MonitoringSink: Send + Sync {
    /// Records one lifecycle event.
    async fn record(&self, event: MonitoringEvent);
}

/// Sink for human-intervention alerts (§4.I, §7).
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Raises one alert.
    async fn raise(&self, alert: Alert);
}

/// Default [`MonitoringSink`] that logs every event via `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitoringSink;

#[async_trait]
impl MonitoringSink for TracingMonitoringSink {
    async fn record(&self, event: MonitoringEvent) {
        match &event {
            MonitoringEvent::Failure { message_id, reason, alert_kind } => {
                tracing::warn!(message_id, reason, ?alert_kind, "pipeline failure");
            },
            other => {
                tracing::info!(message_id = other.message_id(), event = ?other, "lifecycle event");
            },
        }
    }
}

/// Default [`AlertSink`] that logs every alert via `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn raise(&self, alert: Alert) {
        match alert.level {
            AlertLevel::Warning => tracing::warn!(title = alert.title, detail = alert.detail, "alert"),
            AlertLevel::Error | AlertLevel::Critical => {
                tracing::error!(title = alert.title, detail = alert.detail, level = ?alert.level, "alert");
            },
        }
    }
}

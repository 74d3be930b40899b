//! Typed error enum unifying storage, Agent, and delivery failures (§7).

use thiserror::Error;
use wecom_mediator_agent::AgentError;
use wecom_mediator_core::{AlertKind, AlertLevel};
use wecom_mediator_storage::{KvError, QueueError};

/// Any failure surfaced above the component boundaries, classified into
/// an alert kind/level per the §4.I table.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// KV store operation failed (§7 `TransientKVError`).
    #[error("kv: {0}")]
    Kv(#[from] KvError),
    /// Job queue operation failed (§7 `TransientQueueError`).
    #[error("queue: {0}")]
    Queue(#[from] QueueError),
    /// Agent gateway failed (§7 `Agent*Error` family).
    #[error("agent: {0}")]
    Agent(#[from] AgentError),
    /// Every delivery segment failed, including the fallback send (§7 `DeliveryError` total).
    #[error("delivery failed for all segments: {0}")]
    DeliveryTotal(String),
    /// Some delivery segments failed, others succeeded (§7 `DeliveryError` partial).
    #[error("delivery partially failed: {0}")]
    DeliveryPartial(String),
    /// Anything else caught at the worker boundary (§7 `PipelineError`).
    #[error("pipeline: {0}")]
    Other(String),
}

impl PipelineError {
    /// Classifies this error into the alert kind/level table from §4.I.
    #[must_use]
    pub fn classify(&self) -> (AlertKind, AlertLevel) {
        match self {
            Self::Agent(AgentError::InvocationError { retryable: true, .. }) => (AlertKind::Agent, AlertLevel::Warning),
            Self::Agent(AgentError::InvocationError { retryable: false, .. }) => (AlertKind::Agent, AlertLevel::Error),
            Self::Agent(AgentError::ConfigError(_)) => (AlertKind::Agent, AlertLevel::Error),
            Self::Agent(AgentError::ContextMissing(_)) => (AlertKind::Agent, AlertLevel::Warning),
            Self::Agent(_) => (AlertKind::Agent, AlertLevel::Error),
            Self::DeliveryTotal(_) => (AlertKind::Delivery, AlertLevel::Critical),
            Self::DeliveryPartial(_) => (AlertKind::Delivery, AlertLevel::Warning),
            Self::Kv(_) | Self::Queue(_) | Self::Other(_) => (AlertKind::Message, AlertLevel::Error),
        }
    }
}

//! Domain types shared across the wecom-mediator workspace.
//!
//! This crate owns nothing that talks to a network or a disk — it is the
//! vocabulary every other crate in the workspace shares: the inbound
//! record shape, history entries, monitoring events, error taxonomy, and
//! the two tiers of configuration (startup, hot-reloadable).

/// Environment variable parsing with warn-level logging for invalid values.
mod env_config;
/// Typed error enum shared by domain-type parsing across the workspace.
mod error;
/// Startup and hot-reloadable configuration.
mod runtime_config;
/// Conversation history entries (History store, §4.D).
mod history;
/// Monitoring/alert lifecycle events (§4.J) and their sink traits.
mod monitoring;
/// Canonical inbound record and its constituent enums (§3, §6).
mod record;
/// On-the-wire webhook shapes and the outbound send RPC contract (§6).
pub mod wire;

pub use env_config::env_parse_with_default;
pub use error::CoreError;
pub use runtime_config::{MediatorConfig, RuntimeConfig};
pub use history::{HistoryEntry, HistoryMeta, Role};
pub use monitoring::{
    Alert, AlertKind, AlertLevel, AlertSink, MonitoringEvent, MonitoringSink, SuccessMetadata,
    TokenUsage, TracingAlertSink, TracingMonitoringSink,
};
pub use record::{ApiVariant, ContactType, InboundRecord, MessagePayload, Source};
pub use wire::{NormalizedWebhook, SendResponse};

/// Maximum number of history turns retained per conversation (§3, §4.D).
pub const MAX_HISTORY_PER_CHAT: usize = 20;

/// Default TTL, in seconds, for a conversation's history list (§4.D).
pub const DEFAULT_HISTORY_TTL_SECS: i64 = 2 * 60 * 60;

/// Default TTL, in seconds, for a dedup marker (§4.C).
pub const DEFAULT_DEDUP_WINDOW_SECS: i64 = 5 * 60;

/// Default TTL, in seconds, for a conversation's pending buffer (§4.F).
pub const DEFAULT_PENDING_TTL_SECS: i64 = 5 * 60;

/// Default interval, in seconds, for the crash-recovery pending sweep (§4.F).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// KV key prefix under which all persisted state for this service lives (§6).
pub const KEY_PREFIX: &str = "wecom:message:";

/// KV key prefix under which hot-reloadable runtime config lives (§5, §7).
///
/// Distinct from [`KEY_PREFIX`]: config keys are written by operators (or
/// the admin endpoint), not by the message pipeline.
pub const CONFIG_KEY_PREFIX: &str = "wecom:config:";

/// Builds a hot-reloadable config key, e.g. `config_key("paused_users")`.
#[must_use]
pub fn config_key(name: &str) -> String {
    format!("{CONFIG_KEY_PREFIX}{name}")
}

/// Builds the dedup marker key for a message id.
#[must_use]
pub fn dedup_key(message_id: &str) -> String {
    format!("{KEY_PREFIX}dedup:{message_id}")
}

/// Builds the pending-buffer list key for a chat id.
#[must_use]
pub fn pending_key(chat_id: &str) -> String {
    format!("{KEY_PREFIX}pending:{chat_id}")
}

/// Builds the history list key for a chat id.
#[must_use]
pub fn history_key(chat_id: &str) -> String {
    format!("chat:history:{chat_id}")
}

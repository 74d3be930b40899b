//! Conversation history entries (History store, §4.D).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One turn in a conversation, as persisted by the history store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct HistoryEntry {
    /// Who said it.
    pub role: Role,
    /// Turn text.
    pub content: String,
    /// Millisecond epoch timestamp.
    pub timestamp: i64,
    /// Passthrough metadata carried alongside the turn (§3).
    pub meta: HistoryMeta,
}

impl HistoryEntry {
    /// Creates a new history entry with the current wall-clock time.
    #[must_use]
    pub fn new(role: Role, content: String, meta: HistoryMeta) -> Self {
        Self { role, content, timestamp: Utc::now().timestamp_millis(), meta }
    }
}

/// Passthrough metadata carried alongside a [`HistoryEntry`] (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct HistoryMeta {
    /// The inbound message id this turn corresponds to, if any.
    pub message_id: Option<String>,
    /// Candidate display name, if known.
    pub candidate_name: Option<String>,
    /// Manager display name, if known.
    pub manager_name: Option<String>,
    /// Enterprise org id, if applicable.
    pub org_id: Option<String>,
    /// Bot instance id.
    pub bot_id: Option<String>,
    /// Wire `messageType` code.
    pub message_type: Option<i64>,
    /// Source string, see [`crate::Source`].
    pub source: Option<String>,
    /// Whether this turn came from a group chat.
    pub is_room: bool,
    /// Opaque payload, for non-text/location turns.
    pub payload: Option<serde_json::Value>,
    /// Avatar URL, if known.
    pub avatar: Option<String>,
    /// External (platform-assigned) user id, if known.
    pub external_user_id: Option<String>,
}

/// Who authored a [`HistoryEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Role {
    /// The human user.
    User,
    /// The bot / Agent reply.
    Assistant,
}

impl Role {
    /// String form used on the wire and in the Agent request.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(CoreError::InvalidRole(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Role;
    use std::str::FromStr;

    #[test]
    fn role_round_trips() {
        assert_eq!(Role::from_str("user").unwrap(), Role::User);
        assert_eq!(Role::User.as_str(), "user");
    }

    #[test]
    fn role_rejects_unknown_value() {
        assert!(Role::from_str("system").is_err());
    }
}

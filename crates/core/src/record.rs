//! The canonical inbound record (§3) and its constituent enums.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One received message, normalized from either on-the-wire webhook shape (§6).
///
/// Created on webhook ingress; immutable; owned by the request handler
/// until handed to the burst aggregator. Built directly by the ingress
/// normalizer, so unlike its constituent enums it is not `#[non_exhaustive]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundRecord {
    /// Unique message identifier, used for dedup.
    pub message_id: String,
    /// Conversation key.
    pub chat_id: String,
    /// The contact (end user) that sent this message.
    pub contact_id: String,
    /// The bot instance that received this message.
    pub bot_id: String,
    /// Webhook auth token, threaded through to the outbound send RPC.
    pub token: String,
    /// Room id, present only for group-chat messages.
    pub room_id: Option<String>,
    /// Display name of the contact, if known.
    pub contact_name: Option<String>,
    /// True when this record is an echo of the bot's own outgoing message.
    pub is_self: bool,
    /// Where this message originated.
    pub source: Source,
    /// What kind of contact sent it.
    pub contact_type: ContactType,
    /// Millisecond epoch timestamp.
    pub timestamp: i64,
    /// The typed payload (§6 message payload enum).
    pub payload: MessagePayload,
    /// Which on-the-wire shape this record was normalized from.
    pub api_variant: ApiVariant,
}

impl InboundRecord {
    /// True if this record represents a group chat (has a `room_id`).
    #[must_use]
    pub fn is_room(&self) -> bool {
        self.room_id.is_some()
    }
}

/// Where an inbound message originated (§3, §4.E rule 2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Source {
    /// A genuine push from the user's mobile client — the only source that triggers a reply.
    MobilePush,
    /// The bot's own message, echoed back by the platform.
    SelfSent,
    /// Any other source value, passed through opaquely.
    Other(String),
}

impl Source {
    /// String form used on the wire and in persisted history metadata.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::MobilePush => "MOBILE_PUSH",
            Self::SelfSent => "SELF_SENT",
            Self::Other(s) => s,
        }
    }
}

impl FromStr for Source {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "MOBILE_PUSH" => Self::MobilePush,
            "SELF_SENT" => Self::SelfSent,
            other => Self::Other(other.to_owned()),
        })
    }
}

/// What kind of contact sent the message (§4.E rule 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ContactType {
    /// A personal WeChat contact — the only contact type that triggers a reply.
    PersonalWechat,
    /// Any other contact type, passed through opaquely.
    Other(String),
}

impl ContactType {
    /// String form used on the wire and in persisted history metadata.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::PersonalWechat => "PERSONAL_WECHAT",
            Self::Other(s) => s,
        }
    }
}

impl FromStr for ContactType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PERSONAL_WECHAT" => Self::PersonalWechat,
            other => Self::Other(other.to_owned()),
        })
    }
}

/// Which on-the-wire webhook shape a record was normalized from (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ApiVariant {
    /// Top-level fields, string timestamp, explicit `source`.
    Enterprise,
    /// Wrapped in `{data: {...}}`, renamed fields, numeric timestamp, no `source`.
    Group,
}

impl ApiVariant {
    /// String form used in persisted history metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enterprise => "enterprise",
            Self::Group => "group",
        }
    }
}

/// The message payload, tagged by the wire `messageType` code (§6).
///
/// Only [`MessagePayload::Text`] and [`MessagePayload::Location`] are
/// consumed by the filter and pipeline; every other wire type is kept as
/// an opaque [`MessagePayload::Other`] passthrough so it can still be
/// written to history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum MessagePayload {
    /// `messageType = 7`.
    Text {
        /// Raw message text.
        text: String,
    },
    /// `messageType = 8`.
    Location {
        /// Place name.
        name: String,
        /// Place address.
        address: String,
    },
    /// Any other `messageType` (file, voice, contact card, emotion, image,
    /// mini program, link, video, channels, WeCom system, …), stored
    /// opaquely for history/analytics but never consumed by the filter.
    Other {
        /// The wire `messageType` numeric code.
        message_type: i64,
        /// The raw payload object, preserved as-received.
        raw: serde_json::Value,
    },
}

impl MessagePayload {
    /// The wire `messageType` numeric code for this payload (§6).
    #[must_use]
    pub fn message_type_code(&self) -> i64 {
        match self {
            Self::Text { .. } => 7,
            Self::Location { .. } => 8,
            Self::Other { message_type, .. } => *message_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ContactType, Source};
    use std::str::FromStr;

    #[test]
    fn source_round_trips_known_values() {
        assert_eq!(Source::from_str("MOBILE_PUSH").unwrap(), Source::MobilePush);
        assert_eq!(Source::MobilePush.as_str(), "MOBILE_PUSH");
    }

    #[test]
    fn source_passes_through_unknown_values() {
        let source = Source::from_str("DESKTOP_PUSH").unwrap();
        assert_eq!(source.as_str(), "DESKTOP_PUSH");
    }

    #[test]
    fn contact_type_round_trips_known_values() {
        assert_eq!(ContactType::from_str("PERSONAL_WECHAT").unwrap(), ContactType::PersonalWechat);
    }
}

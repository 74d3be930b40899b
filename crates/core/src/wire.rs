//! On-the-wire webhook shapes and the outbound send RPC contract (§6).
//!
//! Two inbound shapes are accepted: *enterprise* (fields at the top
//! level, string timestamp, explicit `source`) and *group* (wrapped in
//! `{data: {...}}`, renamed fields, numeric timestamp, no `source`).
//! [`normalize`] detects which one a raw JSON body matches and produces
//! a canonical [`InboundRecord`] plus the `org_id` an enterprise record
//! carried (or the group sentinel), for passthrough into history
//! metadata — `org_id` is not part of [`InboundRecord`] itself, since
//! nothing downstream of the ingress handler needs it.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::record::{ApiVariant, ContactType, InboundRecord, MessagePayload, Source};

/// Sentinel `org_id` recorded for records normalized from the group shape,
/// which carries no `orgId` field of its own (§6).
pub const GROUP_ORG_ID_SENTINEL: &str = "group";

/// Result of [`normalize`]: the canonical record plus the `org_id` it
/// carried on the wire (real for enterprise, [`GROUP_ORG_ID_SENTINEL`] for group).
#[derive(Debug, Clone)]
pub struct NormalizedWebhook {
    /// The canonical inbound record.
    pub record: InboundRecord,
    /// Enterprise org id, or [`GROUP_ORG_ID_SENTINEL`] for the group variant.
    pub org_id: String,
}

/// Enterprise on-the-wire webhook shape: fields at the top level (§6).
#[derive(Debug, Clone, Deserialize)]
struct EnterpriseWebhook {
    #[serde(rename = "orgId")]
    org_id: String,
    token: String,
    #[serde(rename = "messageType")]
    message_type: i64,
    timestamp: String,
    #[serde(rename = "imBotId")]
    im_bot_id: String,
    #[serde(rename = "imContactId")]
    im_contact_id: String,
    #[serde(rename = "imRoomId", default)]
    im_room_id: Option<String>,
    source: String,
    #[serde(rename = "contactType")]
    contact_type: String,
    #[serde(rename = "messageId")]
    message_id: String,
    #[serde(rename = "isSelf", default)]
    is_self: bool,
    #[serde(rename = "contactName", default)]
    contact_name: Option<String>,
    #[serde(default)]
    payload: Value,
}

/// Group on-the-wire webhook envelope: `{data: {...}}` (§6).
#[derive(Debug, Clone, Deserialize)]
struct GroupWebhookEnvelope {
    data: GroupWebhook,
}

/// Group on-the-wire webhook shape: renamed fields, numeric timestamp, no `source` (§6).
#[derive(Debug, Clone, Deserialize)]
struct GroupWebhook {
    #[serde(rename = "messageId")]
    message_id: String,
    #[serde(rename = "type")]
    message_type: i64,
    #[serde(rename = "contactId")]
    contact_id: String,
    #[serde(rename = "botWxid")]
    bot_wxid: String,
    #[serde(rename = "roomId", default)]
    room_id: Option<String>,
    token: String,
    timestamp: i64,
    #[serde(rename = "isSelf", default)]
    is_self: bool,
    #[serde(rename = "contactName", default)]
    contact_name: Option<String>,
    #[serde(default)]
    payload: Value,
}

/// Detects which on-the-wire shape `raw` matches and normalizes it into a
/// canonical record (§6 "Detection rule").
pub fn normalize(raw: &Value) -> Result<NormalizedWebhook, CoreError> {
    if raw.get("orgId").is_some() && raw.get("messageType").is_some() {
        return normalize_enterprise(raw);
    }
    if raw.get("data").and_then(|data| data.get("type")).is_some()
        && raw.get("data").and_then(|data| data.get("messageId")).is_some()
    {
        return normalize_group(raw);
    }
    Err(CoreError::UnrecognizedWebhookShape)
}

fn normalize_enterprise(raw: &Value) -> Result<NormalizedWebhook, CoreError> {
    let wire: EnterpriseWebhook =
        serde_json::from_value(raw.clone()).map_err(|source| CoreError::WebhookDecode(source.to_string()))?;

    let timestamp = wire.timestamp.parse().unwrap_or_else(|_| {
        tracing::warn!(raw_timestamp = %wire.timestamp, "enterprise webhook timestamp not parsable, using 0");
        0
    });

    let record = InboundRecord {
        message_id: wire.message_id,
        chat_id: wire.im_contact_id.clone(),
        contact_id: wire.im_contact_id,
        bot_id: wire.im_bot_id,
        token: wire.token,
        room_id: wire.im_room_id,
        contact_name: wire.contact_name,
        is_self: wire.is_self,
        source: Source::from_str(&wire.source).unwrap_or(Source::MobilePush),
        contact_type: ContactType::from_str(&wire.contact_type).unwrap_or(ContactType::PersonalWechat),
        timestamp,
        payload: parse_payload(wire.message_type, &wire.payload),
        api_variant: ApiVariant::Enterprise,
    };

    Ok(NormalizedWebhook { record, org_id: wire.org_id })
}

fn normalize_group(raw: &Value) -> Result<NormalizedWebhook, CoreError> {
    let envelope: GroupWebhookEnvelope =
        serde_json::from_value(raw.clone()).map_err(|source| CoreError::WebhookDecode(source.to_string()))?;
    let wire = envelope.data;

    // §6: "source defaults to MOBILE_PUSH for group unless isSelf, in
    // which case a self-sent source" — the group shape carries no
    // `source` field at all, so it is always synthesized.
    let source = if wire.is_self { Source::SelfSent } else { Source::MobilePush };

    let record = InboundRecord {
        message_id: wire.message_id,
        chat_id: wire.contact_id.clone(),
        contact_id: wire.contact_id,
        bot_id: wire.bot_wxid,
        token: wire.token,
        room_id: wire.room_id,
        contact_name: wire.contact_name,
        is_self: wire.is_self,
        source,
        contact_type: ContactType::PersonalWechat,
        timestamp: wire.timestamp,
        payload: parse_payload(wire.message_type, &wire.payload),
        api_variant: ApiVariant::Group,
    };

    Ok(NormalizedWebhook { record, org_id: GROUP_ORG_ID_SENTINEL.to_owned() })
}

/// Builds a typed [`MessagePayload`] from the wire `messageType` code and
/// its raw payload object (§6 "Message payload enum").
fn parse_payload(message_type: i64, raw: &Value) -> MessagePayload {
    match message_type {
        7 => MessagePayload::Text {
            text: raw.get("content").and_then(Value::as_str).unwrap_or_default().to_owned(),
        },
        8 => MessagePayload::Location {
            name: raw.get("name").and_then(Value::as_str).unwrap_or_default().to_owned(),
            address: raw.get("address").and_then(Value::as_str).unwrap_or_default().to_owned(),
        },
        other => MessagePayload::Other { message_type: other, raw: raw.clone() },
    }
}

/// One text segment of an outbound send RPC body (§6).
#[derive(Debug, Clone, Serialize)]
pub struct SendTextPayload {
    /// The segment text.
    pub text: String,
}

/// Outbound send RPC request body, enterprise variant (§6).
#[derive(Debug, Clone, Serialize)]
pub struct EnterpriseSendRequest {
    /// Bot instance id.
    #[serde(rename = "imBotId")]
    pub im_bot_id: String,
    /// Contact id (private chat target).
    #[serde(rename = "imContactId", skip_serializing_if = "Option::is_none")]
    pub im_contact_id: Option<String>,
    /// Room id (group chat target), if applicable.
    #[serde(rename = "imRoomId", skip_serializing_if = "Option::is_none")]
    pub im_room_id: Option<String>,
    /// Always `7` (TEXT) for this core's only outbound message kind.
    #[serde(rename = "messageType")]
    pub message_type: i64,
    /// The segment payload.
    pub payload: SendTextPayload,
}

/// Outbound send RPC request body, group variant (§6).
#[derive(Debug, Clone, Serialize)]
pub struct GroupSendRequest {
    /// Bot instance id.
    #[serde(rename = "botWxid")]
    pub bot_wxid: String,
    /// Contact id (private chat target).
    #[serde(rename = "contactId", skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    /// Room id (group chat target), if applicable.
    #[serde(rename = "roomId", skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    /// Always `7` (TEXT) for this core's only outbound message kind.
    #[serde(rename = "type")]
    pub message_type: i64,
    /// The segment payload.
    pub payload: SendTextPayload,
}

/// Outbound send RPC response body (§6).
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct SendResponse {
    /// `0` on success, non-zero on failure.
    pub errcode: i32,
    /// Human-readable status, `"success"` on success.
    pub errmsg: String,
    /// Correlates this send with upstream logs.
    #[serde(rename = "requestId", default)]
    pub request_id: Option<String>,
}

impl SendResponse {
    /// Whether the send RPC reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errcode == 0
    }
}

#[cfg(test)]
mod tests {
    use super::{GROUP_ORG_ID_SENTINEL, normalize};
    use crate::record::{ApiVariant, MessagePayload, Source};

    #[test]
    fn detects_and_normalizes_enterprise_shape() {
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

        let normalized = normalize(&raw).unwrap();
        assert_eq!(normalized.org_id, "org1");
        assert_eq!(normalized.record.api_variant, ApiVariant::Enterprise);
        assert_eq!(normalized.record.source, Source::MobilePush);
        assert!(matches!(normalized.record.payload, MessagePayload::Text { text } if text == "想咨询岗位"));
    }

    #[test]
    fn detects_and_normalizes_group_shape() {
        let raw = serde_json::json!({
            "data": {
                "messageId": "m2",
                "type": 7,
                "contactId": "u2",
                "botWxid": "b2",
                "token": "tok",
                "timestamp": 1_700_000_000_000_i64,
                "payload": {"content": "想咨询岗位"},
            }
        });

        let normalized = normalize(&raw).unwrap();
        assert_eq!(normalized.org_id, GROUP_ORG_ID_SENTINEL);
        assert_eq!(normalized.record.api_variant, ApiVariant::Group);
        assert_eq!(normalized.record.source, Source::MobilePush);
        assert!(matches!(normalized.record.payload, MessagePayload::Text { text } if text == "想咨询岗位"));
    }

    #[test]
    fn self_sent_group_message_gets_self_sent_source() {
        let raw = serde_json::json!({
            "data": {
                "messageId": "m3",
                "type": 7,
                "contactId": "u2",
                "botWxid": "b2",
                "token": "tok",
                "timestamp": 1_700_000_000_000_i64,
                "isSelf": true,
            }
        });

        let normalized = normalize(&raw).unwrap();
        assert_eq!(normalized.record.source, Source::SelfSent);
    }

    #[test]
    fn rejects_unrecognized_shape() {
        let raw = serde_json::json!({"foo": "bar"});
        assert!(normalize(&raw).is_err());
    }
}

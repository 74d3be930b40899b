//! Filter (§4.E): ordered rejection/record-only/pass rules.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use wecom_mediator_core::{ApiVariant, ContactType, InboundRecord, MessagePayload, Source};
use wecom_mediator_storage::{KvError, KvStore};

/// Result of running [`FilterConfig::classify`] on an inbound record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Stop processing; no history write, no Agent call.
    Reject(String),
    /// Append to history only; no Agent call, no send (§4.E rule 5).
    RecordOnly,
    /// Proceed to the aggregator with the extracted, natural-language content.
    Pass {
        /// Extracted/synthesized content ready for the Agent.
        content: String,
    },
}

/// Extracts natural-language content from a payload (§4.E rule 10), shared
/// by the filter and by the worker (which re-derives the current turn's
/// text from the stored record rather than persisting it twice).
///
/// Returns `None` for payload types the filter never passes through.
#[must_use]
pub fn extract_content(payload: &MessagePayload) -> Option<String> {
    match payload {
        MessagePayload::Text { text } => Some(text.trim().to_owned()),
        MessagePayload::Location { name, address } => Some(if name == address {
            format!("[位置分享] {address}")
        } else {
            format!("[位置分享] {name}（{address}）")
        }),
        MessagePayload::Other { .. } => None,
    }
}

/// Short-TTL memoized set, refreshed from the KV store on expiry (§5: "read
/// per message ... memoized with short TTL to avoid per-message round trips").
struct MemoizedSet {
    key: String,
    ttl: Duration,
    cached: RwLock<(Instant, HashSet<String>)>,
}

impl MemoizedSet {
    fn new(key: String, ttl: Duration) -> Self {
        Self { key, ttl, cached: RwLock::new((Instant::now() - ttl - Duration::from_secs(1), HashSet::new())) }
    }

    async fn contains(&self, kv: &dyn KvStore, value: &str) -> Result<bool, KvError> {
        {
            let (fetched_at, set) = &*self.cached.read().await;
            if fetched_at.elapsed() < self.ttl {
                return Ok(set.contains(value));
            }
        }
        let members = kv.list_range(&self.key, 0, -1).await?;
        let set: HashSet<String> = members.into_iter().collect();
        let contains = set.contains(value);
        *self.cached.write().await = (Instant::now(), set);
        Ok(contains)
    }
}

/// Bundles the filter's small, slow-changing lookup tables (§4.E rules 4-6).
pub struct FilterConfig {
    kv: Arc<dyn KvStore>,
    blocked_enterprise_group_id: Option<String>,
    paused_users: MemoizedSet,
    group_blacklist: MemoizedSet,
}

impl FilterConfig {
    /// Builds a filter config. `cache_ttl` governs how often the
    /// paused-users and group-blacklist sets are re-read from the KV store.
    #[must_use]
    pub fn new(
        kv: Arc<dyn KvStore>,
        paused_users_key: String,
        group_blacklist_key: String,
        blocked_enterprise_group_id: Option<String>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            paused_users: MemoizedSet::new(paused_users_key, cache_ttl),
            group_blacklist: MemoizedSet::new(group_blacklist_key, cache_ttl),
            kv,
            blocked_enterprise_group_id,
        }
    }

    /// Runs the ordered rules of §4.E against `record`, first match wins.
    pub async fn classify(&self, record: &InboundRecord) -> Result<FilterOutcome, KvError> {
        if record.is_self {
            return Ok(FilterOutcome::Reject("is_self".to_owned()));
        }
        if record.source != Source::MobilePush {
            return Ok(FilterOutcome::Reject("source is not MOBILE_PUSH".to_owned()));
        }
        if record.contact_type != ContactType::PersonalWechat {
            return Ok(FilterOutcome::Reject("contact_type is not PERSONAL_WECHAT".to_owned()));
        }
        if self.paused_users.contains(self.kv.as_ref(), &record.contact_id).await? {
            return Ok(FilterOutcome::Reject("user is paused".to_owned()));
        }
        if self.group_blacklist.contains(self.kv.as_ref(), &record.chat_id).await? {
            return Ok(FilterOutcome::RecordOnly);
        }
        if record.api_variant == ApiVariant::Enterprise {
            if let (Some(blocked), Some(room_id)) = (&self.blocked_enterprise_group_id, &record.room_id) {
                if blocked == room_id {
                    return Ok(FilterOutcome::Reject("enterprise group is blocked".to_owned()));
                }
            }
        }
        if record.is_room() {
            return Ok(FilterOutcome::Reject("group chats are out of scope".to_owned()));
        }

        let Some(content) = extract_content(&record.payload) else {
            return Ok(FilterOutcome::Reject("message_type is not TEXT or LOCATION".to_owned()));
        };

        if content.trim().is_empty() {
            return Ok(FilterOutcome::Reject("extracted content is empty".to_owned()));
        }

        Ok(FilterOutcome::Pass { content })
    }

    /// Whether the bot was explicitly @-mentioned. Always `false` today —
    /// a documented no-op kept for future room support (§4.E).
    #[must_use]
    pub fn is_mentioned(&self, _record: &InboundRecord, _bot_wxid: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::{FilterConfig, FilterOutcome};
    use std::sync::Arc;
    use std::time::Duration;
    use wecom_mediator_core::{ApiVariant, ContactType, InboundRecord, MessagePayload, Source};
    use wecom_mediator_storage::{KvStore, SqliteStore, StorageBackend};

    fn record(payload: MessagePayload) -> InboundRecord {
        InboundRecord {
            message_id: "m1".to_owned(),
            chat_id: "c1".to_owned(),
            contact_id: "u1".to_owned(),
            bot_id: "b1".to_owned(),
            token: "tok".to_owned(),
            room_id: None,
            contact_name: Some("李雷".to_owned()),
            is_self: false,
            source: Source::MobilePush,
            contact_type: ContactType::PersonalWechat,
            timestamp: 0,
            payload,
            api_variant: ApiVariant::Enterprise,
        }
    }

    async fn config() -> FilterConfig {
        let backend: Arc<dyn KvStore> =
            Arc::new(StorageBackend::Sqlite(SqliteStore::open_in_memory().unwrap()));
        FilterConfig::new(
            backend,
            "wecom:config:paused_users".to_owned(),
            "wecom:config:group_blacklist".to_owned(),
            None,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn rejects_self_sent() {
        let config = config().await;
        let mut rec = record(MessagePayload::Text { text: "hi".to_owned() });
        rec.is_self = true;
        assert!(matches!(config.classify(&rec).await.unwrap(), FilterOutcome::Reject(_)));
    }

    #[tokio::test]
    async fn rejects_non_mobile_push() {
        let config = config().await;
        let mut rec = record(MessagePayload::Text { text: "hi".to_owned() });
        rec.source = Source::SelfSent;
        assert!(matches!(config.classify(&rec).await.unwrap(), FilterOutcome::Reject(_)));
    }

    #[tokio::test]
    async fn rejects_room_messages() {
        let config = config().await;
        let mut rec = record(MessagePayload::Text { text: "hi".to_owned() });
        rec.room_id = Some("room1".to_owned());
        assert!(matches!(config.classify(&rec).await.unwrap(), FilterOutcome::Reject(_)));
    }

    #[tokio::test]
    async fn rejects_non_text_non_location_payload() {
        let config = config().await;
        let rec = record(MessagePayload::Other { message_type: 6, raw: serde_json::json!({}) });
        assert!(matches!(config.classify(&rec).await.unwrap(), FilterOutcome::Reject(_)));
    }

    #[tokio::test]
    async fn passes_text_with_trimmed_content() {
        let config = config().await;
        let rec = record(MessagePayload::Text { text: "  想咨询岗位  ".to_owned() });
        assert_eq!(config.classify(&rec).await.unwrap(), FilterOutcome::Pass { content: "想咨询岗位".to_owned() });
    }

    #[tokio::test]
    async fn rejects_whitespace_only_text() {
        let config = config().await;
        let rec = record(MessagePayload::Text { text: "   ".to_owned() });
        assert!(matches!(config.classify(&rec).await.unwrap(), FilterOutcome::Reject(_)));
    }

    #[tokio::test]
    async fn location_with_matching_name_and_address_skips_duplication() {
        let config = config().await;
        let rec = record(MessagePayload::Location {
            name: "北京市朝阳区".to_owned(),
            address: "北京市朝阳区".to_owned(),
        });
        assert_eq!(
            config.classify(&rec).await.unwrap(),
            FilterOutcome::Pass { content: "[位置分享] 北京市朝阳区".to_owned() }
        );
    }

    #[tokio::test]
    async fn location_with_distinct_name_and_address_includes_both() {
        let config = config().await;
        let rec = record(MessagePayload::Location {
            name: "望京SOHO".to_owned(),
            address: "北京市朝阳区望京街10号".to_owned(),
        });
        assert_eq!(
            config.classify(&rec).await.unwrap(),
            FilterOutcome::Pass { content: "[位置分享] 望京SOHO（北京市朝阳区望京街10号）".to_owned() }
        );
    }

    #[tokio::test]
    async fn record_only_when_chat_is_blacklisted() {
        let backend = Arc::new(StorageBackend::Sqlite(SqliteStore::open_in_memory().unwrap()));
        backend.list_append("wecom:config:group_blacklist", "c1").await.unwrap();
        let config = FilterConfig::new(
            backend,
            "wecom:config:paused_users".to_owned(),
            "wecom:config:group_blacklist".to_owned(),
            None,
            Duration::from_secs(5),
        );
        let rec = record(MessagePayload::Text { text: "hi".to_owned() });
        assert_eq!(config.classify(&rec).await.unwrap(), FilterOutcome::RecordOnly);
    }
}

//! History store (§4.D).

use std::sync::Arc;

use wecom_mediator_core::{HistoryEntry, MAX_HISTORY_PER_CHAT, history_key};
use wecom_mediator_storage::{KvError, KvStore};

/// Conversation history, backed by a capped, TTL'd list per chat.
pub struct HistoryStore {
    kv: Arc<dyn KvStore>,
    ttl_secs: i64,
    max_entries: usize,
}

impl HistoryStore {
    /// Builds a history store with the given TTL (seconds) and per-chat cap.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, ttl_secs: i64) -> Self {
        Self { kv, ttl_secs, max_entries: MAX_HISTORY_PER_CHAT }
    }

    /// Appends one entry, trims to the last [`MAX_HISTORY_PER_CHAT`]
    /// entries, and refreshes the TTL (§4.D).
    pub async fn append(&self, chat_id: &str, entry: &HistoryEntry) -> Result<(), KvError> {
        let key = history_key(chat_id);
        let serialized = serde_json::to_string(entry)
            .map_err(|source| KvError::DataCorruption { key: key.clone(), source })?;
        self.kv.list_append(&key, &serialized).await?;
        let keep_from = -(i64::try_from(self.max_entries).unwrap_or(i64::MAX));
        self.kv.list_trim(&key, keep_from, -1).await?;
        self.kv.expire(&key, self.ttl_secs).await?;
        Ok(())
    }

    /// Returns the conversation's history as `{role, content}` pairs,
    /// oldest first, excluding `exclude_message_id` when given so the
    /// current turn can be sent separately as `user_message` (§4.D).
    pub async fn get_for_context(
        &self,
        chat_id: &str,
        exclude_message_id: Option<&str>,
    ) -> Result<Vec<(String, String)>, KvError> {
        let entries = self.get_detail(chat_id).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| match exclude_message_id {
                Some(exclude) => entry.meta.message_id.as_deref() != Some(exclude),
                None => true,
            })
            .map(|entry| (entry.role.as_str().to_owned(), entry.content))
            .collect())
    }

    /// Returns the full stored entries for analytics (§4.D).
    pub async fn get_detail(&self, chat_id: &str) -> Result<Vec<HistoryEntry>, KvError> {
        let key = history_key(chat_id);
        let raw = self.kv.list_range(&key, 0, -1).await?;
        raw.into_iter()
            .map(|value| {
                serde_json::from_str(&value)
                    .map_err(|source| KvError::DataCorruption { key: key.clone(), source })
            })
            .collect()
    }

    /// Lists chat ids whose history key matches `prefix`, for bulk export
    /// sweeps (§4.D). `prefix` should not include the trailing `*`.
    pub async fn scan_chat_ids(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let glob = format!("{prefix}*");
        let mut cursor = String::new();
        let mut chat_ids = Vec::new();
        loop {
            let (next_cursor, keys) = self.kv.scan(&cursor, &glob, 200).await?;
            chat_ids.extend(keys.into_iter().filter_map(|key| key.strip_prefix(prefix).map(str::to_owned)));
            if next_cursor.is_empty() {
                break;
            }
            cursor = next_cursor;
        }
        Ok(chat_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::HistoryStore;
    use std::sync::Arc;
    use wecom_mediator_core::{HistoryEntry, HistoryMeta, MAX_HISTORY_PER_CHAT, Role};
    use wecom_mediator_storage::{SqliteStore, StorageBackend};

    async fn store() -> HistoryStore {
        let backend: Arc<dyn wecom_mediator_storage::KvStore> =
            Arc::new(StorageBackend::Sqlite(SqliteStore::open_in_memory().unwrap()));
        HistoryStore::new(backend, 7200)
    }

    fn entry(message_id: &str, content: &str) -> HistoryEntry {
        let meta = HistoryMeta { message_id: Some(message_id.to_owned()), ..Default::default() };
        HistoryEntry::new(Role::User, content.to_owned(), meta)
    }

    #[tokio::test]
    async fn append_and_read_preserves_order() {
        let store = store().await;
        store.append("c1", &entry("m1", "hello")).await.unwrap();
        store.append("c1", &entry("m2", "world")).await.unwrap();
        let detail = store.get_detail("c1").await.unwrap();
        assert_eq!(detail.len(), 2);
        assert_eq!(detail[0].content, "hello");
        assert_eq!(detail[1].content, "world");
    }

    #[tokio::test]
    async fn append_caps_to_max_history_per_chat() {
        let store = store().await;
        for i in 0..(MAX_HISTORY_PER_CHAT + 5) {
            store.append("c1", &entry(&format!("m{i}"), &format!("msg {i}"))).await.unwrap();
        }
        let detail = store.get_detail("c1").await.unwrap();
        assert_eq!(detail.len(), MAX_HISTORY_PER_CHAT);
        assert_eq!(detail.last().unwrap().content, format!("msg {}", MAX_HISTORY_PER_CHAT + 4));
    }

    #[tokio::test]
    async fn get_for_context_excludes_current_turn() {
        let store = store().await;
        store.append("c1", &entry("m1", "hello")).await.unwrap();
        store.append("c1", &entry("m2", "world")).await.unwrap();
        let context = store.get_for_context("c1", Some("m2")).await.unwrap();
        assert_eq!(context, vec![("user".to_owned(), "hello".to_owned())]);
    }
}

//! Deduplication store (§4.C).

use std::sync::Arc;

use wecom_mediator_core::dedup_key;
use wecom_mediator_storage::{KvError, KvStore};

/// Thin wrapper over [`KvStore`] providing the dedup marker contract.
///
/// Real enforcement lives in [`Self::mark_processed`]; [`Self::is_processed`]
/// is an advisory pre-check that may race with a concurrent webhook retry
/// (§4.C, §9 Open Question 2) — callers must treat a lost race as a no-op.
pub struct DedupStore {
    kv: Arc<dyn KvStore>,
    window_secs: i64,
}

impl DedupStore {
    /// Builds a dedup store with the given TTL window, in seconds.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, window_secs: i64) -> Self {
        Self { kv, window_secs }
    }

    /// Marks `message_id` processed. Returns `true` iff this call is the
    /// first to do so within the window — the real gate against
    /// double-processing.
    pub async fn mark_processed(&self, message_id: &str) -> Result<bool, KvError> {
        self.kv.set_if_absent_with_ttl(&dedup_key(message_id), "1", self.window_secs).await
    }

    /// Advisory check for whether `message_id` was already marked processed.
    pub async fn is_processed(&self, message_id: &str) -> Result<bool, KvError> {
        Ok(self.kv.get(&dedup_key(message_id)).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::DedupStore;
    use std::sync::Arc;
    use wecom_mediator_storage::{SqliteStore, StorageBackend};

    async fn store() -> DedupStore {
        let backend: Arc<dyn wecom_mediator_storage::KvStore> =
            Arc::new(StorageBackend::Sqlite(SqliteStore::open_in_memory().unwrap()));
        DedupStore::new(backend, 300)
    }

    #[tokio::test]
    async fn mark_processed_only_wins_once() {
        let store = store().await;
        assert!(store.mark_processed("m1").await.unwrap());
        assert!(!store.mark_processed("m1").await.unwrap());
    }

    #[tokio::test]
    async fn is_processed_reflects_mark() {
        let store = store().await;
        assert!(!store.is_processed("m1").await.unwrap());
        store.mark_processed("m1").await.unwrap();
        assert!(store.is_processed("m1").await.unwrap());
    }
}

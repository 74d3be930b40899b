//! Burst aggregator (§4.F) — the single most load-bearing type in this crate.
//!
//! All conversation state lives in the KV store and job queue; nothing
//! durable lives in process memory, so any worker in any process may
//! pick up any chat and a crash mid-batch loses nothing (§4.F, §5).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use wecom_mediator_core::{InboundRecord, KEY_PREFIX, RuntimeConfig, pending_key};
use wecom_mediator_storage::{EnqueueOptions, JobQueue, JobState, KvError, KvStore};

use crate::error::PipelineError;

/// Hands a drained batch of messages off to the pipeline (§4.I), kept as
/// an injected trait so the aggregator is unit-testable against a fake.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    /// Processes every message in `messages` for `chat_id` as one batch.
    async fn process_batch(&self, chat_id: &str, messages: Vec<InboundRecord>) -> Result<(), PipelineError>;
}

fn default_enqueue_options(delay_ms: u64) -> EnqueueOptions {
    EnqueueOptions { delay_ms, max_attempts: 3, backoff_base_ms: 2000 }
}

fn is_live(state: Option<JobState>) -> bool {
    matches!(state, Some(JobState::Waiting | JobState::Delayed | JobState::Active))
}

/// Per-conversation coalescing state machine (§4.F).
pub struct BurstAggregator {
    kv: Arc<dyn KvStore>,
    queue: Arc<dyn JobQueue>,
    runtime_config: watch::Receiver<RuntimeConfig>,
    processor: Arc<dyn BatchProcessor>,
    pending_ttl_secs: i64,
}

impl BurstAggregator {
    /// Builds a burst aggregator over shared storage, queue, hot-reloadable
    /// config, and the batch processor that will receive drained messages.
    #[must_use]
    pub fn new(
        kv: Arc<dyn KvStore>,
        queue: Arc<dyn JobQueue>,
        runtime_config: watch::Receiver<RuntimeConfig>,
        processor: Arc<dyn BatchProcessor>,
        pending_ttl_secs: i64,
    ) -> Self {
        Self { kv, queue, runtime_config, processor, pending_ttl_secs }
    }

    /// Ingress: appends `record` to its chat's pending buffer and
    /// (re)schedules processing (§4.F "Ingress: add(record)").
    pub async fn add(&self, record: &InboundRecord) -> Result<(), PipelineError> {
        let chat_id = record.chat_id.clone();
        let key = pending_key(&chat_id);
        let serialized = serde_json::to_string(record)
            .map_err(|source| KvError::DataCorruption { key: key.clone(), source })?;

        self.kv.list_append(&key, &serialized).await?;
        self.kv.expire(&key, self.pending_ttl_secs).await?;
        let len = self.kv.list_len(&key).await?;

        let existing_state = self.queue.get_state(&chat_id).await?;
        let job_id = if existing_state == Some(JobState::Active) {
            format!("{chat_id}:pending:{}", Utc::now().timestamp_millis())
        } else {
            chat_id.clone()
        };

        let max_merged_messages = self.runtime_config.borrow().max_merged_messages;
        let merge_window_ms = self.runtime_config.borrow().merge_window_ms;
        let delay_ms = if len >= max_merged_messages { 0 } else { merge_window_ms };

        let payload = serde_json::json!({ "chat_id": chat_id });
        self.queue.enqueue("process", &job_id, payload, default_enqueue_options(delay_ms)).await?;
        Ok(())
    }

    /// Job execution: drains the pending buffer and hands it to the
    /// pipeline, scheduling a follow-up job if more arrived meanwhile
    /// (§4.F "Job execution: process(chat_id)").
    pub async fn process(&self, chat_id: &str) -> Result<(), PipelineError> {
        let messages = self.atomic_drain(chat_id).await?;
        if messages.is_empty() {
            return Ok(());
        }

        let result = self.processor.process_batch(chat_id, messages).await;

        let remaining = self.kv.list_len(&pending_key(chat_id)).await?;
        if remaining > 0 {
            let job_id = format!("{chat_id}:retry:{}", Utc::now().timestamp_millis());
            let payload = serde_json::json!({ "chat_id": chat_id });
            self.queue.enqueue("process", &job_id, payload, default_enqueue_options(0)).await?;
        }

        result
    }

    /// Range-then-delete drain (§4.F "Atomic drain"). Not atomic across
    /// the two round trips: a record appended between them survives in
    /// the list and is picked up by the next ingress or the follow-up
    /// job scheduled in [`Self::process`] — the no-loss invariant, not a
    /// no-duplicate-processing invariant.
    async fn atomic_drain(&self, chat_id: &str) -> Result<Vec<InboundRecord>, PipelineError> {
        let key = pending_key(chat_id);
        let raw = self.kv.list_range(&key, 0, -1).await?;
        self.kv.delete(&key).await?;
        raw.into_iter()
            .map(|value| {
                serde_json::from_str(&value)
                    .map_err(|source| KvError::DataCorruption { key: key.clone(), source }.into())
            })
            .collect()
    }

    /// Crash-recovery sweep (§4.F "Crash recovery"): scans every pending
    /// buffer and enqueues a zero-delay job for any chat with no live job.
    pub async fn sweep(&self) -> Result<(), PipelineError> {
        let prefix = format!("{KEY_PREFIX}pending:");
        let glob = format!("{prefix}*");
        let mut cursor = String::new();

        loop {
            let (next_cursor, keys) = self.kv.scan(&cursor, &glob, 200).await?;
            for key in keys {
                let Some(chat_id) = key.strip_prefix(&prefix) else { continue };
                let state = self.queue.get_state(chat_id).await?;
                if !is_live(state) {
                    let payload = serde_json::json!({ "chat_id": chat_id });
                    self.queue.enqueue("process", chat_id, payload, default_enqueue_options(0)).await?;
                }
            }
            if next_cursor.is_empty() {
                break;
            }
            cursor = next_cursor;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchProcessor, BurstAggregator};
    use crate::error::PipelineError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::watch;
    use wecom_mediator_core::{
        ApiVariant, ContactType, InboundRecord, MessagePayload, RuntimeConfig, Source,
    };
    use wecom_mediator_storage::{JobQueue, KvStore, SqliteStore, StorageBackend};

    struct CountingProcessor {
        batches: AtomicUsize,
        messages: AtomicUsize,
    }

    #[async_trait]
    impl BatchProcessor for CountingProcessor {
        async fn process_batch(
            &self,
            _chat_id: &str,
            messages: Vec<InboundRecord>,
        ) -> Result<(), PipelineError> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.messages.fetch_add(messages.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    fn record(chat_id: &str, message_id: &str) -> InboundRecord {
        InboundRecord {
            message_id: message_id.to_owned(),
            chat_id: chat_id.to_owned(),
            contact_id: "u1".to_owned(),
            bot_id: "b1".to_owned(),
            token: "tok".to_owned(),
            room_id: None,
            contact_name: None,
            is_self: false,
            source: Source::MobilePush,
            contact_type: ContactType::PersonalWechat,
            timestamp: 0,
            payload: MessagePayload::Text { text: "hi".to_owned() },
            api_variant: ApiVariant::Enterprise,
        }
    }

    fn aggregator(processor: Arc<CountingProcessor>) -> (BurstAggregator, Arc<dyn JobQueue>) {
        let backend: Arc<StorageBackend> = Arc::new(StorageBackend::Sqlite(SqliteStore::open_in_memory().unwrap()));
        let kv: Arc<dyn KvStore> = backend.clone();
        let queue: Arc<dyn JobQueue> = backend;
        let (_tx, rx) = watch::channel(RuntimeConfig::default());
        (BurstAggregator::new(kv, queue.clone(), rx, processor, 300), queue)
    }

    #[tokio::test]
    async fn add_creates_a_delayed_job_for_a_fresh_chat() {
        let processor = Arc::new(CountingProcessor { batches: AtomicUsize::new(0), messages: AtomicUsize::new(0) });
        let (aggregator, queue) = aggregator(processor);
        aggregator.add(&record("c1", "m1")).await.unwrap();
        let state = queue.get_state("c1").await.unwrap();
        assert!(state.is_some());
    }

    #[tokio::test]
    async fn process_drains_pending_and_calls_processor_once() {
        let processor = Arc::new(CountingProcessor { batches: AtomicUsize::new(0), messages: AtomicUsize::new(0) });
        let (aggregator, _queue) = aggregator(processor.clone());
        aggregator.add(&record("c1", "m1")).await.unwrap();
        aggregator.add(&record("c1", "m2")).await.unwrap();

        aggregator.process("c1").await.unwrap();

        assert_eq!(processor.batches.load(Ordering::SeqCst), 1);
        assert_eq!(processor.messages.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn process_on_empty_pending_is_a_benign_no_op() {
        let processor = Arc::new(CountingProcessor { batches: AtomicUsize::new(0), messages: AtomicUsize::new(0) });
        let (aggregator, _queue) = aggregator(processor.clone());
        aggregator.process("never-seen").await.unwrap();
        assert_eq!(processor.batches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn burst_at_cap_triggers_zero_delay_processing() {
        let processor = Arc::new(CountingProcessor { batches: AtomicUsize::new(0), messages: AtomicUsize::new(0) });
        let backend: Arc<StorageBackend> = Arc::new(StorageBackend::Sqlite(SqliteStore::open_in_memory().unwrap()));
        let kv: Arc<dyn KvStore> = backend.clone();
        let queue: Arc<dyn JobQueue> = backend;
        let (_tx, rx) = watch::channel(RuntimeConfig { max_merged_messages: 2, ..RuntimeConfig::default() });
        let aggregator = BurstAggregator::new(kv, queue.clone(), rx, processor, 300);

        aggregator.add(&record("c1", "m1")).await.unwrap();
        aggregator.add(&record("c1", "m2")).await.unwrap();

        let jobs = queue.claim_ready("process", 10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id, "c1");
    }
}

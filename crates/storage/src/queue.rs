//! Job queue abstraction (§4.B).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Lifecycle state of a queued job (§4.B, §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum JobState {
    /// Ready to be claimed now.
    Waiting,
    /// Scheduled to become waiting at a future time.
    Delayed,
    /// Claimed by a worker and currently executing.
    Active,
    /// Finished successfully.
    Completed,
    /// Exhausted its retry budget and moved to the dead-letter queue.
    Failed,
}

/// A job as it exists in the queue, returned by [`JobQueue::get_state`] and [`JobQueue::claim_ready`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Job {
    /// Caller-chosen identifier; unique per row, but the same *value*
    /// (e.g. a `chat_id`) may be reused across rows over time.
    pub job_id: String,
    /// Handler name a worker registers against (e.g. `"process"`).
    pub name: String,
    /// Opaque JSON payload handed to the handler.
    pub payload: serde_json::Value,
    /// Current lifecycle state.
    pub state: JobState,
    /// Millisecond epoch at which this job becomes eligible to run.
    pub run_at: i64,
    /// Attempts made so far.
    pub attempts: u32,
    /// Attempts allowed before moving to the DLQ.
    pub max_attempts: u32,
}

/// Options accepted by [`JobQueue::enqueue`] (§4.B).
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// Milliseconds to delay before the job becomes eligible to run.
    pub delay_ms: u64,
    /// Attempts allowed before moving to the DLQ.
    pub max_attempts: u32,
    /// Base, in milliseconds, of the exponential backoff applied between retries.
    pub backoff_base_ms: u64,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self { delay_ms: 0, max_attempts: 3, backoff_base_ms: 2000 }
    }
}

/// Delayed jobs keyed by id, with replace-on-enqueue semantics, retries,
/// and a dead-letter queue (§4.B).
///
/// `enqueue` is the coordination primitive the burst aggregator (§4.F)
/// relies on to serialize work per conversation without a distributed
/// lock: re-enqueuing a `job_id` that is currently `waiting` or `delayed`
/// replaces it outright (the delay restarts); re-enqueuing one that is
/// `active` is rejected so the caller can fall back to a derived id.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues `payload` under `job_id` for handler `name`.
    ///
    /// If a job with this `job_id` exists in state `waiting` or
    /// `delayed`, it is removed and replaced by this call. If it exists
    /// in state `active`, this call returns
    /// `Err(`[`QueueError::NotFound`]`)`-shaped rejection is *not* used for
    /// this — callers must check [`JobQueue::get_state`] first (§4.F step 3)
    /// and choose a derived id themselves; `enqueue` against an active
    /// job id is a logic error the caller is expected to avoid.
    async fn enqueue(
        &self,
        name: &str,
        job_id: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<(), QueueError>;

    /// Returns the current state of `job_id`, or `None` if no row exists
    /// (already completed-and-pruned, or never created).
    async fn get_state(&self, job_id: &str) -> Result<Option<JobState>, QueueError>;

    /// Atomically claims up to `limit` jobs named `name` whose `run_at`
    /// has passed and whose state is `waiting`, moving them to `active`.
    async fn claim_ready(&self, name: &str, limit: usize) -> Result<Vec<Job>, QueueError>;

    /// Marks `job_id` completed.
    async fn complete(&self, job_id: &str) -> Result<(), QueueError>;

    /// Marks one attempt of `job_id` failed. If attempts remain, the job
    /// is rescheduled with exponential backoff; otherwise it moves to
    /// the dead-letter queue (state `failed`).
    async fn fail(&self, job_id: &str, reason: &str) -> Result<(), QueueError>;
}

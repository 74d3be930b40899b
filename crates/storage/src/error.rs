//! Typed error enums for the storage layer (§7 `TransientKVError` / `TransientQueueError`).

use thiserror::Error;

/// Error surfaced by a [`crate::kv::KvStore`] operation.
#[derive(Debug, Error)]
pub enum KvError {
    /// Network / connection / lock timeout — worth retrying.
    #[error("kv backend error: {0}")]
    Backend(String),
    /// Stored value could not be deserialized into the caller's expected shape.
    #[error("kv data corruption at key {key}: {source}")]
    DataCorruption {
        /// Key whose value failed to deserialize.
        key: String,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
}

impl KvError {
    /// Whether this error is likely transient (§7 `TransientKVError`).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for KvError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for KvError {
    fn from(err: r2d2::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for KvError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Error surfaced by a [`crate::queue::JobQueue`] operation.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Network / connection / lock timeout — worth retrying.
    #[error("queue backend error: {0}")]
    Backend(String),
    /// Caller referenced a job id that does not exist.
    #[error("job not found: {0}")]
    NotFound(String),
    /// Stored payload could not be deserialized.
    #[error("queue data corruption for job {job_id}: {source}")]
    DataCorruption {
        /// Job whose payload failed to deserialize.
        job_id: String,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
}

impl QueueError {
    /// Whether this error is likely transient (§7 `TransientQueueError`).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for QueueError {
    fn from(err: r2d2::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

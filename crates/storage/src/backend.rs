//! [`StorageBackend`] — selects between the sqlite and postgres implementations
//! at runtime and forwards every trait call to the active one.

use async_trait::async_trait;

use crate::error::{KvError, QueueError};
use crate::kv::KvStore;
use crate::queue::{EnqueueOptions, Job, JobQueue, JobState};
#[cfg(feature = "sqlite")]
use crate::sqlite_store::SqliteStore;
#[cfg(feature = "postgres")]
use crate::pg_store::PgStore;

/// Dispatches to whichever concrete backend was configured at startup.
///
/// Kept as an enum (rather than `Box<dyn KvStore + JobQueue>`, which is
/// not object-safe as a single trait object) so both abstractions share
/// one connection/pool per process.
pub enum StorageBackend {
    /// SQLite, single-process deployment target.
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteStore),
    /// Postgres, horizontal scale-out deployment target (§5).
    #[cfg(feature = "postgres")]
    Postgres(PgStore),
}

/// Forwards a method call to whichever backend variant is active.
macro_rules! dispatch {
    ($self:ident, $method:ident ( $($arg:expr),* )) => {
        match $self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(inner) => inner.$method($($arg),*).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(inner) => inner.$method($($arg),*).await,
        }
    };
}

#[async_trait]
impl KvStore for StorageBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        dispatch!(self, get(key))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: i64) -> Result<(), KvError> {
        dispatch!(self, set_with_ttl(key, value, ttl_secs))
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_secs: i64,
    ) -> Result<bool, KvError> {
        dispatch!(self, set_if_absent_with_ttl(key, value, ttl_secs))
    }

    async fn list_append(&self, key: &str, elem: &str) -> Result<(), KvError> {
        dispatch!(self, list_append(key, elem))
    }

    async fn list_range(&self, key: &str, lo: i64, hi: i64) -> Result<Vec<String>, KvError> {
        dispatch!(self, list_range(key, lo, hi))
    }

    async fn list_trim(&self, key: &str, lo: i64, hi: i64) -> Result<(), KvError> {
        dispatch!(self, list_trim(key, lo, hi))
    }

    async fn list_len(&self, key: &str) -> Result<usize, KvError> {
        dispatch!(self, list_len(key))
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        dispatch!(self, delete(key))
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<(), KvError> {
        dispatch!(self, expire(key, ttl_secs))
    }

    async fn scan(
        &self,
        cursor: &str,
        prefix_glob: &str,
        page: usize,
    ) -> Result<(String, Vec<String>), KvError> {
        dispatch!(self, scan(cursor, prefix_glob, page))
    }
}

#[async_trait]
impl JobQueue for StorageBackend {
    async fn enqueue(
        &self,
        name: &str,
        job_id: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<(), QueueError> {
        dispatch!(self, enqueue(name, job_id, payload, opts))
    }

    async fn get_state(&self, job_id: &str) -> Result<Option<JobState>, QueueError> {
        dispatch!(self, get_state(job_id))
    }

    async fn claim_ready(&self, name: &str, limit: usize) -> Result<Vec<Job>, QueueError> {
        dispatch!(self, claim_ready(name, limit))
    }

    async fn complete(&self, job_id: &str) -> Result<(), QueueError> {
        dispatch!(self, complete(job_id))
    }

    async fn fail(&self, job_id: &str, reason: &str) -> Result<(), QueueError> {
        dispatch!(self, fail(job_id, reason))
    }
}

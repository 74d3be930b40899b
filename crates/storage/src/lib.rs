//! KV store (§4.A) and job queue (§4.B) abstractions, with sqlite and
//! postgres implementations dispatched through [`StorageBackend`].

/// The runtime-selected backend enum.
mod backend;
/// Typed error enums for both abstractions.
mod error;
/// The KV store trait.
mod kv;
/// Postgres-backed implementation (feature `postgres`).
#[cfg(feature = "postgres")]
mod pg_store;
/// The job queue trait.
mod queue;
/// SQLite-backed implementation (feature `sqlite`).
#[cfg(feature = "sqlite")]
mod sqlite_store;

pub use backend::StorageBackend;
pub use error::{KvError, QueueError};
pub use kv::KvStore;
#[cfg(feature = "postgres")]
pub use pg_store::PgStore;
pub use queue::{EnqueueOptions, Job, JobQueue, JobState};
#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteStore;

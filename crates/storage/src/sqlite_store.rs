//! SQLite-backed [`crate::kv::KvStore`] and [`crate::queue::JobQueue`] (§4.A, §4.B).
//!
//! Single-process deployment target and the backend used by the test
//! suite. Blocking `rusqlite` calls run on an `r2d2` connection pool and
//! are shipped to `tokio::task::spawn_blocking` so the async trait
//! methods never block the runtime's worker threads.

use std::path::Path;

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::error::{KvError, QueueError};
use crate::kv::KvStore;
use crate::queue::{EnqueueOptions, Job, JobQueue, JobState};

/// SQLite-backed storage, implementing both the KV store and job queue traits.
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Opens (creating if absent) a SQLite database at `path` and runs schema setup.
    pub fn open(path: &Path) -> Result<Self, KvError> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::new(manager).map_err(|e| KvError::Backend(e.to_string()))?;
        {
            let conn = pool.get().map_err(|e| KvError::Backend(e.to_string()))?;
            run_schema(&conn)?;
        }
        Ok(Self { pool })
    }

    /// Opens an in-memory database — used by tests.
    pub fn open_in_memory() -> Result<Self, KvError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| KvError::Backend(e.to_string()))?;
        {
            let conn = pool.get().map_err(|e| KvError::Backend(e.to_string()))?;
            run_schema(&conn)?;
        }
        Ok(Self { pool })
    }
}

fn run_schema(conn: &rusqlite::Connection) -> Result<(), KvError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv_strings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS kv_lists (
            key TEXT NOT NULL,
            idx INTEGER NOT NULL,
            value TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            PRIMARY KEY (key, idx)
        );
        CREATE INDEX IF NOT EXISTS kv_lists_key_idx ON kv_lists (key, idx);
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            payload TEXT NOT NULL,
            state TEXT NOT NULL,
            run_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL,
            max_attempts INTEGER NOT NULL,
            backoff_base_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS jobs_name_state_run_at ON jobs (name, state, run_at);
        "#,
    )?;
    Ok(())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Maps Redis-style possibly-negative `lo`/`hi` bounds (relative to the
/// end of a `len`-element sequence) to an inclusive `[start, end]` index
/// range, clamped to the sequence's bounds. Returns `None` for an empty result.
fn normalize_range(lo: i64, hi: i64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len_i = len as i64;
    let norm = |i: i64| -> i64 {
        if i < 0 {
            (len_i + i).max(0)
        } else {
            i
        }
    };
    let start = norm(lo).min(len_i - 1).max(0);
    let end = norm(hi).min(len_i - 1).max(0);
    if start > end {
        return None;
    }
    Some((start as usize, end as usize))
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let pool = self.pool.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || -> Result<Option<String>, KvError> {
            let conn = pool.get()?;
            let now = now_ms();
            let value: Option<String> = conn
                .query_row(
                    "SELECT value FROM kv_strings WHERE key = ?1 AND expires_at > ?2",
                    params![key, now],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
        .map_err(|e| KvError::Backend(e.to_string()))?
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: i64) -> Result<(), KvError> {
        let pool = self.pool.clone();
        let (key, value) = (key.to_owned(), value.to_owned());
        tokio::task::spawn_blocking(move || -> Result<(), KvError> {
            let conn = pool.get()?;
            let expires_at = now_ms() + ttl_secs * 1000;
            conn.execute(
                "INSERT INTO kv_strings (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, value, expires_at],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| KvError::Backend(e.to_string()))?
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_secs: i64,
    ) -> Result<bool, KvError> {
        let pool = self.pool.clone();
        let (key, value) = (key.to_owned(), value.to_owned());
        tokio::task::spawn_blocking(move || -> Result<bool, KvError> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            let now = now_ms();
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT expires_at FROM kv_strings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some_and(|exp| exp > now) {
                return Ok(false);
            }
            let expires_at = now + ttl_secs * 1000;
            tx.execute(
                "INSERT INTO kv_strings (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, value, expires_at],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(|e| KvError::Backend(e.to_string()))?
    }

    async fn list_append(&self, key: &str, elem: &str) -> Result<(), KvError> {
        let pool = self.pool.clone();
        let (key, elem) = (key.to_owned(), elem.to_owned());
        tokio::task::spawn_blocking(move || -> Result<(), KvError> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            let next_idx: i64 = tx.query_row(
                "SELECT COALESCE(MAX(idx), -1) + 1 FROM kv_lists WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )?;
            // Lists don't expire individual elements; callers refresh the
            // whole list's TTL explicitly via `expire` (§4.D "TTL refreshed on each append").
            let far_future = now_ms() + 365 * 24 * 60 * 60 * 1000;
            tx.execute(
                "INSERT INTO kv_lists (key, idx, value, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![key, next_idx, elem, far_future],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| KvError::Backend(e.to_string()))?
    }

    async fn list_range(&self, key: &str, lo: i64, hi: i64) -> Result<Vec<String>, KvError> {
        let pool = self.pool.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>, KvError> {
            let conn = pool.get()?;
            let now = now_ms();
            let mut stmt = conn.prepare(
                "SELECT value FROM kv_lists WHERE key = ?1 AND expires_at > ?2 ORDER BY idx ASC",
            )?;
            let values: Vec<String> =
                stmt.query_map(params![key, now], |row| row.get(0))?.filter_map(Result::ok).collect();
            let Some((start, end)) = normalize_range(lo, hi, values.len()) else {
                return Ok(Vec::new());
            };
            Ok(values[start..=end].to_vec())
        })
        .await
        .map_err(|e| KvError::Backend(e.to_string()))?
    }

    async fn list_trim(&self, key: &str, lo: i64, hi: i64) -> Result<(), KvError> {
        let pool = self.pool.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || -> Result<(), KvError> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            let now = now_ms();
            let idxs: Vec<i64> = {
                let mut stmt = tx.prepare(
                    "SELECT idx FROM kv_lists WHERE key = ?1 AND expires_at > ?2 ORDER BY idx ASC",
                )?;
                stmt.query_map(params![key, now], |row| row.get(0))?.filter_map(Result::ok).collect()
            };
            let Some((start, end)) = normalize_range(lo, hi, idxs.len()) else {
                tx.execute("DELETE FROM kv_lists WHERE key = ?1", params![key])?;
                tx.commit()?;
                return Ok(());
            };
            let keep: std::collections::HashSet<i64> = idxs[start..=end].iter().copied().collect();
            for idx in idxs {
                if !keep.contains(&idx) {
                    tx.execute(
                        "DELETE FROM kv_lists WHERE key = ?1 AND idx = ?2",
                        params![key, idx],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| KvError::Backend(e.to_string()))?
    }

    async fn list_len(&self, key: &str) -> Result<usize, KvError> {
        let pool = self.pool.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || -> Result<usize, KvError> {
            let conn = pool.get()?;
            let now = now_ms();
            let len: i64 = conn.query_row(
                "SELECT COUNT(*) FROM kv_lists WHERE key = ?1 AND expires_at > ?2",
                params![key, now],
                |row| row.get(0),
            )?;
            Ok(len as usize)
        })
        .await
        .map_err(|e| KvError::Backend(e.to_string()))?
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let pool = self.pool.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || -> Result<(), KvError> {
            let conn = pool.get()?;
            conn.execute("DELETE FROM kv_strings WHERE key = ?1", params![key])?;
            conn.execute("DELETE FROM kv_lists WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
        .map_err(|e| KvError::Backend(e.to_string()))?
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<(), KvError> {
        let pool = self.pool.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || -> Result<(), KvError> {
            let conn = pool.get()?;
            let expires_at = now_ms() + ttl_secs * 1000;
            conn.execute(
                "UPDATE kv_strings SET expires_at = ?2 WHERE key = ?1",
                params![key, expires_at],
            )?;
            conn.execute(
                "UPDATE kv_lists SET expires_at = ?2 WHERE key = ?1",
                params![key, expires_at],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| KvError::Backend(e.to_string()))?
    }

    async fn scan(
        &self,
        cursor: &str,
        prefix_glob: &str,
        page: usize,
    ) -> Result<(String, Vec<String>), KvError> {
        let pool = self.pool.clone();
        let (cursor, prefix_glob) = (cursor.to_owned(), prefix_glob.to_owned());
        tokio::task::spawn_blocking(move || -> Result<(String, Vec<String>), KvError> {
            let conn = pool.get()?;
            let like_pattern = prefix_glob.trim_end_matches('*').to_owned() + "%";
            let now = now_ms();
            let mut stmt = conn.prepare(
                "SELECT DISTINCT key FROM kv_lists WHERE key LIKE ?1 AND expires_at > ?2 AND key > ?3
                 ORDER BY key ASC LIMIT ?4",
            )?;
            let keys: Vec<String> = stmt
                .query_map(params![like_pattern, now, cursor, page as i64], |row| row.get(0))?
                .filter_map(Result::ok)
                .collect();
            let next_cursor = if keys.len() == page { keys.last().cloned().unwrap_or_default() } else { String::new() };
            Ok((next_cursor, keys))
        })
        .await
        .map_err(|e| KvError::Backend(e.to_string()))?
    }
}

fn row_to_job(
    job_id: String,
    name: String,
    payload: String,
    state: String,
    run_at: i64,
    attempts: i64,
    max_attempts: i64,
) -> Result<Job, QueueError> {
    let payload = serde_json::from_str(&payload)
        .map_err(|source| QueueError::DataCorruption { job_id: job_id.clone(), source })?;
    let state = match state.as_str() {
        "waiting" => JobState::Waiting,
        "delayed" => JobState::Delayed,
        "active" => JobState::Active,
        "completed" => JobState::Completed,
        _ => JobState::Failed,
    };
    Ok(Job {
        job_id,
        name,
        payload,
        state,
        run_at,
        attempts: attempts as u32,
        max_attempts: max_attempts as u32,
    })
}

fn state_str(state: JobState) -> &'static str {
    match state {
        JobState::Waiting => "waiting",
        JobState::Delayed => "delayed",
        JobState::Active => "active",
        JobState::Completed => "completed",
        JobState::Failed => "failed",
    }
}

#[async_trait]
impl JobQueue for SqliteStore {
    async fn enqueue(
        &self,
        name: &str,
        job_id: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<(), QueueError> {
        let pool = self.pool.clone();
        let (name, job_id) = (name.to_owned(), job_id.to_owned());
        tokio::task::spawn_blocking(move || -> Result<(), QueueError> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            let existing_state: Option<String> = tx
                .query_row(
                    "SELECT state FROM jobs WHERE job_id = ?1",
                    params![job_id],
                    |row| row.get(0),
                )
                .optional()?;
            if existing_state.as_deref() == Some("active") {
                return Err(QueueError::Backend(format!(
                    "job {job_id} is active; caller must use a derived job id"
                )));
            }
            let now = now_ms();
            let run_at = now + opts.delay_ms as i64;
            let state = if opts.delay_ms == 0 { "waiting" } else { "delayed" };
            let payload_json = serde_json::to_string(&payload)
                .map_err(|source| QueueError::DataCorruption { job_id: job_id.clone(), source })?;
            tx.execute(
                "INSERT INTO jobs (job_id, name, payload, state, run_at, attempts, max_attempts, backoff_base_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)
                 ON CONFLICT(job_id) DO UPDATE SET
                    name = excluded.name, payload = excluded.payload, state = excluded.state,
                    run_at = excluded.run_at, attempts = 0, max_attempts = excluded.max_attempts,
                    backoff_base_ms = excluded.backoff_base_ms",
                params![job_id, name, payload_json, state, run_at, opts.max_attempts, opts.backoff_base_ms],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?
    }

    async fn get_state(&self, job_id: &str) -> Result<Option<JobState>, QueueError> {
        let pool = self.pool.clone();
        let job_id = job_id.to_owned();
        tokio::task::spawn_blocking(move || -> Result<Option<JobState>, QueueError> {
            let conn = pool.get()?;
            let state: Option<String> = conn
                .query_row("SELECT state FROM jobs WHERE job_id = ?1", params![job_id], |row| row.get(0))
                .optional()?;
            Ok(state.map(|s| match s.as_str() {
                "waiting" => JobState::Waiting,
                "delayed" => JobState::Delayed,
                "active" => JobState::Active,
                "completed" => JobState::Completed,
                _ => JobState::Failed,
            }))
        })
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?
    }

    async fn claim_ready(&self, name: &str, limit: usize) -> Result<Vec<Job>, QueueError> {
        let pool = self.pool.clone();
        let name = name.to_owned();
        tokio::task::spawn_blocking(move || -> Result<Vec<Job>, QueueError> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            let now = now_ms();
            let rows: Vec<(String, String, i64, i64, i64)> = {
                let mut stmt = tx.prepare(
                    "SELECT job_id, payload, run_at, attempts, max_attempts FROM jobs
                     WHERE name = ?1 AND state IN ('waiting', 'delayed') AND run_at <= ?2
                     ORDER BY run_at ASC LIMIT ?3",
                )?;
                stmt.query_map(params![name, now, limit as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?
                .filter_map(Result::ok)
                .collect()
            };
            let mut jobs = Vec::with_capacity(rows.len());
            for (job_id, payload, run_at, attempts, max_attempts) in rows {
                tx.execute(
                    "UPDATE jobs SET state = 'active' WHERE job_id = ?1",
                    params![job_id],
                )?;
                jobs.push(row_to_job(job_id, name.clone(), payload, "active".to_owned(), run_at, attempts, max_attempts)?);
            }
            tx.commit()?;
            Ok(jobs)
        })
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?
    }

    async fn complete(&self, job_id: &str) -> Result<(), QueueError> {
        let pool = self.pool.clone();
        let job_id = job_id.to_owned();
        tokio::task::spawn_blocking(move || -> Result<(), QueueError> {
            let conn = pool.get()?;
            conn.execute(
                "UPDATE jobs SET state = 'completed' WHERE job_id = ?1",
                params![job_id],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?
    }

    async fn fail(&self, job_id: &str, reason: &str) -> Result<(), QueueError> {
        let pool = self.pool.clone();
        let (job_id, reason) = (job_id.to_owned(), reason.to_owned());
        tokio::task::spawn_blocking(move || -> Result<(), QueueError> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            let row: Option<(i64, i64, i64)> = tx
                .query_row(
                    "SELECT attempts, max_attempts, backoff_base_ms FROM jobs WHERE job_id = ?1",
                    params![job_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let Some((attempts, max_attempts, backoff_base_ms)) = row else {
                return Err(QueueError::NotFound(job_id));
            };
            let attempts = attempts + 1;
            tracing::warn!(job_id, reason, attempts, max_attempts, "job attempt failed");
            if attempts >= max_attempts {
                tx.execute(
                    "UPDATE jobs SET state = 'failed', attempts = ?2 WHERE job_id = ?1",
                    params![job_id, attempts],
                )?;
            } else {
                let backoff = backoff_base_ms * 2i64.pow((attempts - 1) as u32);
                let run_at = now_ms() + backoff;
                tx.execute(
                    "UPDATE jobs SET state = 'delayed', attempts = ?2, run_at = ?3 WHERE job_id = ?1",
                    params![job_id, attempts, run_at],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteStore;
    use crate::kv::KvStore;
    use crate::queue::{EnqueueOptions, JobQueue, JobState};
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("open in-memory sqlite store")
    }

    #[tokio::test]
    async fn set_if_absent_with_ttl_only_wins_once() {
        let store = store();
        let first = store.set_if_absent_with_ttl("dedup:m1", "1", 300).await.unwrap();
        let second = store.set_if_absent_with_ttl("dedup:m1", "1", 300).await.unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn list_append_and_range_preserve_order() {
        let store = store();
        store.list_append("pending:c1", "a").await.unwrap();
        store.list_append("pending:c1", "b").await.unwrap();
        store.list_append("pending:c1", "c").await.unwrap();
        let values = store.list_range("pending:c1", 0, -1).await.unwrap();
        assert_eq!(values, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn list_trim_keeps_only_last_n() {
        let store = store();
        for v in ["a", "b", "c", "d", "e"] {
            store.list_append("chat:history:c1", v).await.unwrap();
        }
        store.list_trim("chat:history:c1", -3, -1).await.unwrap();
        let values = store.list_range("chat:history:c1", 0, -1).await.unwrap();
        assert_eq!(values, vec!["c", "d", "e"]);
    }

    #[tokio::test]
    async fn list_len_reflects_appends() {
        let store = store();
        assert_eq!(store.list_len("pending:c1").await.unwrap(), 0);
        store.list_append("pending:c1", "a").await.unwrap();
        assert_eq!(store.list_len("pending:c1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn enqueue_replaces_waiting_job() {
        let store = store();
        store
            .enqueue("process", "c1", json!({"chat_id": "c1"}), EnqueueOptions { delay_ms: 2000, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(store.get_state("c1").await.unwrap(), Some(JobState::Delayed));
        store
            .enqueue("process", "c1", json!({"chat_id": "c1"}), EnqueueOptions { delay_ms: 0, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(store.get_state("c1").await.unwrap(), Some(JobState::Waiting));
    }

    #[tokio::test]
    async fn enqueue_rejects_replacing_active_job() {
        let store = store();
        store
            .enqueue("process", "c1", json!({}), EnqueueOptions { delay_ms: 0, ..Default::default() })
            .await
            .unwrap();
        store.claim_ready("process", 10).await.unwrap();
        assert_eq!(store.get_state("c1").await.unwrap(), Some(JobState::Active));
        let result = store.enqueue("process", "c1", json!({}), EnqueueOptions::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn claim_ready_respects_run_at() {
        let store = store();
        store
            .enqueue("process", "c1", json!({}), EnqueueOptions { delay_ms: 60_000, ..Default::default() })
            .await
            .unwrap();
        let claimed = store.claim_ready("process", 10).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn fail_retries_then_moves_to_dlq() {
        let store = store();
        store
            .enqueue(
                "process",
                "c1",
                json!({}),
                EnqueueOptions { delay_ms: 0, max_attempts: 2, backoff_base_ms: 10 },
            )
            .await
            .unwrap();
        store.claim_ready("process", 10).await.unwrap();
        store.fail("c1", "boom").await.unwrap();
        assert_eq!(store.get_state("c1").await.unwrap(), Some(JobState::Delayed));

        // second claim requires waiting past run_at, emulate via direct fail again
        store.fail("c1", "boom again").await.unwrap();
        assert_eq!(store.get_state("c1").await.unwrap(), Some(JobState::Failed));
    }
}

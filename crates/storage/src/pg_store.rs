//! Postgres-backed [`crate::kv::KvStore`] and [`crate::queue::JobQueue`] (§4.A, §4.B).
//!
//! The horizontal scale-out deployment target (§5): every process in the
//! fleet points at the same Postgres instance, so the job-id
//! replace-on-enqueue semantics (§4.B, §4.F) are enforced by a single
//! shared `jobs` table instead of per-process state.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::error::{KvError, QueueError};
use crate::kv::KvStore;
use crate::queue::{EnqueueOptions, Job, JobQueue, JobState};

/// Postgres-backed storage, implementing both the KV store and job queue traits.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects to `database_url` and ensures the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, KvError> {
        let pool = PgPool::connect(database_url).await?;
        run_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Wraps an already-constructed pool — used by integration tests that
    /// share a pool across several storage facades.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn run_schema(pool: &PgPool) -> Result<(), KvError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_strings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at BIGINT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_lists (
            key TEXT NOT NULL,
            idx BIGINT NOT NULL,
            value TEXT NOT NULL,
            expires_at BIGINT NOT NULL,
            PRIMARY KEY (key, idx)
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            payload JSONB NOT NULL,
            state TEXT NOT NULL,
            run_at BIGINT NOT NULL,
            attempts INTEGER NOT NULL,
            max_attempts INTEGER NOT NULL,
            backoff_base_ms BIGINT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS jobs_name_state_run_at ON jobs (name, state, run_at)")
        .execute(pool)
        .await?;
    Ok(())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

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
impl KvStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let now = now_ms();
        let row = sqlx::query("SELECT value FROM kv_strings WHERE key = $1 AND expires_at > $2")
            .bind(key)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: i64) -> Result<(), KvError> {
        let expires_at = now_ms() + ttl_secs * 1000;
        sqlx::query(
            "INSERT INTO kv_strings (key, value, expires_at) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_secs: i64,
    ) -> Result<bool, KvError> {
        let mut tx = self.pool.begin().await?;
        let now = now_ms();
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT expires_at FROM kv_strings WHERE key = $1 FOR UPDATE")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some_and(|exp| exp > now) {
            return Ok(false);
        }
        let expires_at = now + ttl_secs * 1000;
        sqlx::query(
            "INSERT INTO kv_strings (key, value, expires_at) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list_append(&self, key: &str, elem: &str) -> Result<(), KvError> {
        let mut tx = self.pool.begin().await?;
        let next_idx: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(idx), -1) + 1 FROM kv_lists WHERE key = $1")
                .bind(key)
                .fetch_one(&mut *tx)
                .await?;
        let far_future = now_ms() + 365 * 24 * 60 * 60 * 1000;
        sqlx::query("INSERT INTO kv_lists (key, idx, value, expires_at) VALUES ($1, $2, $3, $4)")
            .bind(key)
            .bind(next_idx)
            .bind(elem)
            .bind(far_future)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_range(&self, key: &str, lo: i64, hi: i64) -> Result<Vec<String>, KvError> {
        let now = now_ms();
        let rows = sqlx::query(
            "SELECT value FROM kv_lists WHERE key = $1 AND expires_at > $2 ORDER BY idx ASC",
        )
        .bind(key)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        let values: Vec<String> = rows.into_iter().map(|r| r.get::<String, _>(0)).collect();
        let Some((start, end)) = normalize_range(lo, hi, values.len()) else {
            return Ok(Vec::new());
        };
        Ok(values[start..=end].to_vec())
    }

    async fn list_trim(&self, key: &str, lo: i64, hi: i64) -> Result<(), KvError> {
        let mut tx = self.pool.begin().await?;
        let now = now_ms();
        let idxs: Vec<i64> = sqlx::query_scalar(
            "SELECT idx FROM kv_lists WHERE key = $1 AND expires_at > $2 ORDER BY idx ASC",
        )
        .bind(key)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        let Some((start, end)) = normalize_range(lo, hi, idxs.len()) else {
            sqlx::query("DELETE FROM kv_lists WHERE key = $1").bind(key).execute(&mut *tx).await?;
            tx.commit().await?;
            return Ok(());
        };
        let keep: std::collections::HashSet<i64> = idxs[start..=end].iter().copied().collect();
        for idx in idxs {
            if !keep.contains(&idx) {
                sqlx::query("DELETE FROM kv_lists WHERE key = $1 AND idx = $2")
                    .bind(key)
                    .bind(idx)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_len(&self, key: &str) -> Result<usize, KvError> {
        let now = now_ms();
        let len: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM kv_lists WHERE key = $1 AND expires_at > $2")
                .bind(key)
                .bind(now)
                .fetch_one(&self.pool)
                .await?;
        Ok(len as usize)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        sqlx::query("DELETE FROM kv_strings WHERE key = $1").bind(key).execute(&self.pool).await?;
        sqlx::query("DELETE FROM kv_lists WHERE key = $1").bind(key).execute(&self.pool).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<(), KvError> {
        let expires_at = now_ms() + ttl_secs * 1000;
        sqlx::query("UPDATE kv_strings SET expires_at = $2 WHERE key = $1")
            .bind(key)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE kv_lists SET expires_at = $2 WHERE key = $1")
            .bind(key)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan(
        &self,
        cursor: &str,
        prefix_glob: &str,
        page: usize,
    ) -> Result<(String, Vec<String>), KvError> {
        let like_pattern = prefix_glob.trim_end_matches('*').to_owned() + "%";
        let now = now_ms();
        let rows = sqlx::query(
            "SELECT DISTINCT key FROM kv_lists WHERE key LIKE $1 AND expires_at > $2 AND key > $3
             ORDER BY key ASC LIMIT $4",
        )
        .bind(&like_pattern)
        .bind(now)
        .bind(cursor)
        .bind(page as i64)
        .fetch_all(&self.pool)
        .await?;
        let keys: Vec<String> = rows.into_iter().map(|r| r.get::<String, _>(0)).collect();
        let next_cursor =
            if keys.len() == page { keys.last().cloned().unwrap_or_default() } else { String::new() };
        Ok((next_cursor, keys))
    }
}

fn row_state(state: &str) -> JobState {
    match state {
        "waiting" => JobState::Waiting,
        "delayed" => JobState::Delayed,
        "active" => JobState::Active,
        "completed" => JobState::Completed,
        _ => JobState::Failed,
    }
}

#[async_trait]
impl JobQueue for PgStore {
    async fn enqueue(
        &self,
        name: &str,
        job_id: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await?;
        let existing_state: Option<String> =
            sqlx::query_scalar("SELECT state FROM jobs WHERE job_id = $1 FOR UPDATE")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await?;
        if existing_state.as_deref() == Some("active") {
            return Err(QueueError::Backend(format!(
                "job {job_id} is active; caller must use a derived job id"
            )));
        }
        let now = now_ms();
        let run_at = now + opts.delay_ms as i64;
        let state = if opts.delay_ms == 0 { "waiting" } else { "delayed" };
        sqlx::query(
            "INSERT INTO jobs (job_id, name, payload, state, run_at, attempts, max_attempts, backoff_base_ms)
             VALUES ($1, $2, $3, $4, $5, 0, $6, $7)
             ON CONFLICT (job_id) DO UPDATE SET
                name = excluded.name, payload = excluded.payload, state = excluded.state,
                run_at = excluded.run_at, attempts = 0, max_attempts = excluded.max_attempts,
                backoff_base_ms = excluded.backoff_base_ms",
        )
        .bind(job_id)
        .bind(name)
        .bind(&payload)
        .bind(state)
        .bind(run_at)
        .bind(opts.max_attempts as i32)
        .bind(opts.backoff_base_ms as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_state(&self, job_id: &str) -> Result<Option<JobState>, QueueError> {
        let state: Option<String> = sqlx::query_scalar("SELECT state FROM jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(state.as_deref().map(row_state))
    }

    async fn claim_ready(&self, name: &str, limit: usize) -> Result<Vec<Job>, QueueError> {
        let now = now_ms();
        let rows = sqlx::query(
            "UPDATE jobs SET state = 'active'
             WHERE job_id IN (
                 SELECT job_id FROM jobs
                 WHERE name = $1 AND state IN ('waiting', 'delayed') AND run_at <= $2
                 ORDER BY run_at ASC LIMIT $3
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING job_id, payload, run_at, attempts, max_attempts",
        )
        .bind(name)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let job_id: String = row.get(0);
            let payload: serde_json::Value = row.get(1);
            let run_at: i64 = row.get(2);
            let attempts: i32 = row.get(3);
            let max_attempts: i32 = row.get(4);
            jobs.push(Job {
                job_id,
                name: name.to_owned(),
                payload,
                state: JobState::Active,
                run_at,
                attempts: attempts as u32,
                max_attempts: max_attempts as u32,
            });
        }
        Ok(jobs)
    }

    async fn complete(&self, job_id: &str) -> Result<(), QueueError> {
        sqlx::query("UPDATE jobs SET state = 'completed' WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail(&self, job_id: &str, reason: &str) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<(i32, i32, i64)> = sqlx::query_as(
            "SELECT attempts, max_attempts, backoff_base_ms FROM jobs WHERE job_id = $1 FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((attempts, max_attempts, backoff_base_ms)) = row else {
            return Err(QueueError::NotFound(job_id.to_owned()));
        };
        let attempts = attempts + 1;
        tracing::warn!(job_id, reason, attempts, max_attempts, "job attempt failed");
        if attempts >= max_attempts {
            sqlx::query("UPDATE jobs SET state = 'failed', attempts = $2 WHERE job_id = $1")
                .bind(job_id)
                .bind(attempts)
                .execute(&mut *tx)
                .await?;
        } else {
            let backoff = backoff_base_ms * 2i64.pow((attempts - 1) as u32);
            let run_at = now_ms() + backoff;
            sqlx::query(
                "UPDATE jobs SET state = 'delayed', attempts = $2, run_at = $3 WHERE job_id = $1",
            )
            .bind(job_id)
            .bind(attempts)
            .bind(run_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

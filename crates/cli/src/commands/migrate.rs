//! Copies durable KV state from a SQLite database to a Postgres database
//! for an operator-initiated move to the horizontal scale-out deployment
//! target (§5).
//!
//! Only list-backed keys (pending buffers, conversation history, the
//! paused-users/group-blacklist sets) and the known scalar config keys
//! are copied — [`KvStore::scan`] only enumerates list keys, so there is
//! no trait-level way to discover arbitrary scalar keys, and the job
//! queue itself is not migrated: any pending buffer left without a live
//! job is picked up by the crash-recovery sweep the first time the
//! server runs against the new backend.

use std::path::Path;

use anyhow::{Context, Result};
use wecom_mediator_core::{KEY_PREFIX, config_key};
use wecom_mediator_storage::{KvStore, PgStore, SqliteStore};

const HISTORY_KEY_PREFIX: &str = "chat:history:";
const LIST_TTL_SECS: i64 = 7 * 24 * 60 * 60;
const SCALAR_TTL_SECS: i64 = 365 * 24 * 60 * 60;

const SCALAR_CONFIG_KEYS: [&str; 10] = [
    "brand",
    "merge_window_ms",
    "max_merged_messages",
    "typing_delay_per_char_ms",
    "paragraph_gap_ms",
    "typing_speed_chars_per_sec",
    "typing_min_delay_ms",
    "typing_max_delay_ms",
    "typing_random_variation",
    "worker_concurrency",
];

/// Runs the migration: `from_sqlite` is a filesystem path, `to_postgres`
/// a `postgres://` connection string.
pub async fn run(from_sqlite: &str, to_postgres: &str) -> Result<()> {
    println!("opening source sqlite database: {from_sqlite}");
    let source = SqliteStore::open(Path::new(from_sqlite)).context("opening source sqlite database")?;

    println!("connecting to target postgres database");
    let target = PgStore::connect(to_postgres).await.context("connecting to target postgres database")?;

    let mut lists_copied = 0usize;
    lists_copied += copy_lists_by_prefix(&source, &target, &format!("{KEY_PREFIX}pending:")).await?;
    lists_copied += copy_lists_by_prefix(&source, &target, HISTORY_KEY_PREFIX).await?;
    println!("copied {lists_copied} lists (pending buffers + history)");

    if copy_list(&source, &target, &config_key("paused_users")).await? {
        lists_copied += 1;
        println!("copied paused-users list");
    }
    if copy_list(&source, &target, &config_key("group_blacklist")).await? {
        lists_copied += 1;
        println!("copied group-blacklist list");
    }

    let mut scalars_copied = 0usize;
    for name in SCALAR_CONFIG_KEYS {
        if copy_scalar(&source, &target, &config_key(name)).await? {
            scalars_copied += 1;
            println!("copied scalar config key: {name}");
        }
    }

    println!(
        "migration complete: {lists_copied} list keys, {scalars_copied} scalar config keys. \
         start the server against the new backend — its crash-recovery sweep will re-enqueue \
         any pending buffer left without a live job."
    );
    Ok(())
}

async fn copy_list(source: &SqliteStore, target: &PgStore, key: &str) -> Result<bool> {
    let values = source.list_range(key, 0, -1).await.with_context(|| format!("reading source list {key}"))?;
    if values.is_empty() {
        return Ok(false);
    }
    for value in &values {
        target.list_append(key, value).await.with_context(|| format!("writing target list {key}"))?;
    }
    target.expire(key, LIST_TTL_SECS).await.with_context(|| format!("setting ttl on target list {key}"))?;
    Ok(true)
}

async fn copy_lists_by_prefix(source: &SqliteStore, target: &PgStore, prefix: &str) -> Result<usize> {
    let glob = format!("{prefix}*");
    let mut cursor = String::new();
    let mut copied = 0usize;

    loop {
        let (next_cursor, keys) =
            source.scan(&cursor, &glob, 200).await.with_context(|| format!("scanning source prefix {prefix}"))?;
        for key in &keys {
            if copy_list(source, target, key).await? {
                copied += 1;
            }
        }
        if next_cursor.is_empty() {
            break;
        }
        cursor = next_cursor;
    }

    Ok(copied)
}

async fn copy_scalar(source: &SqliteStore, target: &PgStore, key: &str) -> Result<bool> {
    match source.get(key).await.with_context(|| format!("reading source scalar {key}"))? {
        Some(value) => {
            target
                .set_with_ttl(key, &value, SCALAR_TTL_SECS)
                .await
                .with_context(|| format!("writing target scalar {key}"))?;
            Ok(true)
        },
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copy_list_skips_absent_key() {
        let source = SqliteStore::open_in_memory().unwrap();
        let values = source.list_range("nonexistent", 0, -1).await.unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn copy_scalar_skips_absent_key() {
        let source = SqliteStore::open_in_memory().unwrap();
        let value = source.get("nonexistent").await.unwrap();
        assert!(value.is_none());
    }
}

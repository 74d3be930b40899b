//! Storage backend construction from a `DATABASE_URL`-style connection string.

use anyhow::{Context, Result};
use wecom_mediator_storage::StorageBackend;

/// Builds the configured storage backend from `storage_url` (§5, §6).
///
/// `postgres://...` / `postgresql://...` select the Postgres backend;
/// anything else (including a bare path or a `sqlite://` prefix) is
/// treated as a SQLite file path.
pub async fn create_storage(storage_url: &str) -> Result<StorageBackend> {
    #[cfg(feature = "postgres")]
    if storage_url.starts_with("postgres://") || storage_url.starts_with("postgresql://") {
        tracing::info!("using postgres storage backend");
        let store = wecom_mediator_storage::PgStore::connect(storage_url)
            .await
            .context("connecting to postgres")?;
        return Ok(StorageBackend::Postgres(store));
    }

    #[cfg(feature = "sqlite")]
    {
        let path = storage_url.strip_prefix("sqlite://").unwrap_or(storage_url);
        let path = std::path::Path::new(path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("creating database directory")?;
            }
        }
        tracing::info!(path = %path.display(), "using sqlite storage backend");
        let store = wecom_mediator_storage::SqliteStore::open(path).context("opening sqlite database")?;
        return Ok(StorageBackend::Sqlite(store));
    }

    #[allow(unreachable_code)]
    Err(anyhow::anyhow!("no storage backend enabled; enable the 'sqlite' or 'postgres' feature"))
}

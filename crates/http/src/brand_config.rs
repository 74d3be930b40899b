//! KV-backed brand config provider (§4.G).

use std::sync::Arc;

use async_trait::async_trait;
use wecom_mediator_agent::{AgentError, BrandConfigProvider};
use wecom_mediator_core::config_key;
use wecom_mediator_storage::KvStore;

/// Reads brand config from a single KV key, written by operators through
/// whatever channel manages `wecom:config:*` keys (§4.G, §6).
pub struct KvBrandConfigProvider {
    kv: Arc<dyn KvStore>,
    key: String,
}

impl KvBrandConfigProvider {
    /// Builds a provider reading the `brand` config key.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv, key: config_key("brand") }
    }
}

#[async_trait]
impl BrandConfigProvider for KvBrandConfigProvider {
    async fn fetch(&self) -> Result<serde_json::Value, AgentError> {
        let raw = self.kv.get(&self.key).await.map_err(|source| AgentError::ConfigError(source.to_string()))?;
        match raw {
            Some(value) => serde_json::from_str(&value)
                .map_err(|source| AgentError::JsonParse { context: "brand config".to_owned(), source }),
            None => Ok(serde_json::json!({})),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::KvBrandConfigProvider;
    use wecom_mediator_agent::BrandConfigProvider;
    use wecom_mediator_core::config_key;
    use wecom_mediator_storage::{KvStore, SqliteStore, StorageBackend};
    use std::sync::Arc;

    #[tokio::test]
    async fn missing_key_yields_empty_object() {
        let backend: Arc<dyn KvStore> = Arc::new(StorageBackend::Sqlite(SqliteStore::open_in_memory().unwrap()));
        let provider = KvBrandConfigProvider::new(backend);
        assert_eq!(provider.fetch().await.unwrap(), serde_json::json!({}));
    }

    #[tokio::test]
    async fn present_key_is_parsed_as_json() {
        let backend: Arc<dyn KvStore> = Arc::new(StorageBackend::Sqlite(SqliteStore::open_in_memory().unwrap()));
        backend.set_with_ttl(&config_key("brand"), r#"{"name":"小蛋糕"}"#, 3600).await.unwrap();
        let provider = KvBrandConfigProvider::new(backend);
        assert_eq!(provider.fetch().await.unwrap(), serde_json::json!({"name": "小蛋糕"}));
    }
}

//! Startup and hot-reloadable configuration (§6, SPEC_FULL "Configuration").

use crate::env_config::env_parse_with_default;

/// Configuration read once at process start.
///
/// Unlike [`RuntimeConfig`], these values require a process restart to
/// change: storage backend selection, upstream endpoints, and bind
/// address are not meaningfully hot-swappable.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct MediatorConfig {
    /// `DATABASE_URL`-style connection string for the storage backend.
    pub storage_url: String,
    /// Base URL of the Agent HTTP API (§6).
    pub agent_base_url: String,
    /// API key sent to the Agent.
    pub agent_api_key: String,
    /// Base URL the outbound send RPC is POSTed to (§6).
    pub send_endpoint_base: String,
    /// HTTP bind host.
    pub bind_host: String,
    /// HTTP bind port.
    pub bind_port: u16,
    /// Dedup marker TTL, seconds (§4.C).
    pub dedup_window_secs: i64,
    /// History list TTL, seconds (§4.D).
    pub history_ttl_secs: i64,
    /// Pending buffer TTL, seconds (§4.F).
    pub pending_ttl_secs: i64,
    /// Crash-recovery sweep interval, seconds (§4.F).
    pub sweep_interval_secs: u64,
}

impl MediatorConfig {
    /// Loads startup configuration from the process environment.
    ///
    /// Never panics: a missing or malformed value falls back to a
    /// documented default, logging a warning for malformed (not missing)
    /// values via [`env_parse_with_default`].
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            storage_url: std::env::var("WECOM_MEDIATOR_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://wecom-mediator.db".to_owned()),
            agent_base_url: std::env::var("WECOM_MEDIATOR_AGENT_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8090".to_owned()),
            agent_api_key: std::env::var("WECOM_MEDIATOR_AGENT_API_KEY").unwrap_or_default(),
            send_endpoint_base: std::env::var("WECOM_MEDIATOR_SEND_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:8091/send".to_owned()),
            bind_host: std::env::var("WECOM_MEDIATOR_HOST").unwrap_or_else(|_| "0.0.0.0".to_owned()),
            bind_port: env_parse_with_default("WECOM_MEDIATOR_PORT", 8080u16),
            dedup_window_secs: env_parse_with_default(
                "WECOM_MEDIATOR_DEDUP_WINDOW_SECS",
                crate::DEFAULT_DEDUP_WINDOW_SECS,
            ),
            history_ttl_secs: env_parse_with_default(
                "WECOM_MEDIATOR_HISTORY_TTL_SECS",
                crate::DEFAULT_HISTORY_TTL_SECS,
            ),
            pending_ttl_secs: env_parse_with_default(
                "WECOM_MEDIATOR_PENDING_TTL_SECS",
                crate::DEFAULT_PENDING_TTL_SECS,
            ),
            sweep_interval_secs: env_parse_with_default(
                "WECOM_MEDIATOR_SWEEP_INTERVAL_SECS",
                crate::DEFAULT_SWEEP_INTERVAL_SECS,
            ),
        }
    }
}

/// Runtime-mutable tunables (§6 "Configuration"), hot-swapped via a
/// `tokio::sync::watch` channel fed from the KV store's `config:*` keys.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct RuntimeConfig {
    /// Coalescing delay before a buffered batch is processed, milliseconds (§4.F).
    pub merge_window_ms: u64,
    /// Batch size that forces immediate (zero-delay) processing (§4.F).
    pub max_merged_messages: usize,
    /// Per-character typing delay used by the pacer, milliseconds (§4.H).
    pub typing_delay_per_char_ms: u64,
    /// Extra delay added between paragraphs, milliseconds (§4.H).
    pub paragraph_gap_ms: u64,
    /// Assumed typing speed, characters per second (§4.H, informational).
    pub typing_speed_chars_per_sec: u64,
    /// Lower clamp for a segment's computed delay, milliseconds (§4.H).
    pub typing_min_delay_ms: u64,
    /// Upper clamp for a segment's computed delay, milliseconds (§4.H).
    pub typing_max_delay_ms: u64,
    /// Fractional jitter applied to each segment's delay, e.g. `0.2` = ±20% (§4.H).
    pub typing_random_variation: f64,
    /// Number of worker jobs a single process claims concurrently (§4.B, §5).
    pub worker_concurrency: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            merge_window_ms: 2000,
            max_merged_messages: 5,
            typing_delay_per_char_ms: 60,
            paragraph_gap_ms: 300,
            typing_speed_chars_per_sec: 16,
            typing_min_delay_ms: 400,
            typing_max_delay_ms: 4000,
            typing_random_variation: 0.15,
            worker_concurrency: 10,
        }
    }
}

impl RuntimeConfig {
    /// Reconstructs a [`RuntimeConfig`] from a flat string map, such as the
    /// `config:*` keys scanned out of the KV store. Missing or unparsable
    /// entries keep the corresponding [`RuntimeConfig::default`] value.
    #[must_use]
    pub fn from_kv_map(map: &std::collections::HashMap<String, String>) -> Self {
        let default = Self::default();
        let parse = |key: &str, fallback: u64| -> u64 {
            map.get(key).and_then(|v| v.parse().ok()).unwrap_or(fallback)
        };
        Self {
            merge_window_ms: parse("merge_window_ms", default.merge_window_ms),
            max_merged_messages: map
                .get("max_merged_messages")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_merged_messages),
            typing_delay_per_char_ms: parse(
                "typing_delay_per_char_ms",
                default.typing_delay_per_char_ms,
            ),
            paragraph_gap_ms: parse("paragraph_gap_ms", default.paragraph_gap_ms),
            typing_speed_chars_per_sec: parse(
                "typing_speed_chars_per_sec",
                default.typing_speed_chars_per_sec,
            ),
            typing_min_delay_ms: parse("typing_min_delay_ms", default.typing_min_delay_ms),
            typing_max_delay_ms: parse("typing_max_delay_ms", default.typing_max_delay_ms),
            typing_random_variation: map
                .get("typing_random_variation")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.typing_random_variation),
            worker_concurrency: map
                .get("worker_concurrency")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.worker_concurrency),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RuntimeConfig;
    use std::collections::HashMap;

    #[test]
    fn default_matches_spec_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.merge_window_ms, 2000);
        assert_eq!(config.max_merged_messages, 5);
    }

    #[test]
    fn from_kv_map_overrides_only_present_keys() {
        let mut map = HashMap::new();
        map.insert("merge_window_ms".to_owned(), "5000".to_owned());
        let config = RuntimeConfig::from_kv_map(&map);
        assert_eq!(config.merge_window_ms, 5000);
        assert_eq!(config.max_merged_messages, RuntimeConfig::default().max_merged_messages);
    }

    #[test]
    fn from_kv_map_ignores_unparsable_values() {
        let mut map = HashMap::new();
        map.insert("merge_window_ms".to_owned(), "not-a-number".to_owned());
        let config = RuntimeConfig::from_kv_map(&map);
        assert_eq!(config.merge_window_ms, RuntimeConfig::default().merge_window_ms);
    }
}

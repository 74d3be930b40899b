//! KV store abstraction (§4.A).

use async_trait::async_trait;

use crate::error::KvError;

/// Strings with TTL, lists with atomic append+trim, atomic set-if-absent,
/// and scan-by-prefix — the primitive every higher-level store in
/// `wecom-mediator-service` is built on.
///
/// Any call may fail transiently (§7 `TransientKVError`); callers retry a
/// bounded number of times and then surface the error.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads a string value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Writes a string value with a TTL, in seconds.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: i64) -> Result<(), KvError>;

    /// Writes a string value only if the key is currently absent or
    /// expired. Returns `true` iff this call performed the write — the
    /// atomic primitive [`crate::dedup`] marker semantics rely on.
    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_secs: i64,
    ) -> Result<bool, KvError>;

    /// Appends one element to the list stored at `key`, creating it if absent.
    async fn list_append(&self, key: &str, elem: &str) -> Result<(), KvError>;

    /// Returns list elements with index in `[lo, hi]` (inclusive), in
    /// insertion order. `hi = -1` means "to the end".
    async fn list_range(&self, key: &str, lo: i64, hi: i64) -> Result<Vec<String>, KvError>;

    /// Trims the list stored at `key` to keep only indices in `[lo, hi]`.
    async fn list_trim(&self, key: &str, lo: i64, hi: i64) -> Result<(), KvError>;

    /// Returns the number of elements in the list stored at `key`.
    async fn list_len(&self, key: &str) -> Result<usize, KvError>;

    /// Deletes a key (string or list) entirely.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Refreshes the TTL, in seconds, of an existing key without touching its value.
    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<(), KvError>;

    /// Non-blocking cursor-paginated scan of keys matching `prefix_glob`
    /// (a `*`-suffixed prefix, e.g. `"wecom:message:pending:*"`).
    /// Returns `(next_cursor, keys)`; an empty `next_cursor` means the
    /// scan is complete.
    async fn scan(
        &self,
        cursor: &str,
        prefix_glob: &str,
        page: usize,
    ) -> Result<(String, Vec<String>), KvError>;
}

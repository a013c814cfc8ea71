//! `KeyValueStore` trait — the single async interface for all persistence.
//!
//! Every operation is atomic per key. Nothing spans keys, so concurrent
//! callers working on different subscriptions never interfere.

use async_trait::async_trait;

use crate::error::StoreError;

/// Backend-agnostic key-value store with string values and string sets.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    // ── Plain values ────────────────────────────────────────────────

    /// Get the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key` (value or set). Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Whether `key` holds a value or a non-empty set.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// All keys (values and sets) starting with `prefix`, sorted by byte order.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    // ── Sets ────────────────────────────────────────────────────────

    /// Add members to the set at `key`, all or none. Returns how many were new.
    async fn set_add(&self, key: &str, members: &[String]) -> Result<usize, StoreError>;

    /// All members of the set at `key` (empty if the set does not exist).
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;
}

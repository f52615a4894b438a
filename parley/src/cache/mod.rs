//! Typed key-value cache over the store that backs session context windows
//! and per-run ancillary data.
//!
//! [`Cache`] is the seam: [`RedisCache`] in production, [`MemoryCache`] in
//! tests and cache-less development. Values are strings; callers JSON-encode
//! anything structured. Every write that can create a key takes the TTL on
//! the same call so no key is ever left without an expiry.

mod memory;
mod redis_impl;

pub use memory::MemoryCache;
pub use redis_impl::RedisCache;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("wrong value kind at {0}")]
    WrongKind(String),
}

/// Key schema. All keys carry a configured TTL (context 24 h, run 2 h by
/// default).
pub mod keys {
    /// Session context window: list, oldest first, bounded to the window size.
    pub fn context(session_id: &str) -> String {
        format!("agent:context:{session_id}")
    }

    /// Per-run ancillary data: hash.
    pub fn run(run_id: &str) -> String {
        format!("agent:task:{run_id}")
    }
}

/// Cache operations used by the context loader and dual writer.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Appends to a list; sets `ttl` on the same call when given.
    async fn rpush(
        &self,
        key: &str,
        values: &[String],
        ttl: Option<Duration>,
    ) -> Result<u64, CacheError>;
    /// Inclusive range with redis semantics (`-1` = last element).
    async fn lrange(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, CacheError>;
    async fn llen(&self, key: &str) -> Result<u64, CacheError>;
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError>;

    async fn hset(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError>;
}

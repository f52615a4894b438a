//! Redis-backed cache. One multiplexed async connection shared by clone;
//! the redis crate serializes pipelined commands over it.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

use super::{Cache, CacheError};

pub struct RedisCache {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisCache {
    /// Connects to `url` (e.g. `redis://127.0.0.1/`).
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::info!(url, "redis cache connected");
        Ok(Self { conn })
    }

    fn conn(&self) -> redis::aio::MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn();
        match ttl {
            Some(d) => {
                let _: () = conn.set_ex(key, value, d.as_secs()).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.conn().get(key).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let _: () = self.conn().del(key).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let _: bool = self.conn().expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn rpush(
        &self,
        key: &str,
        values: &[String],
        ttl: Option<Duration>,
    ) -> Result<u64, CacheError> {
        let mut conn = self.conn();
        let len: u64 = conn.rpush(key, values).await?;
        if let Some(d) = ttl {
            let _: bool = conn.expire(key, d.as_secs() as i64).await?;
        }
        Ok(len)
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        Ok(self.conn().lrange(key, start, stop).await?)
    }

    async fn llen(&self, key: &str) -> Result<u64, CacheError> {
        Ok(self.conn().llen(key).await?)
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError> {
        let _: () = self.conn().ltrim(key, start, stop).await?;
        Ok(())
    }

    async fn hset(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let _: () = conn.hset_multiple(key, fields).await?;
        if let Some(d) = ttl {
            let _: bool = conn.expire(key, d.as_secs() as i64).await?;
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        Ok(self.conn().hget(key, field).await?)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        Ok(self.conn().hgetall(key).await?)
    }
}

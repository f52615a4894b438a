//! In-memory cache with TTL semantics matching the redis implementation.
//! Used by tests and by deployments started without a cache store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{Cache, CacheError};

enum Slot {
    Str(String),
    List(Vec<String>),
    Hash(HashMap<String, String>),
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

/// Resolves an inclusive redis-style range (`-1` = last) against `len`.
/// Returns `None` when the range is empty.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let norm = |i: isize| if i < 0 { (len + i).max(0) } else { i.min(len - 1) };
    if len == 0 {
        return None;
    }
    let (a, b) = (norm(start), norm(stop));
    if a > b {
        None
    } else {
        Some((a as usize, b as usize))
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        guard.retain(|_, e| !e.expired());
        f(&mut guard)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.with_entries(|m| {
            m.insert(
                key.to_string(),
                Entry {
                    slot: Slot::Str(value.to_string()),
                    expires_at: ttl.map(|d| Instant::now() + d),
                },
            );
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.with_entries(|m| match m.get(key) {
            Some(Entry { slot: Slot::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(CacheError::WrongKind(key.to_string())),
            None => Ok(None),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.with_entries(|m| {
            m.remove(key);
        });
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        self.with_entries(|m| {
            if let Some(e) = m.get_mut(key) {
                e.expires_at = Some(Instant::now() + ttl);
            }
        });
        Ok(())
    }

    async fn rpush(
        &self,
        key: &str,
        values: &[String],
        ttl: Option<Duration>,
    ) -> Result<u64, CacheError> {
        self.with_entries(|m| {
            let entry = m.entry(key.to_string()).or_insert_with(|| Entry {
                slot: Slot::List(Vec::new()),
                expires_at: None,
            });
            let Slot::List(list) = &mut entry.slot else {
                return Err(CacheError::WrongKind(key.to_string()));
            };
            list.extend(values.iter().cloned());
            if let Some(d) = ttl {
                entry.expires_at = Some(Instant::now() + d);
            }
            Ok(list.len() as u64)
        })
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        self.with_entries(|m| match m.get(key) {
            Some(Entry { slot: Slot::List(list), .. }) => {
                Ok(match resolve_range(list.len(), start, stop) {
                    Some((a, b)) => list[a..=b].to_vec(),
                    None => Vec::new(),
                })
            }
            Some(_) => Err(CacheError::WrongKind(key.to_string())),
            None => Ok(Vec::new()),
        })
    }

    async fn llen(&self, key: &str) -> Result<u64, CacheError> {
        self.with_entries(|m| match m.get(key) {
            Some(Entry { slot: Slot::List(list), .. }) => Ok(list.len() as u64),
            Some(_) => Err(CacheError::WrongKind(key.to_string())),
            None => Ok(0),
        })
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError> {
        self.with_entries(|m| match m.get_mut(key) {
            Some(Entry { slot: Slot::List(list), .. }) => {
                *list = match resolve_range(list.len(), start, stop) {
                    Some((a, b)) => list[a..=b].to_vec(),
                    None => Vec::new(),
                };
                Ok(())
            }
            Some(_) => Err(CacheError::WrongKind(key.to_string())),
            None => Ok(()),
        })
    }

    async fn hset(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.with_entries(|m| {
            let entry = m.entry(key.to_string()).or_insert_with(|| Entry {
                slot: Slot::Hash(HashMap::new()),
                expires_at: None,
            });
            let Slot::Hash(hash) = &mut entry.slot else {
                return Err(CacheError::WrongKind(key.to_string()));
            };
            for (f, v) in fields {
                hash.insert(f.clone(), v.clone());
            }
            if let Some(d) = ttl {
                entry.expires_at = Some(Instant::now() + d);
            }
            Ok(())
        })
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        self.with_entries(|m| match m.get(key) {
            Some(Entry { slot: Slot::Hash(hash), .. }) => Ok(hash.get(field).cloned()),
            Some(_) => Err(CacheError::WrongKind(key.to_string())),
            None => Ok(None),
        })
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        self.with_entries(|m| match m.get(key) {
            Some(Entry { slot: Slot::Hash(hash), .. }) => Ok(hash.clone()),
            Some(_) => Err(CacheError::WrongKind(key.to_string())),
            None => Ok(HashMap::new()),
        })
    }
}

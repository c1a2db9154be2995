//! # Neighbor-list cache
//!
//! Precomputed neighbor lists are published to a shared key-value cache so
//! the request-serving layer can read them without touching the matrices.
//!
//! Key scheme: `similar-post:<id>` and `similar-user:<id>`; values are
//! comma-joined ID lists (the empty string when a subject has no
//! neighbors). Entries are overwritten on every recompute and carry no TTL;
//! an absent key means "not yet computed", not "known to have zero
//! neighbors".
//!
//! The engine is the sole writer of its keys. Publishes for a batch go
//! through a pipelined multi-SET to bound round-trips; the pipeline is not
//! atomic across keys, which is fine because a torn publish only leaves
//! some lists stale until the next pass.
//!
//! [`read_neighbors`] is the serving-layer accessor: it never propagates an
//! error, degrading to an empty list instead.

use redis::Commands;
use std::collections::HashMap;
use tracing::warn;

use crate::error::EngineResult;

/// Which neighbor index a cache key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborKind {
    /// Related-content lists, keyed `similar-post:<id>`.
    Post,
    /// People-you-may-follow lists, keyed `similar-user:<id>`.
    User,
}

impl NeighborKind {
    /// The cache key for a subject ID.
    pub fn key(&self, id: &str) -> String {
        match self {
            NeighborKind::Post => format!("similar-post:{id}"),
            NeighborKind::User => format!("similar-user:{id}"),
        }
    }
}

/// Key-value contract the publisher and serving accessor work against.
pub trait NeighborCache {
    /// Overwrite a single key.
    fn set(&mut self, key: &str, value: &str) -> EngineResult<()>;

    /// Read a key; `None` when absent.
    fn get(&mut self, key: &str) -> EngineResult<Option<String>>;

    /// Remove a single key.
    fn delete(&mut self, key: &str) -> EngineResult<()>;

    /// Overwrite many keys in one pipelined round-trip.
    fn set_many(&mut self, entries: &[(String, String)]) -> EngineResult<()>;

    /// Remove many keys in one pipelined round-trip.
    fn delete_many(&mut self, keys: &[String]) -> EngineResult<()>;

    /// Remove every published neighbor key, leaving unrelated keys alone.
    ///
    /// Used by full reinitialization: posts and users deleted while the
    /// engine was offline have no surviving row to trigger a key delete, so
    /// their stale lists must be swept before the full republish.
    fn clear(&mut self) -> EngineResult<()>;
}

/// Redis-backed cache used in production.
pub struct RedisCache {
    connection: redis::Connection,
}

impl RedisCache {
    /// Connect to a Redis instance (e.g. `redis://127.0.0.1:6379/0`).
    pub fn connect(url: &str) -> EngineResult<Self> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection()?;
        Ok(Self { connection })
    }
}

impl NeighborCache for RedisCache {
    fn set(&mut self, key: &str, value: &str) -> EngineResult<()> {
        let _: () = self.connection.set(key, value)?;
        Ok(())
    }

    fn get(&mut self, key: &str) -> EngineResult<Option<String>> {
        let value: Option<String> = self.connection.get(key)?;
        Ok(value)
    }

    fn delete(&mut self, key: &str) -> EngineResult<()> {
        let _: () = self.connection.del(key)?;
        Ok(())
    }

    fn set_many(&mut self, entries: &[(String, String)]) -> EngineResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            pipe.set(key, value).ignore();
        }
        pipe.query::<()>(&mut self.connection)?;
        Ok(())
    }

    fn delete_many(&mut self, keys: &[String]) -> EngineResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.del(key).ignore();
        }
        pipe.query::<()>(&mut self.connection)?;
        Ok(())
    }

    fn clear(&mut self) -> EngineResult<()> {
        let mut stale: Vec<String> = Vec::new();
        for pattern in ["similar-post:*", "similar-user:*"] {
            let keys: Vec<String> = self.connection.scan_match::<_, String>(pattern)?.collect();
            stale.extend(keys);
        }
        self.delete_many(&stale)
    }
}

/// In-process cache, used by tests and embedded deployments.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: HashMap<String, String>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl NeighborCache for MemoryCache {
    fn set(&mut self, key: &str, value: &str) -> EngineResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&mut self, key: &str) -> EngineResult<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn delete(&mut self, key: &str) -> EngineResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn set_many(&mut self, entries: &[(String, String)]) -> EngineResult<()> {
        for (key, value) in entries {
            self.entries.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn delete_many(&mut self, keys: &[String]) -> EngineResult<()> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    fn clear(&mut self) -> EngineResult<()> {
        self.entries.retain(|key, _| {
            !key.starts_with("similar-post:") && !key.starts_with("similar-user:")
        });
        Ok(())
    }
}

/// Read-only serving accessor.
///
/// Returns the ordered neighbor IDs for a subject, or an empty list when
/// the key is absent **or** the cache read fails — the read path degrades
/// in freshness, never in availability.
pub fn read_neighbors(
    cache: &mut dyn NeighborCache,
    kind: NeighborKind,
    id: &str,
) -> Vec<String> {
    let key = kind.key(id);
    match cache.get(&key) {
        Ok(Some(value)) if !value.is_empty() => {
            value.split(',').map(|s| s.to_string()).collect()
        }
        Ok(_) => Vec::new(),
        Err(e) => {
            warn!(key, error = %e, "cache read failed, serving empty neighbor list");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_the_published_scheme() {
        assert_eq!(NeighborKind::Post.key("p1"), "similar-post:p1");
        assert_eq!(NeighborKind::User.key("u1"), "similar-user:u1");
    }

    #[test]
    fn memory_cache_set_get_delete() {
        let mut cache = MemoryCache::new();
        cache.set("similar-post:a", "b,c").unwrap();
        assert_eq!(cache.get("similar-post:a").unwrap().as_deref(), Some("b,c"));

        cache.delete("similar-post:a").unwrap();
        assert_eq!(cache.get("similar-post:a").unwrap(), None);
    }

    #[test]
    fn set_many_overwrites_in_bulk() {
        let mut cache = MemoryCache::new();
        cache
            .set_many(&[
                ("similar-post:a".into(), "b".into()),
                ("similar-post:b".into(), "a".into()),
            ])
            .unwrap();
        assert_eq!(cache.len(), 2);

        cache
            .delete_many(&["similar-post:a".into(), "similar-post:b".into()])
            .unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_removes_only_neighbor_keys() {
        let mut cache = MemoryCache::new();
        cache.set("similar-post:gone", "a,b").unwrap();
        cache.set("similar-user:u1", "u2").unwrap();
        cache.set("unrelated:key", "kept").unwrap();

        cache.clear().unwrap();

        assert!(cache.get("similar-post:gone").unwrap().is_none());
        assert!(cache.get("similar-user:u1").unwrap().is_none());
        assert_eq!(cache.get("unrelated:key").unwrap().as_deref(), Some("kept"));
    }

    #[test]
    fn read_neighbors_parses_ordered_lists() {
        let mut cache = MemoryCache::new();
        cache.set("similar-post:a", "b,d,c").unwrap();
        assert_eq!(
            read_neighbors(&mut cache, NeighborKind::Post, "a"),
            vec!["b", "d", "c"]
        );
    }

    #[test]
    fn read_neighbors_treats_absent_and_empty_as_no_neighbors() {
        let mut cache = MemoryCache::new();
        assert!(read_neighbors(&mut cache, NeighborKind::Post, "ghost").is_empty());

        cache.set("similar-user:u", "").unwrap();
        assert!(read_neighbors(&mut cache, NeighborKind::User, "u").is_empty());
    }
}

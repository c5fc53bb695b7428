//! Multi-tier read-through/write-through cache.
//!
//! Three ordered tiers: an in-process map, an optional shared networked
//! cache, and a durable store. Reads probe fastest-first and promote
//! hits into faster tiers with each tier's own fresh TTL, so a promoted
//! copy is never staler than its slower-tier original. Expiry is
//! tier-local and evaluated lazily on read, plus an explicit sweep.

use crate::config::CacheConfig;
use crate::error::Result;
use crate::remote::RemoteCache;
use crate::store::DurableStore;
use crate::types::{CacheKey, CacheStats};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct MemoryEntry {
    payload: Vec<u8>,
    expires_at: Instant,
    last_accessed: Instant,
    access_count: u32,
}

impl MemoryEntry {
    fn new(payload: Vec<u8>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            payload,
            expires_at: now + ttl,
            last_accessed: now,
            access_count: 0,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    remote_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    api_calls_saved: AtomicU64,
    total_requests: AtomicU64,
}

/// Three-tier cache for serialized research results.
///
/// Tier 2 is optional: constructed without a [`RemoteCache`], the cache
/// degrades transparently to two tiers.
pub struct MultiTierCache {
    memory: RwLock<HashMap<String, MemoryEntry>>,
    remote: Option<Arc<dyn RemoteCache>>,
    durable: Arc<dyn DurableStore>,
    config: CacheConfig,
    counters: Counters,
}

impl MultiTierCache {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        remote: Option<Arc<dyn RemoteCache>>,
        config: CacheConfig,
    ) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            remote,
            durable,
            config,
            counters: Counters::default(),
        }
    }

    /// Probe tiers fastest-first, promoting a hit into every faster tier.
    ///
    /// A slow-tier read or decode failure degrades to the next tier and
    /// logs at warn; only an all-tier miss returns `None`.
    pub async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);

        if let Some(payload) = self.memory_get(key) {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            self.counters.api_calls_saved.fetch_add(1, Ordering::Relaxed);
            return Some(payload);
        }

        if let Some(remote) = &self.remote {
            match remote.get(key).await {
                Ok(Some(payload)) => {
                    self.counters.remote_hits.fetch_add(1, Ordering::Relaxed);
                    self.counters.api_calls_saved.fetch_add(1, Ordering::Relaxed);
                    self.memory_put(key, payload.clone(), self.config.memory_ttl());
                    debug!(%key, "remote tier hit, promoted to memory");
                    return Some(payload);
                }
                Ok(None) => {}
                Err(e) => warn!(%key, error = %e, "remote tier read failed, degrading"),
            }
        }

        match self.durable.cache_get(key).await {
            Ok(Some(row)) => {
                if row.expires_at <= Utc::now() {
                    // Stale durable row: drop it on read, count a miss.
                    if let Err(e) = self.durable.cache_delete(key).await {
                        warn!(%key, error = %e, "failed to drop expired durable row");
                    }
                } else {
                    self.counters.durable_hits.fetch_add(1, Ordering::Relaxed);
                    self.counters.api_calls_saved.fetch_add(1, Ordering::Relaxed);
                    self.promote_from_durable(key, &row.payload).await;
                    debug!(%key, "durable tier hit, promoted to faster tiers");
                    return Some(row.payload);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(%key, error = %e, "durable tier read failed, degrading"),
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write through all tiers, clamping `ttl` to each tier's maximum.
    ///
    /// Slow-tier write failures degrade with a warning; the in-process
    /// write cannot fail.
    pub async fn set(&self, key: &CacheKey, payload: &[u8], ttl: Duration) -> Result<()> {
        self.memory_put(key, payload.to_vec(), ttl.min(self.config.memory_ttl()));

        if let Some(remote) = &self.remote {
            let remote_ttl = ttl.min(self.config.remote_ttl());
            if let Err(e) = remote.set(key, payload, remote_ttl).await {
                warn!(%key, error = %e, "remote tier write failed");
            }
        }

        let durable_ttl = ttl.min(self.config.durable_ttl());
        let expires_at = Utc::now()
            + chrono::Duration::from_std(durable_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(self.config.durable_ttl_seconds as i64));
        if let Err(e) = self.durable.cache_put(key, payload, expires_at).await {
            warn!(%key, error = %e, "durable tier write failed");
        }

        Ok(())
    }

    /// Remove a key from every tier. Absence in any tier is not an error.
    pub async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.memory.write().remove(key.as_str());

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete(key).await {
                warn!(%key, error = %e, "remote tier delete failed");
            }
        }

        if let Err(e) = self.durable.cache_delete(key).await {
            warn!(%key, error = %e, "durable tier delete failed");
        }

        Ok(())
    }

    /// Sweep expired entries: the in-process tier synchronously, the
    /// durable tier via one bounded delete. The networked tier expires
    /// entries natively and is not swept. Returns entries removed.
    pub async fn cleanup_expired(&self) -> u64 {
        let now = Instant::now();
        let removed_memory = {
            let mut memory = self.memory.write();
            let before = memory.len();
            memory.retain(|_, entry| !entry.is_expired(now));
            (before - memory.len()) as u64
        };

        let removed_durable = match self
            .durable
            .cache_delete_expired(Utc::now(), self.config.cleanup_batch_limit)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "durable tier sweep failed");
                0
            }
        };

        if removed_memory + removed_durable > 0 {
            debug!(removed_memory, removed_durable, "cache sweep complete");
        }
        removed_memory + removed_durable
    }

    /// TTL requested for merged research results on cache write.
    pub fn result_ttl(&self) -> Duration {
        self.config.result_ttl()
    }

    /// Snapshot of the running counters. Never blocks writers.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            remote_hits: self.counters.remote_hits.load(Ordering::Relaxed),
            durable_hits: self.counters.durable_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            api_calls_saved: self.counters.api_calls_saved.load(Ordering::Relaxed),
            total_requests: self.counters.total_requests.load(Ordering::Relaxed),
        }
    }

    /// Number of live entries in the in-process tier (expired included
    /// until the next read or sweep touches them).
    pub fn memory_len(&self) -> usize {
        self.memory.read().len()
    }

    fn memory_get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let now = Instant::now();
        {
            let mut memory = self.memory.write();
            match memory.get_mut(key.as_str()) {
                Some(entry) if !entry.is_expired(now) => {
                    entry.access_count += 1;
                    entry.last_accessed = now;
                    return Some(entry.payload.clone());
                }
                Some(_) => {
                    // Expired in this tier only; the probe continues below.
                    memory.remove(key.as_str());
                }
                None => {}
            }
        }
        None
    }

    fn memory_put(&self, key: &CacheKey, payload: Vec<u8>, ttl: Duration) {
        self.memory
            .write()
            .insert(key.as_str().to_string(), MemoryEntry::new(payload, ttl));
    }

    /// Promotion resets freshness: each faster tier gets its own TTL,
    /// never the source row's remaining lifetime.
    async fn promote_from_durable(&self, key: &CacheKey, payload: &[u8]) {
        self.memory_put(key, payload.to_vec(), self.config.memory_ttl());

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.set(key, payload, self.config.remote_ttl()).await {
                warn!(%key, error = %e, "promotion write to remote tier failed");
            }
        }
    }
}

//! Networked cache seam (tier 2).

use crate::error::Result;
use crate::types::CacheKey;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Shared networked cache tier. Implementations expire entries on their
/// own; the engine never sweeps this tier.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &CacheKey, payload: &[u8], ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &CacheKey) -> Result<()>;
}

/// In-process [`RemoteCache`] with native TTL expiry, for tests and
/// single-node deployments where no shared cache is available.
#[derive(Default)]
pub struct InProcessRemoteCache {
    entries: RwLock<HashMap<String, (Vec<u8>, Instant)>>,
}

impl InProcessRemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl RemoteCache for InProcessRemoteCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key.as_str()) {
                Some((payload, deadline)) if *deadline > now => {
                    return Ok(Some(payload.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: drop the entry on read.
        self.entries.write().remove(key.as_str());
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, payload: &[u8], ttl: Duration) -> Result<()> {
        self.entries.write().insert(
            key.as_str().to_string(),
            (payload.to_vec(), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.entries.write().remove(key.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResearchContext;

    fn key() -> CacheKey {
        ResearchContext {
            industry: "retail".to_string(),
            audience: "shoppers".to_string(),
            pain_points: vec![],
            product_categories: vec![],
            business_type: "b2c".to_string(),
        }
        .cache_key()
    }

    #[tokio::test]
    async fn test_round_trip_and_delete() {
        let cache = InProcessRemoteCache::new();
        let k = key();

        cache.set(&k, b"value", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get(&k).await.unwrap().unwrap(), b"value");

        cache.delete(&k).await.unwrap();
        assert!(cache.get(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_native_expiry() {
        let cache = InProcessRemoteCache::new();
        let k = key();

        cache.set(&k, b"value", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.get(&k).await.unwrap().is_none());
        assert!(cache.is_empty());
    }
}

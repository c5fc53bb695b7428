//! Durable store seam shared by the cache's slowest tier and the call ledger.

use crate::error::Result;
use crate::types::{CacheKey, DailyUsage, ProviderCallRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// One durable cache row.
#[derive(Debug, Clone)]
pub struct DurableRow {
    pub payload: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

/// Storage backend for durable cache rows and the provider call ledger.
///
/// The engine assumes nothing about the backing schema beyond key,
/// payload, and timestamp columns. Implementations must make
/// `ledger_append` + `ledger_calls_on` safe under concurrent appends
/// for the same provider and day.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn cache_get(&self, key: &CacheKey) -> Result<Option<DurableRow>>;

    async fn cache_put(
        &self,
        key: &CacheKey,
        payload: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn cache_delete(&self, key: &CacheKey) -> Result<()>;

    /// Delete up to `limit` rows past their expiry. Returns rows removed.
    async fn cache_delete_expired(&self, now: DateTime<Utc>, limit: u32) -> Result<u64>;

    async fn ledger_append(&self, record: &ProviderCallRecord) -> Result<()>;

    /// Number of ledger rows for `provider` on the given UTC calendar day.
    async fn ledger_calls_on(&self, provider: &str, date: NaiveDate) -> Result<u32>;

    /// Per-day aggregates for the trailing `days`-day window, oldest first.
    /// Days without calls are omitted.
    async fn ledger_daily_usage(&self, provider: &str, days: u32) -> Result<Vec<DailyUsage>>;
}

/// In-process [`DurableStore`] for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<String, DurableRow>>,
    ledger: Mutex<Vec<ProviderCallRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total ledger rows, across all providers.
    pub fn ledger_len(&self) -> usize {
        self.ledger.lock().len()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn cache_get(&self, key: &CacheKey) -> Result<Option<DurableRow>> {
        Ok(self.rows.lock().get(key.as_str()).cloned())
    }

    async fn cache_put(
        &self,
        key: &CacheKey,
        payload: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.rows.lock().insert(
            key.as_str().to_string(),
            DurableRow {
                payload: payload.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn cache_delete(&self, key: &CacheKey) -> Result<()> {
        self.rows.lock().remove(key.as_str());
        Ok(())
    }

    async fn cache_delete_expired(&self, now: DateTime<Utc>, limit: u32) -> Result<u64> {
        let mut rows = self.rows.lock();
        let expired: Vec<String> = rows
            .iter()
            .filter(|(_, row)| row.expires_at <= now)
            .take(limit as usize)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            rows.remove(key);
        }
        Ok(expired.len() as u64)
    }

    async fn ledger_append(&self, record: &ProviderCallRecord) -> Result<()> {
        self.ledger.lock().push(record.clone());
        Ok(())
    }

    async fn ledger_calls_on(&self, provider: &str, date: NaiveDate) -> Result<u32> {
        let count = self
            .ledger
            .lock()
            .iter()
            .filter(|r| r.provider == provider && r.timestamp.date_naive() == date)
            .count();
        Ok(count as u32)
    }

    async fn ledger_daily_usage(&self, provider: &str, days: u32) -> Result<Vec<DailyUsage>> {
        let cutoff = Utc::now().date_naive() - Duration::days(days.saturating_sub(1) as i64);
        let mut by_day: BTreeMap<NaiveDate, DailyUsage> = BTreeMap::new();

        for record in self.ledger.lock().iter() {
            if record.provider != provider {
                continue;
            }
            let day = record.timestamp.date_naive();
            if day < cutoff {
                continue;
            }
            let entry = by_day.entry(day).or_insert_with(|| DailyUsage {
                date: day,
                calls: 0,
                rows_fetched: 0,
                failures: 0,
            });
            entry.calls += 1;
            entry.rows_fetched += record.rows_fetched as u64;
            if !record.success {
                entry.failures += 1;
            }
        }

        Ok(by_day.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(provider: &str, success: bool, days_ago: i64) -> ProviderCallRecord {
        ProviderCallRecord {
            id: Uuid::new_v4(),
            provider: provider.to_string(),
            call_type: "research".to_string(),
            rows_fetched: 3,
            latency_ms: 120,
            success,
            error: if success { None } else { Some("boom".to_string()) },
            run_id: Uuid::new_v4(),
            timestamp: Utc::now() - Duration::days(days_ago),
        }
    }

    fn key(name: &str) -> CacheKey {
        crate::types::ResearchContext {
            industry: name.to_string(),
            audience: "a".to_string(),
            pain_points: vec![],
            product_categories: vec![],
            business_type: "b2b".to_string(),
        }
        .cache_key()
    }

    #[tokio::test]
    async fn test_cache_row_round_trip() {
        let store = MemoryStore::new();
        let k = key("one");

        store
            .cache_put(&k, b"payload", Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        let row = store.cache_get(&k).await.unwrap().unwrap();
        assert_eq!(row.payload, b"payload");

        store.cache_delete(&k).await.unwrap();
        assert!(store.cache_get(&k).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_expired_is_bounded() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .cache_put(&key(&format!("k{i}")), b"x", Utc::now() - Duration::minutes(1))
                .await
                .unwrap();
        }

        let removed = store.cache_delete_expired(Utc::now(), 3).await.unwrap();
        assert_eq!(removed, 3);

        let removed = store.cache_delete_expired(Utc::now(), 10).await.unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn test_ledger_counts_by_provider_and_day() {
        let store = MemoryStore::new();
        store.ledger_append(&record("trends", true, 0)).await.unwrap();
        store.ledger_append(&record("trends", false, 0)).await.unwrap();
        store.ledger_append(&record("trends", true, 1)).await.unwrap();
        store.ledger_append(&record("keywords", true, 0)).await.unwrap();

        let today = Utc::now().date_naive();
        assert_eq!(store.ledger_calls_on("trends", today).await.unwrap(), 2);
        assert_eq!(store.ledger_calls_on("keywords", today).await.unwrap(), 1);
        assert_eq!(store.ledger_calls_on("missing", today).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_daily_usage_window() {
        let store = MemoryStore::new();
        store.ledger_append(&record("trends", true, 0)).await.unwrap();
        store.ledger_append(&record("trends", false, 1)).await.unwrap();
        store.ledger_append(&record("trends", true, 10)).await.unwrap();

        let usage = store.ledger_daily_usage("trends", 7).await.unwrap();
        assert_eq!(usage.len(), 2);
        // Oldest first.
        assert!(usage[0].date < usage[1].date);
        assert_eq!(usage[0].failures, 1);
        assert_eq!(usage[1].calls, 1);
        assert_eq!(usage[1].rows_fetched, 3);
    }
}

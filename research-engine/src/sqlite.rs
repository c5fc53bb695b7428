//! SQLite-backed [`DurableStore`].

use crate::error::Result;
use crate::store::{DurableRow, DurableStore};
use crate::types::{CacheKey, DailyUsage, ProviderCallRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::info;

/// Durable tier and call ledger on a SQLite database.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect with a sqlx database URL and create missing tables.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(url, "sqlite store ready");
        Ok(store)
    }

    /// Open (or create) a database file at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::connect(&format!("sqlite://{}?mode=rwc", path.display())).await
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS research_cache (
                cache_key  TEXT PRIMARY KEY,
                payload    BLOB NOT NULL,
                expires_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS provider_calls (
                id           TEXT PRIMARY KEY,
                provider     TEXT NOT NULL,
                call_type    TEXT NOT NULL,
                rows_fetched INTEGER NOT NULL,
                latency_ms   INTEGER NOT NULL,
                success      INTEGER NOT NULL,
                error        TEXT,
                run_id       TEXT NOT NULL,
                timestamp    TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_provider_calls_provider_ts
             ON provider_calls (provider, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_research_cache_expiry
             ON research_cache (expires_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn cache_get(&self, key: &CacheKey) -> Result<Option<DurableRow>> {
        let row = sqlx::query(
            "SELECT payload, expires_at FROM research_cache WHERE cache_key = ?1",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => Some(DurableRow {
                payload: row.try_get("payload")?,
                expires_at: row.try_get::<DateTime<Utc>, _>("expires_at")?,
            }),
            None => None,
        })
    }

    async fn cache_put(
        &self,
        key: &CacheKey,
        payload: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO research_cache (cache_key, payload, expires_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (cache_key) DO UPDATE SET
                 payload = excluded.payload,
                 expires_at = excluded.expires_at",
        )
        .bind(key.as_str())
        .bind(payload)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cache_delete(&self, key: &CacheKey) -> Result<()> {
        sqlx::query("DELETE FROM research_cache WHERE cache_key = ?1")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cache_delete_expired(&self, now: DateTime<Utc>, limit: u32) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM research_cache WHERE rowid IN (
                 SELECT rowid FROM research_cache
                 WHERE expires_at <= ?1
                 LIMIT ?2
             )",
        )
        .bind(now)
        .bind(limit as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn ledger_append(&self, record: &ProviderCallRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO provider_calls
                 (id, provider, call_type, rows_fetched, latency_ms,
                  success, error, run_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(record.id.to_string())
        .bind(&record.provider)
        .bind(&record.call_type)
        .bind(record.rows_fetched as i64)
        .bind(record.latency_ms as i64)
        .bind(record.success)
        .bind(&record.error)
        .bind(record.run_id.to_string())
        .bind(record.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ledger_calls_on(&self, provider: &str, date: NaiveDate) -> Result<u32> {
        let start = date.and_time(NaiveTime::MIN).and_utc();
        let end = start + Duration::days(1);

        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM provider_calls
             WHERE provider = ?1 AND timestamp >= ?2 AND timestamp < ?3",
        )
        .bind(provider)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        let n: i64 = row.try_get("n")?;
        Ok(n as u32)
    }

    async fn ledger_daily_usage(&self, provider: &str, days: u32) -> Result<Vec<DailyUsage>> {
        let cutoff = (Utc::now().date_naive() - Duration::days(days.saturating_sub(1) as i64))
            .and_time(NaiveTime::MIN)
            .and_utc();

        // Timestamps are stored in a fixed-width UTC text format, so the
        // leading ten characters are the calendar day.
        let rows = sqlx::query(
            "SELECT substr(timestamp, 1, 10) AS day,
                    COUNT(*) AS calls,
                    COALESCE(SUM(rows_fetched), 0) AS rows_fetched,
                    SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END) AS failures
             FROM provider_calls
             WHERE provider = ?1 AND timestamp >= ?2
             GROUP BY day
             ORDER BY day",
        )
        .bind(provider)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut usage = Vec::with_capacity(rows.len());
        for row in rows {
            let day: String = row.try_get("day")?;
            let date = day.parse::<NaiveDate>().map_err(|e| {
                crate::error::EngineError::Storage(format!("bad day column '{day}': {e}"))
            })?;
            usage.push(DailyUsage {
                date,
                calls: row.try_get::<i64, _>("calls")? as u32,
                rows_fetched: row.try_get::<i64, _>("rows_fetched")? as u64,
                failures: row.try_get::<i64, _>("failures")? as u32,
            });
        }
        Ok(usage)
    }
}

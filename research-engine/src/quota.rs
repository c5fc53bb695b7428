//! Provider call ledger and daily quota tracking.
//!
//! Every outbound provider call is appended to the durable ledger, and
//! the provider's same-day status is recomputed synchronously from the
//! ledger. Day rollover is lazy: the first log or status read of a new
//! UTC calendar day starts from zero. Ledger write failures propagate to
//! the caller; quota correctness cannot be verified without the ledger,
//! so callers must fail closed.

use crate::config::QuotaConfig;
use crate::error::Result;
use crate::store::DurableStore;
use crate::types::{DailyUsage, ProviderCallRecord, QuotaLevel, QuotaStatus};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Destination for quota alerts. No delivery channel is mandated.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, provider: &str, status: &QuotaStatus);
}

/// Default sink: a structured warning in the log stream.
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn notify(&self, provider: &str, status: &QuotaStatus) {
        warn!(
            provider,
            used = status.used_today,
            limit = status.daily_limit,
            level = ?status.level,
            "provider quota alert"
        );
    }
}

/// Tracks per-provider daily call budgets against the durable ledger.
pub struct UsageTracker {
    store: Arc<dyn DurableStore>,
    alerts: Arc<dyn AlertSink>,
    config: QuotaConfig,
    // Alert suppression state, per provider. Process-lifetime scoped.
    last_alert: DashMap<String, DateTime<Utc>>,
}

impl UsageTracker {
    pub fn new(store: Arc<dyn DurableStore>, alerts: Arc<dyn AlertSink>, config: QuotaConfig) -> Self {
        Self {
            store,
            alerts,
            config,
            last_alert: DashMap::new(),
        }
    }

    /// Append one call record, recompute today's status, and alert if the
    /// status is degraded and the last alert for this provider is older
    /// than the cooldown window.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_call(
        &self,
        provider: &str,
        call_type: &str,
        rows_fetched: u32,
        latency: Duration,
        success: bool,
        error: Option<String>,
        run_id: Uuid,
    ) -> Result<ProviderCallRecord> {
        let record = ProviderCallRecord {
            id: Uuid::new_v4(),
            provider: provider.to_string(),
            call_type: call_type.to_string(),
            rows_fetched,
            latency_ms: latency.as_millis() as u64,
            success,
            error,
            run_id,
            timestamp: Utc::now(),
        };

        self.store.ledger_append(&record).await?;

        let status = self.status_for(provider, record.timestamp.date_naive()).await?;
        debug!(
            provider,
            used = status.used_today,
            remaining = status.remaining,
            level = ?status.level,
            "provider call logged"
        );

        if status.level != QuotaLevel::Healthy && self.alert_window_open(provider) {
            self.alerts.notify(provider, &status).await;
            self.last_alert.insert(provider.to_string(), Utc::now());
        }

        Ok(record)
    }

    /// Pre-flight admission check: true iff at least `n` calls remain in
    /// today's budget. A ledger read failure propagates so callers can
    /// fail closed.
    pub async fn check_available(&self, provider: &str, n: u32) -> Result<bool> {
        let status = self.get_quota_status(provider, None).await?;
        Ok(status.remaining >= n)
    }

    /// Status for the given day, or today. Days with no ledger rows yield
    /// a synthetic zero-usage, full-remaining status.
    pub async fn get_quota_status(
        &self,
        provider: &str,
        date: Option<NaiveDate>,
    ) -> Result<QuotaStatus> {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        self.status_for(provider, date).await
    }

    /// Per-day usage aggregates for the trailing window. Reporting only;
    /// admission decisions never consult history.
    pub async fn get_history(&self, provider: &str, days: u32) -> Result<Vec<DailyUsage>> {
        self.store.ledger_daily_usage(provider, days).await
    }

    async fn status_for(&self, provider: &str, date: NaiveDate) -> Result<QuotaStatus> {
        let daily_limit = self.config.daily_limit(provider);
        let used_today = self.store.ledger_calls_on(provider, date).await?;

        let fraction = if daily_limit == 0 {
            1.0
        } else {
            used_today as f32 / daily_limit as f32
        };

        Ok(QuotaStatus {
            provider: provider.to_string(),
            date,
            daily_limit,
            used_today,
            remaining: daily_limit.saturating_sub(used_today),
            percent_used: fraction * 100.0,
            level: QuotaLevel::classify(
                fraction,
                self.config.warning_threshold,
                self.config.critical_threshold,
            ),
            last_alert_sent: self.last_alert.get(provider).map(|entry| *entry),
        })
    }

    fn alert_window_open(&self, provider: &str) -> bool {
        match self.last_alert.get(provider) {
            Some(sent) => Utc::now() - *sent > self.config.alert_cooldown(),
            None => true,
        }
    }
}

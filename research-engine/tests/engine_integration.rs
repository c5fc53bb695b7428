//! End-to-end behavior of the cache + tracker + orchestrator triad.

use async_trait::async_trait;
use research_engine::config::{CacheConfig, OrchestratorConfig, QuotaConfig};
use research_engine::providers::StaticProvider;
use research_engine::quota::TracingAlertSink;
use chrono::{DateTime, NaiveDate, Utc};
use research_engine::store::{DurableRow, DurableStore, MemoryStore};
use research_engine::types::{
    CacheKey, ContentGap, DailyUsage, PainPoint, ProviderCallRecord, ProviderFindings,
    SourceStatus, TrendData, TrendTerm,
};
use research_engine::{
    EngineError, MultiTierCache, ResearchContext, ResearchOrchestrator, ResearchProvider, Result,
    UsageTracker,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

fn context() -> ResearchContext {
    ResearchContext {
        industry: "home fitness".to_string(),
        audience: "busy parents".to_string(),
        pain_points: vec!["no time".to_string(), "no space".to_string()],
        product_categories: vec!["equipment".to_string()],
        business_type: "d2c".to_string(),
    }
}

fn findings_for(name: &str) -> ProviderFindings {
    ProviderFindings {
        trends: Some(TrendData {
            terms: vec![TrendTerm {
                term: format!("{name} trend"),
                momentum: 1.1,
            }],
        }),
        pain_points: Some(vec![PainPoint {
            theme: "no time".to_string(),
            quote: None,
            frequency: 7,
        }]),
        content_gaps: Some(vec![ContentGap {
            topic: "10 minute workouts".to_string(),
            search_volume: Some(4_500),
            difficulty: None,
        }]),
        competitor_insights: None,
    }
}

/// Provider that always fails.
struct ErrorProvider;

#[async_trait]
impl ResearchProvider for ErrorProvider {
    fn name(&self) -> &str {
        "broken"
    }

    async fn research(&self, _context: &ResearchContext) -> Result<ProviderFindings> {
        Err(EngineError::Provider("upstream 500".to_string()))
    }
}

/// Provider that never returns within any test budget.
struct HangingProvider;

#[async_trait]
impl ResearchProvider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn research(&self, _context: &ResearchContext) -> Result<ProviderFindings> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ProviderFindings::default())
    }
}

/// Durable store whose writes never complete, as when the database stops
/// responding mid-run.
struct StalledWriteStore {
    inner: MemoryStore,
}

#[async_trait]
impl DurableStore for StalledWriteStore {
    async fn cache_get(&self, key: &CacheKey) -> Result<Option<DurableRow>> {
        self.inner.cache_get(key).await
    }

    async fn cache_put(
        &self,
        _key: &CacheKey,
        _payload: &[u8],
        _expires_at: DateTime<Utc>,
    ) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn cache_delete(&self, key: &CacheKey) -> Result<()> {
        self.inner.cache_delete(key).await
    }

    async fn cache_delete_expired(&self, now: DateTime<Utc>, limit: u32) -> Result<u64> {
        self.inner.cache_delete_expired(now, limit).await
    }

    async fn ledger_append(&self, record: &ProviderCallRecord) -> Result<()> {
        self.inner.ledger_append(record).await
    }

    async fn ledger_calls_on(&self, provider: &str, date: NaiveDate) -> Result<u32> {
        self.inner.ledger_calls_on(provider, date).await
    }

    async fn ledger_daily_usage(&self, provider: &str, days: u32) -> Result<Vec<DailyUsage>> {
        self.inner.ledger_daily_usage(provider, days).await
    }
}

struct Harness {
    orchestrator: ResearchOrchestrator,
    store: Arc<MemoryStore>,
}

fn harness(
    providers: Vec<Arc<dyn ResearchProvider>>,
    quota: QuotaConfig,
    orchestrator_config: OrchestratorConfig,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MultiTierCache::new(
        store.clone(),
        None,
        CacheConfig::default(),
    ));
    let tracker = Arc::new(UsageTracker::new(
        store.clone(),
        Arc::new(TracingAlertSink),
        quota,
    ));

    let mut orchestrator = ResearchOrchestrator::new(cache, tracker, orchestrator_config);
    for provider in providers {
        orchestrator.register_provider(provider);
    }
    Harness {
        orchestrator,
        store,
    }
}

#[tokio::test]
async fn degraded_run_names_only_working_providers() {
    // Provider A works, B always errors, C is out of quota.
    let mut quota = QuotaConfig::default();
    quota.daily_limits.insert("exhausted".to_string(), 0);

    let h = harness(
        vec![
            Arc::new(StaticProvider::new("alpha", findings_for("alpha"))),
            Arc::new(ErrorProvider),
            Arc::new(StaticProvider::new("exhausted", findings_for("exhausted"))),
        ],
        quota,
        OrchestratorConfig::default(),
    );

    let result = h.orchestrator.conduct(&context()).await.unwrap();

    assert_eq!(result.contributing_providers(), vec!["alpha"]);
    assert!(!result.is_complete());

    let statuses: Vec<_> = result.sources.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            SourceStatus::Contributed,
            SourceStatus::Failed,
            SourceStatus::SkippedQuota,
        ]
    );

    // The quota skip is an admission decision: no call was issued for it.
    assert_eq!(h.store.ledger_len(), 2);
}

#[tokio::test]
async fn global_timeout_bounds_the_run() {
    let config = OrchestratorConfig {
        global_timeout_ms: 200,
        provider_timeout_ms: 10_000,
    };

    let h = harness(
        vec![
            Arc::new(StaticProvider::new("alpha", findings_for("alpha"))),
            Arc::new(HangingProvider),
        ],
        QuotaConfig::default(),
        config,
    );

    let started = Instant::now();
    let result = h.orchestrator.conduct(&context()).await.unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_secs(2),
        "run took {elapsed:?}, expected roughly the 200ms budget"
    );

    assert_eq!(result.contributing_providers(), vec!["alpha"]);
    assert_eq!(result.sources[1].status, SourceStatus::TimedOut);

    // The hanging task keeps running detached; its call still reaches the
    // ledger shortly after cancellation.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.store.ledger_len(), 2);
}

#[tokio::test]
async fn stalled_durable_write_does_not_stall_the_run() {
    let store = Arc::new(StalledWriteStore {
        inner: MemoryStore::new(),
    });
    let cache = Arc::new(MultiTierCache::new(
        store.clone(),
        None,
        CacheConfig::default(),
    ));
    let tracker = Arc::new(UsageTracker::new(
        store.clone(),
        Arc::new(TracingAlertSink),
        QuotaConfig::default(),
    ));
    let mut orchestrator = ResearchOrchestrator::new(
        cache,
        tracker,
        OrchestratorConfig {
            global_timeout_ms: 200,
            provider_timeout_ms: 10_000,
        },
    );
    orchestrator.register_provider(Arc::new(StaticProvider::new("alpha", findings_for("alpha"))));

    let started = Instant::now();
    let first = orchestrator.conduct(&context()).await.unwrap();
    let elapsed = started.elapsed();

    // The durable write hangs; the run still honors its global budget.
    assert!(
        elapsed < Duration::from_secs(2),
        "run took {elapsed:?}, expected roughly the 200ms budget"
    );
    assert_eq!(first.contributing_providers(), vec!["alpha"]);

    // The in-process tier was written before the cut-off: replaying the
    // same context is a cache hit and spends no provider budget.
    let second = orchestrator.conduct(&context()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.inner.ledger_len(), 1);
}

#[tokio::test]
async fn straggler_outcome_after_merge_is_discarded() {
    // A task cancelled at the deadline finishes its ledger write only
    // after the merge step has already drained the outcome buffer; the
    // late write must be dropped, never blow up the detached task.
    let panicked = Arc::new(AtomicBool::new(false));
    let observed = panicked.clone();
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        observed.store(true, Ordering::SeqCst);
        previous(info);
    }));

    let h = harness(
        vec![
            Arc::new(StaticProvider::new("alpha", findings_for("alpha"))),
            Arc::new(HangingProvider),
        ],
        QuotaConfig::default(),
        OrchestratorConfig {
            global_timeout_ms: 100,
            provider_timeout_ms: 10_000,
        },
    );

    let result = h.orchestrator.conduct(&context()).await.unwrap();
    assert_eq!(result.sources[1].status, SourceStatus::TimedOut);

    // Give the cancelled task time to log its call and discard its outcome.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.store.ledger_len(), 2);
    assert!(
        !panicked.load(Ordering::SeqCst),
        "a late task write panicked"
    );
}

#[tokio::test]
async fn replay_within_ttl_spends_no_provider_budget() {
    let h = harness(
        vec![
            Arc::new(StaticProvider::new("alpha", findings_for("alpha"))),
            Arc::new(StaticProvider::new("beta", findings_for("beta"))),
        ],
        QuotaConfig::default(),
        OrchestratorConfig::default(),
    );

    let first = h.orchestrator.conduct(&context()).await.unwrap();
    let calls_after_first = h.store.ledger_len();
    assert_eq!(calls_after_first, 2);

    let second = h.orchestrator.conduct(&context()).await.unwrap();

    // Byte-identical replay, zero additional provider calls.
    assert_eq!(first, second);
    assert_eq!(h.store.ledger_len(), calls_after_first);
}

#[tokio::test]
async fn partial_results_are_cached_and_replayed() {
    let mut quota = QuotaConfig::default();
    quota.daily_limits.insert("exhausted".to_string(), 0);

    let h = harness(
        vec![
            Arc::new(StaticProvider::new("alpha", findings_for("alpha"))),
            Arc::new(StaticProvider::new("exhausted", findings_for("exhausted"))),
        ],
        quota,
        OrchestratorConfig::default(),
    );

    let first = h.orchestrator.conduct(&context()).await.unwrap();
    assert!(!first.is_complete());

    // Replaying before expiry returns the same degraded result instead of
    // retrying the skipped provider.
    let second = h.orchestrator.conduct(&context()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.store.ledger_len(), 1);
}

#[tokio::test]
async fn quota_exhaustion_applies_across_runs() {
    let mut quota = QuotaConfig::default();
    quota.daily_limits.insert("alpha".to_string(), 2);

    let h = harness(
        vec![Arc::new(StaticProvider::new("alpha", findings_for("alpha")))],
        quota,
        OrchestratorConfig::default(),
    );

    // Distinct contexts bypass the result cache and spend budget.
    for i in 0..3 {
        let mut ctx = context();
        ctx.audience = format!("audience {i}");
        h.orchestrator.conduct(&ctx).await.unwrap();
    }

    let mut ctx = context();
    ctx.audience = "audience 3".to_string();
    let result = h.orchestrator.conduct(&ctx).await.unwrap();

    assert_eq!(result.sources[0].status, SourceStatus::SkippedQuota);
    assert_eq!(h.store.ledger_len(), 2);
}

#[tokio::test]
async fn different_contexts_do_not_share_cache_entries() {
    let h = harness(
        vec![Arc::new(StaticProvider::new("alpha", findings_for("alpha")))],
        QuotaConfig::default(),
        OrchestratorConfig::default(),
    );

    let a = h.orchestrator.conduct(&context()).await.unwrap();

    let mut other = context();
    other.industry = "b2b saas".to_string();
    let b = h.orchestrator.conduct(&other).await.unwrap();

    assert_ne!(a.context_key, b.context_key);
    assert_eq!(h.store.ledger_len(), 2);
}

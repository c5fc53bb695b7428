//! Quota-bounded parallel research orchestration.
//!
//! One run: probe the cache, and on a miss fan out concurrently to every
//! registered provider that passes the quota admission check, each call
//! under its own timeout nested inside one global run budget. Whatever
//! finished by the deadline is merged, in registration order, into one
//! partial-by-design [`ResearchResult`] that is written back through the
//! cache. One provider's failure never aborts its siblings.

use crate::cache::MultiTierCache;
use crate::config::OrchestratorConfig;
use crate::error::{EngineError, Result};
use crate::providers::ResearchProvider;
use crate::quota::UsageTracker;
use crate::types::{
    ProviderFindings, ResearchContext, ResearchResult, SourceRecord, SourceStatus,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-orchestrator run counters.
#[derive(Debug, Default, Clone)]
pub struct OrchestratorStats {
    pub total_runs: u64,
    pub cache_hits: u64,
    pub fan_outs: u64,
    pub degraded_runs: u64,
    pub avg_run_latency_ms: f64,
}

enum TaskOutcome {
    Contributed(ProviderFindings),
    Failed(String),
    TimedOut,
    SkippedQuota,
    LedgerError,
}

impl TaskOutcome {
    fn status(&self) -> SourceStatus {
        match self {
            TaskOutcome::Contributed(_) => SourceStatus::Contributed,
            TaskOutcome::Failed(_) => SourceStatus::Failed,
            TaskOutcome::TimedOut => SourceStatus::TimedOut,
            TaskOutcome::SkippedQuota => SourceStatus::SkippedQuota,
            TaskOutcome::LedgerError => SourceStatus::LedgerError,
        }
    }
}

/// Produces the best available [`ResearchResult`] for a context within a
/// fixed time budget.
pub struct ResearchOrchestrator {
    cache: Arc<MultiTierCache>,
    tracker: Arc<UsageTracker>,
    providers: Vec<Arc<dyn ResearchProvider>>,
    config: OrchestratorConfig,
    stats: RwLock<OrchestratorStats>,
}

impl ResearchOrchestrator {
    pub fn new(
        cache: Arc<MultiTierCache>,
        tracker: Arc<UsageTracker>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            cache,
            tracker,
            providers: Vec::new(),
            config,
            stats: RwLock::new(OrchestratorStats::default()),
        }
    }

    /// Register a provider. Registration order fixes merge and
    /// provenance order for every run.
    pub fn register_provider(&mut self, provider: Arc<dyn ResearchProvider>) {
        debug!(provider = provider.name(), "registering research provider");
        self.providers.push(provider);
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.stats.read().clone()
    }

    /// Run one research request end to end.
    ///
    /// Partial provider failure, quota skips, and the global timeout are
    /// all normal termination paths reflected in the result's provenance.
    /// Errors are reserved for a malformed context and for runs where no
    /// provider could be safely queried because the ledger is down.
    pub async fn conduct(&self, context: &ResearchContext) -> Result<ResearchResult> {
        context.validate()?;
        let started = Instant::now();
        let key = context.cache_key();

        if let Some(payload) = self.cache.get(&key).await {
            match serde_json::from_slice::<ResearchResult>(&payload) {
                Ok(result) => {
                    debug!(%key, "cache hit, returning stored result");
                    self.record_run(started, true, &result);
                    return Ok(result);
                }
                Err(e) => {
                    warn!(%key, error = %e, "cached payload undecodable, dropping");
                    self.cache.delete(&key).await?;
                }
            }
        }

        let run_id = Uuid::new_v4();
        info!(%key, %run_id, providers = self.providers.len(), "cache miss, fanning out");

        let outcomes = self.fan_out(context, run_id).await;

        let mut result = ResearchResult::new(run_id, key.clone());
        for (provider, outcome) in self.providers.iter().zip(outcomes) {
            let outcome = outcome.unwrap_or(TaskOutcome::TimedOut);
            result.sources.push(SourceRecord {
                provider: provider.name().to_string(),
                status: outcome.status(),
            });
            if let TaskOutcome::Contributed(findings) = outcome {
                result.absorb(findings);
            }
        }

        if !self.providers.is_empty()
            && result
                .sources
                .iter()
                .all(|s| s.status == SourceStatus::LedgerError)
        {
            return Err(EngineError::Ledger(
                "no provider could be safely queried: call ledger unavailable".to_string(),
            ));
        }

        // Partial results are cached like complete ones; replaying the
        // same context before expiry must not spend provider budget again.
        // The write shares the run's global budget: a hung slow tier must
        // not stall the caller past the deadline. The in-process tier is
        // written synchronously before the first await, so replay still
        // works even when the slower tiers are cut off.
        let payload = serde_json::to_vec(&result)?;
        let remaining = self.config.global_timeout().saturating_sub(started.elapsed());
        match tokio::time::timeout(remaining, self.cache.set(&key, &payload, self.cache.result_ttl()))
            .await
        {
            Ok(write) => write?,
            Err(_) => warn!(%key, "cache write cut off by the run budget"),
        }

        info!(
            %run_id,
            contributed = result.contributing_providers().len(),
            complete = result.is_complete(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "research run complete"
        );
        self.record_run(started, false, &result);
        Ok(result)
    }

    /// Admission-check every provider, spawn one task per eligible one,
    /// and wait until all finish or the global budget elapses. Tasks that
    /// outlive the budget keep running detached; their slot stays empty
    /// and their ledger write still happens inside the task.
    async fn fan_out(
        &self,
        context: &ResearchContext,
        run_id: Uuid,
    ) -> Vec<Option<TaskOutcome>> {
        let slots: Arc<Mutex<Vec<Option<TaskOutcome>>>> =
            Arc::new(Mutex::new((0..self.providers.len()).map(|_| None).collect()));
        let token = CancellationToken::new();
        let mut handles = Vec::new();

        for (index, provider) in self.providers.iter().enumerate() {
            match self.tracker.check_available(provider.name(), 1).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(provider = provider.name(), "skipped: quota exhausted");
                    slots.lock()[index] = Some(TaskOutcome::SkippedQuota);
                    continue;
                }
                Err(e) => {
                    // Budget unknown: fail closed for this provider.
                    warn!(provider = provider.name(), error = %e, "admission check failed");
                    slots.lock()[index] = Some(TaskOutcome::LedgerError);
                    continue;
                }
            }

            let provider = provider.clone();
            let tracker = self.tracker.clone();
            let context = context.clone();
            let token = token.clone();
            let slots = slots.clone();
            let per_call = self.config.provider_timeout();

            handles.push(tokio::spawn(async move {
                let call_started = Instant::now();
                let outcome = tokio::select! {
                    _ = token.cancelled() => TaskOutcome::TimedOut,
                    result = tokio::time::timeout(per_call, provider.research(&context)) => {
                        match result {
                            Ok(Ok(findings)) => TaskOutcome::Contributed(findings),
                            Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
                            Err(_) => TaskOutcome::TimedOut,
                        }
                    }
                };

                let (rows, success, error) = match &outcome {
                    TaskOutcome::Contributed(findings) => (findings.rows(), true, None),
                    TaskOutcome::Failed(e) => (0, false, Some(e.clone())),
                    _ => (0, false, Some("timed out".to_string())),
                };

                // The call was issued and consumed quota, so it is logged
                // even when the orchestrator has stopped waiting.
                let outcome = match tracker
                    .log_call(
                        provider.name(),
                        provider.call_type(),
                        rows,
                        call_started.elapsed(),
                        success,
                        error,
                        run_id,
                    )
                    .await
                {
                    Ok(_) => outcome,
                    Err(e) => {
                        warn!(provider = provider.name(), error = %e, "ledger write failed");
                        TaskOutcome::LedgerError
                    }
                };

                // The merge step may have drained the slots already if the
                // global budget elapsed; a straggler's outcome is then
                // simply discarded.
                if let Some(slot) = slots.lock().get_mut(index) {
                    *slot = Some(outcome);
                }
            }));
        }

        let all_done = futures::future::join_all(handles);
        if tokio::time::timeout(self.config.global_timeout(), all_done)
            .await
            .is_err()
        {
            warn!(%run_id, "global research budget elapsed, merging completed tasks");
            token.cancel();
        }

        let mut guard = slots.lock();
        std::mem::take(&mut *guard)
    }

    fn record_run(&self, started: Instant, cache_hit: bool, result: &ResearchResult) {
        let elapsed = started.elapsed().as_millis() as f64;
        let mut stats = self.stats.write();
        stats.total_runs += 1;
        if cache_hit {
            stats.cache_hits += 1;
        } else {
            stats.fan_outs += 1;
            if !result.is_complete() {
                stats.degraded_runs += 1;
            }
        }
        let count = stats.total_runs as f64;
        stats.avg_run_latency_ms = (stats.avg_run_latency_ms * (count - 1.0) + elapsed) / count;
    }
}

//! Domain types shared across the cache, quota tracker, and orchestrator.

use crate::error::{EngineError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Versioned cache key derived deterministically from a [`ResearchContext`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable description of one research request.
///
/// Two contexts that differ only in field casing or tag-list order
/// produce the same [`CacheKey`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchContext {
    pub industry: String,
    pub audience: String,
    pub pain_points: Vec<String>,
    pub product_categories: Vec<String>,
    pub business_type: String,
}

impl ResearchContext {
    /// Validate caller input. Industry and audience are mandatory.
    pub fn validate(&self) -> Result<()> {
        if self.industry.trim().is_empty() {
            return Err(EngineError::InvalidContext(
                "industry must not be empty".to_string(),
            ));
        }
        if self.audience.trim().is_empty() {
            return Err(EngineError::InvalidContext(
                "audience must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Deterministic cache key over the canonical form of this context.
    pub fn cache_key(&self) -> CacheKey {
        let mut pains: Vec<String> = self
            .pain_points
            .iter()
            .map(|p| p.trim().to_lowercase())
            .collect();
        pains.sort();

        let mut categories: Vec<String> = self
            .product_categories
            .iter()
            .map(|c| c.trim().to_lowercase())
            .collect();
        categories.sort();

        let canonical = format!(
            "{}|{}|{}|{}|{}",
            self.industry.trim().to_lowercase(),
            self.audience.trim().to_lowercase(),
            self.business_type.trim().to_lowercase(),
            pains.join(","),
            categories.join(","),
        );

        let digest = blake3::hash(canonical.as_bytes());
        CacheKey(format!("research:v1:{}", digest.to_hex()))
    }
}

/// One trending term reported by a trends provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendTerm {
    pub term: String,
    /// Relative momentum, higher is rising faster.
    pub momentum: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrendData {
    pub terms: Vec<TrendTerm>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PainPoint {
    pub theme: String,
    pub quote: Option<String>,
    pub frequency: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentGap {
    pub topic: String,
    pub search_volume: Option<u64>,
    pub difficulty: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorInsight {
    pub competitor: String,
    pub angle: String,
    pub url: Option<String>,
}

/// The partial result one provider contributes to a research run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderFindings {
    pub trends: Option<TrendData>,
    pub pain_points: Option<Vec<PainPoint>>,
    pub content_gaps: Option<Vec<ContentGap>>,
    pub competitor_insights: Option<Vec<CompetitorInsight>>,
}

impl ProviderFindings {
    /// Total number of items fetched, used for ledger accounting.
    pub fn rows(&self) -> u32 {
        let trends = self.trends.as_ref().map_or(0, |t| t.terms.len());
        let pains = self.pain_points.as_ref().map_or(0, |p| p.len());
        let gaps = self.content_gaps.as_ref().map_or(0, |g| g.len());
        let competitors = self.competitor_insights.as_ref().map_or(0, |c| c.len());
        (trends + pains + gaps + competitors) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
            && self.trends.is_none()
            && self.pain_points.is_none()
            && self.content_gaps.is_none()
            && self.competitor_insights.is_none()
    }
}

/// Why a provider did or did not contribute to a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Contributed,
    SkippedQuota,
    Failed,
    TimedOut,
    LedgerError,
}

/// Provenance entry: one per configured provider per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub provider: String,
    pub status: SourceStatus,
}

/// Merged output of one research run. Partial by design: absent
/// sub-results mean the corresponding providers did not contribute,
/// which callers detect via [`ResearchResult::sources`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub run_id: Uuid,
    pub context_key: CacheKey,
    pub trends: Option<TrendData>,
    pub pain_points: Option<Vec<PainPoint>>,
    pub content_gaps: Option<Vec<ContentGap>>,
    pub competitor_insights: Option<Vec<CompetitorInsight>>,
    pub sources: Vec<SourceRecord>,
    pub generated_at: DateTime<Utc>,
}

impl ResearchResult {
    pub fn new(run_id: Uuid, context_key: CacheKey) -> Self {
        Self {
            run_id,
            context_key,
            trends: None,
            pain_points: None,
            content_gaps: None,
            competitor_insights: None,
            sources: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    /// Fold one provider's findings into the merged result.
    pub fn absorb(&mut self, findings: ProviderFindings) {
        if let Some(trends) = findings.trends {
            self.trends
                .get_or_insert_with(TrendData::default)
                .terms
                .extend(trends.terms);
        }
        if let Some(pains) = findings.pain_points {
            self.pain_points.get_or_insert_with(Vec::new).extend(pains);
        }
        if let Some(gaps) = findings.content_gaps {
            self.content_gaps.get_or_insert_with(Vec::new).extend(gaps);
        }
        if let Some(competitors) = findings.competitor_insights {
            self.competitor_insights
                .get_or_insert_with(Vec::new)
                .extend(competitors);
        }
    }

    /// Names of providers that actually contributed data.
    pub fn contributing_providers(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|s| s.status == SourceStatus::Contributed)
            .map(|s| s.provider.as_str())
            .collect()
    }

    /// True when every configured provider contributed.
    pub fn is_complete(&self) -> bool {
        !self.sources.is_empty()
            && self
                .sources
                .iter()
                .all(|s| s.status == SourceStatus::Contributed)
    }
}

/// One row in the provider call ledger. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCallRecord {
    pub id: Uuid,
    pub provider: String,
    pub call_type: String,
    pub rows_fetched: u32,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// Severity tier for a provider's daily quota consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaLevel {
    Healthy,
    Warning,
    Critical,
    Exceeded,
}

impl QuotaLevel {
    /// Classify a usage fraction against warning/critical thresholds.
    pub fn classify(fraction: f32, warning: f32, critical: f32) -> Self {
        if fraction >= 1.0 {
            QuotaLevel::Exceeded
        } else if fraction >= critical {
            QuotaLevel::Critical
        } else if fraction >= warning {
            QuotaLevel::Warning
        } else {
            QuotaLevel::Healthy
        }
    }
}

/// Per-provider, per-day quota aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub provider: String,
    pub date: NaiveDate,
    pub daily_limit: u32,
    pub used_today: u32,
    pub remaining: u32,
    pub percent_used: f32,
    pub level: QuotaLevel,
    pub last_alert_sent: Option<DateTime<Utc>>,
}

/// One day of aggregated ledger history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub calls: u32,
    pub rows_fetched: u64,
    pub failures: u32,
}

/// Snapshot of the cache counters.
///
/// Hit rates share a single denominator: `total_requests`, the number of
/// `get` calls observed. `api_calls_saved` counts one per hit in any tier,
/// so `api_calls_saved == memory_hits + remote_hits + durable_hits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub remote_hits: u64,
    pub durable_hits: u64,
    pub misses: u64,
    pub api_calls_saved: u64,
    pub total_requests: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.remote_hits + self.durable_hits
    }

    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits() as f64 / self.total_requests as f64
        }
    }

    pub fn tier_hit_rate(&self, tier_hits: u64) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            tier_hits as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn context() -> ResearchContext {
        ResearchContext {
            industry: "Home Fitness".to_string(),
            audience: "busy parents".to_string(),
            pain_points: vec!["no time".to_string(), "no space".to_string()],
            product_categories: vec!["equipment".to_string(), "apps".to_string()],
            business_type: "d2c".to_string(),
        }
    }

    #[test]
    fn test_cache_key_ignores_tag_order_and_case() {
        let a = context();
        let mut b = context();
        b.pain_points.reverse();
        b.product_categories.reverse();
        b.industry = "HOME FITNESS".to_string();

        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_cache_key_distinguishes_contexts() {
        let a = context();
        let mut b = context();
        b.audience = "college students".to_string();

        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        let mut ctx = context();
        ctx.industry = "  ".to_string();
        assert!(ctx.validate().is_err());

        let mut ctx = context();
        ctx.audience = String::new();
        assert!(ctx.validate().is_err());

        assert!(context().validate().is_ok());
    }

    #[test]
    fn test_quota_level_thresholds() {
        assert_eq!(QuotaLevel::classify(0.0, 0.8, 0.9), QuotaLevel::Healthy);
        assert_eq!(QuotaLevel::classify(0.79, 0.8, 0.9), QuotaLevel::Healthy);
        assert_eq!(QuotaLevel::classify(0.8, 0.8, 0.9), QuotaLevel::Warning);
        assert_eq!(QuotaLevel::classify(0.9, 0.8, 0.9), QuotaLevel::Critical);
        assert_eq!(QuotaLevel::classify(1.0, 0.8, 0.9), QuotaLevel::Exceeded);
        assert_eq!(QuotaLevel::classify(1.5, 0.8, 0.9), QuotaLevel::Exceeded);
    }

    #[test]
    fn test_absorb_merges_sub_results() {
        let mut result = ResearchResult::new(Uuid::new_v4(), context().cache_key());

        result.absorb(ProviderFindings {
            trends: Some(TrendData {
                terms: vec![TrendTerm {
                    term: "kettlebell".to_string(),
                    momentum: 1.4,
                }],
            }),
            ..Default::default()
        });
        result.absorb(ProviderFindings {
            trends: Some(TrendData {
                terms: vec![TrendTerm {
                    term: "resistance bands".to_string(),
                    momentum: 0.9,
                }],
            }),
            pain_points: Some(vec![PainPoint {
                theme: "no time".to_string(),
                quote: None,
                frequency: 12,
            }]),
            ..Default::default()
        });

        assert_eq!(result.trends.as_ref().unwrap().terms.len(), 2);
        assert_eq!(result.pain_points.as_ref().unwrap().len(), 1);
        assert!(result.content_gaps.is_none());
    }

    #[test]
    fn test_stats_invariants() {
        let stats = CacheStats {
            memory_hits: 3,
            remote_hits: 2,
            durable_hits: 1,
            misses: 4,
            api_calls_saved: 6,
            total_requests: 10,
        };

        assert_eq!(stats.hits() + stats.misses, stats.total_requests);
        assert_eq!(stats.api_calls_saved, stats.hits());
        assert!((stats.hit_rate() - 0.6).abs() < f64::EPSILON);
        assert!((stats.tier_hit_rate(stats.memory_hits) - 0.3).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn prop_cache_key_is_order_and_case_insensitive(
            mut tags in proptest::collection::vec("[a-zA-Z ]{1,12}", 0..6),
            seed in 0usize..6,
        ) {
            let base = ResearchContext {
                industry: "retail".to_string(),
                audience: "shoppers".to_string(),
                pain_points: tags.clone(),
                product_categories: vec![],
                business_type: "b2c".to_string(),
            };

            let rotation = seed % tags.len().max(1);
            tags.rotate_left(rotation);
            let permuted = ResearchContext {
                pain_points: tags.iter().map(|t| t.to_uppercase()).collect(),
                ..base.clone()
            };

            prop_assert_eq!(base.cache_key(), permuted.cache_key());
        }
    }
}

//! Research caching and orchestration engine.
//!
//! This crate provides the research backbone for content automation:
//! - A three-tier read-through/write-through cache (in-process, shared
//!   networked, durable) with per-tier TTLs and promotion on hit
//! - A provider call ledger with per-day quota tracking and
//!   hysteresis-based alerting
//! - A quota-bounded parallel orchestrator that fans out to independent
//!   research providers and merges whatever succeeded
//!
//! # Architecture
//!
//! The engine is built bottom-up from three components:
//!
//! - **MultiTierCache**: serves cached research results from the fastest
//!   tier that has them, keeping slower tiers warm
//! - **UsageTracker**: appends every outbound provider call to a durable
//!   ledger and derives daily quota status from it
//! - **ResearchOrchestrator**: admission-checks, fans out, merges, and
//!   writes back through the cache
//!
//! External collaborators plug in behind narrow traits:
//! [`providers::ResearchProvider`], [`store::DurableStore`],
//! [`remote::RemoteCache`], and [`quota::AlertSink`].
//!
//! # Example
//!
//! ```no_run
//! use research_engine::prelude::*;
//! use research_engine::config::EngineConfig;
//! use research_engine::quota::TracingAlertSink;
//! use research_engine::store::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EngineConfig::default();
//! let store = Arc::new(MemoryStore::new());
//! let cache = Arc::new(MultiTierCache::new(store.clone(), None, config.cache));
//! let tracker = Arc::new(UsageTracker::new(
//!     store,
//!     Arc::new(TracingAlertSink),
//!     config.quota,
//! ));
//!
//! let mut orchestrator = ResearchOrchestrator::new(cache, tracker, config.orchestrator);
//! // orchestrator.register_provider(...);
//!
//! let context = ResearchContext {
//!     industry: "home fitness".into(),
//!     audience: "busy parents".into(),
//!     pain_points: vec!["no time".into()],
//!     product_categories: vec!["apps".into()],
//!     business_type: "d2c".into(),
//! };
//!
//! let result = orchestrator.conduct(&context).await?;
//! println!("contributing: {:?}", result.contributing_providers());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod orchestration;
pub mod providers;
pub mod quota;
pub mod remote;
pub mod sqlite;
pub mod store;
pub mod types;

pub use cache::MultiTierCache;
pub use config::{CacheConfig, EngineConfig, HttpProviderConfig, OrchestratorConfig, QuotaConfig};
pub use error::{EngineError, Result};
pub use orchestration::{OrchestratorStats, ResearchOrchestrator};
pub use providers::{HttpResearchProvider, ResearchProvider, StaticProvider};
pub use quota::{AlertSink, TracingAlertSink, UsageTracker};
pub use remote::{InProcessRemoteCache, RemoteCache};
pub use sqlite::SqliteStore;
pub use store::{DurableStore, MemoryStore};
pub use types::{
    CacheKey, CacheStats, DailyUsage, ProviderCallRecord, ProviderFindings, QuotaLevel,
    QuotaStatus, ResearchContext, ResearchResult, SourceRecord, SourceStatus,
};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::cache::MultiTierCache;
    pub use crate::error::{EngineError, Result};
    pub use crate::orchestration::ResearchOrchestrator;
    pub use crate::providers::ResearchProvider;
    pub use crate::quota::UsageTracker;
    pub use crate::types::{ResearchContext, ResearchResult};
}

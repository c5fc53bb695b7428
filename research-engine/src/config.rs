//! Configuration for the research engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main configuration for the research engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub quota: QuotaConfig,
    pub orchestrator: OrchestratorConfig,
}

impl EngineConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> crate::error::Result<Self> {
        toml::from_str(text).map_err(|e| crate::error::EngineError::Config(e.to_string()))
    }
}

/// Multi-tier cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum TTL for the in-process tier, in seconds.
    pub memory_ttl_seconds: u64,

    /// Maximum TTL for the networked tier, in seconds.
    pub remote_ttl_seconds: u64,

    /// Maximum TTL for the durable tier, in seconds.
    pub durable_ttl_seconds: u64,

    /// TTL applied to merged research results on cache write, in seconds.
    pub result_ttl_seconds: u64,

    /// Row limit for one expired-row sweep against the durable tier.
    pub cleanup_batch_limit: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_ttl_seconds: 3_600,       // 1 hour
            remote_ttl_seconds: 21_600,      // 6 hours
            durable_ttl_seconds: 604_800,    // 7 days
            result_ttl_seconds: 86_400,      // 1 day
            cleanup_batch_limit: 500,
        }
    }
}

impl CacheConfig {
    pub fn memory_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_ttl_seconds)
    }

    pub fn remote_ttl(&self) -> Duration {
        Duration::from_secs(self.remote_ttl_seconds)
    }

    pub fn durable_ttl(&self) -> Duration {
        Duration::from_secs(self.durable_ttl_seconds)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_seconds)
    }
}

/// Per-provider daily budgets and alerting thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Daily call limit for providers without an explicit entry.
    pub default_daily_limit: u32,

    /// Per-provider daily call limits, keyed by provider name.
    pub daily_limits: HashMap<String, u32>,

    /// Usage fraction at which the status becomes `warning`.
    pub warning_threshold: f32,

    /// Usage fraction at which the status becomes `critical`.
    pub critical_threshold: f32,

    /// Minimum interval between repeat alerts for one provider, in seconds.
    pub alert_cooldown_seconds: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_daily_limit: 1_000,
            daily_limits: HashMap::new(),
            warning_threshold: 0.8,
            critical_threshold: 0.9,
            alert_cooldown_seconds: 3_600, // 1 hour
        }
    }
}

impl QuotaConfig {
    pub fn daily_limit(&self, provider: &str) -> u32 {
        self.daily_limits
            .get(provider)
            .copied()
            .unwrap_or(self.default_daily_limit)
    }

    pub fn alert_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.alert_cooldown_seconds as i64)
    }
}

/// Fan-out timing budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Budget for one whole research run, in milliseconds.
    pub global_timeout_ms: u64,

    /// Budget for one provider call, in milliseconds.
    pub provider_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            global_timeout_ms: 30_000,
            provider_timeout_ms: 10_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.global_timeout_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

/// Configuration for an HTTP-backed research provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProviderConfig {
    /// Provider name used in ledger rows and provenance.
    pub name: String,

    /// Call type recorded in the ledger (e.g. "trends", "keywords").
    pub call_type: String,

    /// Endpoint receiving the research context as JSON.
    pub endpoint: String,

    /// Optional bearer token.
    pub api_key: Option<String>,

    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            name: "http".to_string(),
            call_type: "research".to_string(),
            endpoint: "http://localhost:8080/research".to_string(),
            api_key: None,
            timeout_seconds: 30,
        }
    }
}

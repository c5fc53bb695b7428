//! Research provider seam and bundled implementations.

use crate::config::HttpProviderConfig;
use crate::error::{EngineError, Result};
use crate::types::{ProviderFindings, ResearchContext};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

/// One external research source. The orchestrator is generic over any
/// number of registered providers; implementations must be safe to call
/// concurrently.
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    /// Name used in ledger rows and result provenance.
    fn name(&self) -> &str;

    /// Call type recorded in the ledger.
    fn call_type(&self) -> &str {
        "research"
    }

    /// Fetch this provider's partial findings for the given context.
    async fn research(&self, context: &ResearchContext) -> Result<ProviderFindings>;
}

/// Provider backed by an HTTP endpoint that accepts the research context
/// as JSON and answers with [`ProviderFindings`] JSON.
pub struct HttpResearchProvider {
    config: HttpProviderConfig,
    client: Client,
}

impl HttpResearchProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_seconds));

        if let Some(api_key) = &config.api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = format!("Bearer {api_key}")
                .parse()
                .map_err(|_| EngineError::Config("API key is not a valid header value".to_string()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        let client = builder.build()?;
        info!(provider = %config.name, endpoint = %config.endpoint, "initialized HTTP research provider");

        Ok(Self { config, client })
    }
}

#[async_trait]
impl ResearchProvider for HttpResearchProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn call_type(&self) -> &str {
        &self.config.call_type
    }

    async fn research(&self, context: &ResearchContext) -> Result<ProviderFindings> {
        debug!(provider = %self.config.name, "issuing research request");

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(context)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Provider(format!(
                "{} answered {status}: {body}",
                self.config.name
            )));
        }

        let findings: ProviderFindings = response.json().await?;
        debug!(
            provider = %self.config.name,
            rows = findings.rows(),
            "research request complete"
        );
        Ok(findings)
    }
}

/// Provider returning fixed findings. Useful for tests and for wiring
/// a deterministic source into development environments.
pub struct StaticProvider {
    name: String,
    findings: ProviderFindings,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>, findings: ProviderFindings) -> Self {
        Self {
            name: name.into(),
            findings,
        }
    }
}

#[async_trait]
impl ResearchProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn research(&self, _context: &ResearchContext) -> Result<ProviderFindings> {
        Ok(self.findings.clone())
    }
}

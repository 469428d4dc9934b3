//! bullbear - multi-agent bull/bear trading debate engine
//!
//! Turns price history, fundamentals and news into one structured trading
//! decision by running opposing researcher agents, a risk review and a final
//! decision step against any supported model backend.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bullbear::Engine;
//! use bullbear::models::{DebateRequest, EngineConfig, TradingConfig};
//! use bullbear::tools::StaticMarketData;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let data = StaticMarketData::load("fixtures/market.json".as_ref())?;
//! let engine = Engine::with_market_data(EngineConfig::default(), Arc::new(data))?;
//! let config = TradingConfig::for_provider("groq").with_api_key("groq", "gsk-...");
//! let record = engine.run_debate(config, DebateRequest::new("TSLA").with_rounds(1)).await;
//! println!("{}", serde_json::to_string_pretty(&record)?);
//! # Ok(())
//! # }
//! ```

pub use bullbear_agents as agents;
pub use bullbear_models as models;
pub use bullbear_tools as tools;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bullbear_agents::{
    build_provider, prompts, AgentError, AgentExecutor, AgentOutcome, DebateOrchestrator,
    DebateProviders, LlmProvider, ModelTier,
};
use bullbear_models::{DebateRequest, DecisionRecord, EngineConfig, TradingConfig};
use bullbear_tools::{market_tools, MarketDataSource, ToolError, ToolRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Load engine settings from TOML. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<EngineConfig, anyhow::Error> {
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return Ok(EngineConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
}

/// Entry point for agent runs and debates.
///
/// Holds settings and the tool registry only. Credentials arrive with each
/// call in a [`TradingConfig`], so one engine can serve concurrent runs for
/// different callers.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<ToolRegistry>,
    cancel: CancellationToken,
}

impl Engine {
    /// Engine with no tools registered.
    pub fn new(config: EngineConfig) -> Self {
        let registry = ToolRegistry::new(Duration::from_secs(config.agent.tool_timeout_seconds));
        Self::with_registry(config, Arc::new(registry))
    }

    /// Engine with the four market tools over `source`.
    pub fn with_market_data(
        config: EngineConfig,
        source: Arc<dyn MarketDataSource>,
    ) -> Result<Self, ToolError> {
        let registry = ToolRegistry::with_tools(
            market_tools(source),
            Duration::from_secs(config.agent.tool_timeout_seconds),
        )?;
        Ok(Self::with_registry(config, Arc::new(registry)))
    }

    pub fn with_registry(config: EngineConfig, registry: Arc<ToolRegistry>) -> Self {
        Self {
            config,
            registry,
            cancel: CancellationToken::new(),
        }
    }

    /// Token checked between steps of every run started by this engine.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Tool-calling agent loop over the registry, using the quick model.
    pub async fn run_agent(
        &self,
        config: TradingConfig,
        prompt: &str,
    ) -> Result<AgentOutcome, AgentError> {
        let provider = build_provider(&config, ModelTier::Quick, &self.config.provider)?;
        self.agent(provider).run(prompt).await
    }

    /// As [`Engine::run_agent`], returning the sentinel text on exhaustion.
    pub async fn run_agent_text(
        &self,
        config: TradingConfig,
        prompt: &str,
    ) -> Result<String, AgentError> {
        let outcome = self.run_agent(config, prompt).await?;
        Ok(outcome.text().to_string())
    }

    /// Full debate. Never fails: every error ends in a `success=false` record.
    pub async fn run_debate(&self, config: TradingConfig, request: DebateRequest) -> DecisionRecord {
        let providers = match self.debate_providers(&config) {
            Ok(providers) => providers,
            Err(e) => {
                warn!(provider = %config.llm_provider, error = %e, "Could not build providers");
                let date = request
                    .date
                    .clone()
                    .unwrap_or_else(|| chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string());
                return DecisionRecord::failed(&request.symbol.trim().to_uppercase(), &date, e.to_string());
            }
        };
        self.debate(providers).run(&request).await
    }

    /// Agent loop over the engine's registry with an explicit provider.
    pub fn agent(&self, provider: Arc<dyn LlmProvider>) -> AgentExecutor {
        AgentExecutor::new(provider, Arc::clone(&self.registry), &self.config.agent)
            .with_system_prompt(prompts::analyst_system_prompt(&self.registry.names()))
            .with_cancellation(self.cancel.clone())
    }

    /// Debate orchestrator over the engine's registry with explicit providers.
    pub fn debate(&self, providers: DebateProviders) -> DebateOrchestrator {
        DebateOrchestrator::new(providers, self.config.debate.clone(), self.config.agent.clone())
            .with_registry(Arc::clone(&self.registry))
            .with_cancellation(self.cancel.clone())
    }

    fn debate_providers(&self, config: &TradingConfig) -> Result<DebateProviders, AgentError> {
        Ok(DebateProviders {
            quick: build_provider(config, ModelTier::Quick, &self.config.provider)?,
            deep: build_provider(config, ModelTier::Deep, &self.config.provider)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_config_file_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/bullbear.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[debate]\ndefault_rounds = 1\n\n[agent]\nparallel_tools = true").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.debate.default_rounds, 1);
        assert_eq!(config.debate.max_rounds, 5);
        assert!(config.agent.parallel_tools);
        assert_eq!(config.agent.max_iterations, 5);
        assert_eq!(config.provider.request_timeout_seconds, 60);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[debate]\ndefault_rounds = \"two\"").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/bullbear.toml");
        assert_eq!(load_config(&path).unwrap(), EngineConfig::default());
    }

    #[tokio::test]
    async fn unsupported_provider_yields_failed_record() {
        let engine = Engine::new(EngineConfig::default());
        let record = engine
            .run_debate(
                TradingConfig::for_provider("cohere"),
                DebateRequest::new("tsla").with_date("2025-01-02"),
            )
            .await;
        assert!(!record.success);
        assert_eq!(record.symbol, "TSLA");
        assert_eq!(record.date, "2025-01-02");
        assert_eq!(record.error.as_deref(), Some("Unsupported LLM provider: cohere"));
    }

    #[tokio::test]
    async fn unsupported_provider_fails_agent_run() {
        let engine = Engine::new(EngineConfig::default());
        let err = engine
            .run_agent(TradingConfig::for_provider("cohere"), "Analyze AAPL")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedProvider(p) if p == "cohere"));
    }
}

//! Provider adapters: one request/response contract over every supported backend.
//!
//! A [`Backend`] id from [`TradingConfig`] selects a backend family; each family
//! has one adapter that builds the HTTP request and normalizes the reply into an
//! [`LlmResponse`]. Adapters are built per run from the caller's config and hold
//! the key for that run only.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bullbear_models::{Backend, LlmResponse, Message, ProviderSettings, ToolSchema, TradingConfig};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::AgentError;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiCompatibleProvider;

/// Static feature flags of a backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Native function calling. Without it `invoke_with_tools` falls back to `invoke`.
    pub tool_calling: bool,
    /// Accepts a system instruction (inline or as a separate field).
    pub system_role: bool,
}

/// Wire protocol shared by a group of backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    OpenAiCompatible,
    Anthropic,
    Gemini,
}

impl Family {
    pub fn of(backend: Backend) -> Self {
        match backend {
            Backend::OpenAi | Backend::Groq | Backend::OpenRouter | Backend::Ollama => {
                Family::OpenAiCompatible
            }
            Backend::Anthropic => Family::Anthropic,
            Backend::Google => Family::Gemini,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Family::OpenAiCompatible => Capabilities {
                tool_calling: true,
                system_role: true,
            },
            Family::Anthropic | Family::Gemini => Capabilities {
                tool_calling: false,
                system_role: true,
            },
        }
    }
}

pub fn default_endpoint(backend: Backend) -> &'static str {
    match backend {
        Backend::OpenAi => "https://api.openai.com/v1/chat/completions",
        Backend::Groq => "https://api.groq.com/openai/v1/chat/completions",
        Backend::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
        Backend::Ollama => "http://localhost:11434/v1/chat/completions",
        Backend::Anthropic => "https://api.anthropic.com/v1/messages",
        Backend::Google => "https://generativelanguage.googleapis.com/v1beta/models",
    }
}

/// Which of the two configured models a step runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Careful steps: risk assessment and the final decision.
    Deep,
    /// Fast steps: researchers and generic agent runs.
    Quick,
}

/// Uniform contract over all model backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn backend(&self) -> Backend;
    fn model(&self) -> &str;
    fn capabilities(&self) -> Capabilities;

    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError>;

    /// Backends without native tool calling ignore the schemas and answer as `invoke`.
    async fn invoke_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<LlmResponse, AgentError> {
        if !tools.is_empty() && !self.capabilities().tool_calling {
            debug!(backend = %self.backend(), "Backend has no tool calling, ignoring tool schemas");
        }
        self.invoke(messages).await
    }
}

/// Everything an adapter needs for one run.
#[derive(Clone)]
pub struct ProviderConfig {
    pub backend: Backend,
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProviderConfig {
    /// Resolve backend, model, key and endpoint from a per-request config.
    ///
    /// Fails before any network traffic when the provider id is unknown or a
    /// required key is missing.
    pub fn resolve(
        config: &TradingConfig,
        tier: ModelTier,
        settings: &ProviderSettings,
    ) -> Result<Self, AgentError> {
        Self::resolve_with_env(config, tier, settings, |name| std::env::var(name).ok())
    }

    pub fn resolve_with_env(
        config: &TradingConfig,
        tier: ModelTier,
        settings: &ProviderSettings,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AgentError> {
        let backend: Backend = config
            .llm_provider
            .parse()
            .map_err(|_| AgentError::UnsupportedProvider(config.llm_provider.trim().to_string()))?;
        let api_key = resolve_api_key(config, backend, env)?;

        let (deep_default, quick_default) = backend.default_models();
        let (configured, fallback) = match tier {
            ModelTier::Deep => (&config.deep_think_model, deep_default),
            ModelTier::Quick => (&config.quick_think_model, quick_default),
        };
        let model = if configured.trim().is_empty() {
            fallback.to_string()
        } else {
            configured.trim().to_string()
        };

        let endpoint = config
            .base_url_override
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(default_endpoint(backend))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            backend,
            model,
            endpoint,
            api_key,
            temperature: config.clamped_temperature(),
            max_tokens: settings.max_tokens,
            timeout: Duration::from_secs(settings.request_timeout_seconds),
        })
    }
}

/// API key for `backend`: the config map first, then `<PROVIDER>_API_KEY`.
pub fn resolve_api_key(
    config: &TradingConfig,
    backend: Backend,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Option<String>, AgentError> {
    if let Some(key) = config.configured_key(backend) {
        return Ok(Some(key.trim().to_string()));
    }
    if let Some(key) = env(&backend.api_key_env()).filter(|k| !k.trim().is_empty()) {
        return Ok(Some(key.trim().to_string()));
    }
    if backend.requires_api_key() {
        return Err(AgentError::MissingApiKey(backend.id().to_string()));
    }
    Ok(None)
}

/// Build the adapter for `tier` from a per-request config.
pub fn build_provider(
    config: &TradingConfig,
    tier: ModelTier,
    settings: &ProviderSettings,
) -> Result<Arc<dyn LlmProvider>, AgentError> {
    from_provider_config(ProviderConfig::resolve(config, tier, settings)?)
}

pub fn from_provider_config(config: ProviderConfig) -> Result<Arc<dyn LlmProvider>, AgentError> {
    let client = reqwest::Client::builder().build()?;
    debug!(backend = %config.backend, model = %config.model, "Built provider adapter");
    Ok(match Family::of(config.backend) {
        Family::OpenAiCompatible => Arc::new(OpenAiCompatibleProvider::new(config, client)),
        Family::Anthropic => Arc::new(AnthropicProvider::new(config, client)),
        Family::Gemini => Arc::new(GeminiProvider::new(config, client)),
    })
}

/// Send a built request and decode the JSON body, bounded by `timeout`.
pub(crate) async fn send_json(
    client: &reqwest::Client,
    request: reqwest::Request,
    timeout: Duration,
) -> Result<Value, AgentError> {
    let exchange = async {
        let response = client.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Provider returned error status");
            return Err(AgentError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        let text = response.text().await?;
        serde_json::from_str::<Value>(&text)
            .map_err(|e| AgentError::Parse(format!("Response body is not JSON: {e}")))
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| AgentError::Timeout(timeout.as_secs()))?
}

/// Tool-call arguments as the backend sent them. Text that is not JSON is
/// kept as a string value; the tool's input validation reports it.
pub(crate) fn decode_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Reject replies that carry neither text nor tool calls.
pub(crate) fn ensure_not_empty(
    response: LlmResponse,
    backend: Backend,
) -> Result<LlmResponse, AgentError> {
    if response.content.trim().is_empty() && response.tool_calls.is_empty() {
        return Err(AgentError::Parse(format!("{backend} returned empty response")));
    }
    Ok(response)
}

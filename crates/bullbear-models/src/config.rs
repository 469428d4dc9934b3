use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::decision::UnknownVariant;

const DEFAULT_TEMPERATURE: f64 = 0.3;

/// Supported LLM backends, keyed by the provider id callers put in [`TradingConfig`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    OpenAi,
    Groq,
    OpenRouter,
    Ollama,
    Anthropic,
    Google,
}

impl Backend {
    pub const ALL: [Backend; 6] = [
        Backend::OpenAi,
        Backend::Groq,
        Backend::OpenRouter,
        Backend::Ollama,
        Backend::Anthropic,
        Backend::Google,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Backend::OpenAi => "openai",
            Backend::Groq => "groq",
            Backend::OpenRouter => "openrouter",
            Backend::Ollama => "ollama",
            Backend::Anthropic => "anthropic",
            Backend::Google => "google",
        }
    }

    /// Environment variable consulted when the config carries no key.
    pub fn api_key_env(&self) -> String {
        format!("{}_API_KEY", self.id().to_ascii_uppercase())
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Backend::Ollama)
    }

    /// Default (deep, quick) model identifiers.
    pub fn default_models(&self) -> (&'static str, &'static str) {
        match self {
            Backend::OpenAi => ("gpt-4o", "gpt-4o-mini"),
            Backend::Groq => ("llama-3.3-70b-versatile", "llama-3.1-8b-instant"),
            Backend::OpenRouter => (
                "meta-llama/llama-3.1-70b-instruct",
                "meta-llama/llama-3.1-8b-instruct",
            ),
            Backend::Ollama => ("llama3.1", "llama3.1"),
            Backend::Anthropic => ("claude-3-5-sonnet-20241022", "claude-3-5-haiku-20241022"),
            Backend::Google => ("gemini-1.5-pro", "gemini-1.5-flash"),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Backend {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().to_ascii_lowercase();
        Backend::ALL
            .into_iter()
            .find(|b| b.id() == id)
            .ok_or_else(|| UnknownVariant {
                kind: "LLM provider",
                value: s.trim().to_string(),
            })
    }
}

/// Per-request model settings and credentials.
///
/// Built by the caller for every run and passed by value. Never stored in
/// process-wide state, so concurrent runs cannot see each other's keys.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingConfig {
    /// Provider id, e.g. "groq". Validated when the adapter is built.
    #[serde(alias = "llmProvider")]
    pub llm_provider: String,
    /// Model for careful steps (risk assessment, final decision).
    #[serde(alias = "deepThinkModel", alias = "deepThinkLLM")]
    pub deep_think_model: String,
    /// Model for fast steps (researchers, generic agent runs).
    #[serde(alias = "quickThinkModel", alias = "quickThinkLLM")]
    pub quick_think_model: String,
    /// Sampling temperature, 0.0 to 1.0.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Provider id -> API key.
    #[serde(default, alias = "apiKeys")]
    pub api_keys: HashMap<String, String>,
    /// Replaces the backend's default endpoint.
    #[serde(default, alias = "baseUrl", alias = "baseUrlOverride")]
    pub base_url_override: Option<String>,
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

impl TradingConfig {
    /// Config with the backend's default models and no explicit keys.
    /// Unknown ids keep empty model names; adapter construction rejects them.
    pub fn for_provider(provider: &str) -> Self {
        let (deep, quick) = provider
            .parse::<Backend>()
            .map(|b| b.default_models())
            .unwrap_or(("", ""));
        Self {
            llm_provider: provider.to_string(),
            deep_think_model: deep.to_string(),
            quick_think_model: quick.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            api_keys: HashMap::new(),
            base_url_override: None,
        }
    }

    pub fn with_api_key(mut self, provider: &str, key: impl Into<String>) -> Self {
        self.api_keys.insert(provider.to_ascii_lowercase(), key.into());
        self
    }

    /// Temperature forced into [0, 1]; NaN falls back to the default.
    pub fn clamped_temperature(&self) -> f64 {
        if self.temperature.is_nan() {
            DEFAULT_TEMPERATURE
        } else {
            self.temperature.clamp(0.0, 1.0)
        }
    }

    /// Key from the config map, if present and non-empty.
    pub fn configured_key(&self, backend: Backend) -> Option<&str> {
        self.api_keys
            .iter()
            .find(|(provider, _)| provider.eq_ignore_ascii_case(backend.id()))
            .map(|(_, key)| key.as_str())
            .filter(|key| !key.trim().is_empty())
    }
}

impl fmt::Debug for TradingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers_with_keys: Vec<&String> = self.api_keys.keys().collect();
        f.debug_struct("TradingConfig")
            .field("llm_provider", &self.llm_provider)
            .field("deep_think_model", &self.deep_think_model)
            .field("quick_think_model", &self.quick_think_model)
            .field("temperature", &self.temperature)
            .field("api_keys", &providers_with_keys)
            .field("base_url_override", &self.base_url_override)
            .finish()
    }
}

/// Engine-wide settings, loaded from TOML. Holds no credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub provider: ProviderSettings,
    pub agent: AgentSettings,
    pub debate: DebateSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderSettings {
    /// Timeout for a single backend call.
    pub request_timeout_seconds: u64,
    /// Completion token cap sent to backends that require one.
    pub max_tokens: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 60,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSettings {
    /// Tool-calling rounds before the loop gives up.
    pub max_iterations: u32,
    /// Timeout for a single tool execution.
    pub tool_timeout_seconds: u64,
    /// Run a turn's tool calls concurrently when every tool is side-effect-free.
    pub parallel_tools: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            tool_timeout_seconds: 30,
            parallel_tools: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebateSettings {
    /// Rounds used when the request does not name a count.
    pub default_rounds: u32,
    /// Largest round count a request may ask for.
    pub max_rounds: u32,
    /// Budget for the whole debate, all steps included.
    pub total_timeout_seconds: u64,
    /// Let researchers pull fresh data through a nested agent loop.
    pub researcher_tools: bool,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            default_rounds: 2,
            max_rounds: 5,
            total_timeout_seconds: 600,
            researcher_tools: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parsing_is_case_insensitive() {
        assert_eq!("Groq".parse::<Backend>().unwrap(), Backend::Groq);
        assert_eq!(" OPENAI ".parse::<Backend>().unwrap(), Backend::OpenAi);
        let err = "cohere".parse::<Backend>().unwrap_err();
        assert_eq!(err.value, "cohere");
    }

    #[test]
    fn backend_env_names() {
        assert_eq!(Backend::Groq.api_key_env(), "GROQ_API_KEY");
        assert_eq!(Backend::OpenRouter.api_key_env(), "OPENROUTER_API_KEY");
        assert!(!Backend::Ollama.requires_api_key());
        assert!(Backend::Anthropic.requires_api_key());
    }

    #[test]
    fn for_provider_fills_default_models() {
        let config = TradingConfig::for_provider("groq");
        assert_eq!(config.deep_think_model, "llama-3.3-70b-versatile");
        assert_eq!(config.quick_think_model, "llama-3.1-8b-instant");
        assert_eq!(config.temperature, 0.3);

        let unknown = TradingConfig::for_provider("cohere");
        assert!(unknown.deep_think_model.is_empty());
    }

    #[test]
    fn configured_key_ignores_empty_entries() {
        let config = TradingConfig::for_provider("groq").with_api_key("groq", "  ");
        assert!(config.configured_key(Backend::Groq).is_none());

        let config = TradingConfig::for_provider("groq").with_api_key("GROQ", "gsk-123");
        assert_eq!(config.configured_key(Backend::Groq), Some("gsk-123"));
        assert!(config.configured_key(Backend::OpenAi).is_none());
    }

    #[test]
    fn debug_output_redacts_keys() {
        let config = TradingConfig::for_provider("openai").with_api_key("openai", "sk-secret");
        let debug = format!("{config:?}");
        assert!(debug.contains("openai"));
        assert!(!debug.contains("sk-secret"));
    }

    #[test]
    fn temperature_is_clamped() {
        let mut config = TradingConfig::for_provider("groq");
        config.temperature = 1.8;
        assert_eq!(config.clamped_temperature(), 1.0);
        config.temperature = f64::NAN;
        assert_eq!(config.clamped_temperature(), 0.3);
    }

    #[test]
    fn trading_config_accepts_camel_case_json() {
        let json = r#"{
            "llmProvider": "anthropic",
            "deepThinkModel": "claude-3-5-sonnet-20241022",
            "quickThinkModel": "claude-3-5-haiku-20241022",
            "temperature": 0.2,
            "apiKeys": {"anthropic": "sk-ant"},
            "baseUrlOverride": "http://localhost:9000/v1/messages"
        }"#;
        let config: TradingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.llm_provider, "anthropic");
        assert_eq!(config.configured_key(Backend::Anthropic), Some("sk-ant"));
        assert_eq!(
            config.base_url_override.as_deref(),
            Some("http://localhost:9000/v1/messages")
        );
    }

    #[test]
    fn engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.agent.max_iterations, 5);
        assert_eq!(config.debate.default_rounds, 2);
        assert_eq!(config.debate.max_rounds, 5);
        assert!(!config.agent.parallel_tools);
    }

    #[test]
    fn engine_config_from_partial_toml() {
        let toml_str = r#"
[provider]
request_timeout_seconds = 20

[agent]
max_iterations = 3
parallel_tools = true

[debate]
default_rounds = 1
researcher_tools = true
"#;

        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.provider.request_timeout_seconds, 20);
        assert_eq!(config.provider.max_tokens, 4096);
        assert_eq!(config.agent.max_iterations, 3);
        assert_eq!(config.agent.tool_timeout_seconds, 30);
        assert!(config.agent.parallel_tools);
        assert_eq!(config.debate.default_rounds, 1);
        assert_eq!(config.debate.max_rounds, 5);
        assert!(config.debate.researcher_tools);
    }

    #[test]
    fn empty_toml_is_default_config() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}

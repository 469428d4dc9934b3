pub mod context;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod provider;

pub mod test_support;

pub use context::gather_context;
pub use error::AgentError;
pub use executor::{AgentExecutor, AgentOutcome, ITERATION_EXHAUSTED_MESSAGE};
pub use orchestrator::{DebateOrchestrator, DebateOutcome, DebateProviders, DebateStage};
pub use provider::{
    build_provider, from_provider_config, resolve_api_key, Capabilities, Family, LlmProvider,
    ModelTier, ProviderConfig,
};

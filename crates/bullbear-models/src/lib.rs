pub mod config;
pub mod decision;
pub mod market;
pub mod message;
pub mod request;

pub use config::{
    AgentSettings, Backend, DebateSettings, EngineConfig, ProviderSettings, TradingConfig,
};
pub use decision::{
    Action, ConfidenceLevel, DebateRole, DebateRound, DebateSummary, Decision, DecisionRecord,
    UnknownVariant,
};
pub use market::{Bar, NewsItem};
pub use message::{LlmResponse, Message, Role, ToolCall, ToolSchema};
pub use request::{ContextSection, DebateRequest, MarketContext};

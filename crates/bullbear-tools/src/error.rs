use thiserror::Error;

/// Registry-level failures. A tool's own failure is never one of these;
/// it comes back as an error string in the tool output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool already registered: {0}")]
    Duplicate(String),

    #[error("Tool {name} timed out after {seconds} seconds")]
    Timeout { name: String, seconds: u64 },
}

/// Why a tool call could not produce its normal output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ToolFailure(pub String);

impl ToolFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<MarketDataError> for ToolFailure {
    fn from(e: MarketDataError) -> Self {
        Self(e.to_string())
    }
}

impl From<serde_json::Error> for ToolFailure {
    fn from(e: serde_json::Error) -> Self {
        Self(format!("JSON error: {e}"))
    }
}

#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("No market data for symbol: {0}")]
    UnknownSymbol(String),

    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Market data unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

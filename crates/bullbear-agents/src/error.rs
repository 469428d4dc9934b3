use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Unsupported LLM provider: {0}")]
    UnsupportedProvider(String),

    #[error("No API key configured for provider {0}")]
    MissingApiKey(String),

    #[error("Provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider call timed out after {0} seconds")]
    Timeout(u64),

    #[error("Provider response parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for AgentError {
    /// The URL is dropped: some backends carry the API key in the query string.
    fn from(e: reqwest::Error) -> Self {
        AgentError::Transport(e.without_url().to_string())
    }
}

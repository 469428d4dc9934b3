use serde::{Deserialize, Serialize};

/// Longest slice of a single context section rendered into a prompt.
pub const MAX_SECTION_CHARS: usize = 6_000;

/// A debate request. Model settings and credentials travel separately in
/// [`crate::TradingConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebateRequest {
    pub symbol: String,
    /// YYYY-MM-DD. Defaults to today (UTC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_debate_rounds: Option<u32>,
    /// Pre-fetched market context. Gathered through the tool registry when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<MarketContext>,
}

impl DebateRequest {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            date: None,
            max_debate_rounds: None,
            context: None,
        }
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.max_debate_rounds = Some(rounds);
        self
    }

    pub fn with_context(mut self, context: MarketContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// A named piece of market context (e.g. the output of `get_fundamentals`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextSection {
    pub source: String,
    pub content: String,
}

/// Market data shown to every debate role, in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct MarketContext {
    sections: Vec<ContextSection>,
}

impl MarketContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: impl Into<String>, content: impl Into<String>) {
        self.sections.push(ContextSection {
            source: source.into(),
            content: content.into(),
        });
    }

    pub fn with(mut self, source: impl Into<String>, content: impl Into<String>) -> Self {
        self.push(source, content);
        self
    }

    pub fn sections(&self) -> &[ContextSection] {
        &self.sections
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Markdown rendering used in prompts. Long sections are cut at
    /// [`MAX_SECTION_CHARS`] characters.
    pub fn render(&self) -> String {
        if self.sections.is_empty() {
            return "No market data was available for this analysis.".to_string();
        }
        self.sections
            .iter()
            .map(|section| {
                let content = truncate_chars(section.content.trim(), MAX_SECTION_CHARS);
                format!("### {}\n{}", section.source, content)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}\n[truncated]", &text[..idx]),
        None => text.to_string(),
    }
}

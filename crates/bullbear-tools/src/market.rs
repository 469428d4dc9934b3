use std::sync::Arc;

use async_trait::async_trait;
use bullbear_models::{Bar, NewsItem};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{MarketDataError, ToolFailure};
use crate::tool::{parse_input, Tool};

pub const DEFAULT_NEWS_LIMIT: usize = 10;

/// Trailing values kept per indicator series in tool output.
pub const INDICATOR_TAIL: usize = 5;

pub const SUPPORTED_INDICATORS: &[&str] = &[
    "sma50", "sma200", "ema10", "rsi", "macd", "bollinger", "atr", "vwma",
];

/// Upstream market data. Implementations are the only place the engine's
/// tools get their numbers from.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn price_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, MarketDataError>;

    /// Indicator series keyed by indicator name, each a JSON array of numbers
    /// (or null for warm-up periods).
    async fn indicators(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        names: &[String],
    ) -> Result<Value, MarketDataError>;

    async fn fundamentals(&self, symbol: &str) -> Result<Value, MarketDataError>;

    async fn news(&self, symbol: &str, limit: usize) -> Result<Vec<NewsItem>, MarketDataError>;
}

#[derive(Debug, Deserialize)]
struct RangeInput {
    symbol: String,
    #[serde(alias = "startDate")]
    start_date: String,
    #[serde(alias = "endDate")]
    end_date: String,
}

impl RangeInput {
    fn validate(&self) -> Result<(String, NaiveDate, NaiveDate), ToolFailure> {
        let symbol = normalize_symbol(&self.symbol)?;
        let start = parse_date("start_date", &self.start_date)?;
        let end = parse_date("end_date", &self.end_date)?;
        if start > end {
            return Err(MarketDataError::InvalidRange(format!(
                "start_date {start} is after end_date {end}"
            ))
            .into());
        }
        Ok((symbol, start, end))
    }
}

#[derive(Debug, Deserialize)]
struct IndicatorsInput {
    #[serde(flatten)]
    range: RangeInput,
    indicators: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SymbolInput {
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct NewsInput {
    symbol: String,
    #[serde(default)]
    limit: Option<usize>,
}

fn normalize_symbol(raw: &str) -> Result<String, ToolFailure> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(ToolFailure::new("symbol must not be empty"));
    }
    Ok(symbol)
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ToolFailure> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ToolFailure::new(format!("{field} must be YYYY-MM-DD, got '{raw}'")))
}

fn symbol_schema(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

fn date_schema(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

/// `get_stock_data`: daily OHLCV bars for a date range.
pub struct StockDataTool {
    source: Arc<dyn MarketDataSource>,
}

impl StockDataTool {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for StockDataTool {
    fn name(&self) -> &str {
        "get_stock_data"
    }

    fn description(&self) -> &str {
        "Fetch historical stock price data (OHLCV) for a given symbol and date range. \
         Returns daily open, high, low, close prices and volume."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": symbol_schema("Stock ticker symbol (e.g., AAPL, MSFT, GOOGL)"),
                "start_date": date_schema("Start date in YYYY-MM-DD format"),
                "end_date": date_schema("End date in YYYY-MM-DD format"),
            },
            "required": ["symbol", "start_date", "end_date"]
        })
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn call(&self, input: Value) -> Result<String, ToolFailure> {
        let input: RangeInput = parse_input(input)?;
        let (symbol, start, end) = input.validate()?;
        let bars = self.source.price_history(&symbol, start, end).await?;
        debug!(symbol = %symbol, bars = bars.len(), "Fetched price history");
        Ok(serde_json::to_string_pretty(&bars)?)
    }
}

/// `get_technical_indicators`: the last few values of each requested series.
pub struct IndicatorsTool {
    source: Arc<dyn MarketDataSource>,
}

impl IndicatorsTool {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for IndicatorsTool {
    fn name(&self) -> &str {
        "get_technical_indicators"
    }

    fn description(&self) -> &str {
        "Calculate technical indicators (SMA, EMA, RSI, MACD, Bollinger Bands, ATR) from \
         stock price data. Useful for technical analysis."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": symbol_schema("Stock ticker symbol"),
                "start_date": date_schema("Start date in YYYY-MM-DD format"),
                "end_date": date_schema("End date in YYYY-MM-DD format"),
                "indicators": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": format!(
                        "List of indicators to calculate: {}",
                        SUPPORTED_INDICATORS.join(", ")
                    )
                }
            },
            "required": ["symbol", "start_date", "end_date", "indicators"]
        })
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn call(&self, input: Value) -> Result<String, ToolFailure> {
        let input: IndicatorsInput = parse_input(input)?;
        let (symbol, start, end) = input.range.validate()?;
        let names: Vec<String> = input
            .indicators
            .iter()
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return Err(ToolFailure::new("indicators must name at least one indicator"));
        }
        let series = self.source.indicators(&symbol, start, end, &names).await?;
        Ok(serde_json::to_string_pretty(&tail_series(&series))?)
    }
}

/// Keep the trailing numeric values of every array-valued entry.
fn tail_series(series: &Value) -> Value {
    let Some(map) = series.as_object() else {
        return json!({});
    };
    let mut out = serde_json::Map::new();
    for (name, values) in map {
        if let Some(values) = values.as_array() {
            let start = values.len().saturating_sub(INDICATOR_TAIL);
            let tail: Vec<Value> = values[start..]
                .iter()
                .filter(|v| v.as_f64().is_some_and(f64::is_finite))
                .cloned()
                .collect();
            out.insert(name.clone(), Value::Array(tail));
        }
    }
    Value::Object(out)
}

/// `get_fundamentals`: valuation and profitability figures.
pub struct FundamentalsTool {
    source: Arc<dyn MarketDataSource>,
}

impl FundamentalsTool {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for FundamentalsTool {
    fn name(&self) -> &str {
        "get_fundamentals"
    }

    fn description(&self) -> &str {
        "Fetch fundamental data for a stock including market cap, P/E ratio, dividend yield, \
         EPS, revenue, and profit margin."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"symbol": symbol_schema("Stock ticker symbol")},
            "required": ["symbol"]
        })
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn call(&self, input: Value) -> Result<String, ToolFailure> {
        let input: SymbolInput = parse_input(input)?;
        let symbol = normalize_symbol(&input.symbol)?;
        let fundamentals = self.source.fundamentals(&symbol).await?;
        Ok(serde_json::to_string_pretty(&fundamentals)?)
    }
}

/// `get_news`: recent articles, newest first as the source orders them.
pub struct NewsTool {
    source: Arc<dyn MarketDataSource>,
}

impl NewsTool {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for NewsTool {
    fn name(&self) -> &str {
        "get_news"
    }

    fn description(&self) -> &str {
        "Fetch recent news articles related to a stock symbol. Returns news title, summary, \
         source, and sentiment."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": symbol_schema("Stock ticker symbol"),
                "limit": {
                    "type": "number",
                    "description": "Maximum number of news articles to return (default: 10)"
                }
            },
            "required": ["symbol"]
        })
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn call(&self, input: Value) -> Result<String, ToolFailure> {
        let input: NewsInput = parse_input(input)?;
        let symbol = normalize_symbol(&input.symbol)?;
        let limit = input.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_NEWS_LIMIT);
        let mut news = self.source.news(&symbol, limit).await?;
        news.truncate(limit);
        Ok(serde_json::to_string_pretty(&news)?)
    }
}

/// The four standard market data tools, in the order models see them.
pub fn market_tools(source: Arc<dyn MarketDataSource>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(StockDataTool::new(source.clone())),
        Arc::new(IndicatorsTool::new(source.clone())),
        Arc::new(FundamentalsTool::new(source.clone())),
        Arc::new(NewsTool::new(source)),
    ]
}

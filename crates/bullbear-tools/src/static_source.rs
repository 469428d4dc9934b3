use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bullbear_models::{Bar, NewsItem};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::MarketDataError;
use crate::market::MarketDataSource;

/// Everything known about one symbol.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SymbolData {
    #[serde(default)]
    pub bars: Vec<Bar>,
    #[serde(default)]
    pub indicators: serde_json::Map<String, Value>,
    #[serde(default)]
    pub fundamentals: Value,
    #[serde(default)]
    pub news: Vec<NewsItem>,
}

/// In-memory market data keyed by upper-case symbol, usually loaded from a
/// JSON fixture of the form `{"AAPL": {"bars": [...], "news": [...]}}`.
#[derive(Debug, Clone, Default)]
pub struct StaticMarketData {
    symbols: HashMap<String, SymbolData>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Result<Self, MarketDataError> {
        let raw: HashMap<String, SymbolData> = serde_json::from_value(value)?;
        let mut data = Self::new();
        for (symbol, entry) in raw {
            data.insert(&symbol, entry);
        }
        Ok(data)
    }

    pub fn from_json_str(json: &str) -> Result<Self, MarketDataError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, MarketDataError> {
        let content = std::fs::read_to_string(path)?;
        let data = Self::from_json_str(&content)?;
        info!(path = %path.display(), symbols = data.symbols.len(), "Loaded market data fixture");
        Ok(data)
    }

    pub fn insert(&mut self, symbol: &str, data: SymbolData) {
        self.symbols.insert(symbol.trim().to_uppercase(), data);
    }

    pub fn symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self.symbols.keys().map(String::as_str).collect();
        symbols.sort_unstable();
        symbols
    }

    fn entry(&self, symbol: &str) -> Result<&SymbolData, MarketDataError> {
        self.symbols
            .get(&symbol.to_uppercase())
            .ok_or_else(|| MarketDataError::UnknownSymbol(symbol.to_string()))
    }
}

#[async_trait]
impl MarketDataSource for StaticMarketData {
    async fn price_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, MarketDataError> {
        Ok(self
            .entry(symbol)?
            .bars
            .iter()
            .filter(|bar| bar.date >= start && bar.date <= end)
            .cloned()
            .collect())
    }

    async fn indicators(
        &self,
        symbol: &str,
        _start: NaiveDate,
        _end: NaiveDate,
        names: &[String],
    ) -> Result<Value, MarketDataError> {
        let entry = self.entry(symbol)?;
        let mut out = serde_json::Map::new();
        for name in names {
            match entry.indicators.get(name) {
                Some(series) => {
                    out.insert(name.clone(), series.clone());
                }
                None => {
                    return Err(MarketDataError::Unavailable(format!(
                        "indicator '{name}' for {symbol}"
                    )))
                }
            }
        }
        Ok(Value::Object(out))
    }

    async fn fundamentals(&self, symbol: &str) -> Result<Value, MarketDataError> {
        let entry = self.entry(symbol)?;
        if entry.fundamentals.is_null() {
            return Err(MarketDataError::Unavailable(format!("fundamentals for {symbol}")));
        }
        Ok(entry.fundamentals.clone())
    }

    async fn news(&self, symbol: &str, limit: usize) -> Result<Vec<NewsItem>, MarketDataError> {
        Ok(self.entry(symbol)?.news.iter().take(limit).cloned().collect())
    }
}

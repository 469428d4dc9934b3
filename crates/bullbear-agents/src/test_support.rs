//! Test doubles shared by unit and integration tests.
//!
//! `ScriptedProvider` replays queued replies in order and records every call,
//! so tests can assert on the exact conversation each step saw.
//! `FakeChatServer` is a local HTTP endpoint that serves canned responses to
//! the real adapters.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bullbear_models::{Backend, Bar, LlmResponse, Message, NewsItem, ToolSchema};
use bullbear_tools::static_source::SymbolData;
use bullbear_tools::{StaticMarketData, Tool, ToolFailure};
use chrono::{Duration as ChronoDuration, NaiveDate};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::error::AgentError;
use crate::provider::{Capabilities, LlmProvider};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One recorded provider call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    /// Names of the tool schemas offered on this call.
    pub tools: Vec<String>,
}

enum Script {
    Replies(VecDeque<LlmResponse>),
    AlwaysFail { status: u16, body: String },
}

/// Provider that replays a fixed script.
pub struct ScriptedProvider {
    script: Mutex<Script>,
    calls: Mutex<Vec<RecordedCall>>,
    capabilities: Capabilities,
    delay: Duration,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<LlmResponse>) -> Self {
        Self {
            script: Mutex::new(Script::Replies(replies.into())),
            calls: Mutex::new(Vec::new()),
            capabilities: Capabilities {
                tool_calling: true,
                system_role: true,
            },
            delay: Duration::ZERO,
        }
    }

    /// Text replies, one per call.
    pub fn from_texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| LlmResponse::text(*t)).collect())
    }

    /// Every call fails with an upstream error status.
    pub fn failing(status: u16, body: &str) -> Self {
        let provider = Self::new(Vec::new());
        *lock(&provider.script) = Script::AlwaysFail {
            status,
            body: body.to_string(),
        };
        provider
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn without_tool_calling(mut self) -> Self {
        self.capabilities.tool_calling = false;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    async fn next(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<LlmResponse, AgentError> {
        lock(&self.calls).push(RecordedCall {
            messages: messages.to_vec(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &mut *lock(&self.script) {
            Script::Replies(queue) => queue
                .pop_front()
                .ok_or_else(|| AgentError::Parse("scripted provider has no replies left".to_string())),
            Script::AlwaysFail { status, body } => Err(AgentError::Provider {
                status: *status,
                body: body.clone(),
            }),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn backend(&self) -> Backend {
        Backend::Groq
    }

    fn model(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError> {
        self.next(messages, &[]).await
    }

    async fn invoke_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<LlmResponse, AgentError> {
        if self.capabilities.tool_calling {
            self.next(messages, tools).await
        } else {
            self.next(messages, &[]).await
        }
    }
}

/// Deterministic daily bars: `days` bars ending on `end`, drifting upward.
pub fn canned_ohlcv(days: u32, end: NaiveDate) -> Vec<Bar> {
    (0..days)
        .map(|i| {
            let date = end - ChronoDuration::days(i64::from(days - 1 - i));
            let base = 180.0 + f64::from(i) * 0.75;
            Bar {
                date,
                open: base,
                high: base + 2.5,
                low: base - 1.5,
                close: base + 1.0,
                volume: 50_000_000.0 + f64::from(i) * 250_000.0,
            }
        })
        .collect()
}

/// Static market data for one symbol: 30 days of bars, fundamentals, news.
pub fn stub_market_data(symbol: &str, end: NaiveDate) -> StaticMarketData {
    let mut data = StaticMarketData::new();
    data.insert(
        symbol,
        SymbolData {
            bars: canned_ohlcv(30, end),
            indicators: serde_json::Map::new(),
            fundamentals: json!({
                "market_cap": 2.9e12,
                "pe_ratio": 29.4,
                "eps": 6.43,
                "profit_margin": 0.26
            }),
            news: vec![
                NewsItem {
                    title: format!("{symbol} beats quarterly estimates"),
                    summary: "Revenue and EPS came in above consensus.".to_string(),
                    source: "Newswire".to_string(),
                    published_at: Some(end.format("%Y-%m-%d").to_string()),
                    sentiment: Some(0.5),
                },
                NewsItem {
                    title: format!("Regulators open inquiry into {symbol}"),
                    summary: String::new(),
                    source: "Newswire".to_string(),
                    published_at: None,
                    sentiment: Some(-0.25),
                },
            ],
        },
    );
    data
}

/// `get_stock_data` stand-in that serves [`canned_ohlcv`] for any symbol.
pub struct StubStockDataTool {
    end: NaiveDate,
    calls: Mutex<Vec<Value>>,
}

impl StubStockDataTool {
    pub fn new() -> Self {
        Self::ending(NaiveDate::from_ymd_opt(2025, 1, 31).unwrap_or_default())
    }

    pub fn ending(end: NaiveDate) -> Self {
        Self {
            end,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Value> {
        lock(&self.calls).clone()
    }
}

impl Default for StubStockDataTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for StubStockDataTool {
    fn name(&self) -> &str {
        "get_stock_data"
    }

    fn description(&self) -> &str {
        "Fetch historical stock price data (OHLCV) for a symbol."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"symbol": {"type": "string"}},
            "required": ["symbol"]
        })
    }

    fn side_effect_free(&self) -> bool {
        true
    }

    async fn call(&self, input: Value) -> Result<String, ToolFailure> {
        lock(&self.calls).push(input.clone());
        let symbol = input
            .get("symbol")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolFailure::new("symbol is required"))?;
        let payload = json!({
            "symbol": symbol.to_uppercase(),
            "bars": canned_ohlcv(30, self.end),
        });
        Ok(serde_json::to_string(&payload)?)
    }
}

/// A canned HTTP reply.
#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl CannedResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    /// Chat-completions reply carrying plain text.
    pub fn chat_text(content: &str) -> Self {
        Self::json(
            200,
            json!({
                "id": "chatcmpl-test",
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": content},
                    "finish_reason": "stop"
                }]
            }),
        )
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// One request as the fake server received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub head: String,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Minimal HTTP/1.1 server on 127.0.0.1 answering each request with the next
/// canned response (500 once they run out).
pub struct FakeChatServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl FakeChatServer {
    pub async fn start(responses: Vec<CannedResponse>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let requests = Arc::clone(&requests);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let queue = Arc::clone(&queue);
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move {
                        let _ = serve_one(stream, queue, requests).await;
                    });
                }
            })
        };

        Ok(Self {
            addr,
            requests,
            handle,
        })
    }

    /// Base URL usable as a chat-completions endpoint override.
    pub fn url(&self) -> String {
        format!("http://{}/v1/chat/completions", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }
}

impl Drop for FakeChatServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_one(
    mut stream: TcpStream,
    queue: Arc<Mutex<VecDeque<CannedResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    lock(&requests).push(RecordedRequest { head, body });

    let response = lock(&queue).pop_front().unwrap_or_else(|| {
        CannedResponse::json(500, json!({"error": {"message": "no canned response left"}}))
    });
    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let reason = match response.status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    };
    let reply = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status,
        reason,
        response.body.len(),
        response.body
    );
    stream.write_all(reply.as_bytes()).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canned_bars_end_on_date_and_rise() {
        let end = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let bars = canned_ohlcv(30, end);
        assert_eq!(bars.len(), 30);
        assert_eq!(bars.last().unwrap().date, end);
        assert!(bars.last().unwrap().close > bars[0].close);
    }

    #[tokio::test]
    async fn scripted_provider_replays_in_order() {
        let provider = ScriptedProvider::from_texts(&["one", "two"]);
        assert_eq!(provider.invoke(&[Message::user("a")]).await.unwrap().content, "one");
        assert_eq!(provider.invoke(&[Message::user("b")]).await.unwrap().content, "two");
        assert!(provider.invoke(&[Message::user("c")]).await.is_err());
        assert_eq!(provider.call_count(), 3);
    }
}

use async_trait::async_trait;
use bullbear_models::{Backend, LlmResponse, Message, Role};
use serde_json::{json, Value};
use tracing::debug;

use super::{ensure_not_empty, send_json, Capabilities, Family, LlmProvider, ProviderConfig};
use crate::error::AgentError;

/// `generateContent` adapter. The key travels as a query parameter.
pub struct GeminiProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    pub fn build_request(&self, messages: &[Message]) -> Result<reqwest::Request, AgentError> {
        let url = format!("{}/{}:generateContent", self.config.endpoint, self.config.model);
        let mut builder = self
            .client
            .post(url)
            .json(&request_body(&self.config, messages));
        if let Some(key) = &self.config.api_key {
            builder = builder.query(&[("key", key)]);
        }
        Ok(builder.build()?)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn backend(&self) -> Backend {
        self.config.backend
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn capabilities(&self) -> Capabilities {
        Family::Gemini.capabilities()
    }

    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError> {
        debug!(model = %self.config.model, messages = messages.len(), "Calling Gemini generateContent");
        let request = self.build_request(messages)?;
        let body = send_json(&self.client, request, self.config.timeout).await?;
        ensure_not_empty(parse_response(&body)?, self.config.backend)
    }
}

pub fn request_body(config: &ProviderConfig, messages: &[Message]) -> Value {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let mut contents: Vec<(&'static str, Vec<String>)> = Vec::new();
    for message in messages {
        let (role, text) = match message.role {
            Role::System => continue,
            Role::User => ("user", message.content.clone()),
            Role::Assistant => ("model", message.content.clone()),
            Role::Tool => ("user", format!("Tool result:\n{}", message.content)),
        };
        if text.is_empty() {
            continue;
        }
        match contents.last_mut() {
            Some((last_role, parts)) if *last_role == role => parts.push(text),
            _ => contents.push((role, vec![text])),
        }
    }

    let mut body = json!({
        "contents": contents
            .into_iter()
            .map(|(role, parts)| {
                json!({
                    "role": role,
                    "parts": parts.into_iter().map(|text| json!({"text": text})).collect::<Vec<_>>(),
                })
            })
            .collect::<Vec<_>>(),
        "generationConfig": {
            "temperature": config.temperature,
            "maxOutputTokens": config.max_tokens,
        },
    });
    if !system.is_empty() {
        body["systemInstruction"] = json!({"parts": [{"text": system.join("\n\n")}]});
    }
    body
}

pub fn parse_response(body: &Value) -> Result<LlmResponse, AgentError> {
    let Some(candidate) = body.get("candidates").and_then(|c| c.get(0)) else {
        let reason = body
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
            .map(|r| format!("prompt blocked: {r}"))
            .unwrap_or_else(|| "Response has no candidates".to_string());
        return Err(AgentError::Parse(reason));
    };

    let text = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    Ok(LlmResponse::text(text))
}

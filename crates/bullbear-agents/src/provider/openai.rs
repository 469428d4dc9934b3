use async_trait::async_trait;
use bullbear_models::{Backend, LlmResponse, Message, Role, ToolCall, ToolSchema};
use serde_json::{json, Value};
use tracing::debug;

use super::{
    decode_arguments, ensure_not_empty, send_json, Capabilities, Family, LlmProvider,
    ProviderConfig,
};
use crate::error::AgentError;

/// Chat-completions adapter shared by OpenAI, Groq, OpenRouter and Ollama.
pub struct OpenAiCompatibleProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: ProviderConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    pub fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<reqwest::Request, AgentError> {
        let mut builder = self
            .client
            .post(&self.config.endpoint)
            .json(&request_body(&self.config, messages, tools));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        Ok(builder.build()?)
    }

    async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<LlmResponse, AgentError> {
        debug!(
            backend = %self.config.backend,
            model = %self.config.model,
            messages = messages.len(),
            tools = tools.len(),
            "Calling chat completions"
        );
        let request = self.build_request(messages, tools)?;
        let body = send_json(&self.client, request, self.config.timeout).await?;
        ensure_not_empty(parse_response(&body)?, self.config.backend)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn backend(&self) -> Backend {
        self.config.backend
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn capabilities(&self) -> Capabilities {
        Family::OpenAiCompatible.capabilities()
    }

    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError> {
        self.send(messages, &[]).await
    }

    async fn invoke_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<LlmResponse, AgentError> {
        self.send(messages, tools).await
    }
}

pub fn request_body(config: &ProviderConfig, messages: &[Message], tools: &[ToolSchema]) -> Value {
    let mut body = json!({
        "model": config.model,
        "messages": messages.iter().map(wire_message).collect::<Vec<_>>(),
        "temperature": config.temperature,
        "max_tokens": config.max_tokens,
    });
    if !tools.is_empty() {
        body["tools"] = tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    }
                })
            })
            .collect();
        body["tool_choice"] = json!("auto");
    }
    body
}

fn wire_message(message: &Message) -> Value {
    match message.role {
        Role::Assistant if !message.tool_calls.is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": encode_arguments(&call.arguments),
                        }
                    })
                })
                .collect();
            let content = if message.content.is_empty() {
                Value::Null
            } else {
                json!(message.content)
            };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        Role::Tool => json!({
            "role": "tool",
            "content": message.content,
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
        }),
        role => json!({"role": role, "content": message.content}),
    }
}

/// Chat-completions expects arguments as a JSON-encoded string.
fn encode_arguments(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

pub fn parse_response(body: &Value) -> Result<LlmResponse, AgentError> {
    let message = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| AgentError::Parse("Response has no choices[0].message".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let function = call.get("function")?;
                    let name = function.get("name")?.as_str()?.to_string();
                    let arguments = match function.get("arguments") {
                        Some(Value::String(raw)) => decode_arguments(raw),
                        Some(Value::Null) | None => json!({}),
                        Some(other) => other.clone(),
                    };
                    Some(ToolCall {
                        id: call
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        name,
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(LlmResponse { content, tool_calls })
}

use async_trait::async_trait;
use bullbear_models::{Backend, LlmResponse, Message, Role, ToolCall};
use serde_json::{json, Value};
use tracing::debug;

use super::{ensure_not_empty, send_json, Capabilities, Family, LlmProvider, ProviderConfig};
use crate::error::AgentError;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Messages API adapter.
pub struct AnthropicProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    pub fn build_request(&self, messages: &[Message]) -> Result<reqwest::Request, AgentError> {
        let mut builder = self
            .client
            .post(&self.config.endpoint)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request_body(&self.config, messages));
        if let Some(key) = &self.config.api_key {
            builder = builder.header("x-api-key", key);
        }
        Ok(builder.build()?)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn backend(&self) -> Backend {
        self.config.backend
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn capabilities(&self) -> Capabilities {
        Family::Anthropic.capabilities()
    }

    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, AgentError> {
        debug!(model = %self.config.model, messages = messages.len(), "Calling Anthropic messages");
        let request = self.build_request(messages)?;
        let body = send_json(&self.client, request, self.config.timeout).await?;
        ensure_not_empty(parse_response(&body)?, self.config.backend)
    }
}

/// System text goes in the top-level `system` field. The remaining turns are
/// reduced to alternating user/assistant text, with tool results folded into
/// user turns.
pub fn request_body(config: &ProviderConfig, messages: &[Message]) -> Value {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let mut turns: Vec<(&'static str, String)> = Vec::new();
    for message in messages {
        let (role, text) = match message.role {
            Role::System => continue,
            Role::User => ("user", message.content.clone()),
            Role::Assistant => ("assistant", assistant_text(message)),
            Role::Tool => (
                "user",
                format!(
                    "Tool result ({}):\n{}",
                    message.tool_call_id.as_deref().unwrap_or("unknown"),
                    message.content
                ),
            ),
        };
        match turns.last_mut() {
            Some((last_role, last_text)) if *last_role == role => {
                last_text.push_str("\n\n");
                last_text.push_str(&text);
            }
            _ => turns.push((role, text)),
        }
    }

    let mut body = json!({
        "model": config.model,
        "max_tokens": config.max_tokens,
        "temperature": config.temperature,
        "messages": turns
            .into_iter()
            .map(|(role, content)| json!({"role": role, "content": content}))
            .collect::<Vec<_>>(),
    });
    if !system.is_empty() {
        body["system"] = json!(system.join("\n\n"));
    }
    body
}

fn assistant_text(message: &Message) -> String {
    let mut text = message.content.clone();
    for call in &message.tool_calls {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!("[Requested tool {} with {}]", call.name, call.arguments));
    }
    text
}

pub fn parse_response(body: &Value) -> Result<LlmResponse, AgentError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| AgentError::Parse("Response has no content blocks".to_string()))?;

    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    texts.push(text);
                }
            }
            Some("tool_use") => {
                if let Some(name) = block.get("name").and_then(Value::as_str) {
                    tool_calls.push(ToolCall {
                        id: block
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        name: name.to_string(),
                        arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(LlmResponse {
        content: texts.join(""),
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> ProviderConfig {
        ProviderConfig {
            backend: Backend::Anthropic,
            model: "claude-3-5-haiku-20241022".to_string(),
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            api_key: Some("sk-ant-test".to_string()),
            temperature: 0.3,
            max_tokens: 4096,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn request_headers() {
        let provider = AnthropicProvider::new(config(), reqwest::Client::new());
        let request = provider.build_request(&[Message::user("hi")]).unwrap();
        let headers = request.headers();
        assert_eq!(headers["x-api-key"].to_str().unwrap(), "sk-ant-test");
        assert_eq!(headers["anthropic-version"].to_str().unwrap(), "2023-06-01");
        assert!(headers.get("authorization").is_none());
    }

    #[test]
    fn system_is_split_out() {
        let body = request_body(
            &config(),
            &[Message::system("You are a risk manager."), Message::user("Assess TSLA")],
        );
        assert_eq!(body["system"], "You are a risk manager.");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(body["max_tokens"], 4096);
    }

    #[test]
    fn no_system_field_without_system_message() {
        let body = request_body(&config(), &[Message::user("hi")]);
        assert!(body.get("system").is_none());
    }

    #[test]
    fn tool_results_fold_into_user_turns() {
        let messages = vec![
            Message::user("Analyze AAPL"),
            Message::assistant_with_calls(
                "",
                vec![ToolCall {
                    id: "call_0_0".to_string(),
                    name: "get_news".to_string(),
                    arguments: json!({"symbol": "AAPL"}),
                }],
            ),
            Message::tool_result("call_0_0", "[]"),
            Message::user("Continue"),
        ];
        let body = request_body(&config(), &messages);
        let wire = body["messages"].as_array().unwrap();
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[1]["role"], "assistant");
        assert!(wire[1]["content"].as_str().unwrap().contains("get_news"));
        assert_eq!(wire[2]["role"], "user");
        let merged = wire[2]["content"].as_str().unwrap();
        assert!(merged.starts_with("Tool result (call_0_0):"));
        assert!(merged.ends_with("Continue"));
    }

    #[test]
    fn parse_concatenates_text_blocks() {
        let body = json!({
            "content": [
                {"type": "text", "text": "HOLD, "},
                {"type": "text", "text": "confidence 0.5"}
            ],
            "stop_reason": "end_turn"
        });
        assert_eq!(parse_response(&body).unwrap().content, "HOLD, confidence 0.5");
    }

    #[test]
    fn parse_tool_use_block() {
        let body = json!({
            "content": [{"type": "tool_use", "id": "toolu_1", "name": "get_news", "input": {"symbol": "TSLA"}}]
        });
        let response = parse_response(&body).unwrap();
        assert_eq!(response.tool_calls[0].id, "toolu_1");
        assert_eq!(response.tool_calls[0].arguments["symbol"], "TSLA");
    }

    #[test]
    fn parse_error_shape_is_parse_error() {
        let err = parse_response(&json!({"type": "error"})).unwrap_err();
        assert!(matches!(err, AgentError::Parse(_)));
    }
}

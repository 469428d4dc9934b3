use async_trait::async_trait;
use bullbear_models::ToolSchema;
use serde::de::DeserializeOwned;

use crate::error::ToolFailure;

/// A named, schema-described callable the reasoning loop may invoke.
///
/// Implementations report problems through [`ToolFailure`]; the registry turns
/// those (and panics) into plain error text for the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// JSON schema object for the tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Read-only tools may run concurrently with each other.
    fn side_effect_free(&self) -> bool {
        false
    }

    async fn call(&self, input: serde_json::Value) -> Result<String, ToolFailure>;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Deserialize tool input into a typed struct.
///
/// Models sometimes send the arguments as a JSON-encoded string rather than an
/// object, so a string input is decoded once before deserializing.
pub fn parse_input<T: DeserializeOwned>(input: serde_json::Value) -> Result<T, ToolFailure> {
    let value = match input {
        serde_json::Value::String(raw) => serde_json::from_str(&raw)
            .map_err(|e| ToolFailure::new(format!("Arguments are not valid JSON: {e}")))?,
        other => other,
    };
    serde_json::from_value(value).map_err(|e| ToolFailure::new(format!("Invalid input: {e}")))
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use bullbear_models::ToolSchema;
use tracing::{debug, error, warn};

use crate::error::ToolError;
use crate::tool::Tool;

/// Leading text of the output [`ToolRegistry::execute`] returns when a tool
/// fails or panics. The agent loop hands that output to the model as is.
pub const FAILURE_PREFIX: &str = "Error running";

/// Whether `output` is a failure report from [`ToolRegistry::execute`].
pub fn is_failure_output(output: &str) -> bool {
    output.starts_with(FAILURE_PREFIX)
}

/// Fixed set of tools resolved by name.
///
/// `execute` is the only way tool code runs: each call is spawned on its own
/// task so a panicking tool cannot take the caller down, and bounded by the
/// registry timeout.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: Vec::new(),
            timeout,
        }
    }

    /// Build a registry from a list, rejecting duplicate names.
    pub fn with_tools(
        tools: impl IntoIterator<Item = Arc<dyn Tool>>,
        timeout: Duration,
    ) -> Result<Self, ToolError> {
        let mut registry = Self::new(timeout);
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        if self.get(tool.name()).is_some() {
            return Err(ToolError::Duplicate(tool.name().to_string()));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Model-facing schemas in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True when every named tool exists and declares itself side-effect-free.
    pub fn all_side_effect_free<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> bool {
        names
            .into_iter()
            .all(|name| self.get(name).is_some_and(|t| t.side_effect_free()))
    }

    /// Run a tool by name.
    ///
    /// Only an unknown name or a timeout is an `Err`. A tool that fails or
    /// panics yields `Ok` with a readable error string, so the model can see
    /// what went wrong and adapt.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        debug!(tool = %name, "Executing tool");
        let start = Instant::now();

        let handle = tokio::spawn(async move { tool.call(input).await });
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(Ok(output))) => {
                debug!(tool = %name, elapsed_ms = start.elapsed().as_millis(), "Tool succeeded");
                Ok(output)
            }
            Ok(Ok(Err(failure))) => {
                warn!(tool = %name, error = %failure, "Tool failed");
                Ok(format!("{FAILURE_PREFIX} {name}: {failure}"))
            }
            Ok(Err(join_error)) => {
                error!(tool = %name, error = %join_error, "Tool task panicked");
                Ok(format!("{FAILURE_PREFIX} {name}: tool crashed unexpectedly"))
            }
            Err(_) => {
                abort.abort();
                warn!(tool = %name, timeout_s = self.timeout.as_secs(), "Tool timed out");
                Err(ToolError::Timeout {
                    name: name.to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolFailure;
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input back"
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}, "required": []})
        }

        fn side_effect_free(&self) -> bool {
            true
        }

        async fn call(&self, input: serde_json::Value) -> Result<String, ToolFailure> {
            Ok(input.to_string())
        }
    }

    enum Misbehavior {
        Fail,
        Panic,
        Hang,
    }

    struct BadTool(Misbehavior);

    #[async_trait]
    impl Tool for BadTool {
        fn name(&self) -> &str {
            match self.0 {
                Misbehavior::Fail => "flaky_feed",
                Misbehavior::Panic => "panicky_feed",
                Misbehavior::Hang => "slow_feed",
            }
        }

        fn description(&self) -> &str {
            "A feed that misbehaves"
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        async fn call(&self, _input: serde_json::Value) -> Result<String, ToolFailure> {
            match self.0 {
                Misbehavior::Fail => Err(ToolFailure::new("upstream returned 503")),
                Misbehavior::Panic => panic!("feed parser exploded"),
                Misbehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok("late".to_string())
                }
            }
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::with_tools(
            vec![
                Arc::new(EchoTool) as Arc<dyn Tool>,
                Arc::new(BadTool(Misbehavior::Fail)),
                Arc::new(BadTool(Misbehavior::Panic)),
                Arc::new(BadTool(Misbehavior::Hang)),
            ],
            Duration::from_millis(100),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn execute_known_tool() {
        let output = registry()
            .execute("echo", serde_json::json!({"symbol": "AAPL"}))
            .await
            .unwrap();
        assert!(output.contains("AAPL"));
        assert!(!is_failure_output(&output));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let err = registry()
            .execute("get_weather", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::NotFound("get_weather".to_string()));
        assert_eq!(err.to_string(), "Tool not found: get_weather");
    }

    #[tokio::test]
    async fn tool_failure_becomes_error_string() {
        let output = registry()
            .execute("flaky_feed", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(output, "Error running flaky_feed: upstream returned 503");
        assert!(is_failure_output(&output));
    }

    #[tokio::test]
    async fn tool_panic_becomes_error_string() {
        let output = registry()
            .execute("panicky_feed", serde_json::json!({}))
            .await
            .unwrap();
        assert!(output.starts_with(&format!("{FAILURE_PREFIX} panicky_feed")), "{output}");
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let err = registry()
            .execute("slow_feed", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { ref name, .. } if name == "slow_feed"));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut registry = ToolRegistry::new(Duration::from_secs(1));
        registry.register(Arc::new(EchoTool)).unwrap();
        let err = registry.register(Arc::new(EchoTool)).unwrap_err();
        assert_eq!(err, ToolError::Duplicate("echo".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn schemas_follow_registration_order() {
        let names: Vec<String> = registry().schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["echo", "flaky_feed", "panicky_feed", "slow_feed"]);
    }

    #[test]
    fn side_effect_free_requires_every_tool() {
        let registry = registry();
        assert!(registry.all_side_effect_free(["echo"]));
        assert!(!registry.all_side_effect_free(["echo", "flaky_feed"]));
        assert!(!registry.all_side_effect_free(["missing"]));
    }
}

use std::sync::Arc;
use std::time::Instant;

use bullbear_models::{AgentSettings, Message, ToolCall};
use bullbear_tools::ToolRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AgentError;
use crate::provider::LlmProvider;

/// Returned in place of an answer when the loop runs out of iterations.
pub const ITERATION_EXHAUSTED_MESSAGE: &str = "Maximum iterations reached without final answer";

/// How an agent run ended. Exhaustion is a soft failure, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Done {
        content: String,
        iterations: u32,
    },
    IterationExhausted {
        /// Last non-empty text the model produced alongside its tool calls.
        partial: String,
        iterations: u32,
    },
}

impl AgentOutcome {
    /// Final text, or the exhaustion sentinel.
    pub fn text(&self) -> &str {
        match self {
            AgentOutcome::Done { content, .. } => content,
            AgentOutcome::IterationExhausted { .. } => ITERATION_EXHAUSTED_MESSAGE,
        }
    }

    /// Final text, or whatever partial text exists when exhausted.
    pub fn best_effort(&self) -> &str {
        match self {
            AgentOutcome::Done { content, .. } => content,
            AgentOutcome::IterationExhausted { partial, .. } => partial,
        }
    }

    pub fn iterations(&self) -> u32 {
        match self {
            AgentOutcome::Done { iterations, .. }
            | AgentOutcome::IterationExhausted { iterations, .. } => *iterations,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, AgentOutcome::Done { .. })
    }
}

/// Bounded tool-calling loop over one provider and one registry.
///
/// Each provider turn either answers (done) or asks for tools; tool results
/// are appended to the conversation and the model is called again, at most
/// `max_iterations + 1` times in total.
pub struct AgentExecutor {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    max_iterations: u32,
    parallel_tools: bool,
    system_prompt: Option<String>,
    cancel: CancellationToken,
}

impl AgentExecutor {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        settings: &AgentSettings,
    ) -> Self {
        Self {
            provider,
            registry,
            max_iterations: settings.max_iterations,
            parallel_tools: settings.parallel_tools,
            system_prompt: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub async fn run(&self, prompt: &str) -> Result<AgentOutcome, AgentError> {
        let mut history = Vec::new();
        if let Some(system) = &self.system_prompt {
            history.push(Message::system(system.clone()));
        }
        history.push(Message::user(prompt));
        let (outcome, _) = self.run_conversation(history).await?;
        Ok(outcome)
    }

    /// Drive the loop from an existing conversation. Returns the outcome and
    /// the full conversation, tool turns included.
    pub async fn run_conversation(
        &self,
        mut history: Vec<Message>,
    ) -> Result<(AgentOutcome, Vec<Message>), AgentError> {
        let run_id = Uuid::new_v4();
        let start = Instant::now();
        let schemas = self.registry.schemas();
        let mut iterations: u32 = 0;
        let mut partial = String::new();

        info!(
            run_id = %run_id,
            backend = %self.provider.backend(),
            model = %self.provider.model(),
            max_iterations = self.max_iterations,
            "Starting agent run"
        );

        loop {
            if self.cancel.is_cancelled() {
                warn!(run_id = %run_id, iterations, "Agent run cancelled");
                return Err(AgentError::Cancelled);
            }

            let response = self.provider.invoke_with_tools(&history, &schemas).await?;

            if !response.has_tool_calls() {
                info!(
                    run_id = %run_id,
                    iterations,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Agent run complete"
                );
                let outcome = AgentOutcome::Done {
                    content: response.content.clone(),
                    iterations,
                };
                history.push(Message::assistant(response.content));
                return Ok((outcome, history));
            }

            if !response.content.trim().is_empty() {
                partial = response.content.clone();
            }

            if iterations >= self.max_iterations {
                warn!(
                    run_id = %run_id,
                    iterations,
                    pending_calls = response.tool_calls.len(),
                    "Iteration cap reached with tool calls still pending"
                );
                return Ok((AgentOutcome::IterationExhausted { partial, iterations }, history));
            }

            let calls = assign_call_ids(response.tool_calls, iterations);
            debug!(
                run_id = %run_id,
                iteration = iterations,
                tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "Model requested tools"
            );
            history.push(Message::assistant_with_calls(response.content, calls.clone()));

            let results = self.execute_calls(&calls).await;
            for (call, result) in calls.iter().zip(results) {
                history.push(Message::tool_result(call.id.clone(), result));
            }

            iterations += 1;
        }
    }

    /// Run one turn's calls and return their results in request order.
    async fn execute_calls(&self, calls: &[ToolCall]) -> Vec<String> {
        let concurrent = self.parallel_tools
            && calls.len() > 1
            && self
                .registry
                .all_side_effect_free(calls.iter().map(|c| c.name.as_str()));

        if !concurrent {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(tool_output(
                    self.registry.execute(&call.name, call.arguments.clone()).await,
                ));
            }
            return results;
        }

        let handles: Vec<_> = calls
            .iter()
            .map(|call| {
                let registry = Arc::clone(&self.registry);
                let name = call.name.clone();
                let arguments = call.arguments.clone();
                tokio::spawn(async move { registry.execute(&name, arguments).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(tool_output(result)),
                Err(e) => {
                    error!(error = %e, "Tool task panicked");
                    results.push(format!("Error: tool task failed: {e}"));
                }
            }
        }
        results
    }
}

/// Registry errors become conversation content so the model can adapt.
fn tool_output(result: Result<String, bullbear_tools::ToolError>) -> String {
    match result {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, "Tool call could not run");
            format!("Error: {e}")
        }
    }
}

/// Fill in missing call ids as `call_<iteration>_<index>`.
fn assign_call_ids(calls: Vec<ToolCall>, iteration: u32) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(index, mut call)| {
            if call.id.trim().is_empty() {
                call.id = format!("call_{iteration}_{index}");
            }
            call
        })
        .collect()
}

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bullbear_models::decision::{clamp_unit, degraded_confidence};
use bullbear_models::{
    Action, AgentSettings, ConfidenceLevel, DebateRequest, DebateRole, DebateRound,
    DebateSettings, DebateSummary, Decision, DecisionRecord, MarketContext, Message,
};
use bullbear_tools::ToolRegistry;
use chrono::{NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::gather_context;
use crate::error::AgentError;
use crate::executor::{AgentExecutor, AgentOutcome};
use crate::parser::{parse_arguments, parse_final, parse_risk, FinalOutput, RiskOutput};
use crate::prompts;
use crate::provider::LlmProvider;

/// Researchers run on the quick model; risk and final steps on the deep one.
#[derive(Clone)]
pub struct DebateProviders {
    pub quick: Arc<dyn LlmProvider>,
    pub deep: Arc<dyn LlmProvider>,
}

impl DebateProviders {
    /// One provider for every step.
    pub fn single(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            quick: Arc::clone(&provider),
            deep: provider,
        }
    }
}

/// One state per role-step of the debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebateStage {
    Bull(u32),
    Bear(u32),
    RiskAssessment,
    FinalDecision,
    Done,
}

impl DebateStage {
    pub fn first(rounds: u32) -> Self {
        if rounds == 0 {
            DebateStage::RiskAssessment
        } else {
            DebateStage::Bull(0)
        }
    }

    pub fn next(self, rounds: u32) -> Self {
        match self {
            DebateStage::Bull(round) => DebateStage::Bear(round),
            DebateStage::Bear(round) if round + 1 < rounds => DebateStage::Bull(round + 1),
            DebateStage::Bear(_) => DebateStage::RiskAssessment,
            DebateStage::RiskAssessment => DebateStage::FinalDecision,
            DebateStage::FinalDecision | DebateStage::Done => DebateStage::Done,
        }
    }
}

/// A finished debate: the record plus the rounds that led to it.
#[derive(Debug, Clone)]
pub struct DebateOutcome {
    pub record: DecisionRecord,
    pub transcript: Vec<DebateRound>,
}

/// Checked request fields.
struct DebatePlan {
    symbol: String,
    date: NaiveDate,
    date_text: String,
    rounds: u32,
}

/// Mutable state of one debate run.
struct DebateState {
    plan: DebatePlan,
    market_data: String,
    transcript: Vec<DebateRound>,
    risk_assessment: String,
    confidence_level: ConfidenceLevel,
    degraded: bool,
    decision: Option<Decision>,
}

/// Runs the fixed bull / bear / risk / final pipeline for one symbol.
pub struct DebateOrchestrator {
    providers: DebateProviders,
    registry: Option<Arc<ToolRegistry>>,
    debate: DebateSettings,
    agent: AgentSettings,
    cancel: CancellationToken,
}

impl DebateOrchestrator {
    pub fn new(providers: DebateProviders, debate: DebateSettings, agent: AgentSettings) -> Self {
        Self {
            providers,
            registry: None,
            debate,
            agent,
            cancel: CancellationToken::new(),
        }
    }

    /// Registry used to gather market context and, when enabled, for researcher tool calls.
    pub fn with_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, request: &DebateRequest) -> DecisionRecord {
        self.run_with_transcript(request).await.record
    }

    /// Run the debate. Every failure ends in a `success=false` record; the
    /// transcript is whatever ran before the failure.
    pub async fn run_with_transcript(&self, request: &DebateRequest) -> DebateOutcome {
        let run_id = Uuid::new_v4();
        let start = Instant::now();
        let symbol = request.symbol.trim().to_uppercase();
        let fallback_date = request
            .date
            .clone()
            .unwrap_or_else(|| today().format("%Y-%m-%d").to_string());

        let plan = match self.plan(request) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(run_id = %run_id, symbol = %symbol, error = %e, "Rejected debate request");
                return DebateOutcome {
                    record: DecisionRecord::failed(&symbol, &fallback_date, e.to_string()),
                    transcript: Vec::new(),
                };
            }
        };

        info!(
            run_id = %run_id,
            symbol = %plan.symbol,
            date = %plan.date_text,
            rounds = plan.rounds,
            quick_model = %self.providers.quick.model(),
            deep_model = %self.providers.deep.model(),
            "Starting debate"
        );

        let mut state = DebateState {
            plan,
            market_data: String::new(),
            transcript: Vec::new(),
            risk_assessment: String::new(),
            confidence_level: ConfidenceLevel::Low,
            degraded: false,
            decision: None,
        };
        let context = request.context.clone();
        let budget = Duration::from_secs(self.debate.total_timeout_seconds);

        let result = tokio::time::timeout(budget, self.drive(&mut state, context)).await;

        let symbol = state.plan.symbol.clone();
        let date = state.plan.date_text.clone();
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("Debate timed out after {} seconds", budget.as_secs())),
        };
        let record = match (failure, state.decision.take()) {
            (None, Some(decision)) => {
                info!(
                    run_id = %run_id,
                    symbol = %symbol,
                    action = %decision.action,
                    confidence = %decision.confidence,
                    degraded = state.degraded,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Debate complete"
                );
                DecisionRecord::completed(&symbol, &date, decision, state.degraded)
            }
            (None, None) => {
                error!(run_id = %run_id, symbol = %symbol, "Debate ended without a decision");
                DecisionRecord::failed(&symbol, &date, "Debate ended without a decision")
            }
            (Some(message), _) => {
                warn!(
                    run_id = %run_id,
                    symbol = %symbol,
                    error = %message,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Debate failed"
                );
                DecisionRecord::failed(&symbol, &date, message)
            }
        };

        DebateOutcome {
            record,
            transcript: state.transcript,
        }
    }

    fn plan(&self, request: &DebateRequest) -> Result<DebatePlan, AgentError> {
        let symbol = request.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(AgentError::InvalidRequest("symbol must not be empty".to_string()));
        }
        if symbol.len() > 15
            || !symbol
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=' | '/'))
        {
            return Err(AgentError::InvalidRequest(format!(
                "'{symbol}' is not a valid ticker symbol"
            )));
        }

        let date = match request.date.as_deref().map(str::trim) {
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                AgentError::InvalidRequest(format!("date must be YYYY-MM-DD, got '{raw}'"))
            })?,
            None => today(),
        };

        let rounds = request
            .max_debate_rounds
            .unwrap_or(self.debate.default_rounds);
        if rounds > self.debate.max_rounds {
            return Err(AgentError::InvalidRequest(format!(
                "max_debate_rounds must be at most {}, got {rounds}",
                self.debate.max_rounds
            )));
        }

        Ok(DebatePlan {
            symbol,
            date,
            date_text: date.format("%Y-%m-%d").to_string(),
            rounds,
        })
    }

    async fn drive(
        &self,
        state: &mut DebateState,
        context: Option<MarketContext>,
    ) -> Result<(), AgentError> {
        let context = match (context, &self.registry) {
            (Some(context), _) => context,
            (None, Some(registry)) => {
                gather_context(registry, &state.plan.symbol, state.plan.date).await
            }
            (None, None) => MarketContext::new(),
        };
        state.market_data = context.render();

        let rounds = state.plan.rounds;
        let mut stage = DebateStage::first(rounds);
        while stage != DebateStage::Done {
            if self.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            debug!(symbol = %state.plan.symbol, stage = ?stage, "Debate step");
            match stage {
                DebateStage::Bull(round) => self.researcher_step(state, DebateRole::Bull, round).await?,
                DebateStage::Bear(round) => self.researcher_step(state, DebateRole::Bear, round).await?,
                DebateStage::RiskAssessment => self.risk_step(state).await?,
                DebateStage::FinalDecision => self.final_step(state).await?,
                DebateStage::Done => {}
            }
            stage = stage.next(rounds);
        }
        Ok(())
    }

    async fn researcher_step(
        &self,
        state: &mut DebateState,
        role: DebateRole,
        round: u32,
    ) -> Result<(), AgentError> {
        let opponent = match role {
            DebateRole::Bull if round > 0 => find_round(&state.transcript, DebateRole::Bear, round - 1),
            DebateRole::Bull => None,
            DebateRole::Bear => find_round(&state.transcript, DebateRole::Bull, round),
        };
        let messages = vec![
            Message::system(prompts::researcher_system_prompt(role)),
            Message::user(prompts::researcher_user_prompt(
                role,
                &state.plan.symbol,
                &state.plan.date_text,
                &state.market_data,
                round,
                state.plan.rounds,
                opponent,
            )),
        ];

        let text = match (&self.registry, self.debate.researcher_tools) {
            (Some(registry), true) => {
                let executor = AgentExecutor::new(
                    Arc::clone(&self.providers.quick),
                    Arc::clone(registry),
                    &self.agent,
                )
                .with_cancellation(self.cancel.clone());
                let (outcome, mut history) = executor.run_conversation(messages).await?;
                match outcome {
                    AgentOutcome::IterationExhausted { partial, iterations }
                        if partial.trim().is_empty() =>
                    {
                        warn!(
                            symbol = %state.plan.symbol,
                            role = %role,
                            round,
                            iterations,
                            "Researcher ran out of tool calls, asking for its arguments"
                        );
                        history.push(Message::user(prompts::researcher_wrap_up_prompt()));
                        self.providers.quick.invoke(&history).await?.content
                    }
                    outcome => outcome.best_effort().to_string(),
                }
            }
            _ => self.providers.quick.invoke(&messages).await?.content,
        };

        let arguments = parse_arguments(&text);
        info!(
            symbol = %state.plan.symbol,
            role = %role,
            round,
            arguments = arguments.len(),
            "Researcher turn complete"
        );
        state.transcript.push(DebateRound {
            role,
            round_index: round,
            arguments,
        });
        Ok(())
    }

    async fn risk_step(&self, state: &mut DebateState) -> Result<(), AgentError> {
        let mut messages = vec![
            Message::system(prompts::risk_manager_system_prompt()),
            Message::user(prompts::risk_user_prompt(
                &state.plan.symbol,
                &state.plan.date_text,
                &state.market_data,
                &prompts::render_transcript(&state.transcript),
            )),
        ];

        let first = self.providers.deep.invoke(&messages).await?.content;
        let parsed = parse_risk(&first);
        let (assessment, level) = match validate_level(&parsed) {
            Some(level) => (parsed.risk_assessment, level),
            None => {
                warn!(
                    symbol = %state.plan.symbol,
                    got = ?parsed.confidence_level,
                    "Invalid confidence level, re-prompting"
                );
                messages.push(Message::assistant(first));
                messages.push(Message::user(prompts::corrective_level_prompt(
                    parsed.confidence_level.as_deref(),
                )));
                let retry = parse_risk(&self.providers.deep.invoke(&messages).await?.content);
                match validate_level(&retry) {
                    Some(level) => (retry.risk_assessment, level),
                    None => {
                        warn!(symbol = %state.plan.symbol, "Confidence level still invalid, degrading to Low");
                        state.degraded = true;
                        (parsed.risk_assessment, ConfidenceLevel::Low)
                    }
                }
            }
        };

        info!(symbol = %state.plan.symbol, confidence_level = %level, "Risk assessment complete");
        state.risk_assessment = assessment;
        state.confidence_level = level;
        Ok(())
    }

    async fn final_step(&self, state: &mut DebateState) -> Result<(), AgentError> {
        let transcript = prompts::render_transcript(&state.transcript);
        let mut messages = vec![
            Message::system(prompts::final_decision_system_prompt()),
            Message::user(prompts::final_user_prompt(
                &state.plan.symbol,
                &state.plan.date_text,
                &transcript,
                &state.risk_assessment,
                state.confidence_level,
            )),
        ];

        let first = self.providers.deep.invoke(&messages).await?.content;
        let mut parsed = parse_final(&first);
        let mut raw = first;
        let mut action = validate_action(&parsed);

        if action.is_none() {
            warn!(
                symbol = %state.plan.symbol,
                got = ?parsed.action,
                "Invalid final decision, re-prompting"
            );
            messages.push(Message::assistant(raw.clone()));
            messages.push(Message::user(prompts::corrective_action_prompt(
                parsed.action.as_deref(),
            )));
            raw = self.providers.deep.invoke(&messages).await?.content;
            let retry = parse_final(&raw);
            action = validate_action(&retry);
            if action.is_some() {
                parsed = retry;
            }
        }

        let reasoning = if parsed.reasoning.trim().is_empty() {
            raw.trim().to_string()
        } else {
            parsed.reasoning.clone()
        };

        let (action, confidence, position_size) = match action {
            Some(action) => (
                action,
                parsed
                    .confidence
                    .map(clamp_unit)
                    .unwrap_or_else(|| state.confidence_level.score()),
                parsed.position_size.map(clamp_unit),
            ),
            None => {
                warn!(symbol = %state.plan.symbol, "Final decision still invalid, degrading to HOLD");
                state.degraded = true;
                (Action::Hold, degraded_confidence(), None)
            }
        };

        state.decision = Some(Decision {
            action,
            confidence,
            reasoning,
            risk_assessment: state.risk_assessment.clone(),
            debate_summary: Some(DebateSummary::from_transcript(&state.transcript)),
            confidence_level: Some(state.confidence_level),
            position_size,
        });
        Ok(())
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn find_round(transcript: &[DebateRound], role: DebateRole, round: u32) -> Option<&[String]> {
    transcript
        .iter()
        .find(|r| r.role == role && r.round_index == round)
        .map(|r| r.arguments.as_slice())
}

fn validate_level(output: &RiskOutput) -> Option<ConfidenceLevel> {
    output
        .confidence_level
        .as_deref()
        .and_then(|raw| ConfidenceLevel::from_str(raw).ok())
}

fn validate_action(output: &FinalOutput) -> Option<Action> {
    output
        .action
        .as_deref()
        .and_then(|raw| Action::from_str(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedProvider, StubStockDataTool};
    use bullbear_models::{LlmResponse, Role, ToolCall};
    use bullbear_tools::Tool;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn orchestrator(provider: Arc<ScriptedProvider>) -> DebateOrchestrator {
        DebateOrchestrator::new(
            DebateProviders::single(provider),
            DebateSettings::default(),
            AgentSettings::default(),
        )
    }

    fn replies(texts: &[&str]) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider::new(
            texts.iter().map(|t| LlmResponse::text(*t)).collect(),
        ))
    }

    #[test]
    fn stage_sequence_for_two_rounds() {
        let mut stage = DebateStage::first(2);
        let mut seen = vec![stage];
        while stage != DebateStage::Done {
            stage = stage.next(2);
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                DebateStage::Bull(0),
                DebateStage::Bear(0),
                DebateStage::Bull(1),
                DebateStage::Bear(1),
                DebateStage::RiskAssessment,
                DebateStage::FinalDecision,
                DebateStage::Done,
            ]
        );
    }

    #[test]
    fn zero_rounds_go_straight_to_risk() {
        assert_eq!(DebateStage::first(0), DebateStage::RiskAssessment);
    }

    #[tokio::test]
    async fn full_debate_from_json_replies() {
        let provider = replies(&[
            r#"{"arguments": ["Revenue growth 25%", "Expanding margins"]}"#,
            r#"{"arguments": ["P/E of 60"]}"#,
            r#"{"risk_assessment": "Valuation risk offsets growth.", "confidence_level": "Medium-High"}"#,
            r#"{"final_decision": "BUY", "confidence": 0.75, "reasoning": "Growth wins.", "position_size": 0.25}"#,
        ]);
        let outcome = orchestrator(provider.clone())
            .run_with_transcript(&DebateRequest::new("nvda").with_date("2025-01-15").with_rounds(1))
            .await;

        let record = outcome.record;
        assert!(record.success, "{:?}", record.error);
        assert_eq!(record.symbol, "NVDA");
        assert_eq!(record.date, "2025-01-15");
        assert!(!record.degraded);
        assert_eq!(record.decision.action, Action::Buy);
        assert_eq!(record.decision.confidence, dec!(0.75));
        assert_eq!(record.decision.position_size, Some(dec!(0.25)));
        assert_eq!(record.decision.confidence_level, Some(ConfidenceLevel::MediumHigh));
        assert_eq!(record.decision.risk_assessment, "Valuation risk offsets growth.");
        let summary = record.decision.debate_summary.unwrap();
        assert_eq!(summary.bull_arguments.len(), 2);
        assert_eq!(summary.bear_arguments, vec!["P/E of 60"]);
        assert_eq!(outcome.transcript.len(), 2);
        assert_eq!(provider.call_count(), 4);
    }

    #[tokio::test]
    async fn bear_sees_current_bull_turn_and_bull_sees_previous_bear() {
        let provider = replies(&[
            "Bull one",
            "Bear one",
            "Bull two",
            "Bear two",
            "Confidence Level: Low",
            "REJECT, confidence 0.3",
        ]);
        let record = orchestrator(provider.clone())
            .run(&DebateRequest::new("AMD").with_date("2025-02-01").with_rounds(2))
            .await;
        assert!(record.success);
        assert_eq!(record.decision.action, Action::Reject);

        let calls = provider.calls();
        assert!(calls[1].messages[1].content.contains("- Bull one"));
        assert!(calls[2].messages[1].content.contains("- Bear one"));
        assert!(!calls[2].messages[1].content.contains("- Bull one"));
        assert!(calls[3].messages[1].content.contains("- Bull two"));
        assert!(calls[4].messages[1].content.contains("Round 2 - Bear Researcher"));
    }

    #[tokio::test]
    async fn invalid_action_is_corrected_by_reprompt() {
        let provider = replies(&[
            "Bull",
            "Bear",
            "Confidence Level: High",
            r#"{"final_decision": "STRONG BUY", "confidence": 0.9}"#,
            r#"{"final_decision": "BUY", "confidence": 0.9, "reasoning": "Corrected."}"#,
        ]);
        let record = orchestrator(provider.clone())
            .run(&DebateRequest::new("AAPL").with_date("2025-01-02").with_rounds(1))
            .await;
        assert!(record.success);
        assert!(!record.degraded);
        assert_eq!(record.decision.action, Action::Buy);
        assert_eq!(record.decision.reasoning, "Corrected.");

        let retry = &provider.calls()[4];
        let last = retry.messages.last().unwrap();
        assert!(last.content.contains("STRONG BUY"));
        assert!(last.content.contains("BUY, SELL, HOLD, REJECT"));
    }

    #[tokio::test]
    async fn twice_invalid_output_degrades() {
        let provider = replies(&[
            "Bull",
            "Bear",
            "Confidence Level: Extreme",
            "Confidence Level: Very High",
            "I would accumulate gradually.",
            "Accumulate on dips.",
        ]);
        let record = orchestrator(provider.clone())
            .run(&DebateRequest::new("AAPL").with_date("2025-01-02").with_rounds(1))
            .await;
        assert!(record.success);
        assert!(record.degraded);
        assert_eq!(record.decision.action, Action::Hold);
        assert_eq!(record.decision.confidence, dec!(0.1));
        assert_eq!(record.decision.confidence_level, Some(ConfidenceLevel::Low));
        assert_eq!(provider.call_count(), 6);
    }

    #[tokio::test]
    async fn missing_confidence_uses_level_score() {
        let provider = replies(&["Bull", "Bear", "Confidence Level: Medium-Low", "SELL"]);
        let record = orchestrator(provider)
            .run(&DebateRequest::new("F").with_date("2025-01-02").with_rounds(1))
            .await;
        assert_eq!(record.decision.action, Action::Sell);
        assert_eq!(record.decision.confidence, dec!(0.35));
    }

    #[tokio::test]
    async fn out_of_range_numbers_are_clamped() {
        let provider = replies(&[
            "Bull",
            "Bear",
            "Confidence Level: High",
            r#"{"final_decision": "buy", "confidence": 250, "position_size": -0.5}"#,
        ]);
        let record = orchestrator(provider)
            .run(&DebateRequest::new("META").with_date("2025-01-02").with_rounds(1))
            .await;
        assert_eq!(record.decision.action, Action::Buy);
        assert_eq!(record.decision.confidence, dec!(1));
        assert_eq!(record.decision.position_size, Some(dec!(0)));
    }

    #[tokio::test]
    async fn provider_failure_yields_failed_record() {
        let provider = Arc::new(ScriptedProvider::failing(401, "invalid api key"));
        let record = orchestrator(provider)
            .run(&DebateRequest::new("TSLA").with_date("2025-01-02"))
            .await;
        assert!(!record.success);
        assert!(record.error.unwrap().contains("401"));
        assert_eq!(record.decision.confidence, dec!(0));
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_without_calls() {
        let provider = replies(&[]);
        let orchestrator = orchestrator(provider.clone());

        let record = orchestrator.run(&DebateRequest::new("  ")).await;
        assert!(!record.success);
        assert!(record.error.unwrap().contains("symbol must not be empty"));

        let record = orchestrator
            .run(&DebateRequest::new("TSLA").with_date("03/03/2025"))
            .await;
        assert!(record.error.unwrap().contains("YYYY-MM-DD"));

        let record = orchestrator
            .run(&DebateRequest::new("TSLA").with_rounds(6))
            .await;
        assert!(record.error.unwrap().contains("at most 5"));

        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_yields_failed_record() {
        let token = CancellationToken::new();
        token.cancel();
        let provider = replies(&["unused"]);
        let record = orchestrator(provider.clone())
            .with_cancellation(token)
            .run(&DebateRequest::new("TSLA").with_date("2025-01-02"))
            .await;
        assert!(!record.success);
        assert_eq!(record.error.as_deref(), Some("Run cancelled"));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn decorated_final_decision_is_accepted() {
        let text = "Final Decision: **BUY** - strong momentum";
        let provider = replies(&["Bull case", "Bear case", "High", text, text]);
        let record = orchestrator(provider.clone())
            .run(&DebateRequest::new("TSLA").with_date("2025-01-02").with_rounds(1))
            .await;

        assert!(record.success, "{:?}", record.error);
        assert!(!record.degraded);
        assert_eq!(record.decision.action, Action::Buy);
        assert_eq!(record.decision.confidence_level, Some(ConfidenceLevel::High));
        assert_eq!(record.decision.confidence, dec!(0.85));
        assert_eq!(provider.call_count(), 4);
    }

    fn tool_call(name: &str, arguments: serde_json::Value) -> LlmResponse {
        LlmResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: String::new(),
                name: name.to_string(),
                arguments,
            }],
        }
    }

    fn researcher_tools_orchestrator(
        provider: Arc<ScriptedProvider>,
        stub: Arc<StubStockDataTool>,
        agent: AgentSettings,
    ) -> DebateOrchestrator {
        let registry =
            ToolRegistry::with_tools(vec![stub as Arc<dyn Tool>], Duration::from_secs(5)).unwrap();
        let debate = DebateSettings {
            researcher_tools: true,
            ..DebateSettings::default()
        };
        DebateOrchestrator::new(DebateProviders::single(provider), debate, agent)
            .with_registry(Arc::new(registry))
    }

    #[tokio::test]
    async fn researchers_can_call_tools() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let stub = Arc::new(StubStockDataTool::ending(date));
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call("get_stock_data", json!({"symbol": "TSLA"})),
            LlmResponse::text(r#"{"arguments": ["Closed at a 30-day high"]}"#),
            LlmResponse::text(r#"{"arguments": ["Volume is fading"]}"#),
            LlmResponse::text(r#"{"risk_assessment": "Momentum with thin volume.", "confidence_level": "Medium"}"#),
            LlmResponse::text(r#"{"final_decision": "HOLD", "confidence": 0.5, "reasoning": "Mixed.", "position_size": 0}"#),
        ]));
        let outcome = researcher_tools_orchestrator(provider.clone(), stub.clone(), AgentSettings::default())
            .run_with_transcript(&DebateRequest::new("TSLA").with_date("2025-03-03").with_rounds(1))
            .await;

        assert!(outcome.record.success, "{:?}", outcome.record.error);
        assert_eq!(outcome.transcript[0].arguments, vec!["Closed at a 30-day high"]);
        assert_eq!(outcome.transcript[1].arguments, vec!["Volume is fading"]);

        // Context gathering runs first, then the bull's own call.
        let inputs = stub.calls();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[1], json!({"symbol": "TSLA"}));

        let calls = provider.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[0].tools, vec!["get_stock_data"]);
        let tool_result = calls[1].messages.last().unwrap();
        assert_eq!(tool_result.role, Role::Tool);
        assert!(tool_result.content.contains("\"symbol\":\"TSLA\""));
        assert!(tool_result.content.contains("2025-03-03"));
    }

    #[tokio::test]
    async fn researcher_out_of_tool_calls_is_asked_for_arguments() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let stub = Arc::new(StubStockDataTool::ending(date));
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call("get_stock_data", json!({"symbol": "TSLA"})),
            tool_call("get_stock_data", json!({"symbol": "TSLA"})),
            LlmResponse::text(r#"{"arguments": ["Thirty sessions of higher lows"]}"#),
            LlmResponse::text(r#"{"arguments": ["Stretched valuation"]}"#),
            LlmResponse::text(r#"{"risk_assessment": "Trend intact.", "confidence_level": "Medium"}"#),
            LlmResponse::text(r#"{"final_decision": "BUY", "confidence": 0.6, "reasoning": "Trend.", "position_size": 0.1}"#),
        ]));
        let agent = AgentSettings {
            max_iterations: 1,
            ..AgentSettings::default()
        };
        let outcome = researcher_tools_orchestrator(provider.clone(), stub, agent)
            .run_with_transcript(&DebateRequest::new("TSLA").with_date("2025-03-03").with_rounds(1))
            .await;

        assert!(outcome.record.success, "{:?}", outcome.record.error);
        assert_eq!(outcome.transcript[0].arguments, vec!["Thirty sessions of higher lows"]);
        assert_eq!(outcome.record.decision.action, Action::Buy);

        let calls = provider.calls();
        assert_eq!(calls.len(), 6);
        let wrap_up = &calls[2];
        assert!(wrap_up.tools.is_empty());
        let last = wrap_up.messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.content.contains("used all of your tool calls"));
        assert_eq!(wrap_up.messages[wrap_up.messages.len() - 2].role, Role::Tool);
    }

    #[tokio::test]
    async fn total_timeout_yields_failed_record() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![LlmResponse::text("slow")])
                .with_delay(Duration::from_secs(5)),
        );
        let debate = DebateSettings {
            total_timeout_seconds: 1,
            ..DebateSettings::default()
        };
        let record = DebateOrchestrator::new(
            DebateProviders::single(provider),
            debate,
            AgentSettings::default(),
        )
        .run(&DebateRequest::new("TSLA").with_date("2025-01-02"))
        .await;
        assert!(!record.success);
        assert_eq!(record.error.as_deref(), Some("Debate timed out after 1 seconds"));
    }
}

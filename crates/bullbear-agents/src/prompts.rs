use bullbear_models::{Action, ConfidenceLevel, DebateRole, DebateRound};

fn action_list() -> String {
    Action::ALL
        .iter()
        .map(|a| a.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn level_list() -> String {
    ConfidenceLevel::ALL
        .iter()
        .map(|l| l.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn researcher_format() -> String {
    let example = serde_json::json!({
        "arguments": ["<one specific, evidence-backed argument>", "<another argument>"]
    });
    serde_json::to_string_pretty(&example).unwrap_or_default()
}

pub fn bull_system_prompt() -> String {
    format!(
        "You are the Bull Researcher in a structured investment debate. Your job is to build \
         the strongest honest case FOR taking a long position in the stock under review.\n\n\
         ## HOW TO ARGUE\n\n\
         - Ground every argument in the MARKET DATA you are given: price trend, volume, \
         indicators, fundamentals, news.\n\
         - Cite concrete numbers (growth rates, margins, price levels) whenever the data has them.\n\
         - Focus on growth potential, competitive advantages, positive catalysts and \
         improving momentum.\n\
         - When the Bear Researcher has spoken, rebut their strongest points directly \
         instead of repeating your own.\n\
         - Do not invent data. If something is missing, argue from what is present.\n\n\
         ## OUTPUT FORMAT\n\n\
         Respond with ONLY a JSON object, no other text:\n{}\n\
         Give 2 to 5 arguments, each one or two sentences.",
        researcher_format()
    )
}

pub fn bear_system_prompt() -> String {
    format!(
        "You are the Bear Researcher in a structured investment debate. Your job is to build \
         the strongest honest case AGAINST taking a long position in the stock under review.\n\n\
         ## HOW TO ARGUE\n\n\
         - Ground every argument in the MARKET DATA you are given: price trend, volume, \
         indicators, fundamentals, news.\n\
         - Cite concrete numbers (valuation multiples, debt, declining metrics) whenever the \
         data has them.\n\
         - Focus on downside risks, valuation concerns, competitive threats, negative \
         catalysts and weakening momentum.\n\
         - Rebut the Bull Researcher's latest arguments point by point where you can.\n\
         - Do not invent data. If something is missing, argue from what is present.\n\n\
         ## OUTPUT FORMAT\n\n\
         Respond with ONLY a JSON object, no other text:\n{}\n\
         Give 2 to 5 arguments, each one or two sentences.",
        researcher_format()
    )
}

pub fn researcher_system_prompt(role: DebateRole) -> String {
    match role {
        DebateRole::Bull => bull_system_prompt(),
        DebateRole::Bear => bear_system_prompt(),
    }
}

pub fn risk_manager_system_prompt() -> String {
    let example = serde_json::json!({
        "risk_assessment": "<2-4 sentences weighing the key risks against the upside>",
        "confidence_level": "Medium"
    });
    format!(
        "You are the Risk Manager reviewing a completed bull/bear debate about one stock. \
         Weigh both sides impartially and judge how much confidence the evidence supports.\n\n\
         ## WHAT TO CONSIDER\n\n\
         - Which side used the market data more convincingly.\n\
         - Volatility, drawdown risk, event risk (earnings, macro, regulation) and liquidity.\n\
         - Arguments that went unanswered by the other side.\n\n\
         ## CONFIDENCE LEVEL\n\n\
         `confidence_level` MUST be exactly one of: {}.\n\
         High means the evidence clearly favours one side; Low means the debate was \
         inconclusive or the data was thin.\n\n\
         ## OUTPUT FORMAT\n\n\
         Respond with ONLY a JSON object, no other text:\n{}",
        level_list(),
        serde_json::to_string_pretty(&example).unwrap_or_default()
    )
}

pub fn final_decision_system_prompt() -> String {
    let example = serde_json::json!({
        "final_decision": "HOLD",
        "confidence": 0.5,
        "reasoning": "<2-4 sentences explaining the decision>",
        "position_size": 0.0
    });
    format!(
        "You are the Portfolio Manager making the final call after a bull/bear debate and a \
         risk review.\n\n\
         ## DECISION RULES\n\n\
         - `final_decision` MUST be exactly one of: {}.\n\
         - BUY or SELL only when one side clearly won the debate and the risk review supports it.\n\
         - HOLD when the evidence is balanced or the confidence level is Medium or lower.\n\
         - REJECT when the data is insufficient or the risks are unacceptable.\n\
         - `confidence` is a number from 0.0 to 1.0 and should agree with the risk \
         manager's confidence level.\n\
         - `position_size` is the suggested fraction of capital from 0.0 to 1.0 \
         (0.0 for HOLD and REJECT).\n\n\
         ## OUTPUT FORMAT\n\n\
         Respond with ONLY a JSON object, no other text:\n{}",
        action_list(),
        serde_json::to_string_pretty(&example).unwrap_or_default()
    )
}

/// System prompt for a free-form agent run over the registered tools.
pub fn analyst_system_prompt(tool_names: &[&str]) -> String {
    let tools = if tool_names.is_empty() {
        "(none)".to_string()
    } else {
        tool_names.join(", ")
    };
    format!(
        "You are a financial market analyst. Answer the user's question about stocks and \
         markets clearly and concisely.\n\n\
         ## TOOLS\n\n\
         Available tools: {tools}.\n\
         - Call a tool whenever the answer depends on prices, indicators, fundamentals or news.\n\
         - If a tool returns an error, adjust the arguments or continue with what you have.\n\
         - Never invent numbers that no tool returned.\n\n\
         When you have enough information, reply with the final answer as plain text."
    )
}

fn render_arguments(arguments: &[String]) -> String {
    if arguments.is_empty() {
        return "(no arguments)".to_string();
    }
    arguments
        .iter()
        .map(|a| format!("- {a}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Transcript as numbered sections, in the order the turns happened.
pub fn render_transcript(transcript: &[DebateRound]) -> String {
    if transcript.is_empty() {
        return "(no debate rounds were held)".to_string();
    }
    transcript
        .iter()
        .map(|round| {
            let speaker = match round.role {
                DebateRole::Bull => "Bull Researcher",
                DebateRole::Bear => "Bear Researcher",
            };
            format!(
                "### Round {} - {}\n{}",
                round.round_index + 1,
                speaker,
                render_arguments(&round.arguments)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// User prompt for one researcher turn.
///
/// `opponent` is the argument list the researcher must answer: the previous
/// bear turn for a bull, the current round's bull turn for a bear.
pub fn researcher_user_prompt(
    role: DebateRole,
    symbol: &str,
    date: &str,
    market_data: &str,
    round_index: u32,
    total_rounds: u32,
    opponent: Option<&[String]>,
) -> String {
    let mut prompt = format!(
        "Stock: {symbol}\nAnalysis date: {date}\nDebate round {} of {total_rounds}.\n\n\
         ## MARKET DATA\n\n{market_data}\n",
        round_index + 1
    );
    if let Some(arguments) = opponent {
        let opponent_name = match role {
            DebateRole::Bull => "Bear Researcher",
            DebateRole::Bear => "Bull Researcher",
        };
        prompt.push_str(&format!(
            "\n## {opponent_name} ARGUMENTS TO ADDRESS\n\n{}\n",
            render_arguments(arguments)
        ));
    }
    let stance = match role {
        DebateRole::Bull => "bullish",
        DebateRole::Bear => "bearish",
    };
    prompt.push_str(&format!("\nPresent your {stance} arguments for {symbol}."));
    prompt
}

pub fn risk_user_prompt(symbol: &str, date: &str, market_data: &str, transcript: &str) -> String {
    format!(
        "Stock: {symbol}\nAnalysis date: {date}\n\n## MARKET DATA\n\n{market_data}\n\n\
         ## DEBATE TRANSCRIPT\n\n{transcript}\n\n\
         Assess the risks and give your confidence level."
    )
}

pub fn final_user_prompt(
    symbol: &str,
    date: &str,
    transcript: &str,
    risk_assessment: &str,
    confidence_level: ConfidenceLevel,
) -> String {
    format!(
        "Stock: {symbol}\nAnalysis date: {date}\n\n## DEBATE TRANSCRIPT\n\n{transcript}\n\n\
         ## RISK MANAGER\n\nAssessment: {risk_assessment}\nConfidence level: {confidence_level}\n\n\
         Make the final trading decision."
    )
}

/// Follow-up sent once when a field came back outside its allowed values.
pub fn corrective_prompt(field: &str, allowed: &str, got: Option<&str>) -> String {
    let got = match got {
        Some(value) => format!("Your answer gave `{field}` as \"{value}\""),
        None => format!("Your answer did not include `{field}`"),
    };
    format!(
        "{got}, which is not valid. `{field}` must be exactly one of: {allowed}. \
         Reply again with ONLY the JSON object in the requested format."
    )
}

pub fn corrective_level_prompt(got: Option<&str>) -> String {
    corrective_prompt("confidence_level", &level_list(), got)
}

pub fn corrective_action_prompt(got: Option<&str>) -> String {
    corrective_prompt("final_decision", &action_list(), got)
}

/// Sent when a researcher used up its tool calls without answering.
pub fn researcher_wrap_up_prompt() -> String {
    format!(
        "You have used all of your tool calls. Using the data gathered above, \
         give your arguments now.\n\n{}",
        researcher_format()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyst_prompt_names_tools() {
        let prompt = analyst_system_prompt(&["get_stock_data", "get_news"]);
        assert!(prompt.contains("Available tools: get_stock_data, get_news."));
        assert!(analyst_system_prompt(&[]).contains("Available tools: (none)."));
    }

    #[test]
    fn wrap_up_prompt_requests_arguments_json() {
        let prompt = researcher_wrap_up_prompt();
        assert!(prompt.contains("used all of your tool calls"));
        assert!(prompt.contains("\"arguments\""));
    }

    #[test]
    fn researcher_prompts_request_arguments_json() {
        for role in [DebateRole::Bull, DebateRole::Bear] {
            let prompt = researcher_system_prompt(role);
            assert!(prompt.contains("\"arguments\""), "{role}");
            assert!(prompt.contains("OUTPUT FORMAT"), "{role}");
        }
        assert!(bull_system_prompt().contains("FOR taking a long position"));
        assert!(bear_system_prompt().contains("AGAINST taking a long position"));
    }

    #[test]
    fn risk_prompt_lists_every_level() {
        let prompt = risk_manager_system_prompt();
        for level in ConfidenceLevel::ALL {
            assert!(prompt.contains(level.as_str()), "missing {level}");
        }
        assert!(prompt.contains("\"confidence_level\""));
        assert!(prompt.contains("\"risk_assessment\""));
    }

    #[test]
    fn final_prompt_lists_every_action() {
        let prompt = final_decision_system_prompt();
        for action in Action::ALL {
            assert!(prompt.contains(action.as_str()), "missing {action}");
        }
        assert!(prompt.contains("\"final_decision\""));
        assert!(prompt.contains("\"position_size\""));
    }

    #[test]
    fn bull_round_prompt_includes_previous_bear_turn() {
        let bear = vec!["P/E of 60 is stretched".to_string()];
        let prompt = researcher_user_prompt(
            DebateRole::Bull,
            "TSLA",
            "2025-03-03",
            "### get_news\n[]",
            1,
            2,
            Some(&bear),
        );
        assert!(prompt.contains("Debate round 2 of 2"));
        assert!(prompt.contains("Bear Researcher ARGUMENTS TO ADDRESS"));
        assert!(prompt.contains("- P/E of 60 is stretched"));
        assert!(prompt.contains("### get_news"));
    }

    #[test]
    fn first_bull_prompt_has_no_rebuttal_section() {
        let prompt =
            researcher_user_prompt(DebateRole::Bull, "TSLA", "2025-03-03", "data", 0, 1, None);
        assert!(!prompt.contains("ARGUMENTS TO ADDRESS"));
    }

    #[test]
    fn transcript_rendering_is_ordered() {
        let transcript = vec![
            DebateRound {
                role: DebateRole::Bull,
                round_index: 0,
                arguments: vec!["Deliveries beat".to_string()],
            },
            DebateRound {
                role: DebateRole::Bear,
                round_index: 0,
                arguments: vec![],
            },
        ];
        let rendered = render_transcript(&transcript);
        let bull = rendered.find("Round 1 - Bull Researcher").unwrap();
        let bear = rendered.find("Round 1 - Bear Researcher").unwrap();
        assert!(bull < bear);
        assert!(rendered.contains("(no arguments)"));
    }

    #[test]
    fn corrective_prompts_name_allowed_values() {
        let prompt = corrective_action_prompt(Some("STRONG BUY"));
        assert!(prompt.contains("\"STRONG BUY\""));
        assert!(prompt.contains("BUY, SELL, HOLD, REJECT"));

        let prompt = corrective_level_prompt(None);
        assert!(prompt.contains("did not include `confidence_level`"));
        assert!(prompt.contains("Medium-High"));
    }
}

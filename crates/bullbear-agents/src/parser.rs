use std::str::FromStr;

use bullbear_models::{Action, ConfidenceLevel};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::AgentError;

/// Extract the first JSON object from a string that may contain surrounding text.
///
/// Handles common model response formats:
/// - Clean JSON: `{"key": "value"}`
/// - Markdown-wrapped: ```json\n{"key": "value"}\n```
/// - Prefix text: `Here is the analysis:\n{"key": "value"}`
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && serde_json::from_str::<Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    if let Some(json_str) = extract_from_markdown_block(trimmed) {
        if serde_json::from_str::<Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    if let Some(json_str) = extract_first_object(trimmed) {
        if serde_json::from_str::<Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    Err(AgentError::Parse(format!(
        "No valid JSON object found in response (length={})",
        text.len()
    )))
}

/// The extracted object as a JSON map, if there is one.
fn extract_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let json_str = extract_json(text).ok()?;
    match serde_json::from_str::<Value>(&json_str).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Extract JSON from a markdown code block (```json ... ``` or ``` ... ```)
fn extract_from_markdown_block(text: &str) -> Option<String> {
    let start_markers = ["```json\n", "```json\r\n", "```JSON\n", "```\n", "```\r\n"];

    for marker in &start_markers {
        if let Some(start) = text.find(marker) {
            let json_start = start + marker.len();
            if let Some(end) = text[json_start..].find("```") {
                let extracted = text[json_start..json_start + end].trim();
                return Some(extracted.to_string());
            }
        }
    }

    None
}

/// Find the first balanced { ... } in the text.
fn extract_first_object(text: &str) -> Option<String> {
    let mut depth = 0;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
            }
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return Some(text[s..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }

    None
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        other => Some(other.to_string()),
    }
}

/// Researcher output: `{"arguments": [...]}`. A reply without that shape
/// counts as a single argument.
pub fn parse_arguments(raw: &str) -> Vec<String> {
    if let Some(map) = extract_object(raw) {
        match map.get("arguments") {
            Some(Value::Array(items)) => {
                let arguments: Vec<String> = items.iter().filter_map(value_text).collect();
                if !arguments.is_empty() {
                    return arguments;
                }
            }
            Some(Value::String(single)) if !single.trim().is_empty() => {
                return vec![single.trim().to_string()];
            }
            _ => {}
        }
    }

    let text = raw.trim();
    if text.is_empty() {
        Vec::new()
    } else {
        vec![text.to_string()]
    }
}

/// Raw risk-manager fields, before enum validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskOutput {
    pub risk_assessment: String,
    pub confidence_level: Option<String>,
}

pub fn parse_risk(raw: &str) -> RiskOutput {
    if let Some(map) = extract_object(raw) {
        let assessment = map.get("risk_assessment").and_then(value_text);
        let level = map.get("confidence_level").and_then(value_text);
        if assessment.is_some() || level.is_some() {
            return RiskOutput {
                risk_assessment: assessment.unwrap_or_else(|| raw.trim().to_string()),
                confidence_level: level,
            };
        }
    }

    let text = raw.trim();
    let level = labelled_value(text, &["confidence level", "confidence_level", "confidence"])
        .map(|value| labelled_level(&value))
        .or_else(|| ConfidenceLevel::from_str(text).ok().map(|l| l.as_str().to_string()));
    let assessment = labelled_value(text, &["risk assessment", "risk_assessment"])
        .unwrap_or_else(|| text.to_string());

    RiskOutput {
        risk_assessment: assessment,
        confidence_level: level,
    }
}

/// Raw final-decision fields. `action` is unvalidated text; numbers are
/// already normalized into [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct FinalOutput {
    pub action: Option<String>,
    pub confidence: Option<Decimal>,
    pub reasoning: String,
    pub position_size: Option<Decimal>,
}

pub fn parse_final(raw: &str) -> FinalOutput {
    if let Some(map) = extract_object(raw) {
        let action = ["final_decision", "decision", "action"]
            .iter()
            .find_map(|key| map.get(*key).and_then(value_text));
        if action.is_some() {
            return FinalOutput {
                action,
                confidence: map.get("confidence").and_then(fraction_from_json),
                reasoning: map
                    .get("reasoning")
                    .and_then(value_text)
                    .unwrap_or_default(),
                position_size: map.get("position_size").and_then(fraction_from_json),
            };
        }
    }

    let text = raw.trim();
    FinalOutput {
        action: labelled_value(text, &["final decision", "final_decision", "decision", "action"])
            .map(|value| labelled_action(&value))
            .or_else(|| standalone_action(text).map(|a| a.as_str().to_string())),
        confidence: number_after(text, "confidence"),
        reasoning: labelled_value(text, &["reasoning"]).unwrap_or_else(|| text.to_string()),
        position_size: number_after(text, "position size")
            .or_else(|| number_after(text, "position_size")),
    }
}

/// A labelled action value such as `**BUY** - strong momentum` reduced to
/// its action word. Values naming no single action are kept for validation.
fn labelled_action(value: &str) -> String {
    if Action::from_str(value).is_ok() {
        return value.to_string();
    }
    standalone_action(value)
        .map(|a| a.as_str().to_string())
        .unwrap_or_else(|| value.to_string())
}

/// A labelled level value such as `Medium - moderate risk` reduced to its
/// level. Values naming no level are kept for validation.
fn labelled_level(value: &str) -> String {
    if ConfidenceLevel::from_str(value).is_ok() {
        return value.to_string();
    }
    level_in(value)
        .map(|l| l.as_str().to_string())
        .unwrap_or_else(|| value.to_string())
}

/// Earliest confidence level named as a whole word; `Medium-High` is not
/// read as `Medium` or `High`.
pub fn level_in(text: &str) -> Option<ConfidenceLevel> {
    let lower = text.to_ascii_lowercase().replace('_', "-");
    let is_boundary = |c: Option<char>| c.map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '-'));

    ConfidenceLevel::ALL
        .into_iter()
        .filter_map(|level| {
            let word = level.as_str().to_ascii_lowercase();
            lower.match_indices(&word).find_map(|(pos, _)| {
                let before = lower[..pos].chars().next_back();
                let after = lower[pos + word.len()..].chars().next();
                (is_boundary(before) && is_boundary(after)).then_some((pos, level))
            })
        })
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, level)| level)
}

/// The only action word in the text. Upper-case words win over mixed case;
/// two different candidates at the same level mean no answer.
pub fn standalone_action(text: &str) -> Option<Action> {
    let words: Vec<&str> = text
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();

    let unique = |candidates: Vec<Action>| -> Option<Action> {
        let first = *candidates.first()?;
        candidates.iter().all(|a| *a == first).then_some(first)
    };

    let upper: Vec<Action> = words
        .iter()
        .filter(|w| w.chars().all(|c| c.is_ascii_uppercase()))
        .filter_map(|w| Action::from_str(w).ok())
        .collect();
    if !upper.is_empty() {
        return unique(upper);
    }

    unique(
        words
            .iter()
            .filter_map(|w| Action::from_str(w).ok())
            .collect(),
    )
}

/// Value of the first `Label: value` line whose label matches one of `labels`.
/// Markdown decoration around the label is ignored.
pub fn labelled_value(text: &str, labels: &[&str]) -> Option<String> {
    for line in text.lines() {
        let stripped = line
            .trim()
            .trim_start_matches(|c: char| matches!(c, '-' | '*' | '#' | '>' | '•') || c.is_whitespace());
        let Some((label, value)) = stripped.split_once(':') else {
            continue;
        };
        let label = label
            .trim()
            .trim_matches(|c: char| matches!(c, '*' | '_' | '`'))
            .trim()
            .to_ascii_lowercase();
        if labels.iter().any(|l| *l == label) {
            let value = value
                .trim()
                .trim_matches(|c: char| matches!(c, '*' | '`' | '"'))
                .trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Number stated for `keyword`: directly after it, optionally behind `:`,
/// `=`, `of` or `is` (`confidence 0.5`, `Confidence: 80%`, `confidence of 65%`).
/// Values above 1 or followed by `%` are percentages. A keyword whose next
/// word is not a number (`confidence after the Q3 print`) gives nothing.
pub fn number_after(text: &str, keyword: &str) -> Option<Decimal> {
    let lower = text.to_ascii_lowercase();
    let mut search_from = 0;
    while let Some(pos) = lower[search_from..].find(keyword) {
        let begin = search_from + pos;
        let end = begin + keyword.len();
        search_from = end;
        let whole_word = lower[..begin]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_ascii_alphanumeric());
        if !whole_word {
            continue;
        }
        if let Some(value) = stated_number(&text[end..]) {
            return Some(value);
        }
    }
    None
}

fn skip_separators(text: &str) -> &str {
    text.trim_start_matches(|c: char| matches!(c, ' ' | '\t' | ':' | '=' | '*' | '`' | '"'))
}

/// Number at the start of `rest`, after separators and one linking word.
fn stated_number(rest: &str) -> Option<Decimal> {
    let mut rest = skip_separators(rest);
    for word in ["of", "is"] {
        let linked = rest
            .get(..word.len())
            .filter(|head| head.eq_ignore_ascii_case(word))
            .map(|_| &rest[word.len()..])
            .filter(|tail| !tail.starts_with(|c: char| c.is_ascii_alphanumeric()));
        if let Some(tail) = linked {
            rest = skip_separators(tail);
            break;
        }
    }

    if !rest.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    if rest[end..].starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }
    first_number(rest)
}

fn first_number(line: &str) -> Option<Decimal> {
    let begin = line.find(|c: char| c.is_ascii_digit())?;
    let tail = &line[begin..];
    let end = tail
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(tail.len());
    let digits = tail[..end].trim_end_matches('.');
    let value = Decimal::from_str(digits).ok()?;
    let percent = tail[end..].trim_start().starts_with('%');
    Some(to_fraction(value, percent))
}

fn fraction_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let text = n.to_string();
            let parsed = Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()?;
            Some(to_fraction(parsed, false))
        }
        Value::String(s) => first_number(s),
        _ => None,
    }
}

fn to_fraction(value: Decimal, percent: bool) -> Decimal {
    if percent || value > Decimal::ONE {
        value / Decimal::ONE_HUNDRED
    } else {
        value
    }
}

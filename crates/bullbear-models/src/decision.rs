use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when model text does not name a member of a fixed enum.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("'{value}' is not a valid {kind}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Strip the wrapping a model tends to put around a single enum word.
fn normalize_token(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '.' | ',' | ':' | '!'))
        .trim()
        .to_string()
}

/// Final trading action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
    Reject,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Buy, Action::Sell, Action::Hold, Action::Reject];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
            Action::Reject => "REJECT",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = UnknownVariant;

    /// Accepts the four action words in any letter case. Anything else
    /// (e.g. "STRONG BUY", "accumulate") is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = normalize_token(s).to_ascii_uppercase();
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == token)
            .ok_or_else(|| UnknownVariant {
                kind: "action",
                value: s.trim().to_string(),
            })
    }
}

/// Risk manager's qualitative confidence scale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConfidenceLevel {
    High,
    #[serde(rename = "Medium-High")]
    MediumHigh,
    Medium,
    #[serde(rename = "Medium-Low")]
    MediumLow,
    Low,
}

impl ConfidenceLevel {
    pub const ALL: [ConfidenceLevel; 5] = [
        ConfidenceLevel::High,
        ConfidenceLevel::MediumHigh,
        ConfidenceLevel::Medium,
        ConfidenceLevel::MediumLow,
        ConfidenceLevel::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "High",
            ConfidenceLevel::MediumHigh => "Medium-High",
            ConfidenceLevel::Medium => "Medium",
            ConfidenceLevel::MediumLow => "Medium-Low",
            ConfidenceLevel::Low => "Low",
        }
    }

    /// Numeric confidence used when the final step gives no usable number.
    pub fn score(&self) -> Decimal {
        match self {
            ConfidenceLevel::High => Decimal::new(85, 2),
            ConfidenceLevel::MediumHigh => Decimal::new(70, 2),
            ConfidenceLevel::Medium => Decimal::new(50, 2),
            ConfidenceLevel::MediumLow => Decimal::new(35, 2),
            ConfidenceLevel::Low => Decimal::new(20, 2),
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfidenceLevel {
    type Err = UnknownVariant;

    /// Case-insensitive; "medium high" and "medium_high" both read as Medium-High.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = normalize_token(s)
            .to_ascii_lowercase()
            .replace(['_', ' '], "-");
        ConfidenceLevel::ALL
            .into_iter()
            .find(|level| level.as_str().to_ascii_lowercase() == token)
            .ok_or_else(|| UnknownVariant {
                kind: "confidence level",
                value: s.trim().to_string(),
            })
    }
}

/// Confidence assigned to a decision that failed validation twice.
pub fn degraded_confidence() -> Decimal {
    Decimal::new(1, 1)
}

/// Clamp a value into the closed unit interval.
pub fn clamp_unit(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO).min(Decimal::ONE)
}

/// Which side of the debate produced a round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DebateRole {
    Bull,
    Bear,
}

impl fmt::Display for DebateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebateRole::Bull => f.write_str("bull"),
            DebateRole::Bear => f.write_str("bear"),
        }
    }
}

/// One researcher turn in the debate transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebateRound {
    pub role: DebateRole,
    pub round_index: u32,
    pub arguments: Vec<String>,
}

/// Bull and bear arguments in the order they were produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DebateSummary {
    pub bull_arguments: Vec<String>,
    pub bear_arguments: Vec<String>,
}

impl DebateSummary {
    pub fn from_transcript(transcript: &[DebateRound]) -> Self {
        let mut summary = Self::default();
        for round in transcript {
            let side = match round.role {
                DebateRole::Bull => &mut summary.bull_arguments,
                DebateRole::Bear => &mut summary.bear_arguments,
            };
            side.extend(round.arguments.iter().cloned());
        }
        summary
    }
}

/// The validated decision fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub action: Action,
    /// 0.0 to 1.0.
    #[serde(with = "rust_decimal::serde::float")]
    pub confidence: Decimal,
    pub reasoning: String,
    pub risk_assessment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debate_summary: Option<DebateSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_level: Option<ConfidenceLevel>,
    /// Suggested fraction of capital, 0.0 to 1.0.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub position_size: Option<Decimal>,
}

impl Decision {
    /// Placeholder decision carried by failed records.
    fn empty() -> Self {
        Self {
            action: Action::Hold,
            confidence: Decimal::ZERO,
            reasoning: String::new(),
            risk_assessment: String::new(),
            debate_summary: None,
            confidence_level: None,
            position_size: None,
        }
    }
}

/// The canonical output of one debate run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRecord {
    pub success: bool,
    pub symbol: String,
    pub date: String,
    pub decision: Decision,
    /// True when a validated field fell back to its safe default.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DecisionRecord {
    pub fn completed(symbol: &str, date: &str, decision: Decision, degraded: bool) -> Self {
        Self {
            success: true,
            symbol: symbol.to_string(),
            date: date.to_string(),
            decision,
            degraded,
            error: None,
        }
    }

    /// A failed run. Never carries a partial transcript.
    pub fn failed(symbol: &str, date: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            symbol: symbol.to_string(),
            date: date.to_string(),
            decision: Decision::empty(),
            degraded: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_record() -> DecisionRecord {
        DecisionRecord::completed(
            "TSLA",
            "2025-01-15",
            Decision {
                action: Action::Buy,
                confidence: dec!(0.75),
                reasoning: "Bull case outweighs delivery risk".to_string(),
                risk_assessment: "Moderate volatility".to_string(),
                debate_summary: Some(DebateSummary {
                    bull_arguments: vec!["Margins expanding".to_string(), "Energy growth".to_string()],
                    bear_arguments: vec!["Valuation stretched".to_string()],
                }),
                confidence_level: Some(ConfidenceLevel::MediumHigh),
                position_size: Some(dec!(0.25)),
            },
            false,
        )
    }

    #[test]
    fn roundtrip_decision_record() {
        let record = sample_record();
        let json = serde_json::to_string(&record).unwrap();
        let back: DecisionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
        assert_eq!(
            back.decision.debate_summary.unwrap().bull_arguments,
            vec!["Margins expanding", "Energy growth"]
        );
    }

    #[test]
    fn record_json_shape() {
        let json = serde_json::to_value(sample_record()).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["decision"]["action"], "BUY");
        assert_eq!(json["decision"]["confidence"], 0.75);
        assert_eq!(json["decision"]["confidence_level"], "Medium-High");
        assert!(json.get("degraded").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failed_record_has_error_and_no_summary() {
        let record = DecisionRecord::failed("AAPL", "2025-01-15", "Provider returned 500");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Provider returned 500");
        assert!(json["decision"].get("debate_summary").is_none());
        assert_eq!(record.decision.action, Action::Hold);
    }

    #[test]
    fn degraded_flag_serialized_only_when_set() {
        let mut record = sample_record();
        record.degraded = true;
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["degraded"], true);
    }

    #[test]
    fn action_parsing() {
        assert_eq!("BUY".parse::<Action>().unwrap(), Action::Buy);
        assert_eq!(" hold. ".parse::<Action>().unwrap(), Action::Hold);
        assert_eq!("\"Reject\"".parse::<Action>().unwrap(), Action::Reject);
        assert!("STRONG BUY".parse::<Action>().is_err());
        assert!("accumulate".parse::<Action>().is_err());
        assert!("".parse::<Action>().is_err());
    }

    #[test]
    fn confidence_level_parsing() {
        assert_eq!("Medium".parse::<ConfidenceLevel>().unwrap(), ConfidenceLevel::Medium);
        assert_eq!(
            "medium high".parse::<ConfidenceLevel>().unwrap(),
            ConfidenceLevel::MediumHigh
        );
        assert_eq!(
            "MEDIUM_LOW".parse::<ConfidenceLevel>().unwrap(),
            ConfidenceLevel::MediumLow
        );
        let err = "Very High".parse::<ConfidenceLevel>().unwrap_err();
        assert_eq!(err.to_string(), "'Very High' is not a valid confidence level");
    }

    #[test]
    fn unknown_variant_is_a_std_error() {
        let err: Box<dyn std::error::Error> = Box::new("accumulate".parse::<Action>().unwrap_err());
        assert_eq!(err.to_string(), "'accumulate' is not a valid action");
    }

    #[test]
    fn confidence_level_scores_are_ordered() {
        let scores: Vec<Decimal> = ConfidenceLevel::ALL.iter().map(|l| l.score()).collect();
        assert!(scores.windows(2).all(|w| w[0] > w[1]));
        assert!(scores.iter().all(|s| *s >= Decimal::ZERO && *s <= Decimal::ONE));
    }

    #[test]
    fn clamp_unit_bounds() {
        assert_eq!(clamp_unit(dec!(1.7)), Decimal::ONE);
        assert_eq!(clamp_unit(dec!(-0.2)), Decimal::ZERO);
        assert_eq!(clamp_unit(dec!(0.42)), dec!(0.42));
    }

    #[test]
    fn summary_preserves_transcript_order() {
        let transcript = vec![
            DebateRound { role: DebateRole::Bull, round_index: 0, arguments: vec!["b1".into()] },
            DebateRound { role: DebateRole::Bear, round_index: 0, arguments: vec!["r1".into()] },
            DebateRound {
                role: DebateRole::Bull,
                round_index: 1,
                arguments: vec!["b2".into(), "b3".into()],
            },
            DebateRound { role: DebateRole::Bear, round_index: 1, arguments: vec!["r2".into()] },
        ];
        let summary = DebateSummary::from_transcript(&transcript);
        assert_eq!(summary.bull_arguments, vec!["b1", "b2", "b3"]);
        assert_eq!(summary.bear_arguments, vec!["r1", "r2"]);
    }
}

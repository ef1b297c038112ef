//! Small shared value types used across the loop, streaming assembler, and
//! metrics collector.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stop reason normalized from whatever vocabulary the provider uses.
///
/// `Other(String)` is the passthrough escape hatch mentioned in the spec's
/// stop-reason list (`<passthrough>`) for provider-specific reasons that
/// don't map onto one of the canonical variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    ContentFiltered,
    GuardrailIntervened,
    ModelContextWindowExceeded,
    Interrupt,
    Other(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndTurn => write!(f, "endTurn"),
            Self::ToolUse => write!(f, "toolUse"),
            Self::MaxTokens => write!(f, "maxTokens"),
            Self::StopSequence => write!(f, "stopSequence"),
            Self::ContentFiltered => write!(f, "contentFiltered"),
            Self::GuardrailIntervened => write!(f, "guardrailIntervened"),
            Self::ModelContextWindowExceeded => write!(f, "modelContextWindowExceeded"),
            Self::Interrupt => write!(f, "interrupt"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Token usage for a single model invocation or aggregated across a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
}

impl Usage {
    /// `totalTokens == inputTokens + outputTokens`, per the accounting invariant.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accounting_invariant_holds_after_add() {
        let mut total = Usage::default();
        total.add(&Usage { input_tokens: 10, output_tokens: 5, cache_read_tokens: 2, cache_write_tokens: 1 });
        total.add(&Usage { input_tokens: 3, output_tokens: 7, ..Default::default() });
        assert_eq!(total.total_tokens(), total.input_tokens + total.output_tokens);
        assert_eq!(total.total_tokens(), 25);
    }

    #[test]
    fn stop_reason_display_matches_canonical_strings() {
        assert_eq!(StopReason::EndTurn.to_string(), "endTurn");
        assert_eq!(StopReason::Other("vendor_specific".into()).to_string(), "vendor_specific");
    }
}

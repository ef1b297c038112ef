//! Context window management — token estimation and first/recent-preserving
//! truncation (§2 ambient supplement, grounded on the teacher's `context.rs`
//! almost verbatim, generalized to this crate's `Message`/`Content` types).

use crate::content::{Content, Message, Role};

/// Rough token estimate: ~4 chars per token for English text. Good enough
/// for context budgeting, not for billing.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

pub fn message_tokens(msg: &Message) -> usize {
    content_tokens(&msg.content) + 4
}

fn content_tokens(content: &[Content]) -> usize {
    content
        .iter()
        .map(|c| match c {
            Content::Text { text } => estimate_tokens(text),
            Content::Reasoning { text, signature, .. } => {
                text.as_deref().map(estimate_tokens).unwrap_or(0) + signature.as_deref().map(estimate_tokens).unwrap_or(0)
            }
            Content::ToolUse { name, input, .. } => estimate_tokens(name) + estimate_tokens(&input.to_string()) + 8,
            Content::ToolResult { content, .. } => content
                .iter()
                .map(|c| match c {
                    crate::content::ToolResultContent::Text { text } => estimate_tokens(text),
                    crate::content::ToolResultContent::Json { value } => estimate_tokens(&value.to_string()),
                    _ => 1000,
                })
                .sum::<usize>()
                + 8,
            Content::Image { .. } | Content::Video { .. } | Content::Document { .. } => 1000,
            Content::CachePoint { .. } | Content::GuardContent { .. } => 0,
        })
        .sum()
}

pub fn total_tokens(messages: &[Message]) -> usize {
    messages.iter().map(message_tokens).sum()
}

/// Configuration for context management.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub max_context_tokens: usize,
    pub system_prompt_tokens: usize,
    pub keep_recent: usize,
    pub keep_first: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 100_000,
            system_prompt_tokens: 4_000,
            keep_recent: 10,
            keep_first: 2,
        }
    }
}

fn truncation_marker(removed: usize) -> Message {
    Message::user(format!("[Context truncated: {removed} messages removed to fit context window]"))
}

/// Truncate messages to fit within the token budget: keep the first N and
/// last M, drop the middle, insert a marker where messages were removed.
pub fn truncate_messages(messages: Vec<Message>, config: &ContextConfig) -> Vec<Message> {
    let available = config.max_context_tokens.saturating_sub(config.system_prompt_tokens);
    let current = total_tokens(&messages);
    if current <= available {
        return messages;
    }

    let len = messages.len();
    if len <= config.keep_first + config.keep_recent {
        return messages;
    }

    let first_end = config.keep_first.min(len);
    let recent_start = len.saturating_sub(config.keep_recent);
    if first_end >= recent_start {
        return messages;
    }

    let first_msgs = &messages[..first_end];
    let recent_msgs = &messages[recent_start..];
    let first_tokens: usize = first_msgs.iter().map(message_tokens).sum();
    let recent_tokens: usize = recent_msgs.iter().map(message_tokens).sum();
    let marker_tokens = 20;

    if first_tokens + recent_tokens + marker_tokens <= available {
        let mut result = first_msgs.to_vec();
        let removed = recent_start - first_end;
        result.push(truncation_marker(removed));
        result.extend_from_slice(recent_msgs);
        return result;
    }

    let mut result = Vec::new();
    let mut budget = available;
    for msg in messages.iter().rev() {
        let tokens = message_tokens(msg);
        if tokens > budget {
            break;
        }
        budget -= tokens;
        result.push(msg.clone());
    }
    result.reverse();

    if result.len() < messages.len() {
        let removed = messages.len() - result.len();
        result.insert(0, truncation_marker(removed));
    }

    result
}

/// Execution limits for the agent loop.
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    pub max_turns: usize,
    pub max_total_tokens: usize,
    pub max_duration: std::time::Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_turns: 50,
            max_total_tokens: 1_000_000,
            max_duration: std::time::Duration::from_secs(600),
        }
    }
}

/// Tracks execution state against limits.
pub struct ExecutionTracker {
    pub limits: ExecutionLimits,
    pub turns: usize,
    pub tokens_used: usize,
    pub started_at: std::time::Instant,
}

impl ExecutionTracker {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self { limits, turns: 0, tokens_used: 0, started_at: std::time::Instant::now() }
    }

    pub fn record_turn(&mut self, tokens: usize) {
        self.turns += 1;
        self.tokens_used += tokens;
    }

    /// Returns the breach reason, if any limit has been exceeded.
    pub fn check_limits(&self) -> Option<String> {
        if self.turns >= self.limits.max_turns {
            return Some(format!("Max turns reached ({}/{})", self.turns, self.limits.max_turns));
        }
        if self.tokens_used >= self.limits.max_total_tokens {
            return Some(format!("Max tokens reached ({}/{})", self.tokens_used, self.limits.max_total_tokens));
        }
        let elapsed = self.started_at.elapsed();
        if elapsed >= self.limits.max_duration {
            return Some(format!(
                "Max duration reached ({:.0}s/{:.0}s)",
                elapsed.as_secs_f64(),
                self.limits.max_duration.as_secs_f64()
            ));
        }
        None
    }
}

/// True if `messages` ends with an assistant message carrying a `ToolUse`
/// block that has no matching `ToolResult` yet — the "pending tool uses"
/// invariant state the interrupt/resume protocol cares about.
pub fn ends_with_unmatched_tool_use(messages: &[Message]) -> bool {
    matches!(messages.last(), Some(m) if m.role == Role::Assistant && m.has_tool_uses())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert!(estimate_tokens("hello world") > 0);
        assert!(estimate_tokens("hello world") < 10);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_truncate_within_budget() {
        let messages = vec![Message::user("Hello"), Message::user("World")];
        let config = ContextConfig::default();
        let result = truncate_messages(messages.clone(), &config);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_truncate_drops_middle() {
        let mut messages = Vec::new();
        for i in 0..100 {
            messages.push(Message::user(format!("Message {i} with some content to use up tokens: {}", "x".repeat(200))));
        }
        let config = ContextConfig { max_context_tokens: 500, system_prompt_tokens: 100, keep_recent: 5, keep_first: 2 };
        let result = truncate_messages(messages, &config);
        assert!(result.len() < 100);
        assert!(result.len() >= 2);
    }

    #[test]
    fn test_execution_limits() {
        let limits = ExecutionLimits { max_turns: 3, max_total_tokens: 1000, max_duration: std::time::Duration::from_secs(60) };
        let mut tracker = ExecutionTracker::new(limits);
        assert!(tracker.check_limits().is_none());
        tracker.record_turn(100);
        tracker.record_turn(100);
        assert!(tracker.check_limits().is_none());
        tracker.record_turn(100);
        assert!(tracker.check_limits().is_some());
    }

    #[test]
    fn unmatched_tool_use_detected_at_end_of_conversation() {
        let messages = vec![Message::assistant(vec![Content::tool_use("t1", "calc", serde_json::json!({}))])];
        assert!(ends_with_unmatched_tool_use(&messages));
        let messages = vec![Message::user("hi")];
        assert!(!ends_with_unmatched_tool_use(&messages));
    }
}

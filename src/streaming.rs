//! Streaming assembler (C3): folds a flat provider event stream into the
//! structured `Message`/`StopReason` pair, while forwarding every inner event
//! to the caller unchanged (minus a little normalization).
//!
//! Grounded on the teacher's `provider/traits.rs` (`StreamEvent`) and
//! `provider/anthropic.rs`'s content-block accumulation, generalized to the
//! richer block set this crate's `Content` enum carries.

use crate::content::{Content, Message, Role};
use crate::types::{StopReason, Usage};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// A tool-use block's identity, known as soon as its content block starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUseStart {
    pub name: String,
    pub tool_use_id: String,
}

/// One delta within a content block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StreamDelta {
    Text {
        text: String,
    },
    Reasoning {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
        /// Base64-encoded redacted reasoning bytes, passed through unchanged.
        #[serde(skip_serializing_if = "Option::is_none")]
        redacted_content: Option<String>,
    },
    /// A fragment of the tool-use input's JSON text, accumulated and parsed
    /// at `ContentBlockStop`.
    ToolUseInput {
        fragment: String,
    },
}

/// Flat event sequence a `ModelProvider` emits. Mirrors the teacher's
/// `StreamEvent` enum, generalized with an explicit block index (providers
/// may stream several blocks concurrently) and the richer delta set above.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ModelStreamEvent {
    MessageStart { role: Role },
    ContentBlockStart { index: usize, tool_use_start: Option<ToolUseStart> },
    ContentBlockDelta { index: usize, delta: StreamDelta },
    ContentBlockStop { index: usize },
    MessageStop { stop_reason: StopReason },
    Metadata {
        usage: Usage,
        #[serde(skip_serializing_if = "Option::is_none")]
        time_to_first_byte_ms: Option<u64>,
    },
}

#[derive(Default)]
enum PendingBlock {
    #[default]
    Unknown,
    Text(String),
    Reasoning { text: Option<String>, signature: Option<String>, redacted_content: Option<String> },
    ToolUse { name: String, tool_use_id: String, buf: String },
}

/// Stateful decoder: feed it events in arrival order, read out the assembled
/// message once a `MessageStop` has been folded in.
#[derive(Default)]
pub struct StreamAssembler {
    role: Role,
    blocks: Vec<PendingBlock>,
    stop_reason: Option<StopReason>,
    usage: Usage,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self {
            role: Role::Assistant,
            blocks: Vec::new(),
            stop_reason: None,
            usage: Usage::default(),
        }
    }

    fn block_mut(&mut self, index: usize) -> &mut PendingBlock {
        if self.blocks.len() <= index {
            self.blocks.resize_with(index + 1, PendingBlock::default);
        }
        &mut self.blocks[index]
    }

    /// Fold one event into the assembler's state.
    pub fn push(&mut self, event: &ModelStreamEvent) {
        match event {
            ModelStreamEvent::MessageStart { role } => self.role = *role,
            ModelStreamEvent::ContentBlockStart { index, tool_use_start } => {
                let block = self.block_mut(*index);
                if let Some(start) = tool_use_start {
                    *block = PendingBlock::ToolUse {
                        name: start.name.clone(),
                        tool_use_id: start.tool_use_id.clone(),
                        buf: String::new(),
                    };
                }
            }
            ModelStreamEvent::ContentBlockDelta { index, delta } => {
                let block = self.block_mut(*index);
                match delta {
                    StreamDelta::Text { text } => match block {
                        PendingBlock::Text(acc) => acc.push_str(text),
                        PendingBlock::Unknown => *block = PendingBlock::Text(text.clone()),
                        _ => {}
                    },
                    StreamDelta::Reasoning { text, signature, redacted_content } => match block {
                        PendingBlock::Reasoning { text: acc_text, signature: acc_sig, redacted_content: acc_redacted } => {
                            if let Some(t) = text {
                                acc_text.get_or_insert_with(String::new).push_str(t);
                            }
                            if let Some(s) = signature {
                                acc_sig.get_or_insert_with(String::new).push_str(s);
                            }
                            if let Some(r) = redacted_content {
                                acc_redacted.get_or_insert_with(String::new).push_str(r);
                            }
                        }
                        PendingBlock::Unknown => {
                            *block = PendingBlock::Reasoning {
                                text: text.clone(),
                                signature: signature.clone(),
                                redacted_content: redacted_content.clone(),
                            }
                        }
                        _ => {}
                    },
                    StreamDelta::ToolUseInput { fragment } => {
                        if let PendingBlock::ToolUse { buf, .. } = block {
                            buf.push_str(fragment);
                        }
                    }
                }
            }
            ModelStreamEvent::ContentBlockStop { .. } => {}
            ModelStreamEvent::MessageStop { stop_reason } => self.stop_reason = Some(stop_reason.clone()),
            ModelStreamEvent::Metadata { usage, .. } => self.usage = *usage,
        }
    }

    /// Finish assembly. Returns `None` if no `MessageStop` was ever folded in
    /// (e.g. the stream was cancelled mid-flight).
    pub fn finish(self) -> Option<(Message, StopReason, Usage)> {
        let stop_reason = self.stop_reason?;
        let content = self
            .blocks
            .into_iter()
            .filter_map(|b| match b {
                PendingBlock::Unknown => None,
                PendingBlock::Text(text) => Some(Content::Text { text }),
                PendingBlock::Reasoning { text, signature, redacted_content } => {
                    let redacted_bytes = redacted_content.and_then(|s| base64::engine::general_purpose::STANDARD.decode(s.as_bytes()).ok());
                    Some(Content::Reasoning { text, signature, redacted_bytes })
                }
                PendingBlock::ToolUse { name, tool_use_id, buf } => {
                    let input = if buf.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&buf).unwrap_or(serde_json::json!({}))
                    };
                    Some(Content::ToolUse { name, tool_use_id, input })
                }
            })
            .collect();
        Some((Message { role: self.role, content }, stop_reason, self.usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_text_deltas_into_one_block() {
        let mut asm = StreamAssembler::new();
        asm.push(&ModelStreamEvent::MessageStart { role: Role::Assistant });
        asm.push(&ModelStreamEvent::ContentBlockStart { index: 0, tool_use_start: None });
        asm.push(&ModelStreamEvent::ContentBlockDelta { index: 0, delta: StreamDelta::Text { text: "Hel".into() } });
        asm.push(&ModelStreamEvent::ContentBlockDelta { index: 0, delta: StreamDelta::Text { text: "lo".into() } });
        asm.push(&ModelStreamEvent::ContentBlockStop { index: 0 });
        asm.push(&ModelStreamEvent::MessageStop { stop_reason: StopReason::EndTurn });
        let (message, stop_reason, _) = asm.finish().unwrap();
        assert_eq!(stop_reason, StopReason::EndTurn);
        assert_eq!(message.content, vec![Content::text("Hello")]);
    }

    #[test]
    fn tool_use_input_parses_accumulated_json() {
        let mut asm = StreamAssembler::new();
        asm.push(&ModelStreamEvent::MessageStart { role: Role::Assistant });
        asm.push(&ModelStreamEvent::ContentBlockStart {
            index: 0,
            tool_use_start: Some(ToolUseStart { name: "calc".into(), tool_use_id: "t1".into() }),
        });
        asm.push(&ModelStreamEvent::ContentBlockDelta { index: 0, delta: StreamDelta::ToolUseInput { fragment: "{\"a\":".into() } });
        asm.push(&ModelStreamEvent::ContentBlockDelta { index: 0, delta: StreamDelta::ToolUseInput { fragment: "1}".into() } });
        asm.push(&ModelStreamEvent::ContentBlockStop { index: 0 });
        asm.push(&ModelStreamEvent::MessageStop { stop_reason: StopReason::ToolUse });
        let (message, _, _) = asm.finish().unwrap();
        assert_eq!(message.content, vec![Content::tool_use("t1", "calc", serde_json::json!({"a": 1}))]);
    }

    #[test]
    fn empty_tool_use_buffer_yields_empty_object() {
        let mut asm = StreamAssembler::new();
        asm.push(&ModelStreamEvent::ContentBlockStart {
            index: 0,
            tool_use_start: Some(ToolUseStart { name: "noop".into(), tool_use_id: "t1".into() }),
        });
        asm.push(&ModelStreamEvent::MessageStop { stop_reason: StopReason::ToolUse });
        let (message, _, _) = asm.finish().unwrap();
        assert_eq!(message.content, vec![Content::tool_use("t1", "noop", serde_json::json!({}))]);
    }

    #[test]
    fn redacted_reasoning_bytes_survive_to_the_assembled_block() {
        let mut asm = StreamAssembler::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"secret");
        asm.push(&ModelStreamEvent::MessageStart { role: Role::Assistant });
        asm.push(&ModelStreamEvent::ContentBlockStart { index: 0, tool_use_start: None });
        asm.push(&ModelStreamEvent::ContentBlockDelta {
            index: 0,
            delta: StreamDelta::Reasoning { text: None, signature: None, redacted_content: Some(encoded) },
        });
        asm.push(&ModelStreamEvent::ContentBlockStop { index: 0 });
        asm.push(&ModelStreamEvent::MessageStop { stop_reason: StopReason::EndTurn });
        let (message, _, _) = asm.finish().unwrap();
        match &message.content[0] {
            Content::Reasoning { redacted_bytes, .. } => assert_eq!(redacted_bytes.as_deref(), Some(b"secret".as_slice())),
            other => panic!("expected a Reasoning block, got {other:?}"),
        }
    }

    #[test]
    fn cancelled_before_message_stop_yields_no_message() {
        let mut asm = StreamAssembler::new();
        asm.push(&ModelStreamEvent::ContentBlockStart { index: 0, tool_use_start: None });
        asm.push(&ModelStreamEvent::ContentBlockDelta { index: 0, delta: StreamDelta::Text { text: "partial".into() } });
        assert!(asm.finish().is_none());
    }
}

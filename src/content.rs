//! Message and content block model (C1).
//!
//! Pure data: a discriminated `Content` union plus an append-only `Message`
//! list. Constructors validate discriminants (an image/video/document source
//! is exactly one of bytes/url/s3/file) so an invalid block can't be built.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where binary media content lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "sourceType", rename_all = "camelCase")]
pub enum MediaSource {
    /// Raw bytes, base64-encoded on the wire.
    Bytes {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    Url {
        url: String,
    },
    S3Location {
        bucket: String,
        key: String,
    },
    FileId {
        file_id: String,
    },
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// The outcome of a tool invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Cache breakpoint kind, passed through untouched by the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachePoint {
    pub cache_type: String,
}

/// A single content block within a message. Discriminated by `kind` on the
/// wire (`#[serde(tag = "kind")]`); every variant round-trips through JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Content {
    Text {
        text: String,
    },
    Reasoning {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", with = "opt_base64_bytes")]
        redacted_bytes: Option<Vec<u8>>,
    },
    ToolUse {
        name: String,
        tool_use_id: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        status: ToolStatus,
        content: Vec<ToolResultContent>,
    },
    Image {
        source: MediaSource,
        mime_type: String,
    },
    Video {
        source: MediaSource,
        mime_type: String,
    },
    Document {
        source: MediaSource,
        mime_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    CachePoint {
        #[serde(flatten)]
        point: CachePoint,
    },
    GuardContent {
        #[serde(flatten)]
        data: serde_json::Value,
    },
}

mod opt_base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let opt = Option::<String>::deserialize(d)?;
        opt.map(|s| {
            base64::engine::general_purpose::STANDARD
                .decode(s.as_bytes())
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

/// The content a `ToolResult` block can carry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ToolResultContent {
    Text { text: String },
    Json { value: serde_json::Value },
    Image { source: MediaSource, mime_type: String },
    Document { source: MediaSource, mime_type: String },
}

impl ToolResultContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(tool_use_id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self::ToolUse {
            name: name.into(),
            tool_use_id: tool_use_id.into(),
            input,
        }
    }

    pub fn tool_result_ok(tool_use_id: impl Into<String>, content: Vec<ToolResultContent>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            status: ToolStatus::Success,
            content,
        }
    }

    pub fn tool_result_err(tool_use_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            status: ToolStatus::Error,
            content: vec![ToolResultContent::text(message)],
        }
    }

    /// The tool-use id this block carries, if it's a tool-use or tool-result block.
    pub fn tool_use_id(&self) -> Option<&str> {
        match self {
            Self::ToolUse { tool_use_id, .. } => Some(tool_use_id),
            Self::ToolResult { tool_use_id, .. } => Some(tool_use_id),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Role of a `Message` within a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// An append-only conversation entry. The core never mutates a committed
/// message in place — callers only ever see copies handed out in events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Content>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![Content::text(text)],
        }
    }

    pub fn user_blocks(content: Vec<Content>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn assistant(content: Vec<Content>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::assistant(vec![Content::text(text)])
    }

    /// Tool-use blocks in this message, in block order.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|c| match c {
                Content::ToolUse { name, tool_use_id, input } => Some((tool_use_id.as_str(), name.as_str(), input)),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_uses(&self) -> bool {
        self.content.iter().any(|c| matches!(c, Content::ToolUse { .. }))
    }

    /// Concatenation of text blocks, used by `AgentResult::Display`.
    pub fn text_summary(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            match block {
                Content::Text { text } => out.push_str(text),
                Content::Reasoning { text: Some(t), .. } => {
                    out.push_str("[reasoning] ");
                    out.push_str(t);
                }
                _ => {}
            }
        }
        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text_summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_round_trips_through_json() {
        let msg = Message::user("hello");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn tool_use_and_result_round_trip() {
        let msg = Message::assistant(vec![Content::tool_use("t1", "calc", serde_json::json!({"a": 1}))]);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
        assert_eq!(msg.tool_uses(), vec![("t1", "calc", &serde_json::json!({"a": 1}))]);
    }

    #[test]
    fn bytes_source_round_trips_as_base64() {
        let content = Content::Image {
            source: MediaSource::Bytes { data: vec![1, 2, 3, 255] },
            mime_type: "image/png".into(),
        };
        let json = serde_json::to_value(&content).unwrap();
        assert!(json["source"]["data"].is_string());
        let back: Content = serde_json::from_value(json).unwrap();
        assert_eq!(content, back);
    }

    #[test]
    fn text_summary_concatenates_text_and_reasoning() {
        let msg = Message::assistant(vec![
            Content::Reasoning { text: Some("thinking...".into()), signature: None, redacted_bytes: None },
            Content::text("done"),
        ]);
        assert_eq!(msg.text_summary(), "[reasoning] thinking...done");
    }

    #[test]
    fn text_summary_empty_when_only_tool_uses() {
        let msg = Message::assistant(vec![Content::tool_use("t1", "calc", serde_json::json!({}))]);
        assert_eq!(msg.text_summary(), "");
    }
}

//! Deterministic mock provider for tests and examples. No real API calls.
//!
//! Grounded on the teacher's `provider/mock.rs`: a queue of canned responses
//! consumed one per call, falling back to a fixed placeholder once exhausted.

use super::{ModelProvider, StreamRequestConfig};
use crate::content::{Content, Message, Role};
use crate::error::ProviderError;
use crate::streaming::{ModelStreamEvent, StreamDelta, ToolUseStart};
use crate::types::{StopReason, Usage};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A canned response: either plain text or a set of tool calls.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Text(String),
    ToolCalls(Vec<MockToolCall>),
}

#[derive(Debug, Clone)]
pub struct MockToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

impl MockToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self { name: name.into(), arguments }
    }
}

/// Mock LLM provider for tests. Supply a sequence of responses; each call to
/// `stream_aggregated` consumes the next one.
pub struct MockProvider {
    responses: std::sync::Mutex<Vec<MockResponse>>,
    config: std::sync::Mutex<serde_json::Value>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            config: std::sync::Mutex::new(serde_json::json!({"model": "mock"})),
        }
    }

    /// Convenience: provider that always returns the same text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![MockResponse::Text(text.into())])
    }

    /// Convenience: sequence of text responses, consumed in order.
    pub fn texts(texts: Vec<impl Into<String>>) -> Self {
        Self::new(texts.into_iter().map(|t| MockResponse::Text(t.into())).collect())
    }

    /// Convenience: a single tool-call response.
    pub fn tool_calls(calls: Vec<MockToolCall>) -> Self {
        Self::new(vec![MockResponse::ToolCalls(calls)])
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn get_config(&self) -> serde_json::Value {
        self.config.lock().unwrap().clone()
    }

    fn update_config(&mut self, config: serde_json::Value) {
        *self.config.lock().unwrap() = config;
    }

    async fn stream_aggregated(
        &self,
        _messages: &[Message],
        _config: &StreamRequestConfig,
        tx: mpsc::UnboundedSender<ModelStreamEvent>,
        cancel: CancellationToken,
    ) -> Result<(Message, StopReason), ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let response = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                MockResponse::Text("(no more mock responses)".into())
            } else {
                responses.remove(0)
            }
        };

        let _ = tx.send(ModelStreamEvent::MessageStart { role: Role::Assistant });

        let (content, stop_reason) = match response {
            MockResponse::Text(text) => {
                let _ = tx.send(ModelStreamEvent::ContentBlockStart { index: 0, tool_use_start: None });
                let _ = tx.send(ModelStreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: StreamDelta::Text { text: text.clone() },
                });
                let _ = tx.send(ModelStreamEvent::ContentBlockStop { index: 0 });
                (vec![Content::text(text)], StopReason::EndTurn)
            }
            MockResponse::ToolCalls(calls) => {
                let mut content = Vec::with_capacity(calls.len());
                for (i, call) in calls.into_iter().enumerate() {
                    let tool_use_id = format!("mock-tool-{i}");
                    let _ = tx.send(ModelStreamEvent::ContentBlockStart {
                        index: i,
                        tool_use_start: Some(ToolUseStart { name: call.name.clone(), tool_use_id: tool_use_id.clone() }),
                    });
                    let fragment = call.arguments.to_string();
                    let _ = tx.send(ModelStreamEvent::ContentBlockDelta {
                        index: i,
                        delta: StreamDelta::ToolUseInput { fragment },
                    });
                    let _ = tx.send(ModelStreamEvent::ContentBlockStop { index: i });
                    content.push(Content::tool_use(tool_use_id, call.name, call.arguments));
                }
                (content, StopReason::ToolUse)
            }
        };

        let _ = tx.send(ModelStreamEvent::Metadata {
            usage: Usage { input_tokens: 10, output_tokens: content.len() as u64 * 5, cache_read_tokens: 0, cache_write_tokens: 0 },
            time_to_first_byte_ms: Some(1),
        });
        let _ = tx.send(ModelStreamEvent::MessageStop { stop_reason: stop_reason.clone() });

        Ok((Message { role: Role::Assistant, content }, stop_reason))
    }
}

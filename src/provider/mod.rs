//! Model provider trait (C3, external collaborator) and the deterministic
//! `MockProvider` this crate ships in place of concrete HTTP adapters.
//!
//! Grounded on the teacher's `provider/traits.rs` `StreamProvider` trait,
//! generalized to the richer `ModelStreamEvent` set and the `Message`/
//! `StopReason` types this crate uses.

pub mod mock;

use crate::content::Message;
use crate::error::ProviderError;
use crate::streaming::ModelStreamEvent;
use crate::tool::ToolSpec;
use crate::types::StopReason;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use mock::{MockProvider, MockResponse, MockToolCall};

/// Per-call request configuration handed to `ModelProvider::stream_aggregated`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamRequestConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub tool_specs: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
}

/// External collaborator: wraps a concrete LLM API. This crate ships only
/// `MockProvider`; real adapters (Anthropic, OpenAI, Bedrock, ...) are out of
/// tree, per the non-goal in §1.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider-specific config as an opaque JSON blob (model name, base URL,
    /// etc). The core never interprets it.
    fn get_config(&self) -> serde_json::Value;
    fn update_config(&mut self, config: serde_json::Value);

    /// Stream one aggregated model turn. Every inner event is pushed onto
    /// `tx` in arrival order; the returned pair is the fully assembled
    /// message plus its normalized stop reason.
    async fn stream_aggregated(
        &self,
        messages: &[Message],
        config: &StreamRequestConfig,
        tx: mpsc::UnboundedSender<ModelStreamEvent>,
        cancel: CancellationToken,
    ) -> Result<(Message, StopReason), ProviderError>;
}

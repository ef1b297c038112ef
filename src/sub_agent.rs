//! Sub-agent tool — delegates a task to a child `Agent`.
//!
//! The `SubAgentTool` implements `Tool` and internally drives its own
//! `Agent` (own system prompt, tools, provider, execution limits). The
//! parent LLM invokes it like any other tool, passing a natural-language
//! `task` string; the child agent runs to completion and its final text is
//! returned as the tool result. Sub-agents are not given other
//! `SubAgentTool`s, so delegation cannot recurse.

use crate::agent::Agent;
use crate::agent_loop::AgentInput;
use crate::content::ToolResultContent;
use crate::context::ExecutionLimits;
use crate::error::ToolError;
use crate::provider::ModelProvider;
use crate::tool::{Tool, ToolContext, ToolOutcome};
use std::sync::Arc;
use std::sync::Mutex;

/// Default max turns for sub-agents (prevents runaway execution).
const DEFAULT_MAX_TURNS: usize = 10;

/// A tool that delegates work to a child `Agent`.
///
/// When the parent LLM calls this tool, it runs a fresh `Agent::invoke()`
/// with its own system prompt, tools, and provider. The child agent's
/// conversation is isolated from the parent's; only its final text crosses
/// back as the tool result. The child `Agent` is built lazily on first call
/// and then reused (`Tool::stream` takes `&self`, and `Agent` isn't `Clone`).
pub struct SubAgentTool {
    tool_name: String,
    tool_description: String,
    system_prompt: String,
    model: String,
    provider: Arc<dyn ModelProvider>,
    pending_tools: Mutex<Vec<Box<dyn Tool>>>,
    max_turns: usize,
    agent: Mutex<Option<Agent>>,
}

impl SubAgentTool {
    /// Create a new sub-agent tool with a name and provider.
    pub fn new(name: impl Into<String>, provider: Arc<dyn ModelProvider>) -> Self {
        let name = name.into();
        Self {
            tool_description: format!("Delegate a task to the '{}' sub-agent", name),
            tool_name: name,
            system_prompt: String::new(),
            model: String::new(),
            provider,
            pending_tools: Mutex::new(Vec::new()),
            max_turns: DEFAULT_MAX_TURNS,
            agent: Mutex::new(None),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.tool_description = desc.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_tools(self, tools: Vec<Box<dyn Tool>>) -> Self {
        *self.pending_tools.lock().unwrap() = tools;
        self
    }

    pub fn with_max_turns(mut self, max: usize) -> Self {
        self.max_turns = max;
        self
    }

    fn build_agent(&self) -> Result<Agent, ToolError> {
        let tools = std::mem::take(&mut *self.pending_tools.lock().unwrap());
        let mut agent = Agent::new(Arc::clone(&self.provider))
            .with_system_prompt(self.system_prompt.clone())
            .with_model(self.model.clone())
            .with_execution_limits(ExecutionLimits {
                max_turns: self.max_turns,
                ..ExecutionLimits::default()
            });
        if !tools.is_empty() {
            agent = agent
                .with_tools(tools)
                .map_err(|e| ToolError::Failed(e.to_string()))?;
        }
        Ok(agent)
    }
}

#[async_trait::async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> &str {
        &self.tool_description
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task to delegate to this sub-agent"
                }
            },
            "required": ["task"]
        })
    }

    async fn stream(&self, ctx: ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let task = ctx
            .input
            .get("task")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required 'task' parameter".into()))?
            .to_string();

        let mut agent = {
            let mut slot = self.agent.lock().unwrap();
            match slot.take() {
                Some(agent) => agent,
                None => self.build_agent()?,
            }
        };

        let result = agent.invoke(AgentInput::Prompt(task)).await;

        *self.agent.lock().unwrap() = Some(agent);

        let result = result.map_err(|e| ToolError::Failed(e.to_string()))?;
        Ok(ToolOutcome::ok(vec![ToolResultContent::text(result.to_string())]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;

    #[tokio::test]
    async fn delegates_task_and_returns_child_agent_text() {
        let tool = SubAgentTool::new("researcher", Arc::new(MockProvider::text("done researching")));
        let (events_tx, _events_rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = ToolContext {
            tool_use_id: "t1".into(),
            tool_name: "researcher".into(),
            input: serde_json::json!({"task": "look into X"}),
            invocation_state: serde_json::Value::Null,
            cancel: tokio_util::sync::CancellationToken::new(),
            events: events_tx,
            interrupt: Box::new(|_, _| Err(ToolError::Failed("no interrupts in this test".into()))),
        };
        let outcome = tool.stream(ctx).await.unwrap();
        assert!(!outcome.is_error);
        assert_eq!(outcome.content, vec![ToolResultContent::text("done researching")]);
    }

    #[tokio::test]
    async fn missing_task_parameter_is_rejected() {
        let tool = SubAgentTool::new("researcher", Arc::new(MockProvider::text("unused")));
        let (events_tx, _events_rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = ToolContext {
            tool_use_id: "t1".into(),
            tool_name: "researcher".into(),
            input: serde_json::json!({}),
            invocation_state: serde_json::Value::Null,
            cancel: tokio_util::sync::CancellationToken::new(),
            events: events_tx,
            interrupt: Box::new(|_, _| Err(ToolError::Failed("no interrupts in this test".into()))),
        };
        assert!(tool.stream(ctx).await.is_err());
    }
}

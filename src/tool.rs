//! Tool registry and execution contract (C2).
//!
//! A `Tool` streams zero or more progress events and resolves to exactly one
//! `ToolResultContent`-bearing result. The registry preserves insertion order
//! and rejects duplicate names, matching the teacher's `Vec<Box<dyn AgentTool>>`
//! plus name lookup, generalized with an explicit uniqueness check.

use crate::content::ToolResultContent;
use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A progress event a tool may emit while it runs, forwarded to the caller's
/// `AgentStreamEvent` channel by the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolStreamEvent {
    pub tool_use_id: String,
    pub data: serde_json::Value,
}

/// The resolved outcome of `Tool::stream`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub is_error: bool,
    pub content: Vec<ToolResultContent>,
}

impl ToolOutcome {
    pub fn ok(content: Vec<ToolResultContent>) -> Self {
        Self { is_error: false, content }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: vec![ToolResultContent::text(message)],
        }
    }
}

/// Context handed to a tool invocation: the triggering tool-use block, a
/// shared invocation-scoped bag (used by `SubAgentTool` and swarm's shared
/// context map), and an `interrupt` callback that raises a pause request.
pub struct ToolContext<'a> {
    pub tool_use_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub invocation_state: serde_json::Value,
    pub cancel: CancellationToken,
    pub events: mpsc::UnboundedSender<ToolStreamEvent>,
    /// Raise a named interrupt. Returns the stored response on resume replay,
    /// or `Err(ToolError::Interrupted(id))` the first time through (the loop
    /// catches this as a pause, not a failure — see `crate::interrupt`).
    pub interrupt: Box<dyn Fn(&str, Option<String>) -> Result<serde_json::Value, ToolError> + Send + Sync + 'a>,
}

/// A tool the agent loop may invoke. `stream` is async and lazy: it may send
/// zero or more `ToolStreamEvent`s on `ctx.events` before resolving.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;

    async fn stream(&self, ctx: ToolContext<'_>) -> Result<ToolOutcome, ToolError>;
}

/// A snapshot of a tool's identity, handed to the model as part of the
/// provider request and returned by `ToolRegistry::list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Name reserved for swarm handoff coordination; user tools may not use it.
pub const HANDOFF_TOOL_NAME: &str = "handoff_to_agent";

/// Insertion-ordered, name-unique collection of tools.
///
/// Not thread-safe for mutation during a live invocation — callers serialize
/// registration before handing the registry to an `Agent`, matching the
/// teacher's un-guarded `Vec<Box<dyn AgentTool>>`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), ToolError> {
        if tool.name().is_empty() {
            return Err(ToolError::InvalidArgs("tool name must not be empty".into()));
        }
        if self.tools.iter().any(|t| t.name() == tool.name()) {
            return Err(ToolError::Failed(format!("duplicate tool name '{}'", tool.name())));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn register_all(&mut self, tools: Vec<Box<dyn Tool>>) -> Result<(), ToolError> {
        for tool in tools {
            self.register(tool)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Tool>> {
        let idx = self.tools.iter().position(|t| t.name() == name)?;
        Some(self.tools.remove(idx))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// An ordered snapshot of tool specs, suitable for handing to a provider.
    pub fn list(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn stream(&self, ctx: ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::ok(vec![ToolResultContent::Json { value: ctx.input }]))
        }
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let mut reg = ToolRegistry::new();
        reg.register(Box::new(EchoTool)).unwrap();
        let err = reg.register(Box::new(EchoTool)).unwrap_err();
        assert!(matches!(err, ToolError::Failed(_)));
    }

    #[test]
    fn list_preserves_insertion_order() {
        struct A;
        struct B;
        #[async_trait]
        impl Tool for A {
            fn name(&self) -> &str {
                "a"
            }
            fn description(&self) -> &str {
                ""
            }
            fn input_schema(&self) -> serde_json::Value {
                serde_json::json!({})
            }
            async fn stream(&self, _ctx: ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
                Ok(ToolOutcome::ok(vec![]))
            }
        }
        #[async_trait]
        impl Tool for B {
            fn name(&self) -> &str {
                "b"
            }
            fn description(&self) -> &str {
                ""
            }
            fn input_schema(&self) -> serde_json::Value {
                serde_json::json!({})
            }
            async fn stream(&self, _ctx: ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
                Ok(ToolOutcome::ok(vec![]))
            }
        }
        let mut reg = ToolRegistry::new();
        reg.register(Box::new(B)).unwrap();
        reg.register(Box::new(A)).unwrap();
        let names: Vec<_> = reg.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn get_and_remove_round_trip() {
        let mut reg = ToolRegistry::new();
        reg.register(Box::new(EchoTool)).unwrap();
        assert!(reg.get("echo").is_some());
        let removed = reg.remove("echo").unwrap();
        assert_eq!(removed.name(), "echo");
        assert!(reg.get("echo").is_none());
    }
}

//! Swarm executor (C11): handoff-tool-driven routing between agents sharing
//! one JSON context map.
//!
//! No teacher equivalent exists; the coordination tool is grounded on the
//! teacher's general `Tool` shape (`src/tools/*.rs`), and the repetition
//! guard reuses `multi_agent::RepetitionDetector`, itself grounded on the
//! doom-loop detector in `other_examples/f3013a33_redlittenyoth-cortex__...
//! orchestrator.rs.rs`.

use crate::agent::Agent;
use crate::agent_loop::{AgentInput, AgentResult};
use crate::content::ToolResultContent;
use crate::error::{AgentError, SwarmBuildError, ToolError};
use crate::hooks::HookRegistry;
use crate::multi_agent::graph::MultiAgentExecutor;
use crate::multi_agent::{MultiAgentEvent, MultiAgentResult, MultiAgentStatus, NodeId, NodeResult, NodeStatus, RepetitionDetector};
use crate::tool::{Tool, ToolContext, ToolOutcome};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
struct PendingHandoff {
    to: String,
    message: Option<String>,
}

#[derive(Deserialize)]
struct HandoffInput {
    agent_name: String,
    #[serde(default)]
    message: Option<String>,
}

/// Coordination tool auto-registered on every swarm participant under
/// `tool::HANDOFF_TOOL_NAME`. Recording a handoff does not itself stop the
/// calling agent's loop; the swarm driver reads the recorded request once
/// the agent's own invocation finishes its turn.
struct HandoffTool {
    known_agents: Vec<String>,
    pending: Arc<Mutex<Option<PendingHandoff>>>,
}

#[async_trait]
impl Tool for HandoffTool {
    fn name(&self) -> &str {
        crate::tool::HANDOFF_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Hand off the conversation to another agent in this swarm."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent_name": {"type": "string"},
                "message": {"type": "string"},
            },
            "required": ["agent_name"],
        })
    }

    async fn stream(&self, ctx: ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
        let input: HandoffInput = serde_json::from_value(ctx.input).map_err(|e| ToolError::InvalidArgs(e.to_string()))?;
        if !self.known_agents.iter().any(|n| n == &input.agent_name) {
            return Ok(ToolOutcome::error(format!("unknown agent '{}'", input.agent_name)));
        }
        *self.pending.lock().unwrap() = Some(PendingHandoff { to: input.agent_name.clone(), message: input.message.clone() });
        Ok(ToolOutcome::ok(vec![ToolResultContent::text(format!("handed off to {}", input.agent_name))]))
    }
}

/// Shared, JSON-object-shaped context visible to every agent's tools.
#[derive(Clone, Default)]
pub struct SharedSwarmContext(pub Arc<Mutex<serde_json::Map<String, serde_json::Value>>>);

impl SharedSwarmContext {
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.0.lock().unwrap().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.0.lock().unwrap().insert(key.into(), value);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.lock().unwrap().clone())
    }
}

pub struct SwarmBuilder {
    agents: HashMap<NodeId, Agent>,
    order: Vec<NodeId>,
    entry_point: Option<NodeId>,
    max_handoffs: usize,
    max_iterations: usize,
    execution_timeout: Option<Duration>,
    repetitive_handoff_detection_window: usize,
    repetitive_handoff_min_unique_agents: usize,
    hooks: HookRegistry,
    shared_context: SharedSwarmContext,
}

impl Default for SwarmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SwarmBuilder {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
            order: Vec::new(),
            entry_point: None,
            max_handoffs: 20,
            max_iterations: 20,
            execution_timeout: None,
            repetitive_handoff_detection_window: 8,
            repetitive_handoff_min_unique_agents: 2,
            hooks: HookRegistry::new(),
            shared_context: SharedSwarmContext::default(),
        }
    }

    pub fn add_agent(mut self, id: impl Into<String>, agent: Agent) -> Result<Self, SwarmBuildError> {
        let id = id.into();
        if self.agents.contains_key(&id) {
            return Err(SwarmBuildError::DuplicateNode(id));
        }
        if agent.has_tool(crate::tool::HANDOFF_TOOL_NAME) {
            return Err(SwarmBuildError::ReservedToolName(crate::tool::HANDOFF_TOOL_NAME.to_string()));
        }
        self.order.push(id.clone());
        self.agents.insert(id, agent);
        Ok(self)
    }

    pub fn set_entry_point(mut self, id: impl Into<String>) -> Self {
        self.entry_point = Some(id.into());
        self
    }

    pub fn set_max_handoffs(mut self, max: usize) -> Self {
        self.max_handoffs = max;
        self
    }

    pub fn set_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn set_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// `window <= 0` (i.e. zero) disables repetitive-handoff detection.
    pub fn set_repetitive_handoff_detection(mut self, window: usize, min_unique_agents: usize) -> Self {
        self.repetitive_handoff_detection_window = window;
        self.repetitive_handoff_min_unique_agents = min_unique_agents;
        self
    }

    pub fn set_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn build(mut self) -> Result<Swarm, SwarmBuildError> {
        let entry_point = match self.entry_point {
            Some(id) if self.agents.contains_key(&id) => id,
            Some(id) => return Err(SwarmBuildError::UnknownEntryPoint(id)),
            None => self.order.first().cloned().ok_or(SwarmBuildError::UnknownEntryPoint(String::new()))?,
        };

        let pending = Arc::new(Mutex::new(None));
        let known_agents = self.order.clone();
        for id in &self.order {
            let agent = self.agents.get_mut(id).expect("agent must exist");
            agent
                .register_tool(Box::new(HandoffTool { known_agents: known_agents.clone(), pending: pending.clone() }))
                .map_err(|e| SwarmBuildError::ReservedToolName(e.to_string()))?;
        }

        Ok(Swarm {
            agents: self.agents,
            entry_point,
            pending,
            max_handoffs: self.max_handoffs,
            max_iterations: self.max_iterations,
            execution_timeout: self.execution_timeout,
            repetition: RepetitionDetector::new(self.repetitive_handoff_detection_window, self.repetitive_handoff_min_unique_agents),
            hooks: Arc::new(self.hooks),
            shared_context: self.shared_context,
        })
    }
}

pub struct Swarm {
    agents: HashMap<NodeId, Agent>,
    entry_point: NodeId,
    pending: Arc<Mutex<Option<PendingHandoff>>>,
    max_handoffs: usize,
    max_iterations: usize,
    execution_timeout: Option<Duration>,
    repetition: RepetitionDetector,
    hooks: Arc<HookRegistry>,
    shared_context: SharedSwarmContext,
}

impl Swarm {
    pub fn shared_context(&self) -> SharedSwarmContext {
        self.shared_context.clone()
    }

    pub async fn invoke(&mut self, input: String, tx: Option<mpsc::UnboundedSender<MultiAgentEvent>>) -> Result<MultiAgentResult, AgentError> {
        let send = |e: MultiAgentEvent| {
            if let Some(tx) = &tx {
                let _ = tx.send(e);
            }
        };
        send(MultiAgentEvent::Initialized);
        send(MultiAgentEvent::BeforeInvocation);

        let started = Instant::now();
        let mut history: Vec<NodeId> = Vec::new();
        let mut node_results: HashMap<NodeId, NodeResult> = HashMap::new();
        let mut active = self.entry_point.clone();
        let mut turn_input = input;
        let mut handoffs = 0usize;
        let mut iterations = 0usize;
        let mut failure: Option<String> = None;

        loop {
            if let Some(limit) = self.execution_timeout {
                if started.elapsed() >= limit {
                    failure = Some("Execution timed out".to_string());
                    break;
                }
            }
            if iterations >= self.max_iterations {
                failure = Some(format!("Max iterations reached ({iterations}/{})", self.max_iterations));
                break;
            }

            history.push(active.clone());
            if self.repetition.is_repetitive(&history) {
                failure = Some("Repetitive handoff detected".to_string());
                break;
            }

            self.hooks.dispatch(&crate::hooks::BeforeNodeCallEvent { node_id: active.clone() })?;
            send(MultiAgentEvent::NodeStart { node_id: active.clone() });
            send(MultiAgentEvent::NodeInput { node_id: active.clone(), input: turn_input.clone() });

            *self.pending.lock().unwrap() = None;
            let agent = self.agents.get_mut(&active).expect("active node must exist");
            let result = agent.invoke(AgentInput::Prompt(turn_input.clone())).await;
            self.hooks.dispatch(&crate::hooks::AfterNodeCallEvent { node_id: active.clone() })?;
            iterations += 1;

            let result = match result {
                Ok(r) => r,
                Err(e) => {
                    node_results.insert(active.clone(), NodeResult { node_id: active.clone(), status: NodeStatus::Failed, result: None, execution_count: 1 });
                    failure = Some(format!("node '{active}' failed: {e}"));
                    send(MultiAgentEvent::NodeCancel { node_id: active.clone() });
                    break;
                }
            };

            send(MultiAgentEvent::NodeStop { node_id: active.clone(), result: result.clone() });
            node_results.insert(
                active.clone(),
                NodeResult { node_id: active.clone(), status: NodeStatus::Completed, result: Some(result.clone()), execution_count: 1 },
            );

            let handoff = self.pending.lock().unwrap().take();
            match handoff {
                Some(PendingHandoff { to, message }) => {
                    handoffs += 1;
                    if handoffs > self.max_handoffs {
                        failure = Some(format!("Max handoffs reached ({handoffs}/{})", self.max_handoffs));
                        break;
                    }
                    send(MultiAgentEvent::Handoff { from_node_ids: vec![active.clone()], to_node_ids: vec![to.clone()], message: message.clone() });
                    turn_input = message.unwrap_or_else(|| result.to_string());
                    active = to;
                }
                None => break,
            }
        }

        send(MultiAgentEvent::AfterInvocation);
        let status = if let Some(reason) = failure { MultiAgentStatus::Failed { reason } } else { MultiAgentStatus::Completed };
        let result = MultiAgentResult { status, node_results, interrupts: Vec::new() };
        send(MultiAgentEvent::Result { result: result.clone() });
        Ok(result)
    }

    pub fn serialize_state(&self, result: &MultiAgentResult) -> serde_json::Value {
        serde_json::json!({
            "type": "swarm",
            "status": serde_json::to_value(&result.status).unwrap_or(serde_json::Value::Null),
            "node_results": result.node_results,
            "interrupts": result.interrupts,
            "shared_context": self.shared_context.snapshot(),
        })
    }
}

#[async_trait]
impl MultiAgentExecutor for Swarm {
    async fn invoke(&mut self, input: String) -> Result<MultiAgentResult, AgentError> {
        Swarm::invoke(self, input, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockProvider, MockResponse, MockToolCall};
    use std::sync::Arc as StdArc;

    fn text_agent(text: &str) -> Agent {
        Agent::new(StdArc::new(MockProvider::text(text.to_string())))
    }

    #[tokio::test]
    async fn single_agent_with_no_handoff_completes() {
        let mut swarm = SwarmBuilder::new().add_agent("a", text_agent("done")).unwrap().build().unwrap();
        let result = swarm.invoke("hi".into(), None).await.unwrap();
        assert!(result.is_completed());
        assert_eq!(result.node_results.len(), 1);
    }

    #[tokio::test]
    async fn handoff_routes_to_the_named_agent() {
        let provider_a = MockProvider::new(vec![
            MockResponse::ToolCalls(vec![MockToolCall::new("handoff_to_agent", serde_json::json!({"agent_name": "b", "message": "over to you"}))]),
            MockResponse::Text("ack".into()),
        ]);
        let agent_a = Agent::new(StdArc::new(provider_a));
        let agent_b = text_agent("all done");

        let mut swarm = SwarmBuilder::new()
            .add_agent("a", agent_a)
            .unwrap()
            .add_agent("b", agent_b)
            .unwrap()
            .set_entry_point("a")
            .build()
            .unwrap();

        let result = swarm.invoke("start".into(), None).await.unwrap();
        assert!(result.is_completed());
        assert_eq!(result.node_results.len(), 2);
        assert!(result.node_results.contains_key("b"));
    }

    #[test]
    fn build_rejects_agent_already_carrying_the_handoff_tool_name() {
        struct Noop;
        #[async_trait]
        impl Tool for Noop {
            fn name(&self) -> &str {
                crate::tool::HANDOFF_TOOL_NAME
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
        let agent = text_agent("x").with_tools(vec![Box::new(Noop)]).unwrap();
        let err = SwarmBuilder::new().add_agent("a", agent).unwrap_err();
        assert!(matches!(err, SwarmBuildError::ReservedToolName(_)));
    }
}

//! Graph executor (C10): dependency-gated DAG scheduling over agent (or
//! nested multi-agent) nodes.
//!
//! No teacher equivalent exists. The HOW is grounded in two places: the
//! single-agent loop's push-channel-plus-terminal-result shape
//! (`agent_loop.rs`, generalized to one channel per node aggregated into an
//! outer stream) and the bounded-channel back-pressure idiom the pack's
//! `stencila-stencila` and `FrancisVarga-stupid-db` graph crates use for
//! worker fan-out.

use crate::agent::Agent;
use crate::agent_loop::{AgentInput, AgentResult};
use crate::content::Message;
use crate::error::{AgentError, GraphBuildError};
use crate::hooks::{AfterNodeCallEvent, BeforeNodeCallEvent, HookRegistry};
use crate::multi_agent::{MultiAgentEvent, MultiAgentResult, MultiAgentStatus, NodeId, NodeResult, NodeStatus};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// A node executor backing a single graph node: either a leaf `Agent`, or a
/// nested multi-agent executor (graph-of-graphs, graph-of-swarms).
pub enum NodeExecutor {
    Agent(Agent),
    MultiAgent(Box<dyn MultiAgentExecutor>),
}

/// Object-safe trait implemented by `Graph` and `Swarm`, letting a graph node
/// embed either as a sub-executor.
#[async_trait]
pub trait MultiAgentExecutor: Send + Sync {
    async fn invoke(&mut self, input: String) -> Result<MultiAgentResult, AgentError>;
}

/// Read-only view of completed node outputs, visible to edge conditions.
pub struct GraphState {
    pub node_texts: HashMap<NodeId, String>,
    pub node_results: HashMap<NodeId, NodeResult>,
}

impl GraphState {
    pub fn text(&self, node_id: &str) -> Option<&str> {
        self.node_texts.get(node_id).map(String::as_str)
    }
}

type Condition = Box<dyn Fn(&GraphState) -> bool + Send + Sync>;

struct Edge {
    from: NodeId,
    to: NodeId,
    condition: Option<Condition>,
}

struct Node {
    executor: Arc<Mutex<NodeExecutor>>,
    /// Messages the node's `Agent` started with, captured for `reset_on_revisit`.
    initial_messages: Vec<Message>,
}

/// Builds a `Graph`. Mirrors `Agent`'s consuming-self builder style.
pub struct GraphBuilder {
    nodes: HashMap<NodeId, Node>,
    node_order: Vec<NodeId>,
    edges: Vec<Edge>,
    entry_point: Option<NodeId>,
    max_node_executions: usize,
    node_timeout: Option<Duration>,
    execution_timeout: Option<Duration>,
    reset_on_revisit: bool,
    hooks: HookRegistry,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            node_order: Vec::new(),
            edges: Vec::new(),
            entry_point: None,
            max_node_executions: 1,
            node_timeout: None,
            execution_timeout: None,
            reset_on_revisit: false,
            hooks: HookRegistry::new(),
        }
    }

    pub fn add_agent_node(mut self, id: impl Into<String>, agent: Agent) -> Result<Self, GraphBuildError> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(GraphBuildError::DuplicateNode(id));
        }
        let initial_messages = agent.messages();
        self.node_order.push(id.clone());
        self.nodes.insert(id, Node { executor: Arc::new(Mutex::new(NodeExecutor::Agent(agent))), initial_messages });
        Ok(self)
    }

    pub fn add_multi_agent_node(mut self, id: impl Into<String>, executor: Box<dyn MultiAgentExecutor>) -> Result<Self, GraphBuildError> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(GraphBuildError::DuplicateNode(id));
        }
        self.node_order.push(id.clone());
        self.nodes.insert(id, Node { executor: Arc::new(Mutex::new(NodeExecutor::MultiAgent(executor))), initial_messages: Vec::new() });
        Ok(self)
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge { from: from.into(), to: to.into(), condition: None });
        self
    }

    pub fn add_conditional_edge(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: impl Fn(&GraphState) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.edges.push(Edge { from: from.into(), to: to.into(), condition: Some(Box::new(condition)) });
        self
    }

    pub fn set_entry_point(mut self, id: impl Into<String>) -> Self {
        self.entry_point = Some(id.into());
        self
    }

    pub fn set_max_node_executions(mut self, max: usize) -> Self {
        self.max_node_executions = max;
        self
    }

    pub fn set_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    pub fn set_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn reset_on_revisit(mut self, reset: bool) -> Self {
        self.reset_on_revisit = reset;
        self
    }

    pub fn set_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn build(self) -> Result<Graph, GraphBuildError> {
        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.from) {
                return Err(GraphBuildError::UnknownNode(edge.from.clone()));
            }
            if !self.nodes.contains_key(&edge.to) {
                return Err(GraphBuildError::UnknownNode(edge.to.clone()));
            }
        }

        let entry_points = if let Some(entry) = self.entry_point {
            if !self.nodes.contains_key(&entry) {
                return Err(GraphBuildError::UnknownNode(entry));
            }
            vec![entry]
        } else {
            let has_incoming: HashSet<&str> = self.edges.iter().map(|e| e.to.as_str()).collect();
            let roots: Vec<NodeId> = self.node_order.iter().filter(|id| !has_incoming.contains(id.as_str())).cloned().collect();
            if roots.is_empty() {
                return Err(GraphBuildError::NoEntryPoint);
            }
            roots
        };

        Ok(Graph {
            nodes: self.nodes,
            edges: self.edges,
            entry_points,
            max_node_executions: self.max_node_executions,
            node_timeout: self.node_timeout,
            execution_timeout: self.execution_timeout,
            reset_on_revisit: self.reset_on_revisit,
            hooks: Arc::new(self.hooks),
            initialized: false,
        })
    }
}

/// A built, invocable dependency graph of agent nodes.
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
    edges: Vec<Edge>,
    entry_points: Vec<NodeId>,
    max_node_executions: usize,
    node_timeout: Option<Duration>,
    execution_timeout: Option<Duration>,
    reset_on_revisit: bool,
    hooks: Arc<HookRegistry>,
    /// Latches `MultiAgentEvent::Initialized` to the first `invoke` call —
    /// it must fire exactly once across a graph's lifetime, including across
    /// repeated `invoke`s on the same instance.
    initialized: bool,
}

impl Graph {
    fn incoming(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.to == node_id).collect()
    }

    fn outgoing(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from == node_id).collect()
    }

    /// Nodes reachable from `completed` whose every incoming edge is
    /// satisfied (source completed, and condition, if any, evaluates true)
    /// and not yet dispatched this generation. Execution-cap enforcement
    /// happens at dispatch time in `invoke`, as a hard failure rather than a
    /// silent filter here.
    fn runnable_nodes(&self, completed: &HashSet<NodeId>, dispatched: &HashSet<NodeId>, state: &GraphState, counts: &HashMap<NodeId, usize>) -> Vec<NodeId> {
        let mut candidates: HashSet<NodeId> = HashSet::new();
        for id in completed {
            for edge in self.outgoing(id) {
                candidates.insert(edge.to.clone());
            }
        }
        candidates
            .into_iter()
            .filter(|id| !dispatched.contains(id))
            .filter(|id| {
                self.incoming(id).iter().all(|edge| {
                    let source_done = completed.contains(&edge.from);
                    let condition_ok = edge.condition.as_ref().map(|c| c(state)).unwrap_or(true);
                    source_done && condition_ok
                })
            })
            .collect()
    }

    fn synthesize_input(&self, node_id: &str, state: &GraphState) -> String {
        let mut parts = Vec::new();
        for edge in self.incoming(node_id) {
            if let Some(text) = state.node_texts.get(&edge.from) {
                parts.push(format!("[{}]\n{}", edge.from, text));
            }
        }
        parts.join("\n\n")
    }

    /// Run the graph to completion. `tx` receives streamed node events if given.
    pub async fn invoke(&mut self, input: String, tx: Option<mpsc::UnboundedSender<MultiAgentEvent>>) -> Result<MultiAgentResult, AgentError> {
        let send = |e: MultiAgentEvent| {
            if let Some(tx) = &tx {
                let _ = tx.send(e);
            }
        };
        if !self.initialized {
            send(MultiAgentEvent::Initialized);
            self.initialized = true;
        }
        send(MultiAgentEvent::BeforeInvocation);

        let started = Instant::now();
        let mut state = GraphState { node_texts: HashMap::new(), node_results: HashMap::new() };
        let mut completed: HashSet<NodeId> = HashSet::new();
        let mut counts: HashMap<NodeId, usize> = HashMap::new();
        let mut failure: Option<String> = None;
        let mut first_input = Some(input);

        // Entry points are the first runnable generation.
        let mut frontier: HashSet<NodeId> = self.entry_points.iter().cloned().collect();
        let mut generation_dispatched: HashSet<NodeId> = HashSet::new();

        'outer: loop {
            if let Some(limit) = self.execution_timeout {
                if started.elapsed() >= limit {
                    failure = Some("Execution timed out".to_string());
                    break;
                }
            }

            let runnable: Vec<NodeId> = if completed.is_empty() {
                frontier.iter().filter(|id| !generation_dispatched.contains(*id)).cloned().collect()
            } else {
                self.runnable_nodes(&completed, &generation_dispatched, &state, &counts)
            };

            if runnable.is_empty() {
                break;
            }

            if let Some(over_cap) = runnable.iter().find(|id| *counts.get(*id).unwrap_or(&0) >= self.max_node_executions) {
                warn!(node_id = %over_cap, "node exceeded max_node_executions");
                failure = Some("Max node executions".to_string());
                break;
            }

            for id in &runnable {
                generation_dispatched.insert(id.clone());
            }

            let mut handles = Vec::new();
            for node_id in runnable {
                let node_input = if self.entry_points.contains(&node_id) && first_input.is_some() && completed.is_empty() {
                    first_input.take().unwrap_or_default()
                } else {
                    self.synthesize_input(&node_id, &state)
                };
                self.hooks.dispatch(&BeforeNodeCallEvent { node_id: node_id.clone() })?;
                send(MultiAgentEvent::NodeStart { node_id: node_id.clone() });
                send(MultiAgentEvent::NodeInput { node_id: node_id.clone(), input: node_input.clone() });

                let node = self.nodes.get(&node_id).expect("runnable node must exist");
                let executor = node.executor.clone();
                let node_timeout = self.node_timeout;
                let reset = self.reset_on_revisit;
                let initial_messages = node.initial_messages.clone();
                let execution_count = *counts.get(&node_id).unwrap_or(&0);
                let tx_clone = tx.clone();
                let node_id_for_task = node_id.clone();

                handles.push(tokio::spawn(async move {
                    let fut = async {
                        let mut guard = executor.lock().await;
                        if reset && execution_count > 0 {
                            if let NodeExecutor::Agent(agent) = &mut *guard {
                                agent.replace_messages(initial_messages.clone());
                            }
                        }
                        match &mut *guard {
                            NodeExecutor::Agent(agent) => {
                                let (mut node_rx, handle) = agent.stream(AgentInput::Prompt(node_input))?;
                                while let Some(event) = node_rx.recv().await {
                                    if let Some(tx) = &tx_clone {
                                        let _ = tx.send(MultiAgentEvent::NodeStream { node_id: node_id_for_task.clone(), event });
                                    }
                                }
                                let result = handle
                                    .await
                                    .map_err(|e| AgentError::ToolRegistry(format!("agent task panicked: {e}")))??;
                                Ok((result.to_string(), Some(result)))
                            }
                            NodeExecutor::MultiAgent(sub) => {
                                let result = sub.invoke(node_input).await?;
                                let text = summarize_multi_agent(&result);
                                let agent_result = AgentResult { last_message: Some(Message::assistant_text(text.clone())), ..Default::default() };
                                Ok((text, Some(agent_result)))
                            }
                        }
                    };

                    let outcome = match node_timeout {
                        Some(d) => match tokio::time::timeout(d, fut).await {
                            Ok(r) => r,
                            Err(_) => Err(AgentError::ToolRegistry(format!("node '{node_id_for_task}' timed out"))),
                        },
                        None => fut.await,
                    };
                    (node_id_for_task, outcome)
                }));
            }

            let results = join_all(handles).await;
            for joined in results {
                let (node_id, outcome) = match joined {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "graph node task panicked");
                        continue;
                    }
                };
                *counts.entry(node_id.clone()).or_insert(0) += 1;
                self.hooks.dispatch(&AfterNodeCallEvent { node_id: node_id.clone() })?;

                match outcome {
                    Ok((text, agent_result)) => {
                        state.node_texts.insert(node_id.clone(), text);
                        state.node_results.insert(
                            node_id.clone(),
                            NodeResult { node_id: node_id.clone(), status: NodeStatus::Completed, result: agent_result.clone(), execution_count: counts[&node_id] },
                        );
                        completed.insert(node_id.clone());
                        if let Some(r) = agent_result {
                            send(MultiAgentEvent::NodeStop { node_id: node_id.clone(), result: r });
                        }
                    }
                    Err(e) => {
                        state.node_results.insert(
                            node_id.clone(),
                            NodeResult { node_id: node_id.clone(), status: NodeStatus::Failed, result: None, execution_count: counts[&node_id] },
                        );
                        failure = Some(format!("node '{node_id}' failed: {e}"));
                        send(MultiAgentEvent::NodeCancel { node_id: node_id.clone() });
                        break 'outer;
                    }
                }
            }

            // Next generation: nodes newly reachable, plus (if reset_on_revisit)
            // already-completed nodes whose incoming conditions fire again.
            let newly_reachable = self.runnable_nodes(&completed, &HashSet::new(), &state, &counts);
            if self.reset_on_revisit {
                generation_dispatched.retain(|id| !newly_reachable.contains(id));
            }
            frontier = newly_reachable.into_iter().collect();
        }

        send(MultiAgentEvent::AfterInvocation);

        let status = if let Some(reason) = failure { MultiAgentStatus::Failed { reason } } else { MultiAgentStatus::Completed };
        let result = MultiAgentResult { status, node_results: state.node_results, interrupts: Vec::new() };
        send(MultiAgentEvent::Result { result: result.clone() });
        Ok(result)
    }

    pub fn serialize_state(&self, result: &MultiAgentResult) -> serde_json::Value {
        serde_json::json!({
            "type": "graph",
            "status": serde_json::to_value(&result.status).unwrap_or(serde_json::Value::Null),
            "node_results": result.node_results,
            "interrupts": result.interrupts,
        })
    }
}

#[async_trait]
impl MultiAgentExecutor for Graph {
    async fn invoke(&mut self, input: String) -> Result<MultiAgentResult, AgentError> {
        Graph::invoke(self, input, None).await
    }
}

fn summarize_multi_agent(result: &MultiAgentResult) -> String {
    let mut ids: Vec<&String> = result.node_results.keys().collect();
    ids.sort();
    ids.into_iter()
        .filter_map(|id| result.node_results.get(id))
        .filter_map(|r| r.result.as_ref())
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use std::sync::Arc as StdArc;

    fn agent(text: &str) -> Agent {
        Agent::new(StdArc::new(MockProvider::text(text.to_string())))
    }

    #[tokio::test]
    async fn single_entry_node_completes() {
        let graph = GraphBuilder::new().add_agent_node("a", agent("done")).unwrap().build().unwrap();
        let mut graph = graph;
        let result = graph.invoke("start".into(), None).await.unwrap();
        assert!(result.is_completed());
        assert_eq!(result.node_results["a"].status, NodeStatus::Completed);
    }

    #[tokio::test]
    async fn dependent_node_runs_after_its_dependency() {
        let mut graph = GraphBuilder::new()
            .add_agent_node("a", agent("from a"))
            .unwrap()
            .add_agent_node("b", agent("from b"))
            .unwrap()
            .add_edge("a", "b")
            .set_entry_point("a")
            .build()
            .unwrap();
        let result = graph.invoke("start".into(), None).await.unwrap();
        assert!(result.is_completed());
        assert_eq!(result.node_results.len(), 2);
    }

    #[test]
    fn build_fails_without_any_entry_point() {
        let err = GraphBuilder::new()
            .add_agent_node("a", agent("x"))
            .unwrap()
            .add_agent_node("b", agent("y"))
            .unwrap()
            .add_edge("a", "b")
            .add_edge("b", "a")
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphBuildError::NoEntryPoint));
    }

    #[test]
    fn build_rejects_duplicate_node_ids() {
        let err = GraphBuilder::new().add_agent_node("a", agent("x")).unwrap().add_agent_node("a", agent("y")).unwrap_err();
        assert!(matches!(err, GraphBuildError::DuplicateNode(_)));
    }
}

//! Multi-agent base (C9): the shared result/event/status vocabulary `graph`
//! and `swarm` both build on.
//!
//! No teacher equivalent exists; grounded in the single-agent event-loop's
//! "push channel + terminal result" shape (`agent_loop.rs`) generalized to a
//! node-keyed setting, with the doom-loop-style repetition detector idiom
//! borrowed from `other_examples/f3013a33_redlittenyoth-cortex__...orchestrator.rs.rs`.

pub mod graph;
pub mod swarm;

use crate::agent_loop::AgentResult;
use crate::interrupt::Interrupt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type NodeId = String;

/// Status of one node's execution within a graph or swarm run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NodeStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Interrupted,
}

/// Overall status of a graph or swarm invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum MultiAgentStatus {
    Completed,
    Failed { reason: String },
    Interrupted,
}

/// One node's outcome, carried in the final `MultiAgentResult` and in
/// `serialize_state()` snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: NodeId,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AgentResult>,
    pub execution_count: usize,
}

/// Terminal result of a `Graph::invoke` or `Swarm::invoke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiAgentResult {
    pub status: MultiAgentStatus,
    pub node_results: HashMap<NodeId, NodeResult>,
    pub interrupts: Vec<Interrupt>,
}

impl MultiAgentResult {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, MultiAgentStatus::Completed)
    }
}

/// Events streamed by both `Graph` and `Swarm`, sharing one shape so callers
/// can drive either executor with the same event handler.
#[derive(Debug, Clone)]
pub enum MultiAgentEvent {
    Initialized,
    BeforeInvocation,
    AfterInvocation,
    NodeStart { node_id: NodeId },
    NodeInput { node_id: NodeId, input: String },
    NodeStream { node_id: NodeId, event: crate::agent_loop::AgentStreamEvent },
    NodeStop { node_id: NodeId, result: AgentResult },
    NodeCancel { node_id: NodeId },
    NodeInterrupt { node_id: NodeId, interrupts: Vec<Interrupt> },
    /// Reserved on `Graph` (unused there), populated by `Swarm` handoffs.
    Handoff { from_node_ids: Vec<NodeId>, to_node_ids: Vec<NodeId>, message: Option<String> },
    Result { result: MultiAgentResult },
}

/// A sliding-window detector for repetitive handoffs: fails once the last
/// `window` history entries contain fewer than `min_unique` distinct agents.
/// `window <= 0` disables the check (see DESIGN.md open question).
pub struct RepetitionDetector {
    window: usize,
    min_unique: usize,
}

impl RepetitionDetector {
    pub fn new(window: usize, min_unique: usize) -> Self {
        Self { window, min_unique }
    }

    pub fn is_repetitive(&self, history: &[NodeId]) -> bool {
        if self.window == 0 {
            return false;
        }
        if history.len() < self.window {
            return false;
        }
        let recent = &history[history.len() - self.window..];
        let unique: std::collections::HashSet<&NodeId> = recent.iter().collect();
        unique.len() < self.min_unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repetition_detector_flags_low_unique_window() {
        // A 2-agent ping-pong only has 2 unique participants in the window,
        // so min_unique must be set above that to flag it.
        let detector = RepetitionDetector::new(4, 3);
        let history = vec!["a".to_string(), "b".to_string(), "a".to_string(), "b".to_string()];
        assert!(detector.is_repetitive(&history));
    }

    #[test]
    fn repetition_detector_allows_diverse_window() {
        let detector = RepetitionDetector::new(4, 2);
        let history = vec!["a".to_string(), "b".to_string(), "c".to_string(), "b".to_string()];
        assert!(!detector.is_repetitive(&history));
    }

    #[test]
    fn zero_window_disables_the_check() {
        let detector = RepetitionDetector::new(0, 2);
        let history = vec!["a".to_string(); 10];
        assert!(!detector.is_repetitive(&history));
    }
}

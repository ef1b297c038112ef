//! Integration tests for the graph and swarm multi-agent orchestrators,
//! exercised through the public crate surface rather than unit tests
//! internal to `multi_agent::graph`/`multi_agent::swarm`.

use agent_runtime::*;
use std::sync::{Arc, Mutex};

fn text_agent(text: &str) -> Agent {
    Agent::new(Arc::new(MockProvider::text(text.to_string())))
}

#[tokio::test]
async fn conditional_edge_only_fires_when_predicate_holds() {
    let mut graph = GraphBuilder::new()
        .add_agent_node("classify", text_agent("spam"))
        .unwrap()
        .add_agent_node("quarantine", text_agent("quarantined"))
        .unwrap()
        .add_agent_node("inbox", text_agent("delivered"))
        .unwrap()
        .add_conditional_edge("classify", "quarantine", |state| state.text("classify") == Some("spam"))
        .add_conditional_edge("classify", "inbox", |state| state.text("classify") != Some("spam"))
        .set_entry_point("classify")
        .build()
        .unwrap();

    let result = graph.invoke("incoming mail".into(), None).await.unwrap();

    assert!(result.is_completed());
    assert_eq!(result.node_results["quarantine"].status, NodeStatus::Completed);
    assert!(!result.node_results.contains_key("inbox"));
}

#[tokio::test]
async fn before_node_call_hook_fires_for_every_dispatched_node() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut hooks = HookRegistry::new();
    let seen_cb = seen.clone();
    hooks.on::<BeforeNodeCallEvent, _>(move |event| {
        seen_cb.lock().unwrap().push(event.node_id.clone());
        Ok(())
    });

    let mut graph = GraphBuilder::new()
        .add_agent_node("a", text_agent("a done"))
        .unwrap()
        .add_agent_node("b", text_agent("b done"))
        .unwrap()
        .add_edge("a", "b")
        .set_entry_point("a")
        .set_hooks(hooks)
        .build()
        .unwrap();

    graph.invoke("go".into(), None).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.as_slice(), ["a", "b"]);
}

#[tokio::test]
async fn max_node_executions_fails_the_graph_once_a_revisit_exceeds_the_cap() {
    let mut graph = GraphBuilder::new()
        .add_agent_node("a", text_agent("a"))
        .unwrap()
        .add_agent_node("b", text_agent("b"))
        .unwrap()
        .add_edge("a", "b")
        .add_edge("b", "a")
        .set_entry_point("a")
        .set_max_node_executions(1)
        .reset_on_revisit(true)
        .build()
        .unwrap();

    let result = graph.invoke("start".into(), None).await.unwrap();

    match result.status {
        MultiAgentStatus::Failed { reason } => assert_eq!(reason, "Max node executions"),
        other => panic!("expected a Failed status, got {other:?}"),
    }
    assert_eq!(result.node_results["a"].execution_count, 1);
    assert_eq!(result.node_results["b"].execution_count, 1);
}

#[tokio::test]
async fn node_within_the_execution_cap_completes_normally() {
    let mut graph = GraphBuilder::new()
        .add_agent_node("a", text_agent("a"))
        .unwrap()
        .add_agent_node("b", text_agent("b"))
        .unwrap()
        .add_edge("a", "b")
        .set_entry_point("a")
        .set_max_node_executions(1)
        .build()
        .unwrap();

    let result = graph.invoke("start".into(), None).await.unwrap();

    assert!(result.is_completed());
    assert_eq!(result.node_results["a"].execution_count, 1);
    assert_eq!(result.node_results["b"].execution_count, 1);
}

#[tokio::test]
async fn initialized_event_fires_exactly_once_across_two_invocations() {
    let mut graph = GraphBuilder::new().add_agent_node("a", text_agent("done")).unwrap().build().unwrap();

    let (tx1, mut rx1) = tokio::sync::mpsc::unbounded_channel();
    graph.invoke("first".into(), Some(tx1)).await.unwrap();
    let mut saw_initialized_first = false;
    while let Ok(event) = rx1.try_recv() {
        if matches!(event, MultiAgentEvent::Initialized) {
            saw_initialized_first = true;
        }
    }
    assert!(saw_initialized_first);

    let (tx2, mut rx2) = tokio::sync::mpsc::unbounded_channel();
    graph.invoke("second".into(), Some(tx2)).await.unwrap();
    let mut saw_initialized_second = false;
    while let Ok(event) = rx2.try_recv() {
        if matches!(event, MultiAgentEvent::Initialized) {
            saw_initialized_second = true;
        }
    }
    assert!(!saw_initialized_second);
}

#[tokio::test]
async fn swarm_handoff_chain_through_three_agents_shares_context() {
    let shared_seen = Arc::new(Mutex::new(None));

    let provider_a = MockProvider::new(vec![
        MockResponse::ToolCalls(vec![MockToolCall::new(
            "handoff_to_agent",
            serde_json::json!({"agent_name": "b", "message": "triage done"}),
        )]),
        MockResponse::Text("unreachable".into()),
    ]);
    let provider_b = MockProvider::new(vec![
        MockResponse::ToolCalls(vec![MockToolCall::new(
            "handoff_to_agent",
            serde_json::json!({"agent_name": "c", "message": "escalated"}),
        )]),
        MockResponse::Text("unreachable".into()),
    ]);

    let mut swarm = SwarmBuilder::new()
        .add_agent("a", Agent::new(Arc::new(provider_a)))
        .unwrap()
        .add_agent("b", Agent::new(Arc::new(provider_b)))
        .unwrap()
        .add_agent("c", text_agent("resolved by c"))
        .unwrap()
        .set_entry_point("a")
        .build()
        .unwrap();

    swarm.shared_context().set("ticket_id", serde_json::json!("T-1"));
    *shared_seen.lock().unwrap() = Some(swarm.shared_context().get("ticket_id"));

    let result = swarm.invoke("customer issue".into(), None).await.unwrap();

    assert!(result.is_completed());
    assert_eq!(result.node_results.len(), 3);
    assert_eq!(result.node_results["c"].result.as_ref().unwrap().to_string(), "resolved by c");
    assert_eq!(shared_seen.lock().unwrap().clone().flatten(), Some(serde_json::json!("T-1")));
}

#[tokio::test]
async fn swarm_max_handoffs_fails_a_ping_pong_loop() {
    // Each visit to an agent consumes one ToolCalls/Text pair: the handoff
    // call, then the follow-up turn after the tool result comes back.
    let bouncer = |to: &str| {
        let pair = || {
            vec![
                MockResponse::ToolCalls(vec![MockToolCall::new("handoff_to_agent", serde_json::json!({"agent_name": to}))]),
                MockResponse::Text("ack".into()),
            ]
        };
        MockProvider::new(pair().into_iter().chain(pair()).chain(pair()).collect())
    };

    let mut swarm = SwarmBuilder::new()
        .add_agent("a", Agent::new(Arc::new(bouncer("b"))))
        .unwrap()
        .add_agent("b", Agent::new(Arc::new(bouncer("a"))))
        .unwrap()
        .set_entry_point("a")
        .set_max_handoffs(3)
        .set_repetitive_handoff_detection(0, 1)
        .build()
        .unwrap();

    let result = swarm.invoke("start".into(), None).await.unwrap();
    assert!(matches!(result.status, MultiAgentStatus::Failed { .. }));
}

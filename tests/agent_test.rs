//! Integration tests for the `Agent` façade.

use agent_runtime::*;
use std::sync::Arc;

#[tokio::test]
async fn invoke_round_trips_a_prompt_through_mock_provider() {
    let mut agent = Agent::new(Arc::new(MockProvider::text("hi from mock")));
    let result = agent.prompt("hello").await.unwrap();
    assert_eq!(result.to_string(), "hi from mock");
    assert_eq!(agent.messages().len(), 2);
}

#[tokio::test]
async fn stream_returns_a_receiver_and_join_handle_without_blocking() {
    let mut agent = Agent::new(Arc::new(MockProvider::text("streamed")));
    let (mut rx, handle) = agent.stream(AgentInput::Prompt("go".into())).unwrap();

    let mut saw_before_invocation = false;
    while let Some(event) = rx.recv().await {
        if matches!(event, AgentStreamEvent::BeforeInvocation) {
            saw_before_invocation = true;
        }
    }
    let result = handle.await.unwrap().unwrap();
    assert!(saw_before_invocation);
    assert_eq!(result.to_string(), "streamed");
}

#[tokio::test]
async fn second_concurrent_invocation_is_rejected_while_one_is_in_flight() {
    let mut agent = Agent::new(Arc::new(MockProvider::text("first")));
    let (_rx, handle) = agent.stream(AgentInput::Prompt("one".into())).unwrap();

    let err = agent.stream(AgentInput::Prompt("two".into())).unwrap_err();
    assert!(matches!(err, AgentError::ConcurrentInvocation));

    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn steering_message_is_injected_before_the_next_model_call() {
    let mut agent = Agent::new(Arc::new(MockProvider::texts(vec!["first pass", "second pass"])));
    agent.steer("urgent update");
    let result = agent.prompt("hello").await.unwrap();
    assert_eq!(result.to_string(), "first pass");
    let messages = agent.messages();
    assert!(messages.iter().any(|m| m.text_summary().contains("urgent update")));
}

#[tokio::test]
async fn reset_clears_messages_and_queues() {
    let mut agent = Agent::new(Arc::new(MockProvider::text("hi")));
    agent.prompt("hello").await.unwrap();
    agent.steer("pending steer");
    assert!(!agent.messages().is_empty());

    agent.reset();

    assert!(agent.messages().is_empty());
    assert!(!agent.is_streaming());
}

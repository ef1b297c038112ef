//! Agent façade (C8) — builder-configured state holder wrapping the event
//! loop with message/queue management and abort support.
//!
//! Grounded on the teacher's `agent.rs` directly: builder-style setters,
//! `steering_queue`/`follow_up_queue` behind `Arc<Mutex<_>>` plus
//! `QueueMode`, an `is_streaming` guard, `abort()`/`reset()`. The message
//! list is additionally wrapped in `Arc<Mutex<_>>` (the teacher keeps it as
//! a plain field) so `stream()` can hand a spawned task ownership of a
//! consistent view while `Agent` itself stays usable for queue operations.

use crate::agent_loop::{agent_loop, agent_loop_continue, AgentInput, AgentLoopConfig, AgentResult, AgentStreamEvent};
use crate::content::{Content, Message};
use crate::context::{ContextConfig, ExecutionLimits};
use crate::error::AgentError;
use crate::hooks::HookRegistry;
use crate::interrupt::{InterruptResponse, InterruptState};
use crate::metrics::MetricsCollector;
use crate::provider::ModelProvider;
use crate::tool::{Tool, ToolRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Queue mode for steering and follow-up messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Deliver one message per turn.
    OneAtATime,
    /// Deliver all queued messages at once.
    All,
}

fn drain_queue(queue: &Arc<Mutex<Vec<Message>>>, mode: QueueMode) -> Vec<Message> {
    let mut q = queue.lock().unwrap();
    match mode {
        QueueMode::All => std::mem::take(&mut *q),
        QueueMode::OneAtATime => {
            if q.is_empty() {
                Vec::new()
            } else {
                vec![q.remove(0)]
            }
        }
    }
}

type BeforeTurnFn = dyn Fn(&[Message]) + Send + Sync;
type AfterTurnFn = dyn Fn(&AgentResult) + Send + Sync;
type OnErrorFn = dyn Fn(&AgentError) + Send + Sync;

/// The main façade. Owns configuration, message history, and the queues the
/// loop drains between cycles.
pub struct Agent {
    system_prompt: Option<String>,
    model: String,
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    hooks: Arc<HookRegistry>,
    interrupt_state: Arc<InterruptState>,
    metrics: MetricsCollector,
    context_config: ContextConfig,
    execution_limits: ExecutionLimits,
    structured_output_schema: Option<serde_json::Value>,

    messages: Arc<Mutex<Vec<Message>>>,
    steering_queue: Arc<Mutex<Vec<Message>>>,
    follow_up_queue: Arc<Mutex<Vec<Message>>>,
    steering_mode: QueueMode,
    follow_up_mode: QueueMode,

    is_streaming: Arc<AtomicBool>,
    cancel: CancellationToken,

    on_before_turn: Option<Arc<BeforeTurnFn>>,
    on_after_turn: Option<Arc<AfterTurnFn>>,
    on_error: Option<Arc<OnErrorFn>>,
}

impl Agent {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            system_prompt: None,
            model: String::new(),
            provider,
            tools: Arc::new(ToolRegistry::new()),
            hooks: Arc::new(HookRegistry::new()),
            interrupt_state: Arc::new(InterruptState::new()),
            metrics: MetricsCollector::default(),
            context_config: ContextConfig::default(),
            execution_limits: ExecutionLimits::default(),
            structured_output_schema: None,
            messages: Arc::new(Mutex::new(Vec::new())),
            steering_queue: Arc::new(Mutex::new(Vec::new())),
            follow_up_queue: Arc::new(Mutex::new(Vec::new())),
            steering_mode: QueueMode::OneAtATime,
            follow_up_mode: QueueMode::All,
            is_streaming: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            on_before_turn: None,
            on_after_turn: None,
            on_error: None,
        }
    }

    // -- builders -----------------------------------------------------

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_tools(mut self, tools: Vec<Box<dyn Tool>>) -> Result<Self, AgentError> {
        let mut registry = ToolRegistry::new();
        registry.register_all(tools).map_err(|e| AgentError::ToolRegistry(e.to_string()))?;
        self.tools = Arc::new(registry);
        Ok(self)
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_context_config(mut self, config: ContextConfig) -> Self {
        self.context_config = config;
        self
    }

    pub fn without_context_management(mut self) -> Self {
        self.context_config = ContextConfig { max_context_tokens: usize::MAX, ..self.context_config };
        self
    }

    pub fn with_execution_limits(mut self, limits: ExecutionLimits) -> Self {
        self.execution_limits = limits;
        self
    }

    pub fn with_structured_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.structured_output_schema = Some(schema);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn on_before_turn(mut self, f: impl Fn(&[Message]) + Send + Sync + 'static) -> Self {
        self.on_before_turn = Some(Arc::new(f));
        self
    }

    pub fn on_after_turn(mut self, f: impl Fn(&AgentResult) + Send + Sync + 'static) -> Self {
        self.on_after_turn = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&AgentError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    // -- state access ---------------------------------------------------

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming.load(Ordering::SeqCst)
    }

    pub fn set_tools(&mut self, tools: Vec<Box<dyn Tool>>) -> Result<(), AgentError> {
        let mut registry = ToolRegistry::new();
        registry.register_all(tools).map_err(|e| AgentError::ToolRegistry(e.to_string()))?;
        self.tools = Arc::new(registry);
        Ok(())
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains(name)
    }

    /// Register one more tool onto this agent's registry. Fails if the
    /// registry is already shared (e.g. by a concurrent `stream()` call).
    pub fn register_tool(&mut self, tool: Box<dyn Tool>) -> Result<(), AgentError> {
        let registry = Arc::get_mut(&mut self.tools).ok_or_else(|| AgentError::ToolRegistry("tool registry is in use by an in-flight invocation".into()))?;
        registry.register(tool).map_err(|e| AgentError::ToolRegistry(e.to_string()))
    }

    pub fn clear_messages(&self) {
        self.messages.lock().unwrap().clear();
    }

    pub fn append_message(&self, message: Message) {
        self.messages.lock().unwrap().push(message);
    }

    pub fn replace_messages(&self, messages: Vec<Message>) {
        *self.messages.lock().unwrap() = messages;
    }

    pub fn save_messages(&self) -> Vec<Message> {
        self.messages()
    }

    pub fn restore_messages(&self, messages: Vec<Message>) {
        self.replace_messages(messages);
    }

    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.metrics.get_metrics()
    }

    // -- queue management -------------------------------------------------

    pub fn steer(&self, text: impl Into<String>) {
        self.steering_queue.lock().unwrap().push(Message::user(text));
    }

    pub fn steer_blocks(&self, content: Vec<Content>) {
        self.steering_queue.lock().unwrap().push(Message::user_blocks(content));
    }

    pub fn follow_up(&self, text: impl Into<String>) {
        self.follow_up_queue.lock().unwrap().push(Message::user(text));
    }

    pub fn clear_steering_queue(&self) {
        self.steering_queue.lock().unwrap().clear();
    }

    pub fn clear_follow_up_queue(&self) {
        self.follow_up_queue.lock().unwrap().clear();
    }

    pub fn clear_all_queues(&self) {
        self.clear_steering_queue();
        self.clear_follow_up_queue();
    }

    pub fn set_steering_mode(&mut self, mode: QueueMode) {
        self.steering_mode = mode;
    }

    pub fn set_follow_up_mode(&mut self, mode: QueueMode) {
        self.follow_up_mode = mode;
    }

    // -- control ----------------------------------------------------------

    /// Cancel the in-flight invocation, if any. A fresh token is installed
    /// for the next call.
    pub fn abort(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
    }

    /// Reset all conversational state: messages, queues, interrupts, and the
    /// cancellation token.
    pub fn reset(&mut self) {
        self.clear_messages();
        self.clear_all_queues();
        self.interrupt_state.clear();
        self.cancel = CancellationToken::new();
        self.is_streaming.store(false, Ordering::SeqCst);
    }

    // -- prompting ----------------------------------------------------------

    /// Spawn the loop on a background task, returning a live event stream and
    /// a handle resolving to the terminal result once the loop finishes.
    pub fn stream(&mut self, input: AgentInput) -> Result<(mpsc::UnboundedReceiver<AgentStreamEvent>, JoinHandle<Result<AgentResult, AgentError>>), AgentError> {
        if self.is_streaming.swap(true, Ordering::SeqCst) {
            return Err(AgentError::ConcurrentInvocation);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let messages_arc = self.messages.clone();
        let provider = self.provider.clone();
        let tools = self.tools.clone();
        let hooks = self.hooks.clone();
        let interrupt_state = self.interrupt_state.clone();
        let metrics = self.metrics.clone();
        let context_config = self.context_config.clone();
        let execution_limits = self.execution_limits.clone();
        let structured_output_schema = self.structured_output_schema.clone();
        let system_prompt = self.system_prompt.clone();
        let steering_queue = self.steering_queue.clone();
        let steering_mode = self.steering_mode;
        let follow_up_queue = self.follow_up_queue.clone();
        let follow_up_mode = self.follow_up_mode;
        let cancel = self.cancel.clone();
        let is_streaming = self.is_streaming.clone();
        let on_before_turn = self.on_before_turn.clone();
        let on_after_turn = self.on_after_turn.clone();
        let on_error = self.on_error.clone();

        let handle = tokio::spawn(async move {
            let get_steering = move || drain_queue(&steering_queue, steering_mode);
            let get_follow_up = move || drain_queue(&follow_up_queue, follow_up_mode);
            let config = AgentLoopConfig {
                provider: provider.as_ref(),
                tools: tools.as_ref(),
                hooks: hooks.as_ref(),
                interrupt_state: interrupt_state.as_ref(),
                metrics: &metrics,
                system_prompt: system_prompt.as_deref(),
                context_config: &context_config,
                execution_limits,
                structured_output_schema: structured_output_schema.as_ref(),
                invocation_state: serde_json::Value::Null,
                get_steering_messages: &get_steering,
                get_follow_up_messages: &get_follow_up,
            };

            let mut local_messages = messages_arc.lock().unwrap().clone();
            if let Some(cb) = &on_before_turn {
                cb(&local_messages);
            }
            let result = agent_loop(input, &mut local_messages, &config, tx, cancel).await;
            *messages_arc.lock().unwrap() = local_messages;
            is_streaming.store(false, Ordering::SeqCst);

            match &result {
                Ok(r) => {
                    if let Some(cb) = &on_after_turn {
                        cb(r);
                    }
                }
                Err(e) => {
                    if let Some(cb) = &on_error {
                        cb(e);
                    }
                }
            }
            result
        });

        Ok((rx, handle))
    }

    /// Run to completion, discarding the intermediate event stream.
    pub async fn invoke(&mut self, input: AgentInput) -> Result<AgentResult, AgentError> {
        let (_rx, handle) = self.stream(input)?;
        handle.await.map_err(|e| AgentError::ToolRegistry(format!("agent task panicked: {e}")))?
    }

    /// Convenience: `invoke` with a plain text prompt.
    pub async fn prompt(&mut self, text: impl Into<String>) -> Result<AgentResult, AgentError> {
        self.invoke(AgentInput::Prompt(text.into())).await
    }

    /// Resume a paused invocation with interrupt responses.
    pub async fn resume(&mut self, responses: Vec<InterruptResponse>) -> Result<AgentResult, AgentError> {
        self.invoke(AgentInput::Resume(responses)).await
    }

    /// Continue the loop against the existing conversation without adding a
    /// new user message (e.g. after manually appending a tool result).
    pub async fn continue_loop(&mut self) -> Result<AgentResult, AgentError> {
        if self.is_streaming.swap(true, Ordering::SeqCst) {
            return Err(AgentError::ConcurrentInvocation);
        }
        let messages_arc = self.messages.clone();
        let provider = self.provider.clone();
        let tools = self.tools.clone();
        let hooks = self.hooks.clone();
        let interrupt_state = self.interrupt_state.clone();
        let metrics = self.metrics.clone();
        let context_config = self.context_config.clone();
        let execution_limits = self.execution_limits.clone();
        let structured_output_schema = self.structured_output_schema.clone();
        let system_prompt = self.system_prompt.clone();
        let steering_queue = self.steering_queue.clone();
        let steering_mode = self.steering_mode;
        let follow_up_queue = self.follow_up_queue.clone();
        let follow_up_mode = self.follow_up_mode;
        let cancel = self.cancel.clone();
        let is_streaming = self.is_streaming.clone();

        let (tx, _rx) = mpsc::unbounded_channel();
        let get_steering = move || drain_queue(&steering_queue, steering_mode);
        let get_follow_up = move || drain_queue(&follow_up_queue, follow_up_mode);
        let config = AgentLoopConfig {
            provider: provider.as_ref(),
            tools: tools.as_ref(),
            hooks: hooks.as_ref(),
            interrupt_state: interrupt_state.as_ref(),
            metrics: &metrics,
            system_prompt: system_prompt.as_deref(),
            context_config: &context_config,
            execution_limits,
            structured_output_schema: structured_output_schema.as_ref(),
            invocation_state: serde_json::Value::Null,
            get_steering_messages: &get_steering,
            get_follow_up_messages: &get_follow_up,
        };
        let mut local_messages = messages_arc.lock().unwrap().clone();
        let result = agent_loop_continue(&mut local_messages, &config, tx, cancel).await;
        *messages_arc.lock().unwrap() = local_messages;
        is_streaming.store(false, Ordering::SeqCst);
        result
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;

    fn echo_agent() -> Agent {
        Agent::new(Arc::new(MockProvider::text("hello there")))
    }

    #[tokio::test]
    async fn prompt_commits_user_and_assistant_messages() {
        let mut agent = echo_agent();
        let result = agent.prompt("hi").await.unwrap();
        assert_eq!(result.to_string(), "hello there");
        assert_eq!(agent.messages().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_invocation_is_rejected() {
        let mut agent = echo_agent();
        agent.is_streaming.store(true, Ordering::SeqCst);
        let err = agent.prompt("hi").await.unwrap_err();
        assert!(matches!(err, AgentError::ConcurrentInvocation));
    }

    #[tokio::test]
    async fn reset_clears_messages_and_queues() {
        let mut agent = echo_agent();
        agent.prompt("hi").await.unwrap();
        agent.steer("steering");
        assert!(!agent.messages().is_empty());
        agent.reset();
        assert!(agent.messages().is_empty());
        assert!(agent.steering_queue.lock().unwrap().is_empty());
    }
}

//! Agent event loop (C7) — the central state machine interleaving streamed
//! model turns with tool execution.
//!
//! Grounded on the teacher's `agent_loop.rs` almost directly: `agent_loop`/
//! `run_loop`/`stream_assistant_response`/`execute_tool_calls` keep the same
//! shape (push-channel of events + returned terminal result), generalized
//! from the teacher's fixed `AgentEvent`/`Message` types to this crate's
//! richer event/result types, and extended with the hook dispatcher,
//! interrupt protocol, and metrics collector the teacher does not have.

use crate::content::{Content, Message, Role, ToolStatus};
use crate::context::{truncate_messages, ContextConfig, ExecutionLimits, ExecutionTracker};
use crate::error::{AgentError, ProviderError, ToolError};
use crate::hooks::{
    AfterInvocationEvent, AfterModelCallEvent, AfterToolCallEvent, BeforeInvocationEvent, BeforeModelCallEvent, BeforeToolCallEvent,
    HookRegistry,
};
use crate::interrupt::{Interrupt, InterruptResponse, InterruptState};
use crate::metrics::MetricsCollector;
use crate::provider::{ModelProvider, StreamRequestConfig};
use crate::streaming::{ModelStreamEvent, StreamAssembler};
use crate::tool::{Tool, ToolContext, ToolRegistry};
use crate::types::StopReason;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What the caller is feeding into this invocation.
#[derive(Debug, Clone)]
pub enum AgentInput {
    Prompt(String),
    Blocks(Vec<Content>),
    Resume(Vec<InterruptResponse>),
}

/// Event pushed onto the caller's channel as the loop runs, in the strict
/// order described by §6's ordering guarantees.
#[derive(Debug, Clone)]
pub enum AgentStreamEvent {
    BeforeInvocation,
    BeforeModel { messages: Vec<Message> },
    Model(ModelStreamEvent),
    AfterModel { message: Message, stop_reason: StopReason },
    BeforeTools { message: Message },
    ToolExecutionStart { tool_use_id: String, tool_name: String, input: serde_json::Value },
    ToolStream(crate::tool::ToolStreamEvent),
    ToolExecutionEnd { tool_use_id: String, tool_name: String, is_error: bool },
    AfterTools { tool_result_message: Message },
    SteeringMessageInjected { message: Message },
    FollowUpMessageInjected { message: Message },
    AfterInvocation,
}

/// Terminal result of an `agent_loop` call.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AgentResult {
    pub stop_reason: Option<StopReason>,
    pub last_message: Option<Message>,
    pub interrupts: Vec<Interrupt>,
    pub structured_output: Option<serde_json::Value>,
    pub metrics: Option<crate::metrics::MetricsSnapshot>,
}

impl std::fmt::Display for AgentResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(output) = &self.structured_output {
            return write!(f, "{output}");
        }
        match &self.last_message {
            Some(m) => write!(f, "{}", m.text_summary()),
            None => write!(f, ""),
        }
    }
}

/// Closures the façade (`Agent`) injects so the loop can pull mid-run
/// steering messages and post-run follow-up messages without owning the
/// façade's queues directly — mirrors the teacher's `AgentLoopConfig`
/// closure fields.
pub struct AgentLoopConfig<'a> {
    pub provider: &'a dyn ModelProvider,
    pub tools: &'a ToolRegistry,
    pub hooks: &'a HookRegistry,
    pub interrupt_state: &'a InterruptState,
    pub metrics: &'a MetricsCollector,
    pub system_prompt: Option<&'a str>,
    pub context_config: &'a ContextConfig,
    pub execution_limits: ExecutionLimits,
    pub structured_output_schema: Option<&'a serde_json::Value>,
    pub invocation_state: serde_json::Value,
    pub get_steering_messages: &'a (dyn Fn() -> Vec<Message> + Sync),
    pub get_follow_up_messages: &'a (dyn Fn() -> Vec<Message> + Sync),
}

fn user_blocks(input: &AgentInput) -> Option<Message> {
    match input {
        AgentInput::Prompt(text) => Some(Message::user(text.clone())),
        AgentInput::Blocks(blocks) => Some(Message::user_blocks(blocks.clone())),
        AgentInput::Resume(_) => None,
    }
}

/// Run the agent loop to completion (or to a pause/error), starting from
/// `input` appended onto `messages`. `messages` is mutated in place with
/// every committed turn; only fully committed cycles ever land in it.
pub async fn agent_loop(
    input: AgentInput,
    messages: &mut Vec<Message>,
    config: &AgentLoopConfig<'_>,
    tx: mpsc::UnboundedSender<AgentStreamEvent>,
    cancel: CancellationToken,
) -> Result<AgentResult, AgentError> {
    if let AgentInput::Resume(responses) = &input {
        if config.structured_output_schema.is_some() {
            return Err(AgentError::StructuredOutputIncompatibleWithResume);
        }
        for r in responses {
            if r.interrupt_id.is_empty() {
                return Err(AgentError::InvalidResumeShape("interrupt_id must not be empty".into()));
            }
        }
        config.interrupt_state.apply_resume(responses)?;
    } else if let Some(msg) = user_blocks(&input) {
        messages.push(msg);
    }

    run_invocation(messages, config, tx, cancel).await
}

/// Continue an already-started conversation with no new user input (no
/// prompt was appended). Asserts the conversation is non-empty.
pub async fn agent_loop_continue(
    messages: &mut Vec<Message>,
    config: &AgentLoopConfig<'_>,
    tx: mpsc::UnboundedSender<AgentStreamEvent>,
    cancel: CancellationToken,
) -> Result<AgentResult, AgentError> {
    if messages.is_empty() {
        return Err(AgentError::InvalidResumeShape("cannot continue an empty conversation".into()));
    }
    run_invocation(messages, config, tx, cancel).await
}

/// Shared scope-guarded body: emits `BeforeInvocation`/`AfterInvocation` and
/// opens/closes the cycle trace on every exit path, including errors.
async fn run_invocation(
    messages: &mut Vec<Message>,
    config: &AgentLoopConfig<'_>,
    tx: mpsc::UnboundedSender<AgentStreamEvent>,
    cancel: CancellationToken,
) -> Result<AgentResult, AgentError> {
    let _ = tx.send(AgentStreamEvent::BeforeInvocation);
    config.hooks.dispatch(&BeforeInvocationEvent {})?;
    let mut cycle_scope = config.metrics.start_cycle("invocation", None);

    let result = run_loop(messages, config, &tx, &cancel).await;

    cycle_scope.close();
    let _ = tx.send(AgentStreamEvent::AfterInvocation);
    config.hooks.dispatch(&AfterInvocationEvent {})?;

    let mut result = result?;
    if !matches!(result.stop_reason, Some(StopReason::Interrupt)) {
        // A cycle that didn't pause clears any interrupts left over from a
        // prior resume — §4.6 step 5: full success clears activation.
        config.interrupt_state.clear();
    }
    result.metrics = Some(config.metrics.get_metrics());
    Ok(result)
}

enum CycleOutcome {
    /// Assistant message was a non-tool-use terminal turn; fully committed.
    Done(Message, StopReason),
    /// A fresh tool-use turn was committed and the loop should run again.
    Continue,
    /// A tool raised an interrupt; nothing from this cycle was committed.
    Interrupted,
}

async fn run_loop(
    messages: &mut Vec<Message>,
    config: &AgentLoopConfig<'_>,
    tx: &mpsc::UnboundedSender<AgentStreamEvent>,
    cancel: &CancellationToken,
) -> Result<AgentResult, AgentError> {
    let mut tracker = ExecutionTracker::new(config.execution_limits.clone());

    loop {
        let done = loop {
            for steering in (config.get_steering_messages)() {
                let _ = tx.send(AgentStreamEvent::SteeringMessageInjected { message: steering.clone() });
                messages.push(steering);
            }

            if let Some(reason) = tracker.check_limits() {
                messages.push(Message::user(format!("[Agent stopped: {reason}]")));
                return Ok(AgentResult {
                    stop_reason: Some(StopReason::Other("executionLimitReached".into())),
                    last_message: messages.last().cloned(),
                    ..Default::default()
                });
            }

            *messages = truncate_messages(std::mem::take(messages), config.context_config);

            match run_cycle(messages, config, tx, cancel, &mut tracker).await? {
                CycleOutcome::Done(message, stop_reason) => break AgentResult { stop_reason: Some(stop_reason), last_message: Some(message), ..Default::default() },
                CycleOutcome::Continue => continue,
                CycleOutcome::Interrupted => {
                    let snapshot = config.interrupt_state.snapshot();
                    return Ok(AgentResult {
                        stop_reason: Some(StopReason::Interrupt),
                        last_message: messages.last().cloned(),
                        interrupts: snapshot.interrupts.into_values().collect(),
                        ..Default::default()
                    });
                }
            }
        };

        let follow_ups = (config.get_follow_up_messages)();
        if follow_ups.is_empty() {
            return Ok(done);
        }
        for msg in follow_ups {
            let _ = tx.send(AgentStreamEvent::FollowUpMessageInjected { message: msg.clone() });
            messages.push(msg);
        }
    }
}

/// Context-map key the pending tool-use assistant message is stashed under
/// between the model call that produced it and the tool execution it feeds,
/// so a resume after a mid-tool-loop pause never re-calls the model — §4.6
/// step 4's "skip the already-answered model call and replay from the
/// assistant message that was already produced".
const PENDING_ASSISTANT_MESSAGE_KEY: &str = "agent_loop::pending_assistant_message";

async fn run_cycle(
    messages: &mut Vec<Message>,
    config: &AgentLoopConfig<'_>,
    tx: &mpsc::UnboundedSender<AgentStreamEvent>,
    cancel: &CancellationToken,
    tracker: &mut ExecutionTracker,
) -> Result<CycleOutcome, AgentError> {
    let resumed_message: Option<Message> = config
        .interrupt_state
        .take_context(PENDING_ASSISTANT_MESSAGE_KEY)
        .and_then(|v| serde_json::from_value(v).ok());

    let (message, stop_reason) = if let Some(message) = resumed_message {
        (message, StopReason::ToolUse)
    } else {
        let snapshot = messages.clone();
        let _ = tx.send(AgentStreamEvent::BeforeModel { messages: snapshot.clone() });
        config.hooks.dispatch(&BeforeModelCallEvent { messages: snapshot })?;

        let (message, stop_reason, usage, latency_ms) = stream_assistant_response(messages, config, tx, cancel).await?;
        config.metrics.record_model_invocation(latency_ms, usage, None);
        tracker.record_turn(usage.total_tokens() as usize);

        let _ = tx.send(AgentStreamEvent::AfterModel { message: message.clone(), stop_reason: stop_reason.clone() });
        config.hooks.dispatch(&AfterModelCallEvent { message: message.clone(), stop_reason: stop_reason.clone() })?;

        if matches!(stop_reason, StopReason::MaxTokens) {
            return Err(AgentError::MaxTokens { partial: Box::new(message) });
        }

        (message, stop_reason)
    };

    if !matches!(stop_reason, StopReason::ToolUse) || !message.has_tool_uses() {
        messages.push(message.clone());
        return Ok(CycleOutcome::Done(message, stop_reason));
    }

    // Stash the assistant turn before touching tools: if one of them pauses,
    // the next `run_cycle` for this invocation must reuse it rather than
    // asking the model again.
    if let Ok(value) = serde_json::to_value(&message) {
        config.interrupt_state.save_context(PENDING_ASSISTANT_MESSAGE_KEY, value);
    }

    let _ = tx.send(AgentStreamEvent::BeforeTools { message: message.clone() });
    match execute_tool_calls(&message, config, tx, cancel).await? {
        ToolExecOutcome::Completed(tool_result_message) => {
            config.interrupt_state.clear_context(PENDING_ASSISTANT_MESSAGE_KEY);
            let is_error = tool_result_message.content.iter().any(|c| matches!(c, Content::ToolResult { status: ToolStatus::Error, .. }));
            let _ = tx.send(AgentStreamEvent::AfterTools { tool_result_message: tool_result_message.clone() });
            config.hooks.dispatch(&AfterToolCallEvent { tool_use_id: String::new(), tool_name: String::new(), is_error })?;
            messages.push(message);
            messages.push(tool_result_message);
            Ok(CycleOutcome::Continue)
        }
        ToolExecOutcome::Interrupted => Ok(CycleOutcome::Interrupted),
    }
}

async fn stream_assistant_response(
    messages: &[Message],
    config: &AgentLoopConfig<'_>,
    tx: &mpsc::UnboundedSender<AgentStreamEvent>,
    cancel: &CancellationToken,
) -> Result<(Message, StopReason, crate::types::Usage, u64), AgentError> {
    let request = StreamRequestConfig {
        system_prompt: config.system_prompt.map(str::to_string),
        tool_specs: config.tools.list(),
        tool_choice: None,
    };
    let (model_tx, mut model_rx) = mpsc::unbounded_channel();
    let started = std::time::Instant::now();
    let mut assembler = StreamAssembler::new();

    let stream_result = config.provider.stream_aggregated(messages, &request, model_tx, cancel.clone()).await;

    while let Ok(event) = model_rx.try_recv() {
        assembler.push(&event);
        let _ = tx.send(AgentStreamEvent::Model(event));
    }

    let latency_ms = started.elapsed().as_millis() as u64;

    if let Err(err) = stream_result {
        warn!(error = %err, "model provider call failed");
        return Err(AgentError::Provider(err));
    }

    match assembler.finish() {
        Some((message, stop_reason, usage)) => Ok((message, stop_reason, usage, latency_ms)),
        None => Err(AgentError::Provider(ProviderError::Other("model stream ended without a stop reason".into()))),
    }
}

enum ToolExecOutcome {
    Completed(Message),
    Interrupted,
}

/// Context-map key holding the `ToolResult` blocks already produced for the
/// in-flight assistant turn. A pause mid-tool-loop leaves the tools before it
/// resolved here, so a resume replays only from the paused tool onward
/// instead of re-executing everything that already ran.
const PARTIAL_TOOL_RESULTS_KEY: &str = "agent_loop::partial_tool_results";

async fn execute_tool_calls(
    assistant_message: &Message,
    config: &AgentLoopConfig<'_>,
    tx: &mpsc::UnboundedSender<AgentStreamEvent>,
    cancel: &CancellationToken,
) -> Result<ToolExecOutcome, AgentError> {
    let tool_uses: Vec<(String, String, serde_json::Value)> =
        assistant_message.tool_uses().into_iter().map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone())).collect();

    let mut result_blocks: Vec<Content> = config
        .interrupt_state
        .take_context(PARTIAL_TOOL_RESULTS_KEY)
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    let already_resolved = result_blocks.len();

    for (ordinal, (tool_use_id, tool_name, input)) in tool_uses.into_iter().enumerate() {
        if ordinal < already_resolved {
            // Resolved in an earlier pass of this same (paused) cycle.
            continue;
        }

        let before = BeforeToolCallEvent { tool_use_id: tool_use_id.clone(), tool_name: tool_name.clone(), input: input.clone(), ..Default::default() };
        config.hooks.dispatch(&before)?;

        if let Some(reason) = before.cancel_reason.lock().unwrap().clone() {
            result_blocks.push(Content::tool_result_err(tool_use_id, reason));
            save_partial_tool_results(config, &result_blocks);
            continue;
        }

        if let Some((name, reason)) = before.interrupt_request.lock().unwrap().clone() {
            match config.interrupt_state.raise("before_tool_call", &tool_use_id, ordinal as u64, &input, &name, reason) {
                Ok(_response) => {} // already resumed; fall through and run the tool
                Err(ToolError::Interrupted(_)) => return Ok(ToolExecOutcome::Interrupted),
                Err(other) => return Err(AgentError::ToolRaised { tool_name, source: other }),
            }
        }

        let _ = tx.send(AgentStreamEvent::ToolExecutionStart { tool_use_id: tool_use_id.clone(), tool_name: tool_name.clone(), input: input.clone() });

        let Some(tool) = config.tools.get(&tool_name) else {
            let _ = tx.send(AgentStreamEvent::ToolExecutionEnd { tool_use_id: tool_use_id.clone(), tool_name: tool_name.clone(), is_error: true });
            result_blocks.push(Content::tool_result_err(tool_use_id, format!("tool '{tool_name}' not found")));
            save_partial_tool_results(config, &result_blocks);
            continue;
        };

        let mut scope = config.metrics.start_tool_execution(&tool_name, None);
        let outcome = invoke_tool(tool, &tool_use_id, &tool_name, input, ordinal as u64, config, tx, cancel).await;

        match outcome {
            Ok(InvokeOutcome::Result(tool_outcome)) => {
                if !tool_outcome.is_error {
                    scope.mark_success();
                }
                scope.close();
                let _ = tx.send(AgentStreamEvent::ToolExecutionEnd { tool_use_id: tool_use_id.clone(), tool_name: tool_name.clone(), is_error: tool_outcome.is_error });
                let status = if tool_outcome.is_error { ToolStatus::Error } else { ToolStatus::Success };
                result_blocks.push(Content::ToolResult { tool_use_id, status, content: tool_outcome.content });
                save_partial_tool_results(config, &result_blocks);
            }
            Ok(InvokeOutcome::Interrupted) => {
                scope.close();
                let _ = tx.send(AgentStreamEvent::ToolExecutionEnd { tool_use_id: tool_use_id.clone(), tool_name: tool_name.clone(), is_error: false });
                return Ok(ToolExecOutcome::Interrupted);
            }
            Err(source) => {
                scope.close();
                let _ = tx.send(AgentStreamEvent::ToolExecutionEnd { tool_use_id: tool_use_id.clone(), tool_name: tool_name.clone(), is_error: true });
                return Err(AgentError::ToolRaised { tool_name, source });
            }
        }
    }

    config.interrupt_state.clear_context(PARTIAL_TOOL_RESULTS_KEY);
    Ok(ToolExecOutcome::Completed(Message { role: Role::User, content: result_blocks }))
}

fn save_partial_tool_results(config: &AgentLoopConfig<'_>, result_blocks: &[Content]) {
    if let Ok(value) = serde_json::to_value(result_blocks) {
        config.interrupt_state.save_context(PARTIAL_TOOL_RESULTS_KEY, value);
    }
}

enum InvokeOutcome {
    Result(crate::tool::ToolOutcome),
    Interrupted,
}

async fn invoke_tool(
    tool: &dyn Tool,
    tool_use_id: &str,
    tool_name: &str,
    input: serde_json::Value,
    ordinal: u64,
    config: &AgentLoopConfig<'_>,
    tx: &mpsc::UnboundedSender<AgentStreamEvent>,
    cancel: &CancellationToken,
) -> Result<InvokeOutcome, ToolError> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let forward_tx = tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let _ = forward_tx.send(AgentStreamEvent::ToolStream(event));
        }
    });

    let interrupt_state = config.interrupt_state;
    let key = tool_use_id.to_string();
    let interrupt_input = input.clone();
    let interrupt_fn = move |name: &str, reason: Option<String>| -> Result<serde_json::Value, ToolError> {
        interrupt_state.raise("tool_call", &key, ordinal, &interrupt_input, name, reason)
    };

    let ctx = ToolContext {
        tool_use_id: tool_use_id.to_string(),
        tool_name: tool_name.to_string(),
        input,
        invocation_state: config.invocation_state.clone(),
        cancel: cancel.clone(),
        events: events_tx,
        interrupt: Box::new(interrupt_fn),
    };

    let result = tool.stream(ctx).await;
    forward_task.abort();

    match result {
        Ok(outcome) => Ok(InvokeOutcome::Result(outcome)),
        Err(ToolError::Interrupted(id)) => {
            debug!(interrupt_id = %id, "tool raised an interrupt");
            Ok(InvokeOutcome::Interrupted)
        }
        Err(other) => Err(other),
    }
}

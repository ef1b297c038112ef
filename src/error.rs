//! Error kinds surfaced across the runtime.
//!
//! Each error enum maps to one layer of the system: provider/model errors,
//! tool errors, hook errors, and agent-loop/structural errors. Multi-agent
//! failures are carried as data (`MultiAgentResult::status = Failed(reason)`)
//! rather than as exceptions, per the error handling design.

use crate::content::Message;
use thiserror::Error;

/// Errors a `ModelProvider` can return from `stream_aggregated`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("Cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// Errors a `Tool::stream` implementation can raise. Raising is distinct from
/// returning an error `ToolResultBlock`: raising aborts the transactional
/// commit for the whole cycle (see `AgentError::ToolRaised`).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("cancelled")]
    Cancelled,
    /// Raised by `ToolContext::interrupt` the first time a given pause point
    /// is reached. Distinct from `Cancelled` (a real abort): the loop
    /// catches this as a pause-and-wait-for-resume signal, never a failure.
    #[error("interrupted: {0}")]
    Interrupted(String),
}

/// Errors raised while registering hooks or dispatching hook callbacks.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("{0}")]
    CallbackFailed(String),
}

/// Top-level errors from the agent event loop / façade.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model stopped because of a token budget, carrying the partial
    /// assistant message so the caller can inspect or persist it.
    #[error("model stopped at max tokens")]
    MaxTokens { partial: Box<Message> },

    /// The conversation no longer fits the provider's context window.
    #[error("context window exceeded: {0}")]
    ContextWindowOverflow(String),

    /// A model/provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A tool's `stream()` future resolved to `Err` (as opposed to returning
    /// an error `ToolResultBlock`, which is not an exception).
    #[error("tool '{tool_name}' raised: {source}")]
    ToolRaised {
        tool_name: String,
        #[source]
        source: ToolError,
    },

    /// A hook callback returned an error.
    #[error(transparent)]
    Hook(#[from] HookError),

    /// Structured-output JSON failed to parse or did not match the expected
    /// single-tool-call shape.
    #[error("structured output validation failed: {0}")]
    JsonValidation(String),

    /// A second `invoke`/`stream` was attempted while one was already
    /// in flight on the same `Agent`.
    #[error("agent is already streaming a response")]
    ConcurrentInvocation,

    /// A resume item referenced an interrupt ID the agent doesn't know about.
    #[error("unknown interrupt id: {0}")]
    UnknownInterrupt(String),

    /// A resume call was made with inputs that aren't all resume items.
    #[error("invalid resume shape: {0}")]
    InvalidResumeShape(String),

    /// Resume was attempted while a structured-output schema is configured.
    #[error("resume is incompatible with a configured structured-output schema")]
    StructuredOutputIncompatibleWithResume,

    /// Tool registry structural error (duplicate name, reserved name, etc).
    #[error("tool registry error: {0}")]
    ToolRegistry(String),
}

/// Errors raised while building a `Graph`.
#[derive(Debug, Error)]
pub enum GraphBuildError {
    #[error("no entry point could be determined for the graph")]
    NoEntryPoint,
    #[error("unsupported executor type for node '{0}'")]
    UnsupportedExecutor(String),
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),
    #[error("edge references unknown node '{0}'")]
    UnknownNode(String),
}

/// Errors raised while building a `Swarm`.
#[derive(Debug, Error)]
pub enum SwarmBuildError {
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),
    #[error("tool name '{0}' is reserved for swarm coordination")]
    ReservedToolName(String),
    #[error("unknown entry point node '{0}'")]
    UnknownEntryPoint(String),
}

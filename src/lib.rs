//! An async agent runtime: a streaming LLM/tool event loop, a typed hook
//! dispatcher, an interrupt/resume protocol, and graph/swarm multi-agent
//! orchestrators built on top of it.

pub mod agent;
pub mod agent_loop;
pub mod content;
pub mod context;
pub mod error;
pub mod hooks;
pub mod interrupt;
pub mod metrics;
pub mod multi_agent;
pub mod provider;
pub mod streaming;
pub mod sub_agent;
pub mod tool;
pub mod types;

pub use agent::{Agent, QueueMode};
pub use agent_loop::{agent_loop, agent_loop_continue, AgentInput, AgentLoopConfig, AgentResult, AgentStreamEvent};
pub use content::{CachePoint, Content, MediaSource, Message, Role, ToolResultContent, ToolStatus};
pub use context::{ContextConfig, ExecutionLimits, ExecutionTracker};
pub use error::{AgentError, GraphBuildError, HookError, ProviderError, SwarmBuildError, ToolError};
pub use hooks::{
    AfterInvocationEvent, AfterModelCallEvent, AfterMultiAgentInvocationEvent, AfterNodeCallEvent, AfterToolCallEvent,
    BeforeInvocationEvent, BeforeModelCallEvent, BeforeMultiAgentInvocationEvent, BeforeNodeCallEvent, BeforeToolCallEvent,
    HookEvent, HookRegistry, MultiAgentInitializedEvent,
};
pub use interrupt::{Interrupt, InterruptResponse, InterruptState, InterruptStateSnapshot};
pub use metrics::{MeterProvider, MetricsCollector, MetricsSnapshot, NoopMeterProvider, ToolStat, TraceNode, TraceRecord};
pub use multi_agent::graph::{Graph, GraphBuilder, MultiAgentExecutor};
pub use multi_agent::swarm::{SharedSwarmContext, Swarm, SwarmBuilder};
pub use multi_agent::{MultiAgentEvent, MultiAgentResult, MultiAgentStatus, NodeId, NodeResult, NodeStatus, RepetitionDetector};
pub use provider::{MockProvider, MockResponse, MockToolCall, ModelProvider, StreamRequestConfig};
pub use streaming::{ModelStreamEvent, StreamAssembler, StreamDelta, ToolUseStart};
pub use sub_agent::SubAgentTool;
pub use tool::{Tool, ToolContext, ToolOutcome, ToolRegistry, ToolSpec, ToolStreamEvent, HANDOFF_TOOL_NAME};
pub use types::{now_ms, StopReason, Usage};

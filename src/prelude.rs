//! Convenience re-exports for common use.

pub use crate::agent_loop::{
    AgentContext, ControllerSettings, EventEmitter, PassController, SequencedEvent, ToolContext,
    ToolExecutor, ToolHandler, TurnEvent, TurnHandle, TurnOutcome, TurnStatus,
};
pub use crate::config::ScriptoriumConfig;
pub use crate::error::{Result, ScriptoriumError};
pub use crate::gate::ModeGate;
pub use crate::provider::{EndpointRequest, ModelEndpoint};
pub use crate::tools::{ToolInvocation, ToolKind, ToolOutput, ToolRequest};
pub use crate::types::{ChatMessage, GenerationSettings, Mode, Role, StreamChunk};

//! Turn orchestration: passes, tool dispatch, events.

pub mod background;
pub mod clarify;
pub mod context;
pub mod controller;
pub mod events;
pub mod executor;
pub mod tool_log;

pub use background::{
    persist_in_background, BackgroundFailure, BackgroundQueue, ConversationStore,
    MemoryConversationStore,
};
pub use clarify::{ClarificationStage, GapDetector};
pub use context::{AgentContext, Identity, IdentityResolver, ToolContext};
pub use controller::{
    CompletedToolCall, ControllerSettings, PassController, TurnHandle, TurnOutcome, TurnStatus,
};
pub use events::{EventEmitter, SequencedEvent, TurnEvent};
pub use executor::{ExecutionObserver, NoopObserver, ProgressReporter, ToolExecutor, ToolHandler};
pub use tool_log::{MemoryToolLog, ToolLog, ToolLogEntry, ToolLogStatus};

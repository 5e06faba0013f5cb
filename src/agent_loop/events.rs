//! Ordered outbound event channel for a turn.
//!
//! Every lifecycle signal of a turn goes through one [`EventEmitter`]. The
//! emitter numbers events, stamps non-decreasing timestamps and enforces the
//! per tool-call ordering `preparing < start < progress* < complete`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::tools::ToolInvocation;
use crate::util::retry::RetryNotice;

use super::executor::ExecutionObserver;

/// Internal lifecycle event of a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    MessageChunk {
        message_id: String,
        chunk: String,
    },
    ToolPreparing {
        tool_call_id: String,
        tool_name: String,
    },
    ToolStart {
        tool_call_id: String,
        tool_name: String,
    },
    ToolProgress {
        tool_call_id: String,
        message: String,
    },
    ToolRetrying {
        tool_call_id: String,
        tool_name: String,
        retry_count: u32,
        retry_number: u32,
        error: String,
    },
    ToolComplete {
        tool_call_id: String,
        tool_name: String,
        success: bool,
        result: Option<serde_json::Value>,
        error: Option<String>,
    },
    MessageComplete {
        message_id: String,
        message: String,
    },
    Error {
        message: String,
    },
    Done,
}

impl TurnEvent {
    /// Wire event name.
    pub fn name(&self) -> &'static str {
        match self {
            TurnEvent::MessageChunk { .. } => "message:chunk",
            TurnEvent::ToolPreparing { .. } => "tool:preparing",
            TurnEvent::ToolStart { .. } => "tool:start",
            TurnEvent::ToolProgress { .. } => "tool:progress",
            TurnEvent::ToolRetrying { .. } => "tool:retrying",
            TurnEvent::ToolComplete { .. } => "tool:complete",
            TurnEvent::MessageComplete { .. } => "message:complete",
            TurnEvent::Error { .. } => "error",
            TurnEvent::Done => "done",
        }
    }

    /// Tool call this event belongs to, if any.
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            TurnEvent::ToolPreparing { tool_call_id, .. }
            | TurnEvent::ToolStart { tool_call_id, .. }
            | TurnEvent::ToolProgress { tool_call_id, .. }
            | TurnEvent::ToolRetrying { tool_call_id, .. }
            | TurnEvent::ToolComplete { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }
}

/// An event as delivered to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedEvent {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: TurnEvent,
}

impl SequencedEvent {
    pub fn name(&self) -> &'static str {
        self.event.name()
    }

    /// Wire payload (camelCase keys). Tool events carry the timestamp.
    pub fn data(&self) -> serde_json::Value {
        let timestamp = self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        match &self.event {
            TurnEvent::MessageChunk { message_id, chunk } => {
                json!({ "messageId": message_id, "chunk": chunk })
            }
            TurnEvent::ToolPreparing {
                tool_call_id,
                tool_name,
            }
            | TurnEvent::ToolStart {
                tool_call_id,
                tool_name,
            } => json!({
                "toolCallId": tool_call_id,
                "toolName": tool_name,
                "timestamp": timestamp,
            }),
            TurnEvent::ToolProgress {
                tool_call_id,
                message,
            } => json!({
                "toolCallId": tool_call_id,
                "message": message,
                "timestamp": timestamp,
            }),
            TurnEvent::ToolRetrying {
                tool_call_id,
                tool_name,
                retry_count,
                retry_number,
                error,
            } => json!({
                "toolCallId": tool_call_id,
                "toolName": tool_name,
                "retryCount": retry_count,
                "retryNumber": retry_number,
                "error": error,
                "timestamp": timestamp,
            }),
            TurnEvent::ToolComplete {
                tool_call_id,
                tool_name,
                success,
                result,
                error,
            } => json!({
                "toolCallId": tool_call_id,
                "toolName": tool_name,
                "success": success,
                "result": result,
                "error": error,
                "timestamp": timestamp,
            }),
            TurnEvent::MessageComplete {
                message_id,
                message,
            } => json!({ "messageId": message_id, "message": message }),
            TurnEvent::Error { message } => json!({ "message": message }),
            TurnEvent::Done => json!({}),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolPhase {
    Preparing,
    Running,
    Complete,
}

#[derive(Debug, Default)]
struct EmitterState {
    seq: u64,
    last_timestamp: Option<DateTime<Utc>>,
    phases: HashMap<String, ToolPhase>,
    message_completed: bool,
    closed: bool,
}

impl EmitterState {
    fn stamp(&mut self, event: TurnEvent) -> SequencedEvent {
        let now = Utc::now();
        let timestamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        self.seq += 1;
        SequencedEvent {
            seq: self.seq,
            timestamp,
            event,
        }
    }

    /// Events to deliver for `event`, including synthesized predecessors.
    fn admit(&mut self, event: TurnEvent) -> Vec<TurnEvent> {
        if self.closed {
            return Vec::new();
        }
        match &event {
            TurnEvent::ToolPreparing { tool_call_id, .. } => {
                if self.phases.contains_key(tool_call_id) {
                    return Vec::new();
                }
                self.phases.insert(tool_call_id.clone(), ToolPhase::Preparing);
                vec![event]
            }
            TurnEvent::ToolStart {
                tool_call_id,
                tool_name,
            } => match self.phases.get(tool_call_id).copied() {
                None => {
                    self.phases.insert(tool_call_id.clone(), ToolPhase::Running);
                    vec![
                        TurnEvent::ToolPreparing {
                            tool_call_id: tool_call_id.clone(),
                            tool_name: tool_name.clone(),
                        },
                        event,
                    ]
                }
                Some(ToolPhase::Preparing) => {
                    self.phases.insert(tool_call_id.clone(), ToolPhase::Running);
                    vec![event]
                }
                Some(_) => Vec::new(),
            },
            TurnEvent::ToolProgress { tool_call_id, .. }
            | TurnEvent::ToolRetrying { tool_call_id, .. } => {
                if self.phases.get(tool_call_id) == Some(&ToolPhase::Running) {
                    vec![event]
                } else {
                    Vec::new()
                }
            }
            TurnEvent::ToolComplete {
                tool_call_id,
                tool_name,
                ..
            } => {
                let phase = self.phases.get(tool_call_id).copied();
                let mut out = Vec::new();
                if phase == Some(ToolPhase::Complete) {
                    return out;
                }
                if phase.is_none() {
                    out.push(TurnEvent::ToolPreparing {
                        tool_call_id: tool_call_id.clone(),
                        tool_name: tool_name.clone(),
                    });
                }
                if phase != Some(ToolPhase::Running) {
                    out.push(TurnEvent::ToolStart {
                        tool_call_id: tool_call_id.clone(),
                        tool_name: tool_name.clone(),
                    });
                }
                self.phases.insert(tool_call_id.clone(), ToolPhase::Complete);
                out.push(event);
                out
            }
            TurnEvent::MessageComplete { .. } => {
                if self.message_completed {
                    return Vec::new();
                }
                self.message_completed = true;
                vec![event]
            }
            TurnEvent::Done => {
                self.closed = true;
                vec![event]
            }
            TurnEvent::MessageChunk { .. } | TurnEvent::Error { .. } => vec![event],
        }
    }
}

struct EmitterInner {
    tx: mpsc::UnboundedSender<SequencedEvent>,
    state: Mutex<EmitterState>,
}

/// Cloneable handle onto the turn's ordered event channel.
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Create an emitter and the receiving end the transport drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SequencedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Self {
            inner: Arc::new(EmitterInner {
                tx,
                state: Mutex::new(EmitterState::default()),
            }),
        };
        (emitter, rx)
    }

    /// Emit an event. Returns false when the event was dropped as out of order.
    pub fn emit(&self, event: TurnEvent) -> bool {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let name = event.name();
        let tool_call_id = event.tool_call_id().map(str::to_string);
        let admitted = state.admit(event);
        if admitted.is_empty() {
            warn!(
                event = name,
                tool_call_id = tool_call_id.as_deref().unwrap_or(""),
                "dropping out-of-order event"
            );
            return false;
        }

        // Sending under the lock keeps seq order and channel order identical.
        for event in admitted {
            let sequenced = state.stamp(event);
            if self.inner.tx.send(sequenced).is_err() {
                debug!(event = name, "event receiver dropped");
            }
        }
        true
    }

    /// Forget tool phases from earlier passes. Tool call ids are only unique within a pass.
    pub fn begin_pass(&self) {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .phases
            .clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .closed
    }
}

impl ExecutionObserver for EventEmitter {
    fn progress(&self, invocation: &ToolInvocation, message: &str) {
        self.emit(TurnEvent::ToolProgress {
            tool_call_id: invocation.id.clone(),
            message: message.to_string(),
        });
    }

    fn retrying(&self, invocation: &ToolInvocation, notice: &RetryNotice) {
        self.emit(TurnEvent::ToolRetrying {
            tool_call_id: invocation.id.clone(),
            tool_name: invocation.name.clone(),
            retry_count: notice.retry_count,
            retry_number: notice.retry_number(),
            error: notice.error.clone(),
        });
    }
}

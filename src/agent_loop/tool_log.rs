//! Append-only tool execution log.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolLogStatus {
    Started,
    Retrying,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolLogEntry {
    pub tool_call_id: String,
    pub tool_name: String,
    pub status: ToolLogStatus,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl ToolLogEntry {
    pub fn new(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        status: ToolLogStatus,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            status,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Sink for tool log entries, owned by the calling layer.
///
/// `append` must not block; implementations that persist entries should
/// hand them to a [`BackgroundQueue`](super::background::BackgroundQueue).
pub trait ToolLog: Send + Sync {
    fn append(&self, entry: ToolLogEntry);
}

/// In-memory log used by tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryToolLog {
    entries: Mutex<Vec<ToolLogEntry>>,
}

impl MemoryToolLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ToolLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Statuses recorded for one tool call, in append order.
    pub fn statuses_for(&self, tool_call_id: &str) -> Vec<ToolLogStatus> {
        self.entries()
            .into_iter()
            .filter(|e| e.tool_call_id == tool_call_id)
            .map(|e| e.status)
            .collect()
    }
}

impl ToolLog for MemoryToolLog {
    fn append(&self, entry: ToolLogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }
}

//! Streaming types produced by the stream decoder.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One decoded unit of a model response stream.
///
/// Each chunk carries exactly one responsibility: text, a tool-call
/// fragment, or the finish signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    TextDelta { content: String },
    ToolCallDelta(ToolCallDelta),
    FinishSignal { reason: FinishReason },
}

/// Fragment of a tool call, keyed by its position in the provider's tool call list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_part: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments_part: Option<String>,
}

/// Why the model stopped producing output for a pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Unknown,
}

impl FinishReason {
    /// Map a provider finish reason string, folding provider-equivalent spellings.
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "tool_calls" | "function_call" | "tool_use" => Self::ToolCalls,
            "stop" | "end_turn" | "stop_sequence" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            "content_filter" => Self::ContentFilter,
            _ => Self::Unknown,
        }
    }

    pub fn requests_tools(&self) -> bool {
        matches!(self, Self::ToolCalls)
    }
}

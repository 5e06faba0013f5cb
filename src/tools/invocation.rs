//! Assembled tool invocations and their results.

use serde::{Deserialize, Serialize};

use super::catalog::ToolKind;
use super::request::ToolRequest;
use crate::types::ToolCallRecord;

/// A fully assembled, argument-validated tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Position of the call within the pass's tool call list.
    pub index: usize,
    /// Unique within a pass.
    pub id: String,
    pub name: String,
    /// Arguments exactly as the model produced them.
    pub arguments: serde_json::Value,
    pub request: ToolRequest,
}

impl ToolInvocation {
    pub fn kind(&self) -> ToolKind {
        self.request.kind()
    }

    /// History record for the assistant message that requested this call.
    pub fn record(&self) -> ToolCallRecord {
        ToolCallRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

/// Successful handler output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_content_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

impl ToolOutput {
    pub fn new(result: serde_json::Value) -> Self {
        Self {
            result,
            ..Self::default()
        }
    }

    pub fn with_content_id(mut self, id: impl Into<String>) -> Self {
        self.content_id = Some(id.into());
        self
    }

    pub fn with_source_content_id(mut self, id: impl Into<String>) -> Self {
        self.source_content_id = Some(id.into());
        self
    }
}

/// Uniform result shape produced for every dispatched invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_content_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

impl ToolExecutionResult {
    pub fn succeeded(output: ToolOutput) -> Self {
        Self {
            success: true,
            result: Some(output.result),
            error: None,
            source_content_id: output.source_content_id,
            content_id: output.content_id,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            source_content_id: None,
            content_id: None,
        }
    }

    /// Content of the tool-role message folded into history.
    pub fn to_model_content(&self) -> String {
        let mut value = if self.success {
            serde_json::json!({
                "success": true,
                "result": self.result.clone().unwrap_or(serde_json::Value::Null),
            })
        } else {
            serde_json::json!({
                "success": false,
                "error": self.error.clone().unwrap_or_default(),
            })
        };
        if let Some(id) = &self.content_id {
            value["contentId"] = serde_json::Value::String(id.clone());
        }
        if let Some(id) = &self.source_content_id {
            value["sourceContentId"] = serde_json::Value::String(id.clone());
        }
        value.to_string()
    }
}

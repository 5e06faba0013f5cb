//! Validated tool arguments, one variant per tool.

use serde::{Deserialize, Serialize};

use super::catalog::ToolKind;
use crate::error::ScriptoriumError;

/// Publication status of a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionOperation {
    Replace,
    Append,
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadContentListArgs {
    #[serde(default)]
    pub status: Option<ContentStatus>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadContentArgs {
    pub content_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadSectionArgs {
    pub content_id: String,
    pub section_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadSourceListArgs {
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadSourceArgs {
    pub source_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadWorkspaceSummaryArgs {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentWriteArgs {
    #[serde(default)]
    pub content_id: Option<String>,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub source_content_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditSectionArgs {
    pub content_id: String,
    pub section_id: String,
    pub operation: SectionOperation,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIngestArgs {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// A tool request whose arguments have been checked against the tool's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum ToolRequest {
    ReadContentList(ReadContentListArgs),
    ReadContent(ReadContentArgs),
    ReadSection(ReadSectionArgs),
    ReadSourceList(ReadSourceListArgs),
    ReadSource(ReadSourceArgs),
    ReadWorkspaceSummary(ReadWorkspaceSummaryArgs),
    ContentWrite(ContentWriteArgs),
    EditSection(EditSectionArgs),
    SourceIngest(SourceIngestArgs),
}

impl ToolRequest {
    /// Build a typed request from a tool name and its parsed JSON arguments.
    pub fn parse(name: &str, arguments: &serde_json::Value) -> Result<Self, ScriptoriumError> {
        if ToolKind::from_name(name).is_none() {
            return Err(ScriptoriumError::InvalidArgument(format!("unknown tool '{name}'")));
        }
        if !arguments.is_object() {
            return Err(ScriptoriumError::InvalidArgument(format!(
                "arguments for '{name}' must be a JSON object"
            )));
        }
        let tagged = serde_json::json!({ "tool": name, "arguments": arguments });
        let request: ToolRequest = serde_json::from_value(tagged).map_err(|e| {
            ScriptoriumError::InvalidArgument(format!("invalid arguments for '{name}': {e}"))
        })?;
        request.validate()?;
        Ok(request)
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolRequest::ReadContentList(_) => ToolKind::ReadContentList,
            ToolRequest::ReadContent(_) => ToolKind::ReadContent,
            ToolRequest::ReadSection(_) => ToolKind::ReadSection,
            ToolRequest::ReadSourceList(_) => ToolKind::ReadSourceList,
            ToolRequest::ReadSource(_) => ToolKind::ReadSource,
            ToolRequest::ReadWorkspaceSummary(_) => ToolKind::ReadWorkspaceSummary,
            ToolRequest::ContentWrite(_) => ToolKind::ContentWrite,
            ToolRequest::EditSection(_) => ToolKind::EditSection,
            ToolRequest::SourceIngest(_) => ToolKind::SourceIngest,
        }
    }

    fn validate(&self) -> Result<(), ScriptoriumError> {
        match self {
            ToolRequest::ReadContentList(args) => non_zero("limit", args.limit),
            ToolRequest::ReadSourceList(args) => non_zero("limit", args.limit),
            ToolRequest::ReadContent(args) => non_blank("content_id", &args.content_id),
            ToolRequest::ReadSection(args) => {
                non_blank("content_id", &args.content_id)?;
                non_blank("section_id", &args.section_id)
            }
            ToolRequest::ReadSource(args) => non_blank("source_id", &args.source_id),
            ToolRequest::ReadWorkspaceSummary(_) => Ok(()),
            ToolRequest::ContentWrite(args) => {
                if let Some(id) = &args.content_id {
                    non_blank("content_id", id)?;
                }
                non_blank("title", &args.title)
            }
            ToolRequest::EditSection(args) => {
                non_blank("content_id", &args.content_id)?;
                non_blank("section_id", &args.section_id)?;
                match (&args.operation, args.text.as_deref()) {
                    (SectionOperation::Delete, _) => Ok(()),
                    (_, Some(text)) if !text.trim().is_empty() => Ok(()),
                    _ => Err(ScriptoriumError::InvalidArgument(
                        "text is required for replace and append".to_string(),
                    )),
                }
            }
            ToolRequest::SourceIngest(args) => {
                let has_url = args.url.as_deref().is_some_and(|u| !u.trim().is_empty());
                let has_text = args.text.as_deref().is_some_and(|t| !t.trim().is_empty());
                if has_url == has_text {
                    return Err(ScriptoriumError::InvalidArgument(
                        "exactly one of url or text is required".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn non_blank(field: &str, value: &str) -> Result<(), ScriptoriumError> {
    if value.trim().is_empty() {
        return Err(ScriptoriumError::InvalidArgument(format!("{field} must not be empty")));
    }
    Ok(())
}

fn non_zero(field: &str, value: Option<u32>) -> Result<(), ScriptoriumError> {
    if value == Some(0) {
        return Err(ScriptoriumError::InvalidArgument(format!("{field} must be at least 1")));
    }
    Ok(())
}

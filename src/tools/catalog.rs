//! The fixed set of workspace tools the assistant may call.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::types::ToolParameters;
use crate::provider::ToolDefinition;

/// Whether a tool only inspects the workspace or changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFamily {
    Read,
    Write,
}

/// Every tool known to the orchestrator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolKind {
    ReadContentList,
    ReadContent,
    ReadSection,
    ReadSourceList,
    ReadSource,
    ReadWorkspaceSummary,
    ContentWrite,
    EditSection,
    SourceIngest,
}

const CONTENT_STATUSES: [&str; 3] = ["draft", "published", "archived"];
const SECTION_OPERATIONS: [&str; 3] = ["replace", "append", "delete"];

impl ToolKind {
    pub const ALL: [ToolKind; 9] = [
        ToolKind::ReadContentList,
        ToolKind::ReadContent,
        ToolKind::ReadSection,
        ToolKind::ReadSourceList,
        ToolKind::ReadSource,
        ToolKind::ReadWorkspaceSummary,
        ToolKind::ContentWrite,
        ToolKind::EditSection,
        ToolKind::SourceIngest,
    ];

    /// Look up a tool by the name the model uses.
    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    pub fn name(&self) -> &str {
        self.as_ref()
    }

    pub fn family(&self) -> ToolFamily {
        match self {
            ToolKind::ContentWrite | ToolKind::EditSection | ToolKind::SourceIngest => {
                ToolFamily::Write
            }
            _ => ToolFamily::Read,
        }
    }

    /// Read tools have no side effects and may run concurrently.
    pub fn is_parallel_safe(&self) -> bool {
        self.family() == ToolFamily::Read
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::ReadContentList => {
                "List the articles and drafts in the workspace, optionally filtered by status."
            }
            ToolKind::ReadContent => "Read one piece of content with all of its sections.",
            ToolKind::ReadSection => "Read a single section of a piece of content.",
            ToolKind::ReadSourceList => "List the sources that have been ingested into the workspace.",
            ToolKind::ReadSource => "Read the text of an ingested source.",
            ToolKind::ReadWorkspaceSummary => {
                "Summarize the workspace: content counts by status and the number of sources."
            }
            ToolKind::ContentWrite => {
                "Create a new piece of content, or overwrite an existing one when content_id is given. Use '## ' headings to split the body into sections."
            }
            ToolKind::EditSection => "Replace, append to, or delete one section of a piece of content.",
            ToolKind::SourceIngest => {
                "Ingest a new source into the workspace from a URL or from pasted text."
            }
        }
    }

    pub fn parameters(&self) -> ToolParameters {
        match self {
            ToolKind::ReadContentList => ToolParameters::object()
                .string_enum("status", "Only list content with this status", &CONTENT_STATUSES, false)
                .positive_integer("limit", "Maximum number of items to return", false)
                .build(),
            ToolKind::ReadContent => ToolParameters::object()
                .string("content_id", "Id of the content to read", true)
                .build(),
            ToolKind::ReadSection => ToolParameters::object()
                .string("content_id", "Id of the content", true)
                .string("section_id", "Id of the section within the content", true)
                .build(),
            ToolKind::ReadSourceList => ToolParameters::object()
                .positive_integer("limit", "Maximum number of sources to return", false)
                .build(),
            ToolKind::ReadSource => ToolParameters::object()
                .string("source_id", "Id of the source to read", true)
                .build(),
            ToolKind::ReadWorkspaceSummary => ToolParameters::empty(),
            ToolKind::ContentWrite => ToolParameters::object()
                .string("content_id", "Existing content to overwrite; omit to create new content", false)
                .string("title", "Title of the content", true)
                .string("body", "Full markdown body", true)
                .string("source_content_id", "Source this content was drafted from", false)
                .build(),
            ToolKind::EditSection => ToolParameters::object()
                .string("content_id", "Id of the content", true)
                .string("section_id", "Id of the section to change", true)
                .string_enum("operation", "Kind of edit", &SECTION_OPERATIONS, true)
                .string("text", "New text for replace or append", false)
                .build(),
            ToolKind::SourceIngest => ToolParameters::object()
                .string("url", "URL to ingest", false)
                .string("text", "Raw text to ingest", false)
                .string("title", "Optional title for the source", false)
                .build(),
        }
    }

    /// Definition advertised to the model endpoint.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().schema,
        }
    }
}

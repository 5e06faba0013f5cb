//! In-memory content workspace implementing every catalog tool.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agent_loop::context::ToolContext;
use crate::agent_loop::executor::{ProgressReporter, ToolHandler};
use crate::error::ScriptoriumError;
use crate::tools::{
    ContentStatus, ContentWriteArgs, EditSectionArgs, SectionOperation, SourceIngestArgs,
    ToolInvocation, ToolOutput, ToolRequest,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub heading: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    pub status: ContentStatus,
    pub sections: Vec<Section>,
    pub source_content_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    pub text: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct WorkspaceState {
    contents: BTreeMap<String, ContentItem>,
    sources: BTreeMap<String, SourceItem>,
}

/// Workspace held in memory. Ids are assigned sequentially.
#[derive(Debug, Default)]
pub struct InMemoryWorkspace {
    state: Mutex<WorkspaceState>,
    next_id: AtomicU64,
}

impl InMemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workspace with a small set of drafts and one source.
    pub fn seeded() -> Self {
        let workspace = Self::new();
        workspace.insert_content(
            "Launch notes",
            ContentStatus::Draft,
            "## Intro\nWe are shipping the new editor.\n\n## Details\nIt autosaves every draft.",
        );
        workspace.insert_content(
            "Quarterly update",
            ContentStatus::Published,
            "## Summary\nRevenue grew and churn fell.",
        );
        workspace.insert_source(
            "Editor RFC",
            Some("https://example.com/rfc".to_string()),
            "Autosave runs every ten seconds.",
        );
        workspace
    }

    pub fn insert_content(&self, title: &str, status: ContentStatus, body: &str) -> String {
        let id = self.next("content");
        let item = ContentItem {
            id: id.clone(),
            title: title.to_string(),
            status,
            sections: split_sections(&id, body),
            source_content_id: None,
            updated_at: Utc::now(),
        };
        self.lock().contents.insert(id.clone(), item);
        id
    }

    pub fn insert_source(&self, title: &str, url: Option<String>, text: &str) -> String {
        let id = self.next("source");
        let source = SourceItem {
            id: id.clone(),
            title: title.to_string(),
            url,
            text: text.to_string(),
            ingested_at: Utc::now(),
        };
        self.lock().sources.insert(id.clone(), source);
        id
    }

    pub fn content(&self, id: &str) -> Option<ContentItem> {
        self.lock().contents.get(id).cloned()
    }

    pub fn source(&self, id: &str) -> Option<SourceItem> {
        self.lock().sources.get(id).cloned()
    }

    fn next(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WorkspaceState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_content(&self, tool: &str, args: &ContentWriteArgs) -> Result<ToolOutput, ScriptoriumError> {
        let mut state = self.lock();
        if let Some(source_id) = &args.source_content_id {
            if !state.sources.contains_key(source_id) {
                return Err(ScriptoriumError::tool_failed(tool, format!("Source {source_id} not found")));
            }
        }

        let id = match &args.content_id {
            Some(id) if !state.contents.contains_key(id) => {
                return Err(ScriptoriumError::tool_failed(tool, format!("Content {id} not found")));
            }
            Some(id) => id.clone(),
            None => self.next("content"),
        };
        let status = state
            .contents
            .get(&id)
            .map(|c| c.status)
            .unwrap_or(ContentStatus::Draft);
        let item = ContentItem {
            id: id.clone(),
            title: args.title.clone(),
            status,
            sections: split_sections(&id, &args.body),
            source_content_id: args.source_content_id.clone(),
            updated_at: Utc::now(),
        };
        let sections: Vec<&str> = item.sections.iter().map(|s| s.id.as_str()).collect();
        let result = json!({ "contentId": id, "title": item.title, "sections": sections });
        state.contents.insert(id.clone(), item);

        let mut output = ToolOutput::new(result).with_content_id(id);
        if let Some(source_id) = &args.source_content_id {
            output = output.with_source_content_id(source_id.clone());
        }
        Ok(output)
    }

    fn edit_section(&self, tool: &str, args: &EditSectionArgs) -> Result<ToolOutput, ScriptoriumError> {
        let mut state = self.lock();
        let item = state.contents.get_mut(&args.content_id).ok_or_else(|| {
            ScriptoriumError::tool_failed(tool, format!("Content {} not found", args.content_id))
        })?;
        let position = item
            .sections
            .iter()
            .position(|s| s.id == args.section_id)
            .ok_or_else(|| {
                ScriptoriumError::tool_failed(tool, format!("Section {} not found", args.section_id))
            })?;
        let text = args.text.clone().unwrap_or_default();
        match args.operation {
            SectionOperation::Replace => item.sections[position].text = text,
            SectionOperation::Append => {
                let section = &mut item.sections[position];
                if !section.text.is_empty() {
                    section.text.push('\n');
                }
                section.text.push_str(&text);
            }
            SectionOperation::Delete => {
                item.sections.remove(position);
            }
        }
        item.updated_at = Utc::now();
        Ok(ToolOutput::new(json!({
            "contentId": item.id,
            "sectionId": args.section_id,
            "sections": item.sections.len(),
        }))
        .with_content_id(item.id.clone()))
    }

    fn ingest(&self, args: &SourceIngestArgs) -> ToolOutput {
        let title = args
            .title
            .clone()
            .or_else(|| args.url.clone())
            .unwrap_or_else(|| "Pasted text".to_string());
        let id = self.insert_source(&title, args.url.clone(), args.text.as_deref().unwrap_or(""));
        ToolOutput::new(json!({ "sourceId": id, "title": title })).with_source_content_id(id)
    }
}

#[async_trait]
impl ToolHandler for InMemoryWorkspace {
    async fn handle(
        &self,
        invocation: &ToolInvocation,
        _ctx: &ToolContext,
        progress: &ProgressReporter,
    ) -> Result<ToolOutput, ScriptoriumError> {
        let tool = invocation.name.as_str();
        match &invocation.request {
            ToolRequest::ReadContentList(args) => {
                progress.report("Listing content");
                let state = self.lock();
                let items: Vec<serde_json::Value> = state
                    .contents
                    .values()
                    .filter(|c| args.status.map_or(true, |s| c.status == s))
                    .take(args.limit.unwrap_or(u32::MAX) as usize)
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "title": c.title,
                            "status": c.status,
                            "sections": c.sections.len(),
                        })
                    })
                    .collect();
                Ok(ToolOutput::new(json!({ "items": items })))
            }
            ToolRequest::ReadContent(args) => {
                let item = self.content(&args.content_id).ok_or_else(|| {
                    ScriptoriumError::tool_failed(tool, format!("Content {} not found", args.content_id))
                })?;
                Ok(ToolOutput::new(serde_json::to_value(&item)?).with_content_id(item.id))
            }
            ToolRequest::ReadSection(args) => {
                let item = self.content(&args.content_id).ok_or_else(|| {
                    ScriptoriumError::tool_failed(tool, format!("Content {} not found", args.content_id))
                })?;
                let section = item
                    .sections
                    .iter()
                    .find(|s| s.id == args.section_id)
                    .ok_or_else(|| {
                        ScriptoriumError::tool_failed(tool, format!("Section {} not found", args.section_id))
                    })?;
                Ok(ToolOutput::new(serde_json::to_value(section)?).with_content_id(item.id.clone()))
            }
            ToolRequest::ReadSourceList(args) => {
                let state = self.lock();
                let sources: Vec<serde_json::Value> = state
                    .sources
                    .values()
                    .take(args.limit.unwrap_or(u32::MAX) as usize)
                    .map(|s| json!({ "id": s.id, "title": s.title, "url": s.url }))
                    .collect();
                Ok(ToolOutput::new(json!({ "sources": sources })))
            }
            ToolRequest::ReadSource(args) => {
                let source = self.source(&args.source_id).ok_or_else(|| {
                    ScriptoriumError::tool_failed(tool, format!("Source {} not found", args.source_id))
                })?;
                Ok(ToolOutput::new(serde_json::to_value(&source)?).with_source_content_id(source.id))
            }
            ToolRequest::ReadWorkspaceSummary(_) => {
                let state = self.lock();
                let count = |status: ContentStatus| {
                    state.contents.values().filter(|c| c.status == status).count()
                };
                Ok(ToolOutput::new(json!({
                    "drafts": count(ContentStatus::Draft),
                    "published": count(ContentStatus::Published),
                    "archived": count(ContentStatus::Archived),
                    "sources": state.sources.len(),
                })))
            }
            ToolRequest::ContentWrite(args) => {
                progress.report("Saving draft");
                self.write_content(tool, args)
            }
            ToolRequest::EditSection(args) => {
                progress.report("Editing section");
                self.edit_section(tool, args)
            }
            ToolRequest::SourceIngest(args) => {
                progress.report("Ingesting source");
                Ok(self.ingest(args))
            }
        }
    }
}

/// Split a markdown body into sections on `## ` headings.
fn split_sections(content_id: &str, body: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    for line in body.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            sections.push(Section {
                id: format!("{content_id}-s{}", sections.len() + 1),
                heading: heading.trim().to_string(),
                text: String::new(),
            });
            continue;
        }
        if sections.is_empty() {
            if line.trim().is_empty() {
                continue;
            }
            sections.push(Section {
                id: format!("{content_id}-s1"),
                heading: String::new(),
                text: String::new(),
            });
        }
        if let Some(section) = sections.last_mut() {
            if !section.text.is_empty() {
                section.text.push('\n');
            }
            section.text.push_str(line);
        }
    }
    for section in &mut sections {
        section.text = section.text.trim().to_string();
    }
    sections
}

//! Reassembly of streamed tool-call fragments into invocations.

use std::collections::{BTreeMap, HashSet};

use tracing::warn;

use crate::tools::{ToolInvocation, ToolRequest};
use crate::types::ToolCallDelta;

/// A tool call that was detected but is not yet complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preparing {
    pub index: usize,
    pub tool_call_id: String,
    pub tool_name: String,
}

/// A tool call dropped at assembly time. Never executed.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedToolCall {
    pub index: usize,
    pub tool_call_id: Option<String>,
    pub tool_name: String,
    pub reason: String,
}

/// Result of closing the assembler at the end of a pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembly {
    /// Valid invocations in ascending index order.
    pub invocations: Vec<ToolInvocation>,
    pub malformed: Vec<MalformedToolCall>,
    /// Calls that were never announced while streaming.
    pub late_preparing: Vec<Preparing>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
    announced: bool,
}

/// Accumulates tool-call deltas per provider index for one pass.
#[derive(Debug)]
pub struct ToolCallAssembler {
    pass_index: usize,
    partials: BTreeMap<usize, PartialToolCall>,
}

impl ToolCallAssembler {
    pub fn new(pass_index: usize) -> Self {
        Self {
            pass_index,
            partials: BTreeMap::new(),
        }
    }

    /// Apply one delta.
    ///
    /// Returns the announcement for the call the first time its name is known
    /// and its argument stream has begun. The id is locked at that point.
    pub fn apply(&mut self, delta: ToolCallDelta) -> Option<Preparing> {
        let pass_index = self.pass_index;
        let partial = self.partials.entry(delta.index).or_default();

        if let Some(id) = delta.id {
            match &partial.id {
                None if !partial.announced => partial.id = Some(id),
                Some(locked) if *locked != id => {
                    warn!(index = delta.index, locked = %locked, ignored = %id, "tool call id changed mid-stream");
                }
                _ => {}
            }
        }
        if let Some(name) = delta.name_part {
            partial.name.push_str(&name);
        }
        let args_started = delta.arguments_part.is_some();
        if let Some(arguments) = delta.arguments_part {
            partial.arguments.push_str(&arguments);
        }

        if !partial.announced && args_started && !partial.name.is_empty() {
            return Some(announce(pass_index, delta.index, partial));
        }
        None
    }

    /// Whether any tool-call deltas have been seen this pass.
    pub fn has_pending(&self) -> bool {
        !self.partials.is_empty()
    }

    /// Close the pass: validate every partial call in ascending index order.
    pub fn finish(self) -> Assembly {
        let mut assembly = Assembly::default();
        let mut seen_ids = HashSet::new();

        for (index, mut partial) in self.partials {
            let name = partial.name.trim().to_string();
            if name.is_empty() {
                drop_malformed(&mut assembly, index, partial.id, name, "missing tool name");
                continue;
            }

            let raw = partial.arguments.trim();
            let arguments = if raw.is_empty() {
                serde_json::Value::Object(serde_json::Map::new())
            } else {
                match serde_json::from_str::<serde_json::Value>(raw) {
                    Ok(value) => value,
                    Err(err) => {
                        let reason = format!("arguments are not valid JSON: {err}");
                        drop_malformed(&mut assembly, index, partial.id, name, &reason);
                        continue;
                    }
                }
            };

            let request = match ToolRequest::parse(&name, &arguments) {
                Ok(request) => request,
                Err(err) => {
                    drop_malformed(&mut assembly, index, partial.id, name, &err.to_string());
                    continue;
                }
            };

            let late = if partial.announced {
                None
            } else {
                Some(announce(self.pass_index, index, &mut partial))
            };
            let id = partial
                .id
                .clone()
                .unwrap_or_else(|| synthesized_id(self.pass_index, index));

            if !seen_ids.insert(id.clone()) {
                drop_malformed(&mut assembly, index, Some(id), name, "duplicate tool call id");
                continue;
            }

            if let Some(late) = late {
                assembly.late_preparing.push(late);
            }
            assembly.invocations.push(ToolInvocation {
                index,
                id,
                name,
                arguments,
                request,
            });
        }

        assembly
    }
}

fn synthesized_id(pass_index: usize, index: usize) -> String {
    format!("call_{pass_index}_{index}")
}

fn announce(pass_index: usize, index: usize, partial: &mut PartialToolCall) -> Preparing {
    partial.announced = true;
    let id = partial
        .id
        .get_or_insert_with(|| synthesized_id(pass_index, index))
        .clone();
    Preparing {
        index,
        tool_call_id: id,
        tool_name: partial.name.clone(),
    }
}

fn drop_malformed(
    assembly: &mut Assembly,
    index: usize,
    tool_call_id: Option<String>,
    tool_name: String,
    reason: &str,
) {
    warn!(
        index,
        tool_call_id = tool_call_id.as_deref().unwrap_or(""),
        tool_name = tool_name.as_str(),
        reason,
        "dropping malformed tool call"
    );
    assembly.malformed.push(MalformedToolCall {
        index,
        tool_call_id,
        tool_name,
        reason: reason.to_string(),
    });
}

//! Per-turn input and the context threaded into tool handlers.

use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ScriptoriumError;
use crate::types::{ChatMessage, Mode};
use crate::util::timeout::timeout_or_none;

pub const DEFAULT_MAX_PASSES: usize = 8;

/// Input of one turn. Only `new_messages` of the outcome are appended to it.
#[derive(Debug, Clone, Builder)]
pub struct AgentContext {
    #[builder(into)]
    pub conversation_id: String,
    pub mode: Mode,
    /// The message that starts this turn.
    #[builder(into)]
    pub user_message: String,
    /// Prior conversation, oldest first.
    #[builder(default)]
    pub history: Vec<ChatMessage>,
    /// Extra context sent ahead of the conversation, in order.
    #[builder(default)]
    pub context_blocks: Vec<String>,
    #[builder(default = DEFAULT_MAX_PASSES)]
    pub max_passes: usize,
    #[builder(into)]
    pub system_prompt: Option<String>,
}

impl AgentContext {
    /// Messages sent on the first pass.
    pub fn initial_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + self.context_blocks.len() + 2);
        if let Some(prompt) = self.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            messages.push(ChatMessage::system(prompt));
        }
        for block in &self.context_blocks {
            messages.push(ChatMessage::system(block.clone()));
        }
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(self.user_message.clone()));
        messages
    }
}

/// Caller identity resolved for a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

/// Resolves the caller's identity. Owned by the calling layer.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, conversation_id: &str) -> Result<Option<Identity>, ScriptoriumError>;
}

/// Resolve identity, treating a timeout or failure as unknown.
pub async fn resolve_identity(
    resolver: &dyn IdentityResolver,
    conversation_id: &str,
    timeout: Duration,
) -> Option<Identity> {
    timeout_or_none("identity", timeout, resolver.resolve(conversation_id)).await
}

/// Context handed to every tool handler call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolContext {
    pub conversation_id: String,
    pub mode: Mode,
    pub identity: Option<Identity>,
}

impl ToolContext {
    pub fn new(conversation_id: impl Into<String>, mode: Mode) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            mode,
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: Option<Identity>) -> Self {
        self.identity = identity;
        self
    }
}

//! Optional clarification stage run before the first pass.

use async_trait::async_trait;
use regex::Regex;

use crate::error::ScriptoriumError;

use super::context::AgentContext;

/// Decides whether a turn needs a clarifying question before planning.
///
/// `Ok(Some(question))` ends the turn with the question as the final message.
#[async_trait]
pub trait ClarificationStage: Send + Sync {
    async fn clarify(&self, ctx: &AgentContext) -> Result<Option<String>, ScriptoriumError>;
}

const EDIT_INTENT: &str =
    r"(?i)\b(edit|rewrite|delete|remove|update|change|revise|shorten|expand|fix|replace)\b";
const TARGET: &str = concat!(
    r#"(?i)("[^"]+"|'[^']+'|“[^”]+”"#,
    r"|\b(section|article|post|draft|paragraph|chapter|intro|introduction|conclusion|title|headline|source|piece)\s+\S+",
    r"|\b[a-z0-9]+[-_][a-z0-9_-]+\b",
    r"|#\d+)",
);

pub const DEFAULT_TARGET_QUESTION: &str =
    "Which piece of content should I change? Tell me its title or ID, and the section if it is a specific part.";

/// Asks for a target when an edit request names no content.
#[derive(Debug, Clone)]
pub struct GapDetector {
    edit_intent: Regex,
    target: Regex,
    question: String,
}

impl GapDetector {
    pub fn new() -> Result<Self, ScriptoriumError> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| ScriptoriumError::Configuration(format!("invalid gap pattern: {e}")))
        };
        Ok(Self {
            edit_intent: compile(EDIT_INTENT)?,
            target: compile(TARGET)?,
            question: DEFAULT_TARGET_QUESTION.to_string(),
        })
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = question.into();
        self
    }

    /// The question to ask for `message`, if the request has a gap.
    pub fn detect(&self, message: &str) -> Option<&str> {
        if self.edit_intent.is_match(message) && !self.target.is_match(message) {
            Some(self.question.as_str())
        } else {
            None
        }
    }
}

#[async_trait]
impl ClarificationStage for GapDetector {
    async fn clarify(&self, ctx: &AgentContext) -> Result<Option<String>, ScriptoriumError> {
        Ok(self.detect(&ctx.user_message).map(str::to_string))
    }
}

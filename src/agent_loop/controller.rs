//! Multi-pass turn loop.
//!
//! One pass is one endpoint request plus a full decode of its response.
//! Passes repeat while the model asks for tools, up to `max_passes`.

use std::sync::Arc;
use std::time::Duration;

use futures::{future, StreamExt};
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ScriptoriumConfig;
use crate::error::ScriptoriumError;
use crate::gate::ModeGate;
use crate::provider::{EndpointRequest, ModelEndpoint, ToolDefinition};
use crate::stream::{decode_stream, ToolCallAssembler};
use crate::tools::{ToolExecutionResult, ToolInvocation};
use crate::types::{ChatMessage, FinishReason, GenerationSettings, StreamChunk, ToolChoice};

use super::background::{persist_in_background, BackgroundQueue, ConversationStore};
use super::clarify::ClarificationStage;
use super::context::{resolve_identity, AgentContext, IdentityResolver, ToolContext};
use super::events::{EventEmitter, SequencedEvent, TurnEvent};
use super::executor::{ExecutionObserver, ToolExecutor};

pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "I wasn't able to finish that request. Please try rephrasing it or breaking it into smaller steps.";
const CANCELED_MESSAGE: &str = "canceled";

/// Controller-wide settings. Per-turn input lives in [`AgentContext`].
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub generation: GenerationSettings,
    pub tool_choice: ToolChoice,
    /// Dispatch consecutive read tools concurrently.
    pub parallel_tool_calls: bool,
    /// Longest wait for the next stream chunk before the turn fails.
    pub stream_idle_timeout: Duration,
    pub identity_timeout: Duration,
    pub fallback_message: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            generation: GenerationSettings::default(),
            tool_choice: ToolChoice::Auto,
            parallel_tool_calls: true,
            stream_idle_timeout: Duration::from_secs(120),
            identity_timeout: Duration::from_secs(2),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
        }
    }
}

impl ControllerSettings {
    pub fn from_config(config: &ScriptoriumConfig) -> Self {
        let agent = &config.agent;
        Self {
            generation: GenerationSettings {
                max_tokens: agent.max_tokens,
                temperature: agent.temperature,
                ..GenerationSettings::default()
            },
            tool_choice: ToolChoice::Auto,
            parallel_tool_calls: agent.parallel_tool_calls,
            stream_idle_timeout: Duration::from_millis(agent.stream_idle_timeout_ms),
            identity_timeout: Duration::from_millis(agent.identity_timeout_ms),
            fallback_message: agent.fallback_message.clone(),
        }
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    BudgetExhausted,
    NeedsClarification,
    Failed,
    Canceled,
}

/// A tool call that was dispatched (or denied) during the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedToolCall {
    pub pass_index: usize,
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: ToolExecutionResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub message_id: String,
    /// Final assistant text, or the user-facing error for failed turns.
    pub message: String,
    pub status: TurnStatus,
    /// Endpoint requests made.
    pub passes: usize,
    /// Messages to append to the conversation, starting with the user message.
    pub new_messages: Vec<ChatMessage>,
    pub tool_results: Vec<CompletedToolCall>,
    /// Underlying error for failed turns.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
enum Phase {
    Idle,
    Streaming,
    Assembling,
    Executing,
    Finalizing,
    Done,
}

/// Why a turn stopped early.
enum Abort {
    Endpoint(ScriptoriumError),
    Canceled,
}

/// State of one pass. Discarded once its results are folded.
struct PassState {
    pass_index: usize,
    accumulated_text: String,
    pending_tool_calls: ToolCallAssembler,
    finish: Option<FinishReason>,
}

impl PassState {
    fn new(pass_index: usize) -> Self {
        Self {
            pass_index,
            accumulated_text: String::new(),
            pending_tool_calls: ToolCallAssembler::new(pass_index),
            finish: None,
        }
    }

    /// An explicit finish reason decides. A stream that ends without one asks for
    /// tools iff deltas arrived.
    fn wants_tools(&self) -> bool {
        match self.finish {
            Some(finish) => finish.requests_tools(),
            None => self.pending_tool_calls.has_pending(),
        }
    }
}

/// Turn-wide mutable state. Owned by exactly one running turn.
struct TurnState {
    message_id: String,
    phase: Phase,
    messages: Vec<ChatMessage>,
    new_messages: Vec<ChatMessage>,
    tool_results: Vec<CompletedToolCall>,
    passes: usize,
    best_text: Option<String>,
}

impl TurnState {
    fn enter(&mut self, next: Phase) {
        debug!(from = %self.phase, to = %next, pass = self.passes, "turn phase");
        self.phase = next;
    }
}

/// A turn running on its own task.
pub struct TurnHandle {
    events: Option<mpsc::UnboundedReceiver<SequencedEvent>>,
    cancel: CancellationToken,
    task: JoinHandle<TurnOutcome>,
}

impl TurnHandle {
    /// Take the ordered event stream. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SequencedEvent>> {
        self.events.take()
    }

    /// Stop the turn at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<TurnOutcome, ScriptoriumError> {
        self.task
            .await
            .map_err(|e| ScriptoriumError::Stream(format!("turn task failed: {e}")))
    }
}

/// Runs turns against one endpoint and one tool executor.
pub struct PassController {
    endpoint: Arc<dyn ModelEndpoint>,
    executor: Arc<ToolExecutor>,
    settings: ControllerSettings,
    clarifier: Option<Arc<dyn ClarificationStage>>,
    identity: Option<Arc<dyn IdentityResolver>>,
    persistence: Option<(Arc<dyn ConversationStore>, BackgroundQueue)>,
}

impl PassController {
    pub fn new(endpoint: Arc<dyn ModelEndpoint>, executor: Arc<ToolExecutor>) -> Self {
        Self {
            endpoint,
            executor,
            settings: ControllerSettings::default(),
            clarifier: None,
            identity: None,
            persistence: None,
        }
    }

    pub fn with_settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_clarifier(mut self, stage: Arc<dyn ClarificationStage>) -> Self {
        self.clarifier = Some(stage);
        self
    }

    pub fn with_identity_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.identity = Some(resolver);
        self
    }

    /// Persist the user message and final answer through `queue`.
    pub fn with_persistence(mut self, store: Arc<dyn ConversationStore>, queue: BackgroundQueue) -> Self {
        self.persistence = Some((store, queue));
        self
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Spawn a turn and return a handle to its events and outcome.
    pub fn start_turn(self: &Arc<Self>, ctx: AgentContext) -> TurnHandle {
        let (emitter, rx) = EventEmitter::channel();
        let cancel = CancellationToken::new();
        let controller = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            controller.run_turn_with_cancel(ctx, &emitter, token).await
        });
        TurnHandle {
            events: Some(rx),
            cancel,
            task,
        }
    }

    pub async fn run_turn(&self, ctx: AgentContext, emitter: &EventEmitter) -> TurnOutcome {
        self.run_turn_with_cancel(ctx, emitter, CancellationToken::new())
            .await
    }

    /// Run one turn to completion. Always ends the event stream with `done`.
    pub async fn run_turn_with_cancel(
        &self,
        ctx: AgentContext,
        emitter: &EventEmitter,
        cancel: CancellationToken,
    ) -> TurnOutcome {
        let user_message = ChatMessage::user(ctx.user_message.clone());
        let mut state = TurnState {
            message_id: uuid::Uuid::new_v4().to_string(),
            phase: Phase::Idle,
            messages: ctx.initial_messages(),
            new_messages: vec![user_message.clone()],
            tool_results: Vec::new(),
            passes: 0,
            best_text: None,
        };
        info!(
            conversation_id = %ctx.conversation_id,
            mode = %ctx.mode,
            max_passes = ctx.max_passes,
            message_id = %state.message_id,
            "turn started"
        );
        self.persist(&ctx.conversation_id, user_message);

        if let Some(question) = self.clarify(&ctx, &cancel).await {
            return self.finalize(&ctx, state, question, TurnStatus::NeedsClarification, emitter);
        }

        let identity = match &self.identity {
            Some(resolver) => tokio::select! {
                _ = cancel.cancelled() => None,
                identity = resolve_identity(resolver.as_ref(), &ctx.conversation_id, self.settings.identity_timeout) => identity,
            },
            None => None,
        };
        let tool_ctx = ToolContext::new(ctx.conversation_id.clone(), ctx.mode).with_identity(identity);
        let tools = ModeGate::definitions(ctx.mode);

        for pass_index in 0..ctx.max_passes {
            let streamed = self
                .run_pass(pass_index, &mut state, &tools, emitter, &cancel)
                .await;
            let pass = match streamed {
                Ok(pass) => pass,
                Err(abort) => return self.abort(state, abort, emitter),
            };
            state.passes += 1;
            if !pass.accumulated_text.trim().is_empty() {
                state.best_text = Some(pass.accumulated_text.clone());
            }

            if !pass.wants_tools() {
                let text = self.best_text(&state, &pass.accumulated_text);
                return self.finalize(&ctx, state, text, TurnStatus::Completed, emitter);
            }

            state.enter(Phase::Assembling);
            let assembly = pass.pending_tool_calls.finish();
            if assembly.invocations.is_empty() {
                debug!(
                    pass = pass_index,
                    malformed = assembly.malformed.len(),
                    "no valid tool calls; finalizing"
                );
                let text = self.best_text(&state, &pass.accumulated_text);
                return self.finalize(&ctx, state, text, TurnStatus::Completed, emitter);
            }
            for late in &assembly.late_preparing {
                emitter.emit(TurnEvent::ToolPreparing {
                    tool_call_id: late.tool_call_id.clone(),
                    tool_name: late.tool_name.clone(),
                });
            }

            let assistant = ChatMessage::assistant_with_tool_calls(
                pass.accumulated_text.clone(),
                assembly.invocations.iter().map(ToolInvocation::record).collect(),
            );
            state.messages.push(assistant.clone());
            state.new_messages.push(assistant);

            state.enter(Phase::Executing);
            let executed = self
                .execute_invocations(&assembly.invocations, &tool_ctx, emitter, &cancel)
                .await;
            let results = match executed {
                Ok(results) => results,
                Err(abort) => return self.abort(state, abort, emitter),
            };

            for (invocation, result) in assembly.invocations.iter().zip(results) {
                let message = ChatMessage::tool_result(invocation.id.clone(), result.to_model_content());
                state.messages.push(message.clone());
                state.new_messages.push(message);
                state.tool_results.push(CompletedToolCall {
                    pass_index,
                    tool_call_id: invocation.id.clone(),
                    tool_name: invocation.name.clone(),
                    result,
                });
            }
        }

        warn!(
            conversation_id = %ctx.conversation_id,
            passes = state.passes,
            "pass budget exhausted"
        );
        let text = state
            .best_text
            .clone()
            .unwrap_or_else(|| self.settings.fallback_message.clone());
        self.finalize(&ctx, state, text, TurnStatus::BudgetExhausted, emitter)
    }

    async fn clarify(&self, ctx: &AgentContext, cancel: &CancellationToken) -> Option<String> {
        let stage = self.clarifier.as_ref()?;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return None,
            outcome = stage.clarify(ctx) => outcome,
        };
        match outcome {
            Ok(question) => question.filter(|q| !q.trim().is_empty()),
            Err(err) => {
                warn!(error = %err, "clarification stage failed; continuing");
                None
            }
        }
    }

    async fn run_pass(
        &self,
        pass_index: usize,
        state: &mut TurnState,
        tools: &[ToolDefinition],
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<PassState, Abort> {
        state.enter(Phase::Streaming);
        emitter.begin_pass();
        let mut generation = self.settings.generation.clone();
        generation.parallel_tool_calls = Some(self.settings.parallel_tool_calls);
        let request = EndpointRequest {
            messages: state.messages.clone(),
            tools: tools.to_vec(),
            tool_choice: self.settings.tool_choice,
            settings: generation,
        };
        debug!(
            pass = pass_index,
            endpoint = self.endpoint.name(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "opening stream"
        );

        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Abort::Canceled),
            opened = self.endpoint.open_stream(&request) => opened.map_err(Abort::Endpoint)?,
        };
        let mut chunks = decode_stream(bytes);
        let mut pass = PassState::new(pass_index);
        let idle = self.settings.stream_idle_timeout;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Abort::Canceled),
                next = tokio::time::timeout(idle, chunks.next()) => next,
            };
            let chunk = match next {
                Err(_) => {
                    return Err(Abort::Endpoint(ScriptoriumError::Timeout(
                        idle.as_millis() as u64,
                    )))
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => return Err(Abort::Endpoint(err)),
                Ok(Some(Ok(chunk))) => chunk,
            };

            match chunk {
                StreamChunk::TextDelta { content } => {
                    pass.accumulated_text.push_str(&content);
                    emitter.emit(TurnEvent::MessageChunk {
                        message_id: state.message_id.clone(),
                        chunk: content,
                    });
                }
                StreamChunk::ToolCallDelta(delta) => {
                    if let Some(preparing) = pass.pending_tool_calls.apply(delta) {
                        emitter.emit(TurnEvent::ToolPreparing {
                            tool_call_id: preparing.tool_call_id,
                            tool_name: preparing.tool_name,
                        });
                    }
                }
                StreamChunk::FinishSignal { reason } => {
                    pass.finish = Some(reason);
                    break;
                }
            }
        }

        debug!(
            pass = pass.pass_index,
            finish = ?pass.finish,
            text_len = pass.accumulated_text.len(),
            tool_calls = pass.pending_tool_calls.has_pending(),
            "pass streamed"
        );
        Ok(pass)
    }

    /// Gate and dispatch a pass's invocations. Results are in invocation order.
    async fn execute_invocations(
        &self,
        invocations: &[ToolInvocation],
        tool_ctx: &ToolContext,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolExecutionResult>, Abort> {
        let mut results: Vec<Option<ToolExecutionResult>> = vec![None; invocations.len()];
        let mut batch: Vec<usize> = Vec::new();

        for (slot, invocation) in invocations.iter().enumerate() {
            if !ModeGate::is_allowed(&invocation.name, tool_ctx.mode) {
                self.run_batch(&mut batch, invocations, &mut results, tool_ctx, emitter, cancel)
                    .await?;
                results[slot] = Some(self.deny(invocation, emitter));
                continue;
            }
            if self.settings.parallel_tool_calls && invocation.kind().is_parallel_safe() {
                batch.push(slot);
                continue;
            }
            self.run_batch(&mut batch, invocations, &mut results, tool_ctx, emitter, cancel)
                .await?;
            batch.push(slot);
            self.run_batch(&mut batch, invocations, &mut results, tool_ctx, emitter, cancel)
                .await?;
        }
        self.run_batch(&mut batch, invocations, &mut results, tool_ctx, emitter, cancel)
            .await?;

        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| ToolExecutionResult::failed("tool was not executed")))
            .collect())
    }

    async fn run_batch(
        &self,
        batch: &mut Vec<usize>,
        invocations: &[ToolInvocation],
        results: &mut [Option<ToolExecutionResult>],
        tool_ctx: &ToolContext,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<(), Abort> {
        if batch.is_empty() {
            return Ok(());
        }
        let slots = std::mem::take(batch);
        for &slot in &slots {
            let invocation = &invocations[slot];
            emitter.emit(TurnEvent::ToolStart {
                tool_call_id: invocation.id.clone(),
                tool_name: invocation.name.clone(),
            });
        }

        let observer: Arc<dyn ExecutionObserver> = Arc::new(emitter.clone());
        let executions = slots.iter().map(|&slot| {
            let invocation = &invocations[slot];
            let observer = observer.clone();
            async move {
                let result = self.executor.execute(invocation, tool_ctx, observer).await;
                emit_complete(emitter, invocation, &result);
                result
            }
        });

        let batch_results = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                for &slot in &slots {
                    emit_complete(
                        emitter,
                        &invocations[slot],
                        &ToolExecutionResult::failed(CANCELED_MESSAGE),
                    );
                }
                return Err(Abort::Canceled);
            }
            batch_results = future::join_all(executions) => batch_results,
        };

        for (slot, result) in slots.into_iter().zip(batch_results) {
            results[slot] = Some(result);
        }
        Ok(())
    }

    fn deny(&self, invocation: &ToolInvocation, emitter: &EventEmitter) -> ToolExecutionResult {
        let reason = ModeGate::denial_message(&invocation.name);
        info!(
            tool_call_id = %invocation.id,
            tool_name = %invocation.name,
            "tool denied in current mode"
        );
        emitter.emit(TurnEvent::ToolStart {
            tool_call_id: invocation.id.clone(),
            tool_name: invocation.name.clone(),
        });
        let result = ToolExecutionResult::failed(reason.clone());
        self.executor.log_denied(invocation, &reason);
        emit_complete(emitter, invocation, &result);
        result
    }

    fn best_text(&self, state: &TurnState, pass_text: &str) -> String {
        if !pass_text.trim().is_empty() {
            return pass_text.to_string();
        }
        state
            .best_text
            .clone()
            .unwrap_or_else(|| self.settings.fallback_message.clone())
    }

    fn finalize(
        &self,
        ctx: &AgentContext,
        mut state: TurnState,
        text: String,
        status: TurnStatus,
        emitter: &EventEmitter,
    ) -> TurnOutcome {
        state.enter(Phase::Finalizing);
        emitter.emit(TurnEvent::MessageComplete {
            message_id: state.message_id.clone(),
            message: text.clone(),
        });
        emitter.emit(TurnEvent::Done);

        let final_message = ChatMessage::assistant(text.clone());
        self.persist(&ctx.conversation_id, final_message.clone());
        state.new_messages.push(final_message);
        state.enter(Phase::Done);
        info!(status = %status, passes = state.passes, "turn finished");

        TurnOutcome {
            message_id: state.message_id,
            message: text,
            status,
            passes: state.passes,
            new_messages: state.new_messages,
            tool_results: state.tool_results,
            error: None,
        }
    }

    fn abort(&self, mut state: TurnState, abort: Abort, emitter: &EventEmitter) -> TurnOutcome {
        let (status, message, error) = match abort {
            Abort::Endpoint(err) => {
                warn!(
                    error = %err,
                    category = %err.category(),
                    passes = state.passes,
                    "endpoint failure ended the turn"
                );
                (TurnStatus::Failed, err.user_message(), Some(err.to_string()))
            }
            Abort::Canceled => {
                info!(passes = state.passes, "turn canceled");
                (
                    TurnStatus::Canceled,
                    CANCELED_MESSAGE.to_string(),
                    Some(ScriptoriumError::Canceled.to_string()),
                )
            }
        };
        emitter.emit(TurnEvent::Error {
            message: message.clone(),
        });
        emitter.emit(TurnEvent::Done);
        state.enter(Phase::Done);

        TurnOutcome {
            message_id: state.message_id,
            message,
            status,
            passes: state.passes,
            new_messages: state.new_messages,
            tool_results: state.tool_results,
            error,
        }
    }

    fn persist(&self, conversation_id: &str, message: ChatMessage) {
        if let Some((store, queue)) = &self.persistence {
            persist_in_background(queue, store.clone(), conversation_id, message);
        }
    }
}

fn emit_complete(emitter: &EventEmitter, invocation: &ToolInvocation, result: &ToolExecutionResult) {
    emitter.emit(TurnEvent::ToolComplete {
        tool_call_id: invocation.id.clone(),
        tool_name: invocation.name.clone(),
        success: result.success,
        result: result.result.clone(),
        error: result.error.clone(),
    });
}

//! Shared test helpers: a scripted endpoint and a scripted tool handler.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::json;

use scriptorium::agent_loop::{
    AgentContext, EventEmitter, PassController, ProgressReporter, SequencedEvent, ToolContext,
    ToolExecutor, ToolHandler, TurnOutcome,
};
use scriptorium::error::ScriptoriumError;
use scriptorium::provider::{ByteStream, EndpointRequest, ModelEndpoint};
use scriptorium::tools::{ToolInvocation, ToolOutput};
use scriptorium::types::Mode;
use scriptorium::util::retry::RetryPolicy;

/// One `data:` frame carrying a text delta.
pub fn text(content: &str) -> String {
    frame(json!({ "choices": [{ "index": 0, "delta": { "content": content } }] }))
}

/// One `data:` frame carrying a tool-call delta.
pub fn tool_delta(index: usize, id: Option<&str>, name: Option<&str>, arguments: &str) -> String {
    let mut function = json!({ "arguments": arguments });
    if let Some(name) = name {
        function["name"] = json!(name);
    }
    let mut call = json!({ "index": index, "type": "function", "function": function });
    if let Some(id) = id {
        call["id"] = json!(id);
    }
    frame(json!({ "choices": [{ "index": 0, "delta": { "tool_calls": [call] } }] }))
}

/// A complete tool call in one frame.
pub fn tool_call(index: usize, id: &str, name: &str, arguments: serde_json::Value) -> String {
    tool_delta(index, Some(id), Some(name), &arguments.to_string())
}

pub fn finish(reason: &str) -> String {
    frame(json!({ "choices": [{ "index": 0, "delta": {}, "finish_reason": reason }] }))
}

pub fn done() -> String {
    "data: [DONE]\n\n".to_string()
}

pub fn frame(value: serde_json::Value) -> String {
    format!("data: {value}\n\n")
}

/// A text-only answer.
pub fn answer(content: &str) -> String {
    [text(content), finish("stop"), done()].concat()
}

/// What the endpoint does for one pass.
pub enum Script {
    /// Replay this SSE body, split into chunks of `chunk_size` bytes.
    Body { sse: String, chunk_size: usize },
    /// Fail before any bytes are produced.
    FailOpen(ScriptoriumError),
    /// Yield these bytes and then a read error.
    BreakAfter(String),
    /// Open, then never produce a byte.
    Hang,
}

impl Script {
    pub fn body(sse: impl Into<String>) -> Self {
        Script::Body {
            sse: sse.into(),
            chunk_size: 5,
        }
    }
}

/// Endpoint that replays scripted passes and records every request.
#[derive(Default)]
pub struct ScriptedEndpoint {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<EndpointRequest>>,
    /// Replayed once the script runs out.
    repeat: Option<String>,
}

impl ScriptedEndpoint {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    /// Answer every pass with the same body.
    pub fn repeating(sse: impl Into<String>) -> Self {
        Self {
            repeat: Some(sse.into()),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<EndpointRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn split(sse: &str, chunk_size: usize) -> Vec<Result<Bytes, ScriptoriumError>> {
    sse.as_bytes()
        .chunks(chunk_size.max(1))
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect()
}

#[async_trait]
impl ModelEndpoint for ScriptedEndpoint {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open_stream(&self, request: &EndpointRequest) -> Result<ByteStream, ScriptoriumError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.scripts.lock().unwrap().pop_front();
        let script = match (next, &self.repeat) {
            (Some(script), _) => script,
            (None, Some(sse)) => Script::body(sse.clone()),
            (None, None) => return Err(ScriptoriumError::Stream("script exhausted".into())),
        };
        match script {
            Script::Body { sse, chunk_size } => {
                Ok(futures::stream::iter(split(&sse, chunk_size)).boxed())
            }
            Script::FailOpen(err) => Err(err),
            Script::BreakAfter(sse) => {
                let mut items = split(&sse, 5);
                items.push(Err(ScriptoriumError::Stream("connection reset".into())));
                Ok(futures::stream::iter(items).boxed())
            }
            Script::Hang => Ok(futures::stream::pending().boxed()),
        }
    }
}

type Behavior =
    dyn Fn(&ToolInvocation, usize) -> Result<ToolOutput, ScriptoriumError> + Send + Sync;

/// Handler whose result is computed from the invocation and the attempt count.
pub struct ScriptedHandler {
    behavior: Box<Behavior>,
    delays: Mutex<Vec<(String, Duration)>>,
    calls: Mutex<Vec<String>>,
    attempts: AtomicUsize,
}

impl ScriptedHandler {
    pub fn new(
        behavior: impl Fn(&ToolInvocation, usize) -> Result<ToolOutput, ScriptoriumError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            behavior: Box::new(behavior),
            delays: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Echo the tool name back as the result.
    pub fn echo() -> Self {
        Self::new(|inv, _| Ok(ToolOutput::new(json!({ "tool": inv.name, "id": inv.id }))))
    }

    /// Sleep before answering calls with this id.
    pub fn with_delay(self, tool_call_id: &str, delay: Duration) -> Self {
        self.delays
            .lock()
            .unwrap()
            .push((tool_call_id.to_string(), delay));
        self
    }

    /// Tool call ids in the order attempts started.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolHandler for ScriptedHandler {
    async fn handle(
        &self,
        invocation: &ToolInvocation,
        _ctx: &ToolContext,
        progress: &ProgressReporter,
    ) -> Result<ToolOutput, ScriptoriumError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(invocation.id.clone());
        progress.report(format!("running {}", invocation.name));
        let delay = self
            .delays
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| *id == invocation.id)
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        (self.behavior)(invocation, attempt)
    }
}

/// Executor with fast retries.
pub fn executor(handler: Arc<dyn ToolHandler>) -> ToolExecutor {
    ToolExecutor::new(handler).with_retry_policy(RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        multiplier: 2.0,
    })
}

pub fn context(mode: Mode, message: &str) -> AgentContext {
    AgentContext::builder()
        .conversation_id("conv-test")
        .mode(mode)
        .user_message(message)
        .build()
}

/// Run a turn and collect every event it emitted.
pub async fn run(
    controller: &PassController,
    ctx: AgentContext,
) -> (TurnOutcome, Vec<SequencedEvent>) {
    let (emitter, mut rx) = EventEmitter::channel();
    let outcome = controller.run_turn(ctx, &emitter).await;
    drop(emitter);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (outcome, events)
}

pub fn names(events: &[SequencedEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

/// Event names for one tool call, in delivery order.
pub fn names_for(events: &[SequencedEvent], tool_call_id: &str) -> Vec<&'static str> {
    events
        .iter()
        .filter(|e| e.event.tool_call_id() == Some(tool_call_id))
        .map(|e| e.name())
        .collect()
}

//! Tool dispatch with retry, timeout and failure isolation.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::ScriptoriumError;
use crate::tools::{ToolExecutionResult, ToolInvocation, ToolOutput};
use crate::util::retry::{RetryNotice, RetryPolicy};
use crate::util::timeout::with_timeout;

use super::context::ToolContext;
use super::tool_log::{ToolLog, ToolLogEntry, ToolLogStatus};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Business logic behind the tool catalog. Owned by the calling layer.
///
/// Return [`ScriptoriumError::ToolUnavailable`] (or a network/timeout error)
/// for failures worth retrying, anything else for terminal failures.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(
        &self,
        invocation: &ToolInvocation,
        ctx: &ToolContext,
        progress: &ProgressReporter,
    ) -> Result<ToolOutput, ScriptoriumError>;
}

/// Receives notifications raised while a tool runs.
pub trait ExecutionObserver: Send + Sync {
    fn progress(&self, invocation: &ToolInvocation, message: &str);
    fn retrying(&self, invocation: &ToolInvocation, notice: &RetryNotice);
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {
    fn progress(&self, _invocation: &ToolInvocation, _message: &str) {}
    fn retrying(&self, _invocation: &ToolInvocation, _notice: &RetryNotice) {}
}

type ProgressFn = dyn Fn(&str) + Send + Sync;

/// Handle a tool uses to report progress. Each call is forwarded immediately.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<ProgressFn>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}

impl ProgressReporter {
    pub fn new(sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    fn for_invocation(invocation: &ToolInvocation, observer: Arc<dyn ExecutionObserver>) -> Self {
        let invocation = invocation.clone();
        Self::new(move |message| observer.progress(&invocation, message))
    }

    pub fn report(&self, message: impl AsRef<str>) {
        (self.sink)(message.as_ref());
    }
}

/// Executes one invocation against the handler.
///
/// `execute` never fails: every outcome becomes a [`ToolExecutionResult`].
pub struct ToolExecutor {
    handler: Arc<dyn ToolHandler>,
    retry: RetryPolicy,
    timeout: Duration,
    log: Option<Arc<dyn ToolLog>>,
}

impl ToolExecutor {
    pub fn new(handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            handler,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TOOL_TIMEOUT,
            log: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Per-attempt timeout. A timed out attempt counts as a transient failure.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_log(mut self, log: Arc<dyn ToolLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Record an entry for a call that never reached the handler.
    pub fn log_denied(&self, invocation: &ToolInvocation, reason: &str) {
        self.record(
            invocation,
            ToolLogStatus::Failed,
            json!({ "error": reason, "denied": true }),
        );
    }

    pub async fn execute(
        &self,
        invocation: &ToolInvocation,
        ctx: &ToolContext,
        observer: Arc<dyn ExecutionObserver>,
    ) -> ToolExecutionResult {
        self.record(
            invocation,
            ToolLogStatus::Started,
            json!({ "arguments": invocation.arguments }),
        );
        let reporter = ProgressReporter::for_invocation(invocation, observer.clone());
        let reporter = &reporter;

        let outcome = self
            .retry
            .execute_with_notify(
                || self.attempt(invocation, ctx, reporter),
                |notice| {
                    observer.retrying(invocation, notice);
                    self.record(
                        invocation,
                        ToolLogStatus::Retrying,
                        json!({
                            "retryCount": notice.retry_count,
                            "retryNumber": notice.retry_number(),
                            "error": notice.error,
                            "delayMs": notice.delay.as_millis() as u64,
                        }),
                    );
                },
            )
            .await;

        match outcome {
            Ok(output) => {
                debug!(tool_call_id = %invocation.id, tool_name = %invocation.name, "tool succeeded");
                self.record(
                    invocation,
                    ToolLogStatus::Succeeded,
                    json!({ "result": output.result }),
                );
                ToolExecutionResult::succeeded(output)
            }
            Err(err) => {
                let message = failure_message(&err);
                warn!(
                    tool_call_id = %invocation.id,
                    tool_name = %invocation.name,
                    error = %err,
                    "tool failed"
                );
                self.record(invocation, ToolLogStatus::Failed, json!({ "error": message }));
                ToolExecutionResult::failed(message)
            }
        }
    }

    async fn attempt(
        &self,
        invocation: &ToolInvocation,
        ctx: &ToolContext,
        progress: &ProgressReporter,
    ) -> Result<ToolOutput, ScriptoriumError> {
        let call = AssertUnwindSafe(self.handler.handle(invocation, ctx, progress)).catch_unwind();
        with_timeout(self.timeout, async {
            match call.await {
                Ok(result) => result,
                Err(panic) => Err(ScriptoriumError::tool_failed(
                    invocation.name.clone(),
                    format!("handler panicked: {}", panic_message(panic.as_ref())),
                )),
            }
        })
        .await
    }

    fn record(&self, invocation: &ToolInvocation, status: ToolLogStatus, payload: serde_json::Value) {
        if let Some(log) = &self.log {
            log.append(ToolLogEntry::new(
                invocation.id.clone(),
                invocation.name.clone(),
                status,
                payload,
            ));
        }
    }
}

/// Error text folded back to the model.
fn failure_message(err: &ScriptoriumError) -> String {
    match err {
        ScriptoriumError::ToolExecution { message, .. }
        | ScriptoriumError::ToolUnavailable { message, .. } => message.clone(),
        ScriptoriumError::Timeout(ms) => format!("Tool timed out after {ms}ms"),
        other => other.to_string(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

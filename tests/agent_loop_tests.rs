//! End-to-end turn tests against a scripted endpoint.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::*;
use scriptorium::agent_loop::controller::DEFAULT_FALLBACK_MESSAGE;
use scriptorium::agent_loop::{
    BackgroundQueue, ControllerSettings, ConversationStore, GapDetector, Identity,
    IdentityResolver, MemoryToolLog, PassController, ToolLogStatus, TurnEvent, TurnStatus,
};
use scriptorium::error::ScriptoriumError;
use scriptorium::gate::ModeGate;
use scriptorium::tools::ToolOutput;
use scriptorium::types::{ChatMessage, Mode, Role};
use scriptorium::workspace::InMemoryWorkspace;

fn controller(endpoint: Arc<ScriptedEndpoint>, handler: Arc<ScriptedHandler>) -> PassController {
    PassController::new(endpoint, Arc::new(executor(handler)))
}

fn tool_pass(calls: &[(usize, &str, &str, serde_json::Value)]) -> String {
    let mut sse: String = calls
        .iter()
        .map(|(index, id, name, args)| tool_call(*index, id, name, args.clone()))
        .collect();
    sse.push_str(&finish("tool_calls"));
    sse.push_str(&done());
    sse
}

#[tokio::test]
async fn text_answer_completes_in_one_pass() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![Script::body(
        [text("Hel"), text("lo"), finish("stop"), done()].concat(),
    )]));
    let controller = controller(endpoint.clone(), Arc::new(ScriptedHandler::echo()));

    let (outcome, events) = run(&controller, context(Mode::Chat, "hi")).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.message, "Hello");
    assert_eq!(outcome.passes, 1);
    assert_eq!(
        names(&events),
        vec!["message:chunk", "message:chunk", "message:complete", "done"]
    );
    let roles: Vec<Role> = outcome.new_messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(endpoint.request_count(), 1);
}

#[tokio::test]
async fn streamed_tool_call_runs_and_feeds_the_next_pass() {
    let first = [
        text("Let me look. "),
        tool_delta(0, Some("call_1"), Some("read_content"), "{\"content_"),
        tool_delta(0, None, None, "id\": \"content-1\"}"),
        finish("tool_calls"),
        done(),
    ]
    .concat();
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        Script::body(first),
        Script::body(answer("It is about the new editor.")),
    ]));
    let executor = common::executor(Arc::new(InMemoryWorkspace::seeded()));
    let controller = PassController::new(endpoint.clone(), Arc::new(executor));

    let (outcome, events) = run(&controller, context(Mode::Chat, "What is content-1?")).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.message, "It is about the new editor.");
    assert_eq!(outcome.passes, 2);
    assert_eq!(
        names_for(&events, "call_1"),
        vec!["tool:preparing", "tool:start", "tool:complete"]
    );
    let complete = events
        .iter()
        .find_map(|e| match &e.event {
            TurnEvent::ToolComplete { success, result, .. } => Some((*success, result.clone())),
            _ => None,
        })
        .unwrap();
    assert!(complete.0);
    assert_eq!(complete.1.unwrap()["title"], "Launch notes");

    let second = &endpoint.requests()[1].messages;
    let assistant = second
        .iter()
        .find(|m| m.role == Role::Assistant)
        .unwrap();
    assert_eq!(assistant.tool_calls[0].id, "call_1");
    assert_eq!(assistant.tool_calls[0].arguments, json!({ "content_id": "content-1" }));
    let tool_message = second.last().unwrap();
    assert_eq!(tool_message.role, Role::Tool);
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
}

#[tokio::test]
async fn chunk_boundaries_do_not_change_the_turn() {
    let script = [
        text("Résumé "),
        tool_call(0, "call_a", "read_workspace_summary", json!({})),
        finish("tool_calls"),
        done(),
    ]
    .concat();

    let mut observed = Vec::new();
    for chunk_size in [1, 3, 7, 4096] {
        let endpoint = Arc::new(ScriptedEndpoint::new(vec![
            Script::Body {
                sse: script.clone(),
                chunk_size,
            },
            Script::Body {
                sse: answer("Done ✓"),
                chunk_size,
            },
        ]));
        let controller = controller(endpoint, Arc::new(ScriptedHandler::echo()));
        let (outcome, events) = run(&controller, context(Mode::Agent, "summary")).await;
        let chunks: String = events
            .iter()
            .filter_map(|e| match &e.event {
                TurnEvent::MessageChunk { chunk, .. } => Some(chunk.clone()),
                _ => None,
            })
            .collect();
        let tool_names: Vec<&str> = events
            .iter()
            .map(|e| e.name())
            .filter(|n| n.starts_with("tool:"))
            .collect();
        observed.push((outcome.message, chunks, tool_names.join(",")));
    }

    for other in &observed[1..] {
        assert_eq!(other, &observed[0]);
    }
    assert_eq!(observed[0].0, "Done ✓");
    assert_eq!(observed[0].1, "Résumé Done ✓");
}

#[tokio::test]
async fn chat_mode_denies_write_tools_without_calling_the_handler() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        Script::body(tool_pass(&[(
            0,
            "call_w",
            "content_write",
            json!({ "title": "Post", "body": "hello" }),
        )])),
        Script::body(answer("Switch to agent mode to save it.")),
    ]));
    let handler = Arc::new(ScriptedHandler::echo());
    let log = Arc::new(MemoryToolLog::new());
    let executor = common::executor(handler.clone()).with_log(log.clone());
    let controller = PassController::new(endpoint.clone(), Arc::new(executor));

    let (outcome, events) = run(&controller, context(Mode::Chat, "save a post")).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert!(handler.calls().is_empty());
    let denial = events
        .iter()
        .find_map(|e| match &e.event {
            TurnEvent::ToolComplete { success, error, .. } => Some((*success, error.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(denial, (false, Some(ModeGate::denial_message("content_write"))));
    assert_eq!(log.statuses_for("call_w"), vec![ToolLogStatus::Failed]);

    let advertised: Vec<String> = endpoint.requests()[0]
        .tools
        .iter()
        .map(|t| t.name.clone())
        .collect();
    assert!(!advertised.iter().any(|n| n == "content_write"));
    assert!(advertised.iter().any(|n| n == "read_content"));
}

#[tokio::test]
async fn pass_budget_bounds_a_model_that_never_stops_calling_tools() {
    let endpoint = Arc::new(ScriptedEndpoint::repeating(tool_pass(&[(
        0,
        "call_loop",
        "read_content_list",
        json!({}),
    )])));
    let controller = controller(endpoint.clone(), Arc::new(ScriptedHandler::echo()));
    let ctx = scriptorium::agent_loop::AgentContext::builder()
        .conversation_id("conv-budget")
        .mode(Mode::Agent)
        .user_message("loop forever")
        .max_passes(3)
        .build();

    let (outcome, events) = run(&controller, ctx).await;

    assert_eq!(outcome.status, TurnStatus::BudgetExhausted);
    assert_eq!(outcome.passes, 3);
    assert_eq!(endpoint.request_count(), 3);
    assert_eq!(outcome.message, DEFAULT_FALLBACK_MESSAGE);
    assert_eq!(outcome.tool_results.len(), 3);
    assert_eq!(names(&events).last(), Some(&"done"));
    assert_eq!(
        names(&events).iter().filter(|n| **n == "message:complete").count(),
        1
    );
    let per_call = names_for(&events, "call_loop");
    assert_eq!(per_call.iter().filter(|n| **n == "tool:start").count(), 3);
    assert_eq!(per_call.iter().filter(|n| **n == "tool:complete").count(), 3);
}

#[tokio::test]
async fn tool_call_id_reused_in_a_later_pass_gets_its_own_lifecycle() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        Script::body(tool_pass(&[(0, "call_1", "read_content_list", json!({}))])),
        Script::body(tool_pass(&[(0, "call_1", "read_content_list", json!({ "status": "draft" }))])),
        Script::body(answer("Two lists read.")),
    ]));
    let handler = Arc::new(ScriptedHandler::echo());
    let controller = controller(endpoint, handler.clone());

    let (outcome, events) = run(&controller, context(Mode::Agent, "list twice")).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(handler.calls(), vec!["call_1", "call_1"]);
    assert_eq!(outcome.tool_results.len(), 2);
    let lifecycle = ["tool:preparing", "tool:start", "tool:progress", "tool:complete"];
    assert_eq!(names_for(&events, "call_1"), [lifecycle, lifecycle].concat());
}

#[tokio::test]
async fn zero_pass_budget_never_calls_the_endpoint() {
    let endpoint = Arc::new(ScriptedEndpoint::repeating(answer("unused")));
    let controller = controller(endpoint.clone(), Arc::new(ScriptedHandler::echo()));
    let ctx = scriptorium::agent_loop::AgentContext::builder()
        .conversation_id("conv-zero")
        .mode(Mode::Agent)
        .user_message("hi")
        .max_passes(0)
        .build();

    let (outcome, events) = run(&controller, ctx).await;

    assert_eq!(outcome.status, TurnStatus::BudgetExhausted);
    assert_eq!(endpoint.request_count(), 0);
    assert_eq!(names(&events), vec!["message:complete", "done"]);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_and_reported() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        Script::body(tool_pass(&[(0, "call_r", "read_source_list", json!({}))])),
        Script::body(answer("Found it.")),
    ]));
    let handler = Arc::new(ScriptedHandler::new(|invocation, attempt| {
        if attempt < 2 {
            Err(ScriptoriumError::tool_unavailable(
                invocation.name.clone(),
                "backend busy",
            ))
        } else {
            Ok(ToolOutput::new(json!({ "sources": [] })))
        }
    }));
    let log = Arc::new(MemoryToolLog::new());
    let executor = common::executor(handler.clone()).with_log(log.clone());
    let controller = PassController::new(endpoint, Arc::new(executor));

    let (outcome, events) = run(&controller, context(Mode::Chat, "sources?")).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(handler.calls().len(), 3);
    let retries: Vec<(u32, u32)> = events
        .iter()
        .filter_map(|e| match &e.event {
            TurnEvent::ToolRetrying {
                retry_count,
                retry_number,
                ..
            } => Some((*retry_count, *retry_number)),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![(0, 1), (1, 2)]);
    assert_eq!(
        names_for(&events, "call_r").last(),
        Some(&"tool:complete")
    );
    assert_eq!(
        log.statuses_for("call_r"),
        vec![
            ToolLogStatus::Started,
            ToolLogStatus::Retrying,
            ToolLogStatus::Retrying,
            ToolLogStatus::Succeeded,
        ]
    );
    assert!(outcome.tool_results[0].result.success);
}

#[tokio::test(start_paused = true)]
async fn parallel_reads_complete_out_of_order_but_fold_in_index_order() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        Script::body(tool_pass(&[
            (0, "call_slow", "read_content_list", json!({})),
            (1, "call_fast", "read_source_list", json!({})),
        ])),
        Script::body(answer("Both read.")),
    ]));
    let handler = Arc::new(
        ScriptedHandler::echo()
            .with_delay("call_slow", Duration::from_millis(200))
            .with_delay("call_fast", Duration::from_millis(10)),
    );
    let controller = controller(endpoint.clone(), handler);

    let (outcome, events) = run(&controller, context(Mode::Chat, "read both")).await;

    let completes: Vec<&str> = events
        .iter()
        .filter(|e| e.name() == "tool:complete")
        .filter_map(|e| e.event.tool_call_id())
        .collect();
    assert_eq!(completes, vec!["call_fast", "call_slow"]);

    let folded: Vec<Option<String>> = outcome
        .new_messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.tool_call_id.clone())
        .collect();
    assert_eq!(
        folded,
        vec![Some("call_slow".to_string()), Some("call_fast".to_string())]
    );
    let second = &endpoint.requests()[1].messages;
    assert_eq!(second[second.len() - 2].tool_call_id.as_deref(), Some("call_slow"));
}

#[tokio::test(start_paused = true)]
async fn write_tools_run_alone() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        Script::body(tool_pass(&[
            (0, "call_r1", "read_content_list", json!({})),
            (
                1,
                "call_w",
                "content_write",
                json!({ "title": "T", "body": "B" }),
            ),
            (2, "call_r2", "read_source_list", json!({})),
        ])),
        Script::body(answer("ok")),
    ]));
    let handler = Arc::new(
        ScriptedHandler::echo()
            .with_delay("call_r1", Duration::from_millis(100))
            .with_delay("call_w", Duration::from_millis(100)),
    );
    let controller = controller(endpoint, handler.clone());

    let (_, events) = run(&controller, context(Mode::Agent, "mixed")).await;

    assert_eq!(handler.calls(), vec!["call_r1", "call_w", "call_r2"]);
    let position = |name: &str, id: &str| {
        events
            .iter()
            .position(|e| e.name() == name && e.event.tool_call_id() == Some(id))
            .unwrap()
    };
    assert!(position("tool:complete", "call_r1") < position("tool:start", "call_w"));
    assert!(position("tool:complete", "call_w") < position("tool:start", "call_r2"));
}

#[tokio::test]
async fn events_are_sequenced_and_time_ordered() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        Script::body(tool_pass(&[(0, "call_1", "read_content_list", json!({}))])),
        Script::body(answer("done")),
    ]));
    let controller = controller(endpoint, Arc::new(ScriptedHandler::echo()));

    let (_, events) = run(&controller, context(Mode::Agent, "list")).await;

    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    let expected: Vec<u64> = (1..=events.len() as u64).collect();
    assert_eq!(seqs, expected);
    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(
        names_for(&events, "call_1"),
        vec!["tool:preparing", "tool:start", "tool:progress", "tool:complete"]
    );
}

#[tokio::test]
async fn endpoint_failure_ends_with_error_then_done() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![Script::FailOpen(
        ScriptoriumError::Authentication("invalid key".into()),
    )]));
    let controller = controller(endpoint, Arc::new(ScriptedHandler::echo()));

    let (outcome, events) = run(&controller, context(Mode::Agent, "hi")).await;

    assert_eq!(outcome.status, TurnStatus::Failed);
    assert_eq!(names(&events), vec!["error", "done"]);
    assert_eq!(
        outcome.message,
        ScriptoriumError::Authentication("invalid key".into()).user_message()
    );
    assert!(outcome.error.unwrap().contains("invalid key"));
}

#[tokio::test]
async fn broken_stream_after_text_still_reports_an_error() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![Script::BreakAfter(text(
        "partial",
    ))]));
    let controller = controller(endpoint, Arc::new(ScriptedHandler::echo()));

    let (outcome, events) = run(&controller, context(Mode::Agent, "hi")).await;

    assert_eq!(outcome.status, TurnStatus::Failed);
    assert_eq!(names(&events), vec!["message:chunk", "error", "done"]);
}

#[tokio::test]
async fn in_band_provider_error_fails_the_turn() {
    let sse = [
        text("one moment"),
        frame(json!({ "error": { "message": "overloaded" } })),
    ]
    .concat();
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![Script::body(sse)]));
    let controller = controller(endpoint, Arc::new(ScriptedHandler::echo()));

    let (outcome, events) = run(&controller, context(Mode::Agent, "hi")).await;

    assert_eq!(outcome.status, TurnStatus::Failed);
    assert!(!names(&events).contains(&"message:complete"));
}

#[tokio::test(start_paused = true)]
async fn idle_stream_times_out() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![Script::Hang]));
    let controller = controller(endpoint, Arc::new(ScriptedHandler::echo())).with_settings(
        ControllerSettings {
            stream_idle_timeout: Duration::from_secs(1),
            ..ControllerSettings::default()
        },
    );

    let (outcome, events) = run(&controller, context(Mode::Agent, "hi")).await;

    assert_eq!(outcome.status, TurnStatus::Failed);
    assert_eq!(names(&events), vec!["error", "done"]);
}

#[tokio::test]
async fn malformed_tool_arguments_are_dropped() {
    let sse = [
        tool_delta(0, Some("call_bad"), Some("read_content"), "{not json"),
        finish("tool_calls"),
        done(),
    ]
    .concat();
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![Script::body(sse)]));
    let handler = Arc::new(ScriptedHandler::echo());
    let controller = controller(endpoint.clone(), handler.clone());

    let (outcome, events) = run(&controller, context(Mode::Agent, "read")).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.message, DEFAULT_FALLBACK_MESSAGE);
    assert!(handler.calls().is_empty());
    assert!(!names(&events).contains(&"tool:start"));
    assert_eq!(endpoint.request_count(), 1);
}

#[tokio::test]
async fn explicit_stop_with_tool_deltas_does_not_run_tools() {
    let sse = [
        text("Nothing to look up."),
        tool_call(0, "call_stray", "read_content_list", json!({})),
        finish("stop"),
        done(),
    ]
    .concat();
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![Script::body(sse)]));
    let handler = Arc::new(ScriptedHandler::echo());
    let controller = controller(endpoint.clone(), handler.clone());

    let (outcome, events) = run(&controller, context(Mode::Agent, "hi")).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.message, "Nothing to look up.");
    assert!(handler.calls().is_empty());
    assert!(outcome.tool_results.is_empty());
    assert!(!names(&events).contains(&"tool:start"));
    assert_eq!(endpoint.request_count(), 1);
}

#[tokio::test]
async fn cancel_stops_a_hung_turn() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![Script::Hang]));
    let controller = Arc::new(controller(endpoint, Arc::new(ScriptedHandler::echo())));

    let mut handle = controller.start_turn(context(Mode::Agent, "hi"));
    let mut rx = handle.take_events().unwrap();
    assert!(handle.take_events().is_none());
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();
    let outcome = handle.wait().await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(outcome.status, TurnStatus::Canceled);
    assert_eq!(
        outcome.error.as_deref(),
        Some(ScriptoriumError::Canceled.to_string().as_str())
    );
    assert_eq!(names(&events), vec!["error", "done"]);
    assert_eq!(
        events[0].event,
        TurnEvent::Error {
            message: "canceled".into()
        }
    );
}

#[tokio::test]
async fn cancel_during_a_running_tool_completes_it_as_canceled() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![Script::body(tool_pass(&[
        (0, "call_slow", "read_content_list", json!({})),
        (1, "call_fast", "read_workspace_summary", json!({})),
    ]))]));
    let handler =
        Arc::new(ScriptedHandler::echo().with_delay("call_slow", Duration::from_secs(3600)));
    let controller = Arc::new(controller(endpoint, handler.clone()));

    let mut handle = controller.start_turn(context(Mode::Agent, "list"));
    let mut rx = handle.take_events().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();
    let outcome = handle.wait().await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(outcome.status, TurnStatus::Canceled);
    assert!(outcome.error.is_some());
    assert_eq!(
        names_for(&events, "call_slow"),
        vec!["tool:preparing", "tool:start", "tool:progress", "tool:complete"]
    );
    let slow_complete = events
        .iter()
        .rev()
        .find(|e| e.event.tool_call_id() == Some("call_slow"))
        .unwrap();
    match &slow_complete.event {
        TurnEvent::ToolComplete { success, error, .. } => {
            assert!(!success);
            assert_eq!(error.as_deref(), Some("canceled"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    // The sibling finished before cancel; its completion is not repeated.
    assert_eq!(
        names_for(&events, "call_fast")
            .iter()
            .filter(|n| **n == "tool:complete")
            .count(),
        1
    );
    let all = names(&events);
    assert_eq!(&all[all.len() - 2..], &["error", "done"]);
    assert!(!all.contains(&"message:complete"));
}

#[tokio::test]
async fn concurrent_turns_do_not_share_state() {
    let endpoint = Arc::new(ScriptedEndpoint::repeating(answer("same answer")));
    let controller = Arc::new(controller(endpoint, Arc::new(ScriptedHandler::echo())));

    let mut first = controller.start_turn(context(Mode::Chat, "one"));
    let mut second = controller.start_turn(context(Mode::Agent, "two"));
    let mut rx_first = first.take_events().unwrap();
    let mut rx_second = second.take_events().unwrap();
    let (a, b) = (first.wait().await.unwrap(), second.wait().await.unwrap());

    assert_ne!(a.message_id, b.message_id);
    for rx in [&mut rx_first, &mut rx_second] {
        let mut seqs = Vec::new();
        while let Some(event) = rx.recv().await {
            seqs.push(event.seq);
        }
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}

#[tokio::test]
async fn edit_request_without_target_asks_first() {
    let endpoint = Arc::new(ScriptedEndpoint::repeating(answer("unused")));
    let controller = controller(endpoint.clone(), Arc::new(ScriptedHandler::echo()))
        .with_clarifier(Arc::new(GapDetector::new().unwrap()));

    let (outcome, events) = run(&controller, context(Mode::Agent, "please rewrite it")).await;

    assert_eq!(outcome.status, TurnStatus::NeedsClarification);
    assert_eq!(endpoint.request_count(), 0);
    assert_eq!(names(&events), vec!["message:complete", "done"]);
}

struct StalledStore;

#[async_trait]
impl ConversationStore for StalledStore {
    async fn append_message(
        &self,
        _conversation_id: &str,
        _message: &ChatMessage,
    ) -> Result<(), ScriptoriumError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test]
async fn slow_persistence_does_not_hold_up_the_turn() {
    let (queue, _failures, _worker) = BackgroundQueue::start();
    let endpoint = Arc::new(ScriptedEndpoint::repeating(answer("quick")));
    let controller = controller(endpoint, Arc::new(ScriptedHandler::echo()))
        .with_persistence(Arc::new(StalledStore), queue.clone());

    let finished = tokio::time::timeout(
        Duration::from_secs(5),
        run(&controller, context(Mode::Chat, "hi")),
    )
    .await;

    let (outcome, _) = finished.unwrap();
    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(queue.pending(), 2);
}

struct SlowIdentity;

#[async_trait]
impl IdentityResolver for SlowIdentity {
    async fn resolve(&self, _conversation_id: &str) -> Result<Option<Identity>, ScriptoriumError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(None)
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_identity_lookup_is_abandoned() {
    let endpoint = Arc::new(ScriptedEndpoint::repeating(answer("hello")));
    let controller = controller(endpoint.clone(), Arc::new(ScriptedHandler::echo()))
        .with_identity_resolver(Arc::new(SlowIdentity))
        .with_settings(ControllerSettings {
            identity_timeout: Duration::from_millis(50),
            ..ControllerSettings::default()
        });

    let (outcome, _) = run(&controller, context(Mode::Chat, "hi")).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(endpoint.request_count(), 1);
}

#[tokio::test]
async fn edit_in_chat_mode_is_explained_not_executed() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        Script::body(tool_pass(&[(
            0,
            "call_edit",
            "edit_section",
            json!({ "content_id": "content-1", "section_id": "content-1-s1", "operation": "delete" }),
        )])),
        Script::body(answer("I can only delete sections in agent mode.")),
    ]));
    let workspace = Arc::new(InMemoryWorkspace::seeded());
    let executor = common::executor(workspace.clone());
    let controller = PassController::new(endpoint.clone(), Arc::new(executor));

    let (outcome, _) = run(&controller, context(Mode::Chat, "delete section content-1-s1")).await;

    assert_eq!(outcome.message, "I can only delete sections in agent mode.");
    assert_eq!(workspace.content("content-1").unwrap().sections.len(), 2);
    let folded = endpoint.requests()[1].messages.last().cloned().unwrap();
    assert!(folded.content.contains(&ModeGate::denial_message("edit_section")));
}

#[tokio::test]
async fn truncated_frame_mid_turn_is_skipped() {
    let sse = [
        text("Here "),
        "data: {\"choices\": [{\"delta\": {\"content\n\n".to_string(),
        text("you go"),
        finish("stop"),
        done(),
    ]
    .concat();
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![Script::body(sse)]));
    let controller = controller(endpoint, Arc::new(ScriptedHandler::echo()));

    let (outcome, _) = run(&controller, context(Mode::Chat, "list my content")).await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.message, "Here you go");
}

#[tokio::test(start_paused = true)]
async fn a_handler_that_always_fails_still_yields_a_final_message() {
    let endpoint = Arc::new(ScriptedEndpoint::new(vec![
        Script::body(tool_pass(&[(0, "call_x", "read_workspace_summary", json!({}))])),
        Script::body(answer("The workspace is unavailable right now.")),
    ]));
    let handler = Arc::new(ScriptedHandler::new(|invocation, _| {
        Err(ScriptoriumError::tool_unavailable(
            invocation.name.clone(),
            "database offline",
        ))
    }));
    let controller = controller(endpoint, handler.clone());

    let (outcome, events) = run(&controller, context(Mode::Agent, "summary")).await;

    assert_eq!(handler.calls().len(), 3);
    assert_eq!(outcome.status, TurnStatus::Completed);
    let result = &outcome.tool_results[0].result;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("database offline"));
    assert_eq!(
        names(&events).iter().filter(|n| **n == "message:complete").count(),
        1
    );
}

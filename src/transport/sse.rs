//! Server-sent event framing of turn events.

use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::agent_loop::events::{SequencedEvent, TurnEvent};

pub const SSE_CONTENT_TYPE: &str = "text/event-stream";

/// Frame one event as `id:`/`event:`/`data:` lines plus a blank line.
pub fn encode_sse(event: &SequencedEvent) -> Bytes {
    Bytes::from(format!(
        "id: {}\nevent: {}\ndata: {}\n\n",
        event.seq,
        event.name(),
        event.data()
    ))
}

/// Drain the turn's event channel as SSE frames, ending after `done`.
pub fn sse_stream(mut rx: mpsc::UnboundedReceiver<SequencedEvent>) -> BoxStream<'static, Bytes> {
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let finished = matches!(event.event, TurnEvent::Done);
            yield encode_sse(&event);
            if finished {
                break;
            }
        }
    };
    Box::pin(stream)
}

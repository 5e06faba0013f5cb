//! Incremental decoder for `data:` framed chat completion streams.

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ScriptoriumError;
use crate::provider::ByteStream;
use crate::types::{FinishReason, StreamChunk, ToolCallDelta};

const DONE_SENTINEL: &str = "[DONE]";

/// Decoded chunks of one pass.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ScriptoriumError>>;

#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: Option<WireDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Line-oriented decoder with a carry-over buffer.
///
/// Bytes are buffered until a newline is seen, so frames (and multi-byte
/// characters) split across reads decode the same as unsplit input.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    done: bool,
    skipped: usize,
    provider_error: Option<String>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one physical read and return the chunks of every completed line.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        if self.is_done() {
            return out;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line, &mut out);
            if self.is_done() {
                self.buffer.clear();
                break;
            }
        }
        out
    }

    /// Flush the trailing unterminated line at end of input.
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        if !self.is_done() && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.decode_line(&line, &mut out);
        }
        self.buffer.clear();
        out
    }

    /// True once `[DONE]` or an in-band error frame has been seen.
    pub fn is_done(&self) -> bool {
        self.done || self.provider_error.is_some()
    }

    /// Number of frames that failed to decode and were skipped.
    pub fn skipped_frames(&self) -> usize {
        self.skipped
    }

    /// In-band error reported by the endpoint, if any.
    pub fn take_provider_error(&mut self) -> Option<String> {
        self.provider_error.take()
    }

    fn decode_line(&mut self, raw: &[u8], out: &mut Vec<StreamChunk>) {
        let Ok(line) = std::str::from_utf8(raw) else {
            self.skipped += 1;
            warn!(bytes = raw.len(), "skipping stream line with invalid UTF-8");
            return;
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(data) = line.strip_prefix("data:") else {
            // event:, id: and retry: fields carry nothing we need
            return;
        };
        let data = data.trim_start();
        if data == DONE_SENTINEL {
            self.done = true;
            return;
        }

        match serde_json::from_str::<WireFrame>(data) {
            Ok(frame) => self.split_frame(frame, out),
            Err(err) => {
                self.skipped += 1;
                warn!(error = %err, frame = data, "skipping malformed stream frame");
            }
        }
    }

    fn split_frame(&mut self, frame: WireFrame, out: &mut Vec<StreamChunk>) {
        if let Some(error) = frame.error {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .or_else(|| error.as_str().map(str::to_string))
                .unwrap_or_else(|| error.to_string());
            self.provider_error = Some(message);
            return;
        }

        let Some(choice) = frame.choices.into_iter().next() else {
            return;
        };
        let delta = choice.delta.unwrap_or_default();

        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            out.push(StreamChunk::TextDelta { content });
        }
        for (position, call) in delta.tool_calls.unwrap_or_default().into_iter().enumerate() {
            let function = call.function.unwrap_or_default();
            out.push(StreamChunk::ToolCallDelta(ToolCallDelta {
                index: call.index.unwrap_or(position),
                id: call.id.filter(|id| !id.is_empty()),
                name_part: function.name,
                arguments_part: function.arguments,
            }));
        }
        if let Some(reason) = choice.finish_reason {
            out.push(StreamChunk::FinishSignal {
                reason: FinishReason::from_provider(&reason),
            });
        }
    }
}

/// Decode a raw byte stream into chunks.
///
/// A read error or an in-band error frame is yielded as `Err` and ends the
/// stream. Input after `[DONE]` is not read.
pub fn decode_stream(bytes: ByteStream) -> ChunkStream {
    let stream = async_stream::stream! {
        let mut decoder = StreamDecoder::new();
        let mut bytes = bytes;

        while let Some(read) = bytes.next().await {
            let read = match read {
                Ok(b) => b,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            for chunk in decoder.feed(&read) {
                yield Ok(chunk);
            }
            if let Some(message) = decoder.take_provider_error() {
                yield Err(ScriptoriumError::Stream(message));
                return;
            }
            if decoder.is_done() {
                break;
            }
        }

        for chunk in decoder.finish() {
            yield Ok(chunk);
        }
        if let Some(message) = decoder.take_provider_error() {
            yield Err(ScriptoriumError::Stream(message));
            return;
        }
        debug!(skipped = decoder.skipped_frames(), "stream decoded");
    };
    Box::pin(stream)
}

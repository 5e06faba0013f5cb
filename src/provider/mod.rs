//! Model endpoint trait and implementations.

pub mod http;

#[cfg(feature = "openai")]
pub mod openai;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::ScriptoriumError;
use crate::types::{ChatMessage, GenerationSettings, ToolChoice};

/// Raw response body of a streaming request.
pub type ByteStream = BoxStream<'static, Result<Bytes, ScriptoriumError>>;

/// A request sent to the model endpoint for one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub settings: GenerationSettings,
}

/// Tool definition sent to the endpoint.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Streaming language-model endpoint.
///
/// Implementations return the raw `data:` framed body; decoding happens in
/// [`crate::stream::decode_stream`]. Errors returned from `open_stream`, and
/// errors yielded by the byte stream, end the current turn.
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// Endpoint name for logging.
    fn name(&self) -> &str;

    async fn open_stream(&self, request: &EndpointRequest) -> Result<ByteStream, ScriptoriumError>;
}
